//! Heuristic anomaly detection
//!
//! Maintains sliding windows over the live stream and compares current
//! rates against an adaptive baseline. Baselines stay at their initial
//! constants for a learning period after the first observed packet, then
//! the packet-rate baseline adapts to the measured 60-second rate.

use std::collections::{HashMap, HashSet};
use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use crate::alert::{Alert, AlertSink, AlertSource, Category, Severity};
use crate::core::packet::{PacketView, Protocol};
use crate::error::Result;
use crate::window::{SourceTable, TimedWindow};

/// Ports the brute-force check watches.
const BRUTE_FORCE_PORTS: [u16; 6] = [22, 21, 23, 3389, 1433, 3306];

const TRAFFIC_WINDOW_CAPACITY: usize = 500;
const ACTIVITY_WINDOW_CAPACITY: usize = 200;

/// What the horizontal-scan heuristic counts.
///
/// The upstream behavior counted distinct destination *ports* above 1024 in
/// the source's port-activity window even though the check gates on the
/// source port; `Hosts` implements the arguably intended semantics of
/// counting distinct destination hosts. The choice is deliberate and
/// configurable rather than guessed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HorizontalScanMode {
    Ports,
    Hosts,
}

impl Default for HorizontalScanMode {
    fn default() -> Self {
        HorizontalScanMode::Ports
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyConfig {
    /// Seconds after the first packet during which baselines stay constant.
    #[serde(default = "default_learning_period")]
    pub learning_period_secs: f64,
    /// Horizontal-scan counting semantics.
    #[serde(default)]
    pub horizontal_scan: HorizontalScanMode,
    /// Ceiling on tracked sources before least-recently-written eviction.
    #[serde(default = "default_max_sources")]
    pub max_tracked_sources: usize,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            learning_period_secs: default_learning_period(),
            horizontal_scan: HorizontalScanMode::default(),
            max_tracked_sources: default_max_sources(),
        }
    }
}

fn default_learning_period() -> f64 {
    300.0
}

fn default_max_sources() -> usize {
    100_000
}

/// Adaptive reference values used as anomaly-threshold denominators.
#[derive(Debug, Clone, Copy)]
pub struct Baselines {
    pub packets_per_second: f64,
    pub unique_ports_per_ip: usize,
    pub connections_per_minute: usize,
}

impl Default for Baselines {
    fn default() -> Self {
        Self {
            packets_per_second: 1000.0,
            unique_ports_per_ip: 25,
            connections_per_minute: 50,
        }
    }
}

pub struct AnomalyDetector {
    config: AnomalyConfig,
    /// Global window of recent packet timestamps.
    traffic: TimedWindow<()>,
    /// Per-source `(dport, ts)` windows.
    port_activity: SourceTable<TimedWindow<u16>>,
    /// Per-source destination-host windows, fed only in `Hosts` mode.
    host_activity: SourceTable<TimedWindow<IpAddr>>,
    /// Per-source packet timestamp windows.
    ip_activity: SourceTable<TimedWindow<()>>,
    protocol_counts: HashMap<Protocol, u64>,
    baselines: Baselines,
    /// Timestamp of the first observed packet; anchors the learning period.
    start_ts: Option<f64>,
}

impl AnomalyDetector {
    pub fn new(config: AnomalyConfig) -> Self {
        let max_sources = config.max_tracked_sources;
        Self {
            config,
            traffic: TimedWindow::new(TRAFFIC_WINDOW_CAPACITY),
            port_activity: SourceTable::new(max_sources),
            host_activity: SourceTable::new(max_sources),
            ip_activity: SourceTable::new(max_sources),
            protocol_counts: HashMap::new(),
            baselines: Baselines::default(),
            start_ts: None,
        }
    }

    pub fn baselines(&self) -> Baselines {
        self.baselines
    }

    /// Record one packet and run every anomaly check against it.
    pub fn analyze(&mut self, pkt: &PacketView, sink: &dyn AlertSink) -> Result<()> {
        let now = pkt.ts;
        let start = *self.start_ts.get_or_insert(now);

        self.traffic.push((), now);
        self.port_activity
            .get_or_insert_with(pkt.src_ip, now, || {
                TimedWindow::new(ACTIVITY_WINDOW_CAPACITY)
            })
            .push(pkt.dport, now);
        if self.config.horizontal_scan == HorizontalScanMode::Hosts && pkt.sport > 1024 {
            self.host_activity
                .get_or_insert_with(pkt.src_ip, now, || {
                    TimedWindow::new(ACTIVITY_WINDOW_CAPACITY)
                })
                .push(pkt.dst_ip, now);
        }
        self.ip_activity
            .get_or_insert_with(pkt.src_ip, now, || {
                TimedWindow::new(ACTIVITY_WINDOW_CAPACITY)
            })
            .push((), now);
        *self.protocol_counts.entry(pkt.proto).or_insert(0) += 1;

        if now - start > self.config.learning_period_secs {
            self.update_baselines(now);
        }

        self.check_traffic_spike(now, sink);
        self.check_stealth_scan(pkt, now, sink);
        self.check_brute_force(pkt, now, sink);
        self.check_protocol_distribution(sink);
        self.check_vertical_scan(pkt, now, sink);
        self.check_horizontal_scan(pkt, now, sink);
        Ok(())
    }

    fn update_baselines(&mut self, now: f64) {
        let recent = self.traffic.count_since(now - 60.0);
        if recent > 10 {
            self.baselines.packets_per_second = (recent as f64 / 60.0).max(100.0);
        }
    }

    fn check_traffic_spike(&self, now: f64, sink: &dyn AlertSink) {
        if self.traffic.len() < 10 {
            return;
        }
        let rate = self.traffic.count_since(now - 5.0) as f64 / 5.0;
        if rate > self.baselines.packets_per_second * 3.0 {
            sink.emit(
                Alert::new(
                    Category::Anomaly,
                    Severity::High,
                    AlertSource::Multiple,
                    format!("Traffic spike detected: {:.1} packets/sec", rate),
                )
                .with_meta("current_rate", rate)
                .with_meta("baseline", self.baselines.packets_per_second)
                .with_meta("anomaly_type", "Traffic Spike"),
            );
        }
    }

    fn check_stealth_scan(&self, pkt: &PacketView, now: f64, sink: &dyn AlertSink) {
        let Some(window) = self.port_activity.get(&pkt.src_ip) else {
            return;
        };
        if window.len() < 5 {
            return;
        }
        let unique_ports = window.distinct_since(now - 30.0);
        if unique_ports > self.baselines.unique_ports_per_ip {
            sink.emit(
                Alert::new(
                    Category::PortScan,
                    Severity::Medium,
                    AlertSource::Ip(pkt.src_ip),
                    format!(
                        "Stealth port scan detected from {} - {} ports in 30s",
                        pkt.src_ip, unique_ports
                    ),
                )
                .with_meta("unique_ports", unique_ports)
                .with_meta("time_window", 30)
                .with_meta("scan_type", "Stealth Scan"),
            );
        }
    }

    fn check_brute_force(&self, pkt: &PacketView, now: f64, sink: &dyn AlertSink) {
        if !BRUTE_FORCE_PORTS.contains(&pkt.dport) {
            return;
        }
        let attempts = self
            .ip_activity
            .get(&pkt.src_ip)
            .map(|window| window.count_since(now - 60.0))
            .unwrap_or(0);
        if attempts > 15 {
            sink.emit(
                Alert::new(
                    Category::BruteForce,
                    Severity::High,
                    AlertSource::Ip(pkt.src_ip),
                    format!(
                        "Brute force attempt on port {} from {} - {} attempts",
                        pkt.dport, pkt.src_ip, attempts
                    ),
                )
                .with_meta("target_port", pkt.dport)
                .with_meta("attempts", attempts)
                .with_meta("service", service_name(pkt.dport)),
            );
        }
    }

    fn check_protocol_distribution(&self, sink: &dyn AlertSink) {
        let total: u64 = self.protocol_counts.values().sum();
        if total < 100 {
            return;
        }
        let udp = self
            .protocol_counts
            .get(&Protocol::Udp)
            .copied()
            .unwrap_or(0);
        let udp_ratio = udp as f64 / total as f64;
        if udp_ratio > 0.8 {
            sink.emit(
                Alert::new(
                    Category::Ddos,
                    Severity::Medium,
                    AlertSource::Multiple,
                    format!("UDP flood detected - {:.1}% UDP traffic", udp_ratio * 100.0),
                )
                .with_meta("udp_ratio", udp_ratio)
                .with_meta("anomaly_type", "Protocol Distribution"),
            );
        }
    }

    fn check_vertical_scan(&self, pkt: &PacketView, now: f64, sink: &dyn AlertSink) {
        if pkt.dport >= 1024 {
            return;
        }
        let Some(window) = self.port_activity.get(&pkt.src_ip) else {
            return;
        };
        let well_known: HashSet<u16> = window
            .iter_since(now - 60.0)
            .copied()
            .filter(|port| *port < 1024)
            .collect();
        if well_known.len() > 10 {
            sink.emit(
                Alert::new(
                    Category::PortScan,
                    Severity::High,
                    AlertSource::Ip(pkt.src_ip),
                    format!(
                        "Vertical port scan from {} - targeting well-known ports",
                        pkt.src_ip
                    ),
                )
                .with_meta("target_ports", well_known.len())
                .with_meta("scan_type", "Vertical Scan"),
            );
        }
    }

    fn check_horizontal_scan(&self, pkt: &PacketView, now: f64, sink: &dyn AlertSink) {
        if pkt.sport <= 1024 {
            return;
        }
        let targets = match self.config.horizontal_scan {
            HorizontalScanMode::Ports => {
                let Some(window) = self.port_activity.get(&pkt.src_ip) else {
                    return;
                };
                window
                    .iter_since(now - 60.0)
                    .copied()
                    .filter(|port| *port > 1024)
                    .collect::<HashSet<_>>()
                    .len()
            }
            HorizontalScanMode::Hosts => {
                let Some(window) = self.host_activity.get(&pkt.src_ip) else {
                    return;
                };
                window.distinct_since(now - 60.0)
            }
        };
        if targets > 20 {
            sink.emit(
                Alert::new(
                    Category::PortScan,
                    Severity::Medium,
                    AlertSource::Ip(pkt.src_ip),
                    format!(
                        "Horizontal port scan from {} - scanning multiple hosts",
                        pkt.src_ip
                    ),
                )
                .with_meta("target_count", targets)
                .with_meta("scan_type", "Horizontal Scan"),
            );
        }
    }
}

/// Well-known service names for brute-force alert metadata.
fn service_name(port: u16) -> String {
    match port {
        22 => "SSH".to_string(),
        21 => "FTP".to_string(),
        23 => "Telnet".to_string(),
        80 => "HTTP".to_string(),
        443 => "HTTPS".to_string(),
        3389 => "RDP".to_string(),
        1433 => "MSSQL".to_string(),
        3306 => "MySQL".to_string(),
        5432 => "PostgreSQL".to_string(),
        other => format!("Port {}", other),
    }
}
