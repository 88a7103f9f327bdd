//! Rule engine
//!
//! Applies the declarative signature rules plus six hard-coded heuristics:
//! SYN port scan, SYN flood, HTTP injection, DNS tunnelling, NULL scan and
//! XMAS scan. Per-source trackers live in bounded [`SourceTable`]s.

use std::collections::HashSet;

use regex::bytes::RegexSet;
use tracing::debug;

use crate::alert::{Alert, AlertSink, AlertSource, Category, Severity};
use crate::core::packet::{PacketView, Protocol};
use crate::detect::signature::RuleSet;
use crate::error::{Error, Result};
use crate::window::SourceTable;

/// Ports scanned by the HTTP injection heuristic.
const HTTP_PORTS: [u16; 3] = [80, 443, 8080];

/// Injection patterns scanned case-insensitively over TCP payloads.
/// The matched pattern string is carried verbatim into the alert metadata.
const HTTP_ATTACK_PATTERNS: [&str; 15] = [
    r"union.*select",
    r"select.*from",
    r"insert.*into",
    r"drop.*table",
    r"1=1",
    r"or.*1=1",
    r"script>",
    r"<script",
    r"eval\(",
    r"base64_decode",
    r"cmd\.exe",
    r"bin/bash",
    r"etc/passwd",
    r"../..",
    r"\.\./",
];

/// SYN flood tracker epoch length in seconds.
const SYN_FLOOD_WINDOW: f64 = 10.0;

#[derive(Debug)]
struct PortScanTracker {
    ports: HashSet<u16>,
    syn_count: u32,
    window_start: f64,
}

impl PortScanTracker {
    fn new(ts: f64) -> Self {
        Self {
            ports: HashSet::new(),
            syn_count: 0,
            window_start: ts,
        }
    }

    fn reset(&mut self, ts: f64) {
        self.ports.clear();
        self.syn_count = 0;
        self.window_start = ts;
    }
}

#[derive(Debug)]
struct SynFloodTracker {
    count: u32,
    window_start: f64,
}

impl SynFloodTracker {
    fn new(ts: f64) -> Self {
        Self {
            count: 0,
            window_start: ts,
        }
    }
}

pub struct RuleEngine {
    rules: RuleSet,
    http_patterns: RegexSet,
    port_scans: SourceTable<PortScanTracker>,
    syn_floods: SourceTable<SynFloodTracker>,
}

impl RuleEngine {
    pub fn new(rules: RuleSet, max_sources: usize) -> Result<Self> {
        let http_patterns = RegexSet::new(
            HTTP_ATTACK_PATTERNS
                .iter()
                .map(|pattern| format!("(?i){}", pattern)),
        )
        .map_err(|e| Error::RuleLoad(format!("http attack patterns: {}", e)))?;

        Ok(Self {
            rules,
            http_patterns,
            port_scans: SourceTable::new(max_sources),
            syn_floods: SourceTable::new(max_sources),
        })
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    /// Run the full rule pass over one packet, emitting alerts to `sink`.
    pub fn check(&mut self, pkt: &PacketView, sink: &dyn AlertSink) -> Result<()> {
        self.check_signatures(pkt, sink);
        self.detect_port_scan(pkt, sink);
        self.detect_syn_flood(pkt, sink);
        self.detect_http_injection(pkt, sink);
        self.detect_dns_tunnelling(pkt, sink);
        self.detect_null_scan(pkt, sink);
        self.detect_xmas_scan(pkt, sink);
        Ok(())
    }

    fn check_signatures(&self, pkt: &PacketView, sink: &dyn AlertSink) {
        for rule in self.rules.matching(pkt) {
            let severity = rule.severity.parse().unwrap_or_default();
            sink.emit(
                Alert::new(
                    Category::from(rule.category.as_str()),
                    severity,
                    AlertSource::Ip(pkt.src_ip),
                    rule.description.clone(),
                )
                .with_meta("rule_id", rule.id.as_str())
                .with_meta("protocol", pkt.proto.to_string())
                .with_meta("source_port", pkt.sport)
                .with_meta("dest_port", pkt.dport)
                .with_meta("severity", rule.severity.as_str()),
            );
        }
    }

    fn detect_port_scan(&mut self, pkt: &PacketView, sink: &dyn AlertSink) {
        let tracker =
            self.port_scans
                .get_or_insert_with(pkt.src_ip, pkt.ts, || PortScanTracker::new(pkt.ts));

        tracker.ports.insert(pkt.dport);
        if pkt.flags.is_syn_only() {
            tracker.syn_count += 1;
        }

        let unique_ports = tracker.ports.len();
        if unique_ports > 15 && tracker.syn_count > 10 {
            sink.emit(
                Alert::new(
                    Category::PortScan,
                    Severity::High,
                    AlertSource::Ip(pkt.src_ip),
                    format!(
                        "Advanced port scan detected from {} - {} unique ports",
                        pkt.src_ip, unique_ports
                    ),
                )
                .with_meta("unique_ports", unique_ports)
                .with_meta("syn_count", tracker.syn_count)
                .with_meta("scan_type", "SYN Scan"),
            );
            tracker.reset(pkt.ts);
        }
    }

    fn detect_syn_flood(&mut self, pkt: &PacketView, sink: &dyn AlertSink) {
        let tracker =
            self.syn_floods
                .get_or_insert_with(pkt.src_ip, pkt.ts, || SynFloodTracker::new(pkt.ts));

        tracker.count += 1;

        if pkt.ts - tracker.window_start > SYN_FLOOD_WINDOW {
            if tracker.count > 100 {
                sink.emit(
                    Alert::new(
                        Category::Ddos,
                        Severity::Critical,
                        AlertSource::Ip(pkt.src_ip),
                        format!(
                            "SYN Flood attack from {} - {} packets in 10 seconds",
                            pkt.src_ip, tracker.count
                        ),
                    )
                    .with_meta("packet_count", tracker.count)
                    .with_meta("duration", 10)
                    .with_meta("attack_type", "SYN Flood"),
                );
            }
            tracker.count = 0;
            tracker.window_start = pkt.ts;
        }
    }

    fn detect_http_injection(&self, pkt: &PacketView, sink: &dyn AlertSink) {
        if !HTTP_PORTS.contains(&pkt.dport) || pkt.payload.is_empty() {
            return;
        }
        // One alert per packet: the first (lowest-index) matching pattern wins.
        if let Some(index) = self.http_patterns.matches(&pkt.payload).iter().next() {
            let pattern = HTTP_ATTACK_PATTERNS[index];
            debug!(pattern, dport = pkt.dport, "http payload matched attack pattern");
            sink.emit(
                Alert::new(
                    Category::WebAttack,
                    Severity::High,
                    AlertSource::Ip(pkt.src_ip),
                    format!("Web attack detected from {} - {}", pkt.src_ip, pattern),
                )
                .with_meta("pattern", pattern)
                .with_meta("target_port", pkt.dport)
                .with_meta("attack_type", "Injection"),
            );
        }
    }

    fn detect_dns_tunnelling(&self, pkt: &PacketView, sink: &dyn AlertSink) {
        let Some(qname) = &pkt.dns_qname else {
            return;
        };
        let length = qname.chars().count();
        if length > 100 {
            let sample: String = qname.chars().take(50).collect();
            sink.emit(
                Alert::new(
                    Category::DataExfiltration,
                    Severity::Medium,
                    AlertSource::Ip(pkt.src_ip),
                    format!(
                        "DNS tunneling suspected from {} - long query: {}...",
                        pkt.src_ip, sample
                    ),
                )
                .with_meta("query_length", length)
                .with_meta("query_sample", sample.as_str())
                .with_meta("attack_type", "DNS Tunneling"),
            );
        }
    }

    fn detect_null_scan(&self, pkt: &PacketView, sink: &dyn AlertSink) {
        if pkt.proto == Protocol::Tcp && pkt.flags.is_empty() {
            sink.emit(
                Alert::new(
                    Category::PortScan,
                    Severity::High,
                    AlertSource::Ip(pkt.src_ip),
                    format!("NULL scan detected from {}", pkt.src_ip),
                )
                .with_meta("scan_type", "NULL Scan"),
            );
        }
    }

    fn detect_xmas_scan(&self, pkt: &PacketView, sink: &dyn AlertSink) {
        if pkt.flags.fin && pkt.flags.psh && pkt.flags.urg {
            sink.emit(
                Alert::new(
                    Category::PortScan,
                    Severity::High,
                    AlertSource::Ip(pkt.src_ip),
                    format!("XMAS scan detected from {}", pkt.src_ip),
                )
                .with_meta("scan_type", "XMAS Scan"),
            );
        }
    }
}
