//! End-to-end detection scenarios driven through the dispatcher with
//! synthetic timestamps and a collecting sink.

use std::net::IpAddr;
use std::sync::Arc;

use netwarden::alert::{Alert, AlertSource, Category, MemorySink, Severity};
use netwarden::core::packet::{PacketView, Protocol, TcpFlags};
use netwarden::detect::{AnomalyConfig, AnomalyDetector, MlDetector, RuleEngine, RuleSet};
use netwarden::dispatch::Dispatcher;

fn dispatcher(sink: Arc<MemorySink>) -> Dispatcher {
    Dispatcher::new(
        RuleEngine::new(RuleSet::default(), 10_000).unwrap(),
        AnomalyDetector::new(AnomalyConfig::default()),
        MlDetector::new(10_000),
        sink,
    )
}

fn ip(s: &str) -> IpAddr {
    s.parse().unwrap()
}

fn tcp(ts: f64, src: &str, dst: &str, sport: u16, dport: u16, flags: u8) -> PacketView {
    PacketView::new(ts, ip(src), ip(dst), Protocol::Tcp)
        .with_ports(sport, dport)
        .with_flags(TcpFlags::from_u8(flags))
}

fn with_category(alerts: &[Alert], category: &Category) -> Vec<Alert> {
    alerts
        .iter()
        .filter(|a| a.category == *category)
        .cloned()
        .collect()
}

fn scan_type(alert: &Alert) -> Option<&str> {
    alert.meta.get("scan_type").and_then(|v| v.as_str())
}

#[test]
fn scenario_syn_scan() {
    let sink = Arc::new(MemorySink::new());
    let mut dispatcher = dispatcher(sink.clone());

    // 16 SYNs from one source to 16 distinct ports.
    for port in 1..=16u16 {
        dispatcher.dispatch(&tcp(port as f64 * 0.05, "1.2.3.4", "10.0.0.1", 40000, port, 0x02));
    }

    let alerts = sink.take();
    let syn_scans: Vec<&Alert> = alerts
        .iter()
        .filter(|a| scan_type(a) == Some("SYN Scan"))
        .collect();
    assert_eq!(syn_scans.len(), 1);
    assert_eq!(syn_scans[0].severity, Severity::High);
    assert!(syn_scans[0].meta["unique_ports"].as_u64().unwrap() >= 16);
    assert!(syn_scans[0].meta["syn_count"].as_u64().unwrap() >= 11);

    // No NULL or XMAS alerts for pure SYN packets.
    assert!(alerts.iter().all(|a| scan_type(a) != Some("NULL Scan")));
    assert!(alerts.iter().all(|a| scan_type(a) != Some("XMAS Scan")));
}

#[test]
fn scenario_syn_flood() {
    let sink = Arc::new(MemorySink::new());
    let mut dispatcher = dispatcher(sink.clone());

    // 200 SYNs from one source to one port over 12 seconds.
    for i in 0..200 {
        let ts = i as f64 * 12.0 / 200.0;
        dispatcher.dispatch(&tcp(ts, "10.99.0.50", "10.0.0.1", 40000, 80, 0x02));
    }

    let floods: Vec<Alert> = sink
        .take()
        .into_iter()
        .filter(|a| {
            a.category == Category::Ddos
                && a.meta.get("attack_type").and_then(|v| v.as_str()) == Some("SYN Flood")
        })
        .collect();
    assert_eq!(floods.len(), 1);
    assert_eq!(floods[0].severity, Severity::Critical);
    assert!(floods[0].meta["packet_count"].as_u64().unwrap() >= 100);
}

#[test]
fn scenario_ssh_brute_force() {
    let sink = Arc::new(MemorySink::new());
    let mut dispatcher = dispatcher(sink.clone());

    // 20 connection attempts to port 22 within 30 seconds.
    for i in 0..20 {
        dispatcher.dispatch(&tcp(
            i as f64 * 1.5,
            "203.0.113.45",
            "10.0.0.1",
            40000 + i as u16,
            22,
            0x02,
        ));
    }

    let alerts = sink.take();
    let brute = with_category(&alerts, &Category::BruteForce);
    assert!(!brute.is_empty());
    assert_eq!(brute[0].severity, Severity::High);
    assert_eq!(brute[0].meta["target_port"], 22);
    assert_eq!(brute[0].meta["service"], "SSH");
    assert_eq!(brute[0].source, AlertSource::Ip(ip("203.0.113.45")));

    // 20 attempts to one port stay below the 25-port stealth-scan baseline.
    assert!(alerts.iter().all(|a| scan_type(a) != Some("Stealth Scan")));
}

#[test]
fn scenario_udp_flood() {
    let sink = Arc::new(MemorySink::new());
    let mut dispatcher = dispatcher(sink.clone());

    for i in 0..50 {
        dispatcher.dispatch(&tcp(i as f64 * 0.01, "10.8.0.2", "10.0.0.1", 40000, 80, 0x10));
    }
    for i in 0..450 {
        let ts = 0.5 + i as f64 * 0.01;
        let pkt = PacketView::new(ts, ip("10.8.0.3"), ip("10.0.0.1"), Protocol::Udp)
            .with_ports(50000, 9000);
        dispatcher.dispatch(&pkt);
    }

    let floods: Vec<Alert> = sink
        .take()
        .into_iter()
        .filter(|a| {
            a.meta.get("anomaly_type").and_then(|v| v.as_str()) == Some("Protocol Distribution")
        })
        .collect();
    assert!(!floods.is_empty());
    assert_eq!(floods[0].source, AlertSource::Multiple);
    assert!(floods[0].meta["udp_ratio"].as_f64().unwrap() >= 0.8);
}

#[test]
fn scenario_http_injection() {
    let sink = Arc::new(MemorySink::new());
    let mut dispatcher = dispatcher(sink.clone());

    let pkt = tcp(1.0, "5.6.7.8", "10.0.0.1", 40000, 80, 0x18)
        .with_payload(&b"GET /?q=1%20UNION%20SELECT%20*%20FROM%20users HTTP/1.1\r\n"[..]);
    dispatcher.dispatch(&pkt);

    let web = with_category(&sink.take(), &Category::WebAttack);
    assert_eq!(web.len(), 1);
    assert_eq!(web[0].meta["pattern"], "union.*select");
    assert_eq!(web[0].meta["attack_type"], "Injection");
    assert_eq!(web[0].severity, Severity::High);
}

#[test]
fn scenario_dns_tunnelling() {
    let sink = Arc::new(MemorySink::new());
    let mut dispatcher = dispatcher(sink.clone());

    let qname: String = std::iter::repeat('x').take(120).collect();
    let pkt = PacketView::new(1.0, ip("5.6.7.8"), ip("10.0.0.53"), Protocol::Dns)
        .with_ports(53000, 53)
        .with_qname(qname.clone());
    dispatcher.dispatch(&pkt);

    let exfil = with_category(&sink.take(), &Category::DataExfiltration);
    assert_eq!(exfil.len(), 1);
    assert_eq!(exfil[0].meta["query_length"], 120);
    assert_eq!(
        exfil[0].meta["query_sample"].as_str().unwrap(),
        &qname[..50]
    );
}

#[test]
fn boundary_null_scan_exactly_one_alert() {
    let sink = Arc::new(MemorySink::new());
    let mut dispatcher = dispatcher(sink.clone());

    dispatcher.dispatch(&tcp(1.0, "5.6.7.8", "10.0.0.1", 40000, 22, 0x00));

    let alerts = sink.take();
    let nulls: Vec<&Alert> = alerts
        .iter()
        .filter(|a| scan_type(a) == Some("NULL Scan"))
        .collect();
    assert_eq!(nulls.len(), 1);
    assert!(alerts.iter().all(|a| scan_type(a) != Some("XMAS Scan")));
}

#[test]
fn boundary_xmas_scan_exactly_one_alert() {
    let sink = Arc::new(MemorySink::new());
    let mut dispatcher = dispatcher(sink.clone());

    // FIN+PSH+URG = 0x29.
    dispatcher.dispatch(&tcp(1.0, "5.6.7.8", "10.0.0.1", 40000, 22, 0x29));

    let alerts = sink.take();
    let xmas: Vec<&Alert> = alerts
        .iter()
        .filter(|a| scan_type(a) == Some("XMAS Scan"))
        .collect();
    assert_eq!(xmas.len(), 1);
    assert!(alerts.iter().all(|a| scan_type(a) != Some("NULL Scan")));
}

#[test]
fn boundary_dns_qname_at_100_chars_is_quiet() {
    let sink = Arc::new(MemorySink::new());
    let mut dispatcher = dispatcher(sink.clone());

    let qname: String = std::iter::repeat('x').take(100).collect();
    let pkt = PacketView::new(1.0, ip("5.6.7.8"), ip("10.0.0.53"), Protocol::Dns)
        .with_ports(53000, 53)
        .with_qname(qname);
    dispatcher.dispatch(&pkt);

    assert!(with_category(&sink.take(), &Category::DataExfiltration).is_empty());
}

#[test]
fn boundary_brute_force_needs_more_than_15() {
    let sink = Arc::new(MemorySink::new());
    let mut dispatcher = dispatcher(sink.clone());

    for i in 0..15 {
        dispatcher.dispatch(&tcp(i as f64, "5.6.7.8", "10.0.0.1", 40000, 22, 0x10));
    }
    assert!(with_category(&sink.take(), &Category::BruteForce).is_empty());
}

#[test]
fn alert_order_follows_packet_order() {
    let sink = Arc::new(MemorySink::new());
    let mut dispatcher = dispatcher(sink.clone());

    // Two packets that each deterministically produce one alert: a NULL
    // scan followed by an XMAS scan. All alerts for the first packet must
    // precede all alerts for the second.
    dispatcher.dispatch(&tcp(1.0, "5.6.7.8", "10.0.0.1", 40000, 22, 0x00));
    dispatcher.dispatch(&tcp(2.0, "5.6.7.8", "10.0.0.1", 40000, 23, 0x29));

    let alerts = sink.take();
    let null_pos = alerts
        .iter()
        .position(|a| scan_type(a) == Some("NULL Scan"))
        .unwrap();
    let xmas_pos = alerts
        .iter()
        .position(|a| scan_type(a) == Some("XMAS Scan"))
        .unwrap();
    assert!(null_pos < xmas_pos);
}

#[test]
fn ml_detector_trains_once_across_stream() {
    let sink = Arc::new(MemorySink::new());
    let mut rules = RuleEngine::new(RuleSet::default(), 10_000).unwrap();
    let mut anomaly = AnomalyDetector::new(AnomalyConfig::default());
    let mut ml = MlDetector::new(10_000);

    for i in 0..150 {
        let pkt = tcp(i as f64 * 0.1, "10.4.0.7", "10.0.0.1", 40000, 443, 0x10);
        rules.check(&pkt, sink.as_ref()).unwrap();
        anomaly.analyze(&pkt, sink.as_ref()).unwrap();
        ml.analyze(&pkt, pkt.payload.len(), sink.as_ref()).unwrap();
    }

    assert!(ml.is_trained());
    assert_eq!(ml.means().len(), 10);
    assert_eq!(ml.stds().len(), 10);
}

#[test]
fn signature_rules_fire_alongside_heuristics() {
    let rules = RuleSet {
        rules: vec![netwarden::detect::SignatureRule {
            id: "T-23".to_string(),
            description: "Inbound telnet connection attempt".to_string(),
            category: "Policy Violation".to_string(),
            severity: "medium".to_string(),
            protocol: Some("TCP".to_string()),
            dst_port: Some(23),
            src_ip: None,
            flags: Some("S".to_string()),
            content: None,
        }],
    };
    let sink = Arc::new(MemorySink::new());
    let mut dispatcher = Dispatcher::new(
        RuleEngine::new(rules, 10_000).unwrap(),
        AnomalyDetector::new(AnomalyConfig::default()),
        MlDetector::new(10_000),
        sink.clone(),
    );

    dispatcher.dispatch(&tcp(1.0, "5.6.7.8", "10.0.0.1", 40000, 23, 0x02));

    let alerts = sink.take();
    assert_eq!(alerts.len(), 1);
    assert_eq!(
        alerts[0].category,
        Category::Custom("Policy Violation".to_string())
    );
    assert_eq!(alerts[0].meta["rule_id"], "T-23");
    assert_eq!(alerts[0].severity, Severity::Medium);
}
