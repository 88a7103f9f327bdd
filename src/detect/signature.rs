//! Declarative signature rules
//!
//! Rules are loaded once at startup from a JSON document of the form
//! `{"rules": [...]}`. Unknown fields are ignored; a missing or malformed
//! file yields an empty rule set and a warning. A rule matches a packet when
//! every *present* field matches; absent fields are wildcards, so a rule
//! with no predicates matches every packet.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::core::packet::{PacketView, Protocol};
use crate::error::Error;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignatureRule {
    pub id: String,
    pub description: String,
    pub category: String,
    pub severity: String,
    /// Equality match on the protocol name (`TCP`, `UDP`, `ICMP`, `DNS`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
    /// Equality match on the destination port.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dst_port: Option<u16>,
    /// Equality match on the textual source address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src_ip: Option<String>,
    /// Every letter in this pattern must be set in the TCP flag set.
    /// Evaluated for TCP packets only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flags: Option<String>,
    /// Case-insensitive substring match against the TCP payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl SignatureRule {
    /// Evaluate the rule's predicates against a packet; the first failing
    /// predicate rejects.
    pub fn matches(&self, pkt: &PacketView) -> bool {
        if let Some(protocol) = &self.protocol {
            if *protocol != pkt.proto.to_string() {
                return false;
            }
        }
        if let Some(dst_port) = self.dst_port {
            if dst_port != pkt.dport {
                return false;
            }
        }
        if let Some(src_ip) = &self.src_ip {
            if *src_ip != pkt.src_ip.to_string() {
                return false;
            }
        }
        if let Some(flags) = &self.flags {
            if pkt.proto == Protocol::Tcp && !flags.chars().all(|letter| pkt.flags.has(letter)) {
                return false;
            }
        }
        if let Some(content) = &self.content {
            if pkt.payload.is_empty() || !contains_ignore_case(&pkt.payload, content) {
                return false;
            }
        }
        true
    }
}

/// The loaded rule document. Immutable after startup and shared by reference.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleSet {
    #[serde(default)]
    pub rules: Vec<SignatureRule>,
}

impl RuleSet {
    /// Load a rule document, failing on a missing or malformed file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::RuleLoad(format!("{}: {}", path.display(), e)))?;
        serde_json::from_str(&content)
            .map_err(|e| Error::RuleLoad(format!("{}: {}", path.display(), e)))
    }

    /// Load a rule document, warning and falling back to an empty set when
    /// the file is missing or malformed.
    pub fn load_or_empty(path: impl AsRef<Path>) -> Self {
        match Self::load(&path) {
            Ok(rules) => rules,
            Err(e) => {
                warn!(error = %e, "proceeding with empty signature rule set");
                Self::default()
            }
        }
    }

    /// Rules matching the packet, in document order. All of them fire
    /// independently; there is no first-match short-circuit.
    pub fn matching<'a>(&'a self, pkt: &'a PacketView) -> impl Iterator<Item = &'a SignatureRule> {
        self.rules.iter().filter(move |rule| rule.matches(pkt))
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// ASCII case-insensitive substring search over raw payload bytes.
fn contains_ignore_case(haystack: &[u8], needle: &str) -> bool {
    let needle = needle.as_bytes();
    if needle.is_empty() {
        return true;
    }
    if haystack.len() < needle.len() {
        return false;
    }
    haystack.windows(needle.len()).any(|window| {
        window
            .iter()
            .zip(needle)
            .all(|(a, b)| a.eq_ignore_ascii_case(b))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::packet::TcpFlags;
    use std::net::{IpAddr, Ipv4Addr};

    fn tcp_packet() -> PacketView {
        PacketView::new(
            1.0,
            IpAddr::V4(Ipv4Addr::new(1, 2, 3, 4)),
            IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)),
            Protocol::Tcp,
        )
        .with_ports(40000, 80)
        .with_flags(TcpFlags::from_u8(0x02))
        .with_payload(&b"GET /index.html HTTP/1.1"[..])
    }

    fn rule() -> SignatureRule {
        SignatureRule {
            id: "T-1".to_string(),
            description: "test rule".to_string(),
            category: "Web Attack".to_string(),
            severity: "high".to_string(),
            protocol: None,
            dst_port: None,
            src_ip: None,
            flags: None,
            content: None,
        }
    }

    #[test]
    fn test_empty_rule_matches_everything() {
        let rule = rule();
        assert!(rule.matches(&tcp_packet()));

        let icmp = PacketView::new(
            1.0,
            IpAddr::V4(Ipv4Addr::new(9, 9, 9, 9)),
            IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)),
            Protocol::Icmp,
        );
        assert!(rule.matches(&icmp));
    }

    #[test]
    fn test_each_predicate_rejects() {
        let pkt = tcp_packet();

        let mut r = rule();
        r.protocol = Some("UDP".to_string());
        assert!(!r.matches(&pkt));

        let mut r = rule();
        r.dst_port = Some(443);
        assert!(!r.matches(&pkt));

        let mut r = rule();
        r.src_ip = Some("5.6.7.8".to_string());
        assert!(!r.matches(&pkt));

        let mut r = rule();
        r.flags = Some("SA".to_string());
        assert!(!r.matches(&pkt)); // SYN set, ACK not

        let mut r = rule();
        r.content = Some("POST".to_string());
        assert!(!r.matches(&pkt));
    }

    #[test]
    fn test_flags_subset_matches() {
        let mut r = rule();
        r.flags = Some("S".to_string());
        assert!(r.matches(&tcp_packet()));
    }

    #[test]
    fn test_content_is_case_insensitive() {
        let mut r = rule();
        r.content = Some("get /INDEX".to_string());
        assert!(r.matches(&tcp_packet()));
    }

    #[test]
    fn test_content_rule_rejects_empty_payload() {
        let mut r = rule();
        r.content = Some("GET".to_string());
        let mut pkt = tcp_packet();
        pkt.payload.clear();
        assert!(!r.matches(&pkt));
    }

    #[test]
    fn test_rule_set_json_round_trip() {
        let set = RuleSet {
            rules: vec![
                SignatureRule {
                    protocol: Some("TCP".to_string()),
                    dst_port: Some(23),
                    ..rule()
                },
                rule(),
            ],
        };
        let json = serde_json::to_string(&set).unwrap();
        let parsed: RuleSet = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, set);
    }

    #[test]
    fn test_unknown_fields_ignored() {
        let json = r#"{"rules": [{"id": "x", "description": "d", "category": "Recon",
            "severity": "low", "added_by": "ops", "revision": 3}], "version": 2}"#;
        let parsed: RuleSet = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.rules.len(), 1);
        assert_eq!(parsed.rules[0].id, "x");
    }

    #[test]
    fn test_load_missing_file_errors() {
        assert!(RuleSet::load("/nonexistent/rules.json").is_err());
        assert!(RuleSet::load_or_empty("/nonexistent/rules.json").is_empty());
    }
}
