//! Packet dispatcher
//!
//! Feeds every decoded packet, in arrival order, to the three detectors in
//! a fixed order: rule engine, anomaly detector, ML detector. A detector
//! failure is logged and skipped for that packet only; it never stops the
//! other detectors or the stream. Because dispatch is single-threaded and
//! the sink preserves submission order, all alerts derived from an earlier
//! packet precede all alerts derived from a later one, and within a packet
//! rule-engine alerts precede anomaly alerts precede ML alerts.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::alert::AlertSink;
use crate::core::packet::PacketView;
use crate::detect::{AnomalyDetector, MlDetector, RuleEngine};

/// Packets between progress log lines.
const PROGRESS_INTERVAL: u64 = 100;

pub struct Dispatcher {
    rules: RuleEngine,
    anomaly: AnomalyDetector,
    ml: MlDetector,
    sink: Arc<dyn AlertSink>,
    packets: u64,
}

impl Dispatcher {
    pub fn new(
        rules: RuleEngine,
        anomaly: AnomalyDetector,
        ml: MlDetector,
        sink: Arc<dyn AlertSink>,
    ) -> Self {
        Self {
            rules,
            anomaly,
            ml,
            sink,
            packets: 0,
        }
    }

    /// Run all three detectors over one packet.
    pub fn dispatch(&mut self, pkt: &PacketView) {
        self.packets += 1;
        if self.packets % PROGRESS_INTERVAL == 0 {
            debug!(packets = self.packets, "processed");
        }

        if let Err(e) = self.rules.check(pkt, self.sink.as_ref()) {
            warn!(error = %e, "rule engine skipped for packet");
        }
        if let Err(e) = self.anomaly.analyze(pkt, self.sink.as_ref()) {
            warn!(error = %e, "anomaly detector skipped for packet");
        }
        if let Err(e) = self
            .ml
            .analyze(pkt, pkt.payload.len(), self.sink.as_ref())
        {
            warn!(error = %e, "ml detector skipped for packet");
        }
    }

    /// Packets dispatched so far.
    pub fn packets(&self) -> u64 {
        self.packets
    }
}
