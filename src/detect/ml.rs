//! Statistical anomaly detection
//!
//! Builds a per-feature mean/stdev profile online from the first hundred
//! packets and scores every later packet by normalized euclidean distance
//! from that profile. The model trains exactly once per process lifetime;
//! after training the feature window keeps filling but is never refit.

use std::collections::{HashSet, VecDeque};

use tracing::info;

use crate::alert::{Alert, AlertSink, AlertSource, Category, Severity};
use crate::core::packet::{PacketView, Protocol};
use crate::error::Result;
use crate::window::SourceTable;

/// Feature dimension; see [`MlDetector::extract_features`].
pub const FEATURE_DIM: usize = 10;

const FEATURE_WINDOW_CAPACITY: usize = 1000;
const TRAINING_THRESHOLD: usize = 100;
const ANOMALY_THRESHOLD: f64 = 2.0;

/// Per-source behavioral counters feeding the feature vector.
#[derive(Debug)]
struct IpBehavior {
    packet_count: u64,
    unique_ports: HashSet<u16>,
    first_seen: f64,
}

pub struct MlDetector {
    features: VecDeque<[f64; FEATURE_DIM]>,
    behavior: SourceTable<IpBehavior>,
    means: [f64; FEATURE_DIM],
    stds: [f64; FEATURE_DIM],
    trained: bool,
}

impl MlDetector {
    pub fn new(max_sources: usize) -> Self {
        Self {
            features: VecDeque::with_capacity(FEATURE_WINDOW_CAPACITY),
            behavior: SourceTable::new(max_sources),
            means: [0.0; FEATURE_DIM],
            stds: [1.0; FEATURE_DIM],
            trained: false,
        }
    }

    pub fn is_trained(&self) -> bool {
        self.trained
    }

    pub fn means(&self) -> &[f64; FEATURE_DIM] {
        &self.means
    }

    pub fn stds(&self) -> &[f64; FEATURE_DIM] {
        &self.stds
    }

    /// Record one packet; score it once the model is trained.
    pub fn analyze(
        &mut self,
        pkt: &PacketView,
        payload_len: usize,
        sink: &dyn AlertSink,
    ) -> Result<()> {
        let features = self.extract_features(pkt, payload_len);

        if self.features.len() == FEATURE_WINDOW_CAPACITY {
            self.features.pop_front();
        }
        self.features.push_back(features);

        if !self.trained && self.features.len() > TRAINING_THRESHOLD {
            self.train();
        }

        if self.trained {
            let score = self.anomaly_score(&features);
            if score > ANOMALY_THRESHOLD {
                sink.emit(
                    Alert::new(
                        Category::MlAnomaly,
                        Severity::Medium,
                        AlertSource::Ip(pkt.src_ip),
                        format!(
                            "ML anomaly detected from {} - score: {:.2}",
                            pkt.src_ip, score
                        ),
                    )
                    .with_meta("anomaly_score", score)
                    .with_meta("protocol", pkt.proto.to_string())
                    .with_meta("target_port", pkt.dport),
                );
            }
        }
        Ok(())
    }

    /// Update the per-source counters, then capture the feature vector.
    fn extract_features(&mut self, pkt: &PacketView, payload_len: usize) -> [f64; FEATURE_DIM] {
        let behavior = self
            .behavior
            .get_or_insert_with(pkt.src_ip, pkt.ts, || IpBehavior {
                packet_count: 0,
                unique_ports: HashSet::new(),
                first_seen: pkt.ts,
            });

        behavior.packet_count += 1;
        behavior.unique_ports.insert(pkt.dport);

        [
            behavior.packet_count as f64,
            behavior.unique_ports.len() as f64,
            pkt.ts - behavior.first_seen,
            payload_len as f64,
            pkt.sport as f64,
            pkt.dport as f64,
            if pkt.proto == Protocol::Tcp { 1.0 } else { 0.0 },
            if pkt.proto == Protocol::Udp { 1.0 } else { 0.0 },
            if pkt.proto == Protocol::Icmp { 1.0 } else { 0.0 },
            if pkt.dport < 1024 { 1.0 } else { 0.0 },
        ]
    }

    /// Per-feature mean and population standard deviation over everything
    /// currently buffered. Zero deviations are replaced with 1 so scoring
    /// never divides by zero.
    fn train(&mut self) {
        let n = self.features.len() as f64;
        for i in 0..FEATURE_DIM {
            let mean = self.features.iter().map(|f| f[i]).sum::<f64>() / n;
            let variance = self
                .features
                .iter()
                .map(|f| (f[i] - mean).powi(2))
                .sum::<f64>()
                / n;
            self.means[i] = mean;
            self.stds[i] = if variance > 0.0 { variance.sqrt() } else { 1.0 };
        }
        self.trained = true;
        info!(samples = self.features.len(), "ml profile trained");
    }

    fn anomaly_score(&self, features: &[f64; FEATURE_DIM]) -> f64 {
        features
            .iter()
            .zip(self.means.iter().zip(self.stds.iter()))
            .map(|(x, (mean, std))| {
                let normalized = (x - mean) / std;
                normalized * normalized
            })
            .sum::<f64>()
            .sqrt()
    }
}
