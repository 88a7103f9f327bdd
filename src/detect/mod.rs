//! The three cooperating detectors.

pub mod anomaly;
pub mod ml;
pub mod rule_engine;
pub mod signature;

pub use anomaly::{AnomalyConfig, AnomalyDetector, HorizontalScanMode};
pub use ml::MlDetector;
pub use rule_engine::RuleEngine;
pub use signature::{RuleSet, SignatureRule};
