//! netwarden — passive network intrusion detection
//!
//! Captured frames flow through a linear pipeline with a fan-out inside the
//! detector stage:
//!
//! ```text
//! capture → decoder → dispatcher → { rule engine, anomaly, ml } → alert pipeline
//! ```
//!
//! The hot path is a single blocking task; detectors run sequentially per
//! packet and share no state. The alert pipeline sits behind a bounded
//! queue and owns everything slow (geolocation, SQLite, notification).

pub mod alert;
pub mod capture;
pub mod config;
pub mod core;
pub mod database;
pub mod detect;
pub mod dispatch;
pub mod error;
pub mod geoip;
pub mod notify;
pub mod sink;
pub mod window;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Context;
use tracing::{error, info, warn};

use crate::capture::FrameRead;
use crate::core::parser::decode_frame;
use crate::database::Database;
use crate::detect::{AnomalyDetector, MlDetector, RuleEngine, RuleSet};
use crate::dispatch::Dispatcher;
use crate::geoip::GeoIpClient;
use crate::sink::AlertPipeline;

pub use crate::config::Config;
pub use crate::error::{Error, Result};

/// Shared flag a signal handler sets to stop the capture loop.
pub type ShutdownFlag = Arc<AtomicBool>;

/// Top-level instance wiring capture, detectors and the alert pipeline.
pub struct Netwarden {
    config: Config,
}

impl Netwarden {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Run the detection pipeline until the shutdown flag is set or the
    /// source ends. Blocks the calling task; the capture loop itself runs
    /// on a dedicated blocking thread.
    pub async fn run(self, shutdown: ShutdownFlag) -> anyhow::Result<()> {
        let rules = RuleSet::load_or_empty(&self.config.rules.path);
        info!(rules = rules.len(), "signature rules loaded");

        let db = Database::open(&self.config.general.db_path)?;
        let geo = GeoIpClient::new(self.config.geoip.clone())?;
        let notifier = notify::from_env();
        let pipeline = AlertPipeline::spawn(db, geo, notifier, &self.config.alerts);

        let max_sources = self.config.detection.max_tracked_sources;
        let mut dispatcher = Dispatcher::new(
            RuleEngine::new(rules, max_sources)?,
            AnomalyDetector::new(self.config.detection.clone()),
            MlDetector::new(max_sources),
            Arc::new(pipeline.sink()),
        );

        let capture_config = self.config.capture.clone();
        let capture_shutdown = shutdown.clone();
        let capture_loop = tokio::task::spawn_blocking(move || -> Result<u64> {
            let mut source = capture::open(&capture_config)?;
            let mut decode_drops = 0u64;

            while !capture_shutdown.load(Ordering::Relaxed) {
                match source.next_frame() {
                    Ok(FrameRead::Frame(frame)) => match decode_frame(&frame.data, frame.ts) {
                        Some(view) => dispatcher.dispatch(&view),
                        None => decode_drops += 1,
                    },
                    Ok(FrameRead::TimedOut) => continue,
                    Ok(FrameRead::Finished) => {
                        info!("capture source finished");
                        break;
                    }
                    Err(e) => {
                        error!(error = %e, "packet source failed; shutting down");
                        break;
                    }
                }
            }

            info!(
                packets = dispatcher.packets(),
                decode_drops,
                received = source.stats().received,
                "capture loop stopped"
            );
            Ok(dispatcher.packets())
        });

        let result = capture_loop.await.context("capture loop panicked")?;
        if let Err(e) = &result {
            warn!(error = %e, "capture ended with error");
        }

        pipeline.shutdown().await;
        result?;
        Ok(())
    }
}
