//! Alert pipeline
//!
//! Bounded asynchronous queue between the synchronous packet hot path and
//! the worker that enriches, persists and fans out alerts. Emission never
//! blocks: when the queue is full the alert is dropped and a counter is
//! bumped — the designed failure mode under a flood.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::alert::{Alert, AlertSink, AlertSource};
use crate::database::Database;
use crate::geoip::{GeoInfo, GeoIpClient};
use crate::notify::Notifier;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertsConfig {
    /// Queue depth between the dispatcher and the worker.
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,
    /// Upper bound on draining the queue at shutdown, in milliseconds.
    #[serde(default = "default_drain_ms")]
    pub shutdown_drain_ms: u64,
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            queue_depth: default_queue_depth(),
            shutdown_drain_ms: default_drain_ms(),
        }
    }
}

fn default_queue_depth() -> usize {
    1024
}

fn default_drain_ms() -> u64 {
    2000
}

/// Cheap handle handed to the dispatcher. Emission is a non-blocking
/// `try_send`; the worker owns everything slow.
#[derive(Clone)]
pub struct PipelineSink {
    tx: mpsc::Sender<Alert>,
    dropped: Arc<AtomicU64>,
}

impl AlertSink for PipelineSink {
    fn emit(&self, alert: Alert) {
        match self.tx.try_send(alert) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                debug!("alert queue full; alert dropped");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("alert queue closed; alert dropped");
            }
        }
    }
}

/// The worker side of the pipeline.
pub struct AlertPipeline {
    tx: mpsc::Sender<Alert>,
    dropped: Arc<AtomicU64>,
    worker: JoinHandle<u64>,
    drain_timeout: Duration,
}

impl AlertPipeline {
    /// Spawn the worker task on the current tokio runtime.
    pub fn spawn(
        db: Database,
        geo: GeoIpClient,
        notifier: Arc<dyn Notifier>,
        config: &AlertsConfig,
    ) -> Self {
        let (tx, mut rx) = mpsc::channel::<Alert>(config.queue_depth.max(1));
        let worker = tokio::spawn(async move {
            let mut persisted = 0u64;
            while let Some(alert) = rx.recv().await {
                let geo_info = match alert.source {
                    AlertSource::Ip(ip) => geo.lookup(ip).await,
                    AlertSource::Multiple => GeoInfo::unknown(),
                };
                match db.insert_alert(&alert, &geo_info) {
                    Ok(_) => persisted += 1,
                    Err(e) => warn!(error = %e, "failed to persist alert"),
                }
                notifier.notify(&alert, &geo_info).await;
            }
            persisted
        });

        Self {
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
            worker,
            drain_timeout: Duration::from_millis(config.shutdown_drain_ms),
        }
    }

    /// Handle for the dispatcher.
    pub fn sink(&self) -> PipelineSink {
        PipelineSink {
            tx: self.tx.clone(),
            dropped: self.dropped.clone(),
        }
    }

    /// Alerts dropped on queue overflow.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Close the queue and drain in-flight alerts with a bounded timeout.
    pub async fn shutdown(self) {
        let Self {
            tx,
            dropped,
            worker,
            drain_timeout,
        } = self;
        drop(tx);
        match tokio::time::timeout(drain_timeout, worker).await {
            Ok(Ok(persisted)) => {
                info!(
                    persisted,
                    dropped = dropped.load(Ordering::Relaxed),
                    "alert pipeline drained"
                );
            }
            Ok(Err(e)) => warn!(error = %e, "alert pipeline worker failed"),
            Err(_) => warn!("alert pipeline drain timed out"),
        }
    }
}
