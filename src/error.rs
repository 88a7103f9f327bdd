//! Error kinds for the detection pipeline.
//!
//! Every failure is either tolerated per-packet (decode, detector, sink) or
//! fatal to the capture loop (source). None of them surface to a user as a
//! recoverable condition; alerts are the user-visible output.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// A captured frame could not be decoded into a packet view.
    /// Dropped silently by the capture loop, counted for diagnostics.
    #[error("undecodable packet: {0}")]
    Decode(&'static str),

    /// The signature rule file is missing or malformed. The engine proceeds
    /// with an empty rule set.
    #[error("signature rules unavailable: {0}")]
    RuleLoad(String),

    /// A detector failed while processing a single packet. The dispatcher
    /// logs it, skips that detector for that packet and continues.
    #[error("{detector} detector failed: {reason}")]
    Detector {
        detector: &'static str,
        reason: String,
    },

    /// An alert could not be enriched, persisted or forwarded. Logged and
    /// dropped, never retried, never propagated into the hot path.
    #[error("alert sink: {0}")]
    Sink(String),

    /// The packet source terminated unexpectedly. Fatal: initiates shutdown.
    #[error("packet source: {0}")]
    Source(String),
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Sink(err.to_string())
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Sink(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
