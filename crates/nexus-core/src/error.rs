//! Error types for the hotspot engine.
//!
//! Skips are not errors: an event the oracle cannot score yields a [`SkipReason`]
//! and a clean `None`. Everything here is a genuine failure of a collaborator.

use crate::notify::Channel;
use thiserror::Error;

/// Persistence or event-source failure.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("store rejected write: {0}")]
    Rejected(String),
}

/// Prediction oracle failure.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum OracleError {
    #[error("oracle transport failed: {0}")]
    Transport(String),
    #[error("oracle returned status {0}")]
    Status(u16),
    #[error("oracle response malformed: {0}")]
    InvalidResponse(String),
    #[error("oracle produced a non-finite value: {0}")]
    NonFinite(f64),
}

/// Recommendation generation failure.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RecommendError {
    #[error("recommendation service transport failed: {0}")]
    Transport(String),
    #[error("recommendation service returned status {0}")]
    Status(u16),
    #[error("recommendation response malformed: {0}")]
    InvalidResponse(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Notification emission outcome that reached nobody or could not be encoded.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum NotifyError {
    #[error("no subscribers on channel {0}")]
    NoSubscribers(Channel),
    #[error("payload could not be encoded: {0}")]
    Encode(String),
}

/// Failure of a single event's detection.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum DetectError {
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Failure of a whole scan (the window could not be fetched).
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ScanError {
    #[error("failed to fetch unprocessed events: {0}")]
    EventSource(#[source] StoreError),
}

/// Configuration loading or validation failure.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid value for {key}: {value}")]
    InvalidEnv { key: String, value: String },
    #[error("invalid config: {0}")]
    Invalid(String),
}
