//! Error types for the whale sentinel

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SentinelError {
    /// Upstream source unreachable or timed out. Retried on the next
    /// scheduled cycle, never in a tight loop within a cycle.
    #[error("transient fetch error: {0}")]
    Transient(String),

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Invalid rule, weights, or timeframe. Fatal at startup, never
    /// produced mid-cycle.
    #[error("configuration error: {0}")]
    Config(String),

    #[error("unknown timeframe: {0}")]
    UnknownTimeframe(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, SentinelError>;
