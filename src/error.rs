//! Error types for the tuning loop.

use std::io;
use thiserror::Error;

/// Result type for tuner operations
pub type TunerResult<T> = Result<T, TunerError>;

/// Errors raised by the metric store, sources, actuation path and configuration.
#[derive(Error, Debug)]
pub enum TunerError {
    /// Median requested before any sample was recorded
    #[error("rolling window is empty")]
    EmptyWindow,

    /// Sample rejected at ingestion (NaN, infinite or outside the CQI range)
    #[error("invalid CQI sample {value}: {reason}")]
    InvalidSample { value: f64, reason: &'static str },

    /// Manual override direction other than `up` / `down`
    #[error("invalid direction '{0}': expected 'up' or 'down'")]
    InvalidDirection(String),

    /// Environment variable failed to parse or validate
    #[error("invalid configuration {key}: {reason}")]
    Config { key: String, reason: String },

    /// gNB metrics scrape failed or carried no CQI
    #[error("gNB scrape failed: {0}")]
    Scrape(String),

    /// Control request to the RIC failed
    #[error("actuation failed: {0}")]
    Actuation(String),

    /// Dashboard rendering failed
    #[error("render failed: {0}")]
    Render(String),

    /// HTTP client could not be built or a request failed outright
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl TunerError {
    pub fn config(key: &str, reason: impl Into<String>) -> Self {
        TunerError::Config {
            key: key.to_string(),
            reason: reason.into(),
        }
    }
}
