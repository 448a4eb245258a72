//! Error types for the OCR cascade
//!
//! Two layers: [`EngineError`] is what an adapter call can fail with and is
//! always absorbed by the attempt ledger; [`CascadeError`] is a deployment
//! mistake surfaced once when the controller is constructed.

use std::time::Duration;
use thiserror::Error;

use crate::model::Modality;

/// Errors raised by a single engine adapter.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("engine {0} is not registered or failed to initialize")]
    Unavailable(String),

    #[error("engine {engine} timed out after {after:?}")]
    Timeout { engine: String, after: Duration },

    #[error("recognizer process failed: {0}")]
    Process(String),

    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("could not parse recognizer output: {0}")]
    Parse(String),

    #[error("initialization failed: {0}")]
    Initialization(String),

    #[error("engine {engine} panicked: {message}")]
    Panicked { engine: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for EngineError {
    fn from(err: reqwest::Error) -> Self {
        Self::Http(err.to_string())
    }
}

/// Errors raised while building a cascade controller.
#[derive(Debug, Error)]
pub enum CascadeError {
    #[error("no engines registered for {0} blocks")]
    NoEngines(Modality),

    #[error("threshold {name} must be within [0, 1], got {value}")]
    InvalidThreshold { name: &'static str, value: f64 },

    #[error("configuration error: {0}")]
    Config(String),
}

/// Result alias for cascade construction.
pub type CascadeResult<T> = Result<T, CascadeError>;
