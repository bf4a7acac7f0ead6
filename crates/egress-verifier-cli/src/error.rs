//! Error types for the CLI

use egress_verifier::compute::ComputeError;

/// CLI Result type
pub type Result<T> = std::result::Result<T, Error>;

/// CLI errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Verifier(#[from] egress_verifier::Error),

    #[error("compute client error: {0}")]
    Compute(#[from] ComputeError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("validation error: {message}")]
    Validation { message: String },

    #[error(
        "egress validation failed: {failures} failure(s), {unreachable} unreachable endpoint(s)"
    )]
    EgressFailed { failures: usize, unreachable: usize },

    #[error("telemetry error: {0}")]
    Telemetry(String),
}

impl Error {
    pub fn validation(message: impl Into<String>) -> Self {
        Error::Validation {
            message: message.into(),
        }
    }
}
