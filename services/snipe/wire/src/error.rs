//! Wire protocol error types.

use thiserror::Error;

/// Wire protocol errors
#[derive(Error, Debug)]
pub enum WireError {
    /// Line exceeded the configured size limit
    #[error("size limit exceeded: {0}")]
    Size(usize),

    /// Frame is not a JSON object
    #[error("malformed frame")]
    Malformed,

    /// Correlation id present but not an unsigned integer
    #[error("invalid @extra correlation id")]
    Extra,

    /// JSON encoding or decoding failed
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}
