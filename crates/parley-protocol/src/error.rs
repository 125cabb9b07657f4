//! Error types for parley-protocol

use thiserror::Error;

/// Result type alias using parley-protocol Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur at the wire boundary
#[derive(Error, Debug)]
pub enum Error {
    /// An inbound line that is not a valid envelope
    #[error("malformed envelope: {0}")]
    Malformed(#[source] serde_json::Error),

    /// An outbound command that failed to serialize
    #[error("command encoding failed: {0}")]
    Encode(#[source] serde_json::Error),
}
