//! Error types for parley-session

use thiserror::Error;

/// Result type alias using parley-session Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during session operations
#[derive(Error, Debug)]
pub enum Error {
    /// An error from the wire layer
    #[error(transparent)]
    Protocol(#[from] parley_protocol::Error),

    /// A decision was supplied but no side-channel request is outstanding
    #[error("no outstanding side-channel request")]
    NoOutstandingRequest,

    /// The supplied decision does not answer the outstanding request kind
    #[error("decision does not match the outstanding {0} request")]
    DecisionMismatch(&'static str),

    /// The session is not in a state that accepts this operation
    #[error("session is not live")]
    NotLive,

    /// Command channel failure (string-based; links wrap arbitrary IO)
    #[error("link error: {0}")]
    Link(String),

    /// Persistence collaborator failure (best-effort; never rolls back the transcript)
    #[error("store error: {0}")]
    Store(String),
}
