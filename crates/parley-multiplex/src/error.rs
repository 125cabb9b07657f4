//! Multiplexer error types

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("unknown project: {0}")]
    UnknownProject(String),

    #[error("project already open: {0}")]
    AlreadyOpen(String),

    #[error("unknown session: {0}")]
    UnknownSession(String),

    #[error("unknown conversation: {0}")]
    UnknownConversation(String),

    #[error(transparent)]
    Session(#[from] parley_session::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
