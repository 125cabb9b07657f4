//! parley-protocol: wire types for the assistant subprocess protocol
//!
//! The assistant runs as a long-lived subprocess speaking newline-delimited
//! JSON in both directions: inbound [`Envelope`]s on its event channel and
//! outbound [`Command`]s on its command channel. This crate defines those
//! shapes plus the content/transcript types that cross the boundary.

pub mod command;
pub mod envelope;
pub mod error;
pub mod types;

pub use command::{Command, PermissionMode};
pub use envelope::{BlockStart, Delta, Envelope, Event, Question, TurnSnapshot};
pub use error::Error;
pub use types::{
    ContentUnit, Conversation, ImageAttachment, MessagePayload, Persona, Role, TranscriptMessage,
};
