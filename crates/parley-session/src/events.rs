//! Session event types

use serde::{Deserialize, Serialize};

use parley_protocol::TranscriptMessage;

use crate::broker::SideChannelRequest;

/// Events emitted by a session controller as it folds inbound envelopes
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// The subprocess confirmed the session is live
    Started,

    /// Accumulated streaming text grew
    StreamText { delta: String },

    /// Accumulated thinking text grew
    StreamThinking { delta: String },

    /// A transcript entry was appended at `index`
    MessageAppended {
        index: usize,
        message: TranscriptMessage,
    },

    /// An existing transcript entry changed in place (late tool input,
    /// persisted-id assignment); display order is unaffected
    MessageUpdated {
        index: usize,
        message: TranscriptMessage,
    },

    /// The turn is paused awaiting a user decision
    DecisionRequested { request: SideChannelRequest },

    /// The outstanding decision was answered or dropped
    DecisionResolved,

    /// The turn finished; the session is ready for the next outbound message
    TurnCompleted,

    /// The session ended normally
    Ended,

    /// The session died; a synthetic error entry was appended
    Errored { message: String },
}

impl SessionEvent {
    /// Check if this is a terminal event
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionEvent::Ended | SessionEvent::Errored { .. })
    }
}
