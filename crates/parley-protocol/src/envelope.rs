//! Inbound event envelopes
//!
//! The subprocess emits newline-delimited JSON envelopes of shape
//! `{ "sessionId": ..., "type": ..., ...fields }`, delivered in arrival
//! order over a single ordered channel per subprocess.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::ContentUnit;

/// One discrete event delivered over the subprocess's event channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "sessionId")]
    pub session_id: String,
    #[serde(flatten)]
    pub event: Event,
}

impl Envelope {
    /// Parse one NDJSON line into an envelope
    pub fn from_line(line: &str) -> Result<Self> {
        serde_json::from_str(line).map_err(Error::Malformed)
    }

    /// Serialize to one NDJSON line (without trailing newline)
    pub fn to_line(&self) -> Result<String> {
        serde_json::to_string(self).map_err(Error::Encode)
    }

    pub fn new(session_id: impl Into<String>, event: Event) -> Self {
        Self {
            session_id: session_id.into(),
            event,
        }
    }
}

/// Turn-scoped and lifecycle event payloads
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Session is live; streaming state must be cleared
    #[serde(rename = "session:started")]
    SessionStarted,

    /// A new content unit opened at `index`
    ContentBlockStart {
        index: usize,
        content_block: BlockStart,
    },

    /// Incremental update to the unit at `index`
    ContentBlockDelta { index: usize, delta: Delta },

    /// The unit at `index` closed
    ContentBlockStop { index: usize },

    /// Consolidated turn snapshot; may arrive instead of, or interleaved
    /// with, incremental deltas
    Assistant { message: TurnSnapshot },

    /// Tool results pushed back from the subprocess
    User { message: TurnSnapshot },

    /// Turn finished
    Result {
        #[serde(default)]
        is_error: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        subtype: Option<String>,
    },

    /// The subprocess wants approval before running a tool
    PermissionRequest {
        tool_name: String,
        #[serde(default)]
        tool_input: serde_json::Value,
    },

    /// The subprocess asks the user structured questions mid-turn
    AskQuestion {
        tool_use_id: String,
        questions: Vec<Question>,
    },

    /// The subprocess presents a plan for approval or revision
    PlanReview {
        tool_use_id: String,
        #[serde(default)]
        plan: serde_json::Value,
    },

    /// Session is over
    #[serde(rename = "session:ended")]
    SessionEnded,

    /// Session died; a synthetic error entry goes to the transcript
    #[serde(rename = "session:error")]
    SessionError {
        #[serde(default)]
        message: String,
    },
}

impl Event {
    /// Whether this event ends the session
    pub fn is_terminal(&self) -> bool {
        matches!(self, Event::SessionEnded | Event::SessionError { .. })
    }
}

/// The opening shape of a content unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BlockStart {
    Text,
    Thinking,
    ToolUse {
        id: String,
        name: String,
    },
    ToolResult {
        tool_use_id: String,
        #[serde(default)]
        is_error: bool,
    },
}

/// One incremental content update
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Delta {
    /// Append to accumulated text
    TextDelta { text: String },
    /// Append to accumulated thinking text
    ThinkingDelta { thinking: String },
    /// Raw fragment of a tool invocation's structured input; never parsed
    /// until the unit closes
    InputJsonDelta { partial_json: String },
}

/// A full content snapshot carried by `assistant` / `user` envelopes
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TurnSnapshot {
    #[serde(default)]
    pub content: Vec<ContentUnit>,
}

/// One structured question inside an `ask_question` event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    pub question: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
}
