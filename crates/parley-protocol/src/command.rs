//! Outbound commands sent to the assistant subprocess

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::ImageAttachment;

/// Permission policy for a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PermissionMode {
    /// Ask the user before every gated tool call
    #[default]
    Prompt,
    /// Auto-approve edit-style tools, ask for the rest
    AcceptEdits,
    /// Plan-only; no side-effecting tools run
    Plan,
    /// Never ask
    Bypass,
}

/// One command on the subprocess's command channel.
///
/// Commands are fire-and-forget from the controller's perspective; the
/// subprocess acknowledges through its event channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Command {
    /// Begin a session for one conversation
    StartSession {
        session_id: String,
        prompt: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        images: Vec<ImageAttachment>,
        /// Conversation id to resume, if any
        #[serde(default, skip_serializing_if = "Option::is_none")]
        resume: Option<String>,
        working_directory: String,
        model: String,
        permission_mode: PermissionMode,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        append_system_prompt: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tool_server_config_path: Option<String>,
    },

    /// Send the next user message into a live session
    SendMessage {
        session_id: String,
        text: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        images: Vec<ImageAttachment>,
    },

    /// Answer an outstanding permission request
    RespondPermission {
        session_id: String,
        allowed: bool,
        #[serde(default)]
        always: bool,
    },

    /// Answer an outstanding structured question
    RespondToQuestion {
        session_id: String,
        answers: Vec<String>,
    },

    /// Approve or send back an outstanding plan review
    RespondToPlanReview {
        session_id: String,
        approved: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        revision: Option<String>,
    },

    /// Tear the session down
    Abort { session_id: String },
}

impl Command {
    /// Serialize to one NDJSON line (without trailing newline)
    pub fn to_line(&self) -> Result<String> {
        serde_json::to_string(self).map_err(Error::Encode)
    }

    /// The session this command addresses
    pub fn session_id(&self) -> &str {
        match self {
            Command::StartSession { session_id, .. }
            | Command::SendMessage { session_id, .. }
            | Command::RespondPermission { session_id, .. }
            | Command::RespondToQuestion { session_id, .. }
            | Command::RespondToPlanReview { session_id, .. }
            | Command::Abort { session_id } => session_id,
        }
    }
}
