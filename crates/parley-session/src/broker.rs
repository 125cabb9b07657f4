//! Side-channel broker: blocking mid-turn requests for a user decision
//!
//! Three event types pause a live turn: permission requests, structured
//! questions, and plan reviews. The broker holds exactly one outstanding
//! request per session; the turn resumes once a decision is forwarded to
//! the subprocess as a command.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use parley_protocol::{Command, Question};

use crate::error::{Error, Result};

/// A request that pauses a turn pending a human decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SideChannelRequest {
    Permission {
        session_id: String,
        tool_name: String,
        tool_input: serde_json::Value,
    },
    Question {
        session_id: String,
        tool_use_id: String,
        questions: Vec<Question>,
    },
    PlanReview {
        session_id: String,
        tool_use_id: String,
        plan: serde_json::Value,
    },
}

impl SideChannelRequest {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Permission { .. } => "permission",
            Self::Question { .. } => "question",
            Self::PlanReview { .. } => "plan review",
        }
    }
}

/// The user's answer to an outstanding request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Decision {
    Permission {
        allowed: bool,
        #[serde(default)]
        always: bool,
    },
    Answers {
        answers: Vec<String>,
    },
    Plan {
        approved: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        revision: Option<String>,
    },
}

/// Holds at most one outstanding request per session
#[derive(Debug, Default)]
pub struct SideChannelBroker {
    outstanding: Option<SideChannelRequest>,
}

impl SideChannelBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Capture a request; the session is logically paused until answered
    pub fn open(&mut self, request: SideChannelRequest) {
        if let Some(previous) = &self.outstanding {
            tracing::warn!(
                kind = previous.kind(),
                "replacing an unanswered side-channel request"
            );
        }
        self.outstanding = Some(request);
    }

    /// The request awaiting a decision, if any
    pub fn outstanding(&self) -> Option<&SideChannelRequest> {
        self.outstanding.as_ref()
    }

    /// Forward a decision as the matching subprocess command and clear the
    /// outstanding request. The original tool call is never resent: the
    /// subprocess receives an error-shaped acknowledgment for the intercepted
    /// tool and treats it as "continue, do not retry".
    pub fn respond(&mut self, decision: Decision) -> Result<Command> {
        let request = self
            .outstanding
            .as_ref()
            .ok_or(Error::NoOutstandingRequest)?;

        let command = match (request, decision) {
            (
                SideChannelRequest::Permission { session_id, .. },
                Decision::Permission { allowed, always },
            ) => Command::RespondPermission {
                session_id: session_id.clone(),
                allowed,
                always,
            },
            (SideChannelRequest::Question { session_id, .. }, Decision::Answers { answers }) => {
                Command::RespondToQuestion {
                    session_id: session_id.clone(),
                    answers,
                }
            }
            (
                SideChannelRequest::PlanReview { session_id, .. },
                Decision::Plan { approved, revision },
            ) => Command::RespondToPlanReview {
                session_id: session_id.clone(),
                approved,
                revision,
            },
            (request, _) => return Err(Error::DecisionMismatch(request.kind())),
        };

        self.outstanding = None;
        Ok(command)
    }

    /// Drop the outstanding request without a decision (abort path)
    pub fn cancel(&mut self) -> bool {
        self.outstanding.take().is_some()
    }
}

/// Tool names the UI intercepts; the subprocess always gets an error-shaped
/// acknowledgment for these and must not retry them.
pub const INTERCEPTED_TOOLS: [&str; 2] = ["ask_user_question", "present_plan"];

/// The standing instruction injected into every session's initial
/// configuration, describing the side-channel contract.
pub fn side_channel_contract() -> String {
    format!(
        "The tools `{}` and `{}` are intercepted by the client. When you call \
         one of them you will receive an error-shaped tool result; this is the \
         expected acknowledgment, not a failure. Do not retry the call. Stop \
         and wait for the next user turn, which will carry the user's answer.",
        INTERCEPTED_TOOLS[0], INTERCEPTED_TOOLS[1]
    )
}

/// Append the side-channel contract to a caller-supplied system prompt
pub fn append_contract(existing: Option<&str>) -> String {
    match existing {
        Some(prompt) if !prompt.trim().is_empty() => {
            format!("{}\n\n{}", prompt, side_channel_contract())
        }
        _ => side_channel_contract(),
    }
}

/// Classification of a tool result's content
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultClass {
    Normal,
    /// A permission denial disguised as a tool result; already represented
    /// by the permission flow, so it is suppressed from the transcript
    PermissionDenial,
}

/// Known deny-reason phrasings across subprocess versions
static DENY_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)user\s+(denied|rejected|declined)",
        r"(?i)denied\s+by\s+(the\s+)?user",
        r"(?i)permission\s+request\s+(was\s+)?denied",
        r"(?i)the\s+user\s+doesn'?t\s+want\s+to\s+proceed",
    ]
    .iter()
    .filter_map(|p| Regex::new(p).ok())
    .collect()
});

/// Classify a tool result's text content
pub fn classify_tool_result(text: &str) -> ResultClass {
    if DENY_PATTERNS.iter().any(|re| re.is_match(text)) {
        ResultClass::PermissionDenial
    } else {
        ResultClass::Normal
    }
}
