//! Project tabs, per-project configuration, and background activity

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use parley_protocol::{Conversation, PermissionMode, Persona, TranscriptMessage};
use parley_session::StreamingState;

/// Maximum retained background activity entries per project
const ACTIVITY_CAPACITY: usize = 256;

/// Configuration of one external tool server process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolServerSpec {
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Path to the generated config handed to the subprocess at launch
    #[serde(default)]
    pub config_path: Option<String>,
}

/// Per-project launch configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectConfig {
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub permission_mode: PermissionMode,
    /// Speaker roster for multi-persona transcripts; empty disables
    /// attribution parsing
    #[serde(default)]
    pub personas: Vec<Persona>,
    #[serde(default)]
    pub tool_servers: Vec<ToolServerSpec>,
    #[serde(default)]
    pub system_prompt: Option<String>,
}

fn default_model() -> String {
    "default".to_string()
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            permission_mode: PermissionMode::default(),
            personas: Vec::new(),
            tool_servers: Vec::new(),
            system_prompt: None,
        }
    }
}

/// One background activity entry for an unfocused project
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub conversation_id: String,
    pub summary: String,
    pub timestamp: i64,
}

/// Bounded log of what a project's sessions did while unfocused. Oldest
/// entries are discarded past capacity.
#[derive(Debug, Default)]
pub struct ActivityRecord {
    entries: VecDeque<ActivityEntry>,
    /// Set when an unfocused session is paused on a decision
    needs_attention: bool,
}

impl ActivityRecord {
    pub fn push(&mut self, conversation_id: &str, summary: impl Into<String>) {
        if self.entries.len() == ACTIVITY_CAPACITY {
            self.entries.pop_front();
        }
        self.entries.push_back(ActivityEntry {
            conversation_id: conversation_id.to_string(),
            summary: summary.into(),
            timestamp: chrono::Utc::now().timestamp_millis(),
        });
    }

    pub fn mark_needs_attention(&mut self) {
        self.needs_attention = true;
    }

    pub fn needs_attention(&self) -> bool {
        self.needs_attention
    }

    pub fn entries(&self) -> impl Iterator<Item = &ActivityEntry> {
        self.entries.iter()
    }

    /// Clear on regaining focus
    pub fn drain(&mut self) -> Vec<ActivityEntry> {
        self.needs_attention = false;
        self.entries.drain(..).collect()
    }
}

/// Snapshot of a project's working state, captured when focus leaves and
/// used to restore the view when focus returns
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkingState {
    pub conversation: Conversation,
    pub transcript: Vec<TranscriptMessage>,
    pub streaming: StreamingState,
    pub awaiting_decision: bool,
}

/// One open project
pub struct ProjectTab {
    pub path: String,
    pub display_name: String,
    pub config: ProjectConfig,
    /// Currently selected conversation, if any
    pub conversation: Option<Conversation>,
    /// Transcript of the selected conversation when it has no live session
    pub loaded_transcript: Vec<TranscriptMessage>,
    pub activity: Arc<Mutex<ActivityRecord>>,
    pub opened_at: i64,
}

impl ProjectTab {
    pub fn new(path: impl Into<String>, display_name: impl Into<String>, config: ProjectConfig) -> Self {
        Self {
            path: path.into(),
            display_name: display_name.into(),
            config,
            conversation: None,
            loaded_transcript: Vec::new(),
            activity: Arc::new(Mutex::new(ActivityRecord::default())),
            opened_at: chrono::Utc::now().timestamp_millis(),
        }
    }
}

/// Compute a display name for a newly opened project, disambiguating
/// against names already in use: `app`, then `app (2)`, `app (3)`.
pub fn display_name_for(path: &str, taken: &[&str]) -> String {
    let base = std::path::Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string());
    if !taken.contains(&base.as_str()) {
        return base;
    }
    let mut n = 2;
    loop {
        let candidate = format!("{} ({})", base, n);
        if !taken.contains(&candidate.as_str()) {
            return candidate;
        }
        n += 1;
    }
}
