//! Content assembly: folding partial deltas into complete content units
//!
//! One [`StreamingState`] exists per session. It is transient and mutable,
//! reset to empty at the start of every new turn and at session end. Envelope
//! processing is strictly sequential per session, so no locking happens here.

use serde::{Deserialize, Serialize};

use parley_protocol::{BlockStart, ContentUnit, Delta, TurnSnapshot};

/// Per-session transient streaming state
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamingState {
    /// Accumulated assistant prose for the in-flight turn
    pub text: String,
    /// Accumulated thinking text
    pub thinking: String,
    /// In-progress content-unit list, indexed by block index
    pub units: Vec<UnitBuffer>,
    /// Whether a turn is in progress
    pub turn_active: bool,
    /// Currently attributed persona name, if any
    pub current_persona: Option<String>,
}

/// One in-progress content unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum UnitBuffer {
    Text(String),
    Thinking(String),
    ToolUse {
        id: String,
        name: String,
        /// Accumulated-but-unparsed structured input; parsed only at stop
        partial_json: String,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
        is_error: bool,
    },
}

/// Flushed output of a finished turn
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TurnOutput {
    pub text: String,
    pub thinking: String,
}

impl StreamingState {
    /// Reset for a new turn
    pub fn begin_turn(&mut self) {
        *self = Self {
            turn_active: true,
            ..Self::default()
        };
    }

    /// Clear everything (session end / teardown)
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Open a new content-unit placeholder at `index`
    pub fn block_start(&mut self, index: usize, block: BlockStart) {
        let buffer = match block {
            BlockStart::Text => UnitBuffer::Text(String::new()),
            BlockStart::Thinking => UnitBuffer::Thinking(String::new()),
            BlockStart::ToolUse { id, name } => UnitBuffer::ToolUse {
                id,
                name,
                partial_json: String::new(),
            },
            BlockStart::ToolResult {
                tool_use_id,
                is_error,
            } => UnitBuffer::ToolResult {
                tool_use_id,
                content: String::new(),
                is_error,
            },
        };
        self.ensure_buffer(index, buffer);
    }

    /// Fold one delta into the state
    pub fn apply_delta(&mut self, index: usize, delta: Delta) {
        match delta {
            Delta::TextDelta { text } => match self.units.get_mut(index) {
                Some(UnitBuffer::ToolResult { content, .. }) => content.push_str(&text),
                Some(UnitBuffer::Text(buf)) => {
                    buf.push_str(&text);
                    self.text.push_str(&text);
                }
                _ => {
                    // Delta without a preceding block_start; accumulate anyway
                    self.ensure_buffer(index, UnitBuffer::Text(text.clone()));
                    self.text.push_str(&text);
                }
            },
            Delta::ThinkingDelta { thinking } => {
                if let Some(UnitBuffer::Thinking(buf)) = self.units.get_mut(index) {
                    buf.push_str(&thinking);
                } else {
                    self.ensure_buffer(index, UnitBuffer::Thinking(thinking.clone()));
                }
                self.thinking.push_str(&thinking);
            }
            Delta::InputJsonDelta { partial_json } => {
                if let Some(UnitBuffer::ToolUse {
                    partial_json: acc, ..
                }) = self.units.get_mut(index)
                {
                    acc.push_str(&partial_json);
                } else {
                    tracing::debug!(index, "input_json_delta for a non-tool block, dropping");
                }
            }
        }
    }

    /// Close the unit at `index`.
    ///
    /// For a tool invocation this attempts to parse the accumulated partial
    /// JSON as the final structured input; parse failure leaves the input
    /// absent (a consolidated snapshot may still complete it later). Returns
    /// the now-complete tool unit for the ledger, `None` for text/thinking.
    pub fn block_stop(&mut self, index: usize) -> Option<ContentUnit> {
        match self.units.get(index) {
            Some(UnitBuffer::ToolUse {
                id,
                name,
                partial_json,
            }) => {
                let input = if partial_json.trim().is_empty() {
                    None
                } else {
                    match serde_json::from_str(partial_json) {
                        Ok(value) => Some(value),
                        Err(e) => {
                            tracing::debug!(
                                tool_use_id = %id,
                                error = %e,
                                "tool input did not parse at block stop, leaving absent"
                            );
                            None
                        }
                    }
                };
                Some(ContentUnit::tool_invocation(id, name, input))
            }
            Some(UnitBuffer::ToolResult {
                tool_use_id,
                content,
                is_error,
            }) => Some(ContentUnit::tool_result(
                tool_use_id,
                serde_json::Value::String(content.clone()),
                *is_error,
            )),
            _ => None,
        }
    }

    /// Reconcile a consolidated turn snapshot against accumulated state.
    ///
    /// Text is never duplicated: the longer of the snapshot text and the
    /// accumulated text wins when one is a prefix of the other. Tool units
    /// are returned for the ledger, which deduplicates them independently.
    pub fn reconcile(&mut self, snapshot: &TurnSnapshot) -> Vec<ContentUnit> {
        let mut tool_units = Vec::new();
        let mut snapshot_text = String::new();
        let mut snapshot_thinking = String::new();

        for unit in &snapshot.content {
            match unit {
                ContentUnit::Text { text } => snapshot_text.push_str(text),
                ContentUnit::Thinking { thinking } => snapshot_thinking.push_str(thinking),
                tool => tool_units.push(tool.clone()),
            }
        }

        self.text = Self::merge_accumulated(std::mem::take(&mut self.text), snapshot_text);
        self.thinking =
            Self::merge_accumulated(std::mem::take(&mut self.thinking), snapshot_thinking);

        tool_units
    }

    fn merge_accumulated(accumulated: String, snapshot: String) -> String {
        if snapshot.len() > accumulated.len() && snapshot.starts_with(&accumulated) {
            snapshot
        } else if accumulated.starts_with(&snapshot) {
            accumulated
        } else if accumulated.is_empty() {
            snapshot
        } else {
            tracing::debug!("snapshot text diverges from accumulated text, keeping accumulated");
            accumulated
        }
    }

    /// Finalize the turn: take the accumulated output and reset everything
    pub fn finish_turn(&mut self) -> TurnOutput {
        let output = TurnOutput {
            text: std::mem::take(&mut self.text),
            thinking: std::mem::take(&mut self.thinking),
        };
        self.clear();
        output
    }

    fn ensure_buffer(&mut self, index: usize, buffer: UnitBuffer) {
        while self.units.len() <= index {
            self.units.push(UnitBuffer::Text(String::new()));
        }
        self.units[index] = buffer;
    }
}
