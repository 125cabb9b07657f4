//! Tool invocation ledger
//!
//! The subprocess emits overlapping information about the same tool call
//! across both incremental delta events and consolidated snapshot events.
//! The ledger keys every tool unit by its invocation identifier and lets
//! each identifier reach the transcript exactly once per unit kind.

use std::collections::{HashMap, HashSet};

use parley_protocol::ContentUnit;

/// What `record` decided about a unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerOutcome {
    /// First sighting; surface it as a new transcript entry
    New,
    /// Already surfaced; silent no-op
    Duplicate,
    /// Already surfaced without input, and this delivery carries the parsed
    /// input; update the existing entry in place
    Completed,
}

/// Deduplicates tool-invocation/tool-result pairs
#[derive(Debug, Default)]
pub struct ToolLedger {
    /// invocation id -> whether the surfaced entry already had parsed input
    invocations: HashMap<String, bool>,
    results: HashSet<String>,
}

impl ToolLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a tool unit, returning whether it is new. Non-tool units are
    /// always duplicates from the ledger's perspective.
    pub fn record(&mut self, unit: &ContentUnit) -> LedgerOutcome {
        match unit {
            ContentUnit::ToolInvocation { id, input, .. } => {
                match self.invocations.get_mut(id) {
                    None => {
                        self.invocations.insert(id.clone(), input.is_some());
                        LedgerOutcome::New
                    }
                    Some(had_input) => {
                        if !*had_input && input.is_some() {
                            *had_input = true;
                            LedgerOutcome::Completed
                        } else {
                            LedgerOutcome::Duplicate
                        }
                    }
                }
            }
            ContentUnit::ToolResult { tool_use_id, .. } => {
                if self.results.insert(tool_use_id.clone()) {
                    LedgerOutcome::New
                } else {
                    LedgerOutcome::Duplicate
                }
            }
            _ => LedgerOutcome::Duplicate,
        }
    }

    /// Reset between sessions
    pub fn clear(&mut self) {
        self.invocations.clear();
        self.results.clear();
    }
}
