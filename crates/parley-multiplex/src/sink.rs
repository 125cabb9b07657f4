//! Focus-dependent event delivery
//!
//! Every session worker delivers through a swappable sink. The focused
//! project's sessions get a [`LiveSink`] that forwards to the UI channel;
//! unfocused projects get a [`HeadlessSink`] that condenses events into the
//! project's activity record. Swapping sinks never interrupts the session.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;

use parley_session::{SessionEvent, SessionSink};

use crate::tabs::ActivityRecord;

/// Events surfaced to the embedding frontend
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UiEvent {
    Session {
        project: String,
        session_id: String,
        event: SessionEvent,
    },
    ProjectOpened {
        project: String,
        display_name: String,
    },
    ProjectClosed {
        project: String,
    },
    ActiveChanged {
        project: String,
    },
}

/// Forwards every session event to the UI channel
pub struct LiveSink {
    project: String,
    ui_tx: mpsc::UnboundedSender<UiEvent>,
}

impl LiveSink {
    pub fn new(project: impl Into<String>, ui_tx: mpsc::UnboundedSender<UiEvent>) -> Self {
        Self {
            project: project.into(),
            ui_tx,
        }
    }
}

impl SessionSink for LiveSink {
    fn deliver(&self, session_id: &str, event: &SessionEvent) {
        let _ = self.ui_tx.send(UiEvent::Session {
            project: self.project.clone(),
            session_id: session_id.to_string(),
            event: event.clone(),
        });
    }
}

/// Condenses background session events into the owning project's activity
/// record instead of the UI channel
pub struct HeadlessSink {
    conversation_id: String,
    activity: Arc<Mutex<ActivityRecord>>,
}

impl HeadlessSink {
    pub fn new(conversation_id: impl Into<String>, activity: Arc<Mutex<ActivityRecord>>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            activity,
        }
    }
}

impl SessionSink for HeadlessSink {
    fn deliver(&self, _session_id: &str, event: &SessionEvent) {
        let mut activity = self.activity.lock();
        match event {
            SessionEvent::TurnCompleted => {
                activity.push(&self.conversation_id, "turn completed");
            }
            SessionEvent::DecisionRequested { request } => {
                activity.push(
                    &self.conversation_id,
                    format!("waiting on {}", request.kind()),
                );
                activity.mark_needs_attention();
            }
            SessionEvent::Errored { message } => {
                activity.push(&self.conversation_id, format!("session error: {}", message));
                activity.mark_needs_attention();
            }
            SessionEvent::Ended => {
                activity.push(&self.conversation_id, "session ended");
            }
            _ => {}
        }
    }
}
