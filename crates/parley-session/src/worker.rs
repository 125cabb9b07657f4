//! Per-session worker task
//!
//! Each session gets exactly one worker pulling envelopes off an unbounded
//! queue, so envelope processing is strictly ordered per session even though
//! persistence and delivery happen off the hot path.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use parley_protocol::TranscriptMessage;

use crate::controller::SessionController;
use crate::events::SessionEvent;
use crate::handle::SessionHandle;
use crate::store::ConversationStore;

/// Destination for session events. Swapped at runtime when a project gains
/// or loses focus, so delivery is behind a lock rather than a fixed channel.
pub trait SessionSink: Send + Sync {
    fn deliver(&self, session_id: &str, event: &SessionEvent);
}

/// Swappable sink shared between a worker and its owner
pub type SharedSink = Arc<RwLock<Arc<dyn SessionSink>>>;

pub fn shared_sink(sink: Arc<dyn SessionSink>) -> SharedSink {
    Arc::new(RwLock::new(sink))
}

/// Sink that drops everything. Background sessions use this until they are
/// brought back into focus; the controller still accumulates state.
pub struct NullSink;

impl SessionSink for NullSink {
    fn deliver(&self, _session_id: &str, _event: &SessionEvent) {}
}

/// Spawn the worker task for a session. The returned handle is the only way
/// to feed it; the worker exits on a terminal event or on shutdown.
pub fn spawn_session(
    controller: Arc<Mutex<SessionController>>,
    store: Arc<dyn ConversationStore>,
    sink: SharedSink,
) -> SessionHandle {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let cancel = CancellationToken::new();
    let token = cancel.clone();

    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                _ = token.cancelled() => break,
                maybe = rx.recv() => match maybe {
                    Some(event) => event,
                    None => break,
                },
            };

            let (session_id, conversation_id, outputs) = {
                let mut ctrl = controller.lock();
                let outputs = ctrl.handle_event(event);
                (
                    ctrl.session_id().to_string(),
                    ctrl.conversation().id.clone(),
                    outputs,
                )
            };

            let mut terminal = false;
            for output in outputs {
                if output.is_terminal() {
                    terminal = true;
                }
                if let SessionEvent::MessageAppended { index, message } = &output {
                    persist_message(
                        controller.clone(),
                        store.clone(),
                        sink.clone(),
                        conversation_id.clone(),
                        *index,
                        message.clone(),
                    );
                }
                sink.read().deliver(&session_id, &output);
            }
            if terminal {
                break;
            }
        }
        tracing::debug!("session worker exited");
    });

    SessionHandle::new(tx, cancel)
}

/// Persist one appended message without blocking envelope processing. The
/// assigned identifier is fed back into the transcript in place and the
/// resulting update is delivered through the current sink.
pub fn persist_message(
    controller: Arc<Mutex<SessionController>>,
    store: Arc<dyn ConversationStore>,
    sink: SharedSink,
    conversation_id: String,
    index: usize,
    message: TranscriptMessage,
) {
    tokio::spawn(async move {
        match store.save_message(&conversation_id, &message).await {
            Ok(id) => {
                let (session_id, update) = {
                    let mut ctrl = controller.lock();
                    let update = ctrl.assign_persisted_id(index, id);
                    (ctrl.session_id().to_string(), update)
                };
                if let Some(event) = update {
                    sink.read().deliver(&session_id, &event);
                }
            }
            Err(e) => {
                tracing::warn!(
                    conversation_id = %conversation_id,
                    error = %e,
                    "failed to persist message"
                );
            }
        }
    });
}
