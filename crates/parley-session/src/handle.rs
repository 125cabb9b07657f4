//! Cloneable handle to a running session worker

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use parley_protocol::Event;

/// Handle for feeding envelopes to a session worker and shutting it down.
/// Cheap to clone; all clones feed the same worker.
#[derive(Clone)]
pub struct SessionHandle {
    events: mpsc::UnboundedSender<Event>,
    cancel: CancellationToken,
}

impl SessionHandle {
    pub(crate) fn new(
        events: mpsc::UnboundedSender<Event>,
        cancel: CancellationToken,
    ) -> Self {
        Self { events, cancel }
    }

    /// Queue an envelope event for sequential processing. Returns false if
    /// the worker has already exited.
    pub fn deliver(&self, event: Event) -> bool {
        self.events.send(event).is_ok()
    }

    /// Stop the worker without waiting for a terminal envelope
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.events.is_closed()
    }
}
