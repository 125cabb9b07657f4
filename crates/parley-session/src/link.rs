//! Outbound command channel to the assistant subprocess

use async_trait::async_trait;

use parley_protocol::Command;

use crate::error::{Error, Result};

/// Writer side of the subprocess protocol. Implementations serialize each
/// command as one newline-terminated JSON line on the subprocess's stdin.
#[async_trait]
pub trait SubprocessLink: Send + Sync {
    async fn send(&self, command: Command) -> Result<()>;
}

/// Link that records sent commands instead of delivering them. Used by tests
/// and by headless tooling that inspects outbound traffic.
#[derive(Default)]
pub struct RecordingLink {
    sent: parking_lot::Mutex<Vec<Command>>,
}

impl RecordingLink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<Command> {
        self.sent.lock().clone()
    }

    pub fn take_sent(&self) -> Vec<Command> {
        std::mem::take(&mut *self.sent.lock())
    }
}

#[async_trait]
impl SubprocessLink for RecordingLink {
    async fn send(&self, command: Command) -> Result<()> {
        command
            .to_line()
            .map_err(|e| Error::Link(e.to_string()))?;
        self.sent.lock().push(command);
        Ok(())
    }
}
