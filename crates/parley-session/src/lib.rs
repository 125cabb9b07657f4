//! parley-session: session engine for the assistant subprocess
//!
//! This crate owns the per-session state machine: streaming content
//! assembly, tool bookkeeping, side-channel request brokering, speaker
//! attribution, and the worker task that processes envelopes in order.

pub mod assembler;
pub mod broker;
pub mod controller;
pub mod error;
pub mod events;
pub mod handle;
pub mod ledger;
pub mod link;
pub mod speakers;
pub mod store;
pub mod worker;

pub use assembler::{StreamingState, TurnOutput};
pub use broker::{
    Decision, ResultClass, SideChannelBroker, SideChannelRequest, classify_tool_result,
};
pub use controller::{SessionController, SessionLaunch, SessionState, TurnState};
pub use error::Error;
pub use events::SessionEvent;
pub use handle::SessionHandle;
pub use ledger::{LedgerOutcome, ToolLedger};
pub use link::{RecordingLink, SubprocessLink};
pub use speakers::SpeakerRoster;
pub use store::{ConversationStore, MemoryStore};
pub use worker::{NullSink, SessionSink, SharedSink, persist_message, shared_sink, spawn_session};
