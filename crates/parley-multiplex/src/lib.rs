//! parley-multiplex: multi-project session multiplexer
//!
//! Manages open project tabs over a single shared subprocess, routing
//! inbound envelopes to per-session workers and redirecting event delivery
//! as focus moves between projects.

pub mod error;
pub mod multiplexer;
pub mod routes;
pub mod sink;
pub mod tabs;

pub use error::Error;
pub use multiplexer::Multiplexer;
pub use routes::SessionRoutes;
pub use sink::{HeadlessSink, LiveSink, UiEvent};
pub use tabs::{
    ActivityEntry, ActivityRecord, ProjectConfig, ProjectTab, ToolServerSpec, WorkingState,
    display_name_for,
};
