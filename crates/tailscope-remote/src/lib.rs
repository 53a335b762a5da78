//! Tracking protocol, sessions and aggregation for tailscope
//!
//! The engine has two halves. The agent side owns follow processes: it
//! answers tracking requests, runs one session worker per physical
//! source, and fans sequenced records out to subscribed viewers. The
//! coordinator side owns the client view: watches, per-watch aggregation
//! into batched parts, color tagging, and push delivery. The connector
//! trait is the transport seam between them; the provided implementation
//! wires both halves together in-process.

mod agent;
mod aggregator;
mod color;
mod coordinator;
mod protocol;
mod session;
mod watch;

pub use agent::Agent;
pub use aggregator::{CompositeAggregator, SourcedRecords};
pub use color::{ColorPicker, PALETTE};
pub use coordinator::Coordinator;
pub use protocol::{
    AgentConnector, ClientSink, LocalConnector, PushBody, PushMessage, TrackedPayload,
    TrackingError,
};
pub use session::{SessionConfig, SessionHandle, SessionState, spawn_session};
pub use watch::{Watch, WatchInclusion, WatchRegistry};
