//! Shared types for tailscope
//!
//! This crate contains the data model used across tailscope crates: log
//! source addressing, tracking requests, tail lifecycle events, records,
//! delivery parts, and the settings consumed by the engine.

mod path;
mod record;
mod request;
mod settings;
mod wire;

pub use path::{ContainerKind, LogPath};
pub use record::{PLAIN_LEVEL, RawLine, Record, SequencedRecord, TailEvent, TailEventKind};
pub use request::{TrackingMode, TrackingRequest};
pub use settings::{
    AdapterSettings, AdaptersSettings, FormatSettings, LevelSettings, NodeSettings, PeerSettings,
    Settings, TrackingSettings,
};
pub use wire::{
    CompositeLine, CompositeLinesPart, LinesPart, MessageType, ServerFailure, StyledLine,
};
