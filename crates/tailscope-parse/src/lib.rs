//! Timestamp extraction and record assembly for tailscope
//!
//! This crate turns raw tail output into structured records: date-format
//! patterns are compiled into (regex, parser) pairs, lines are matched
//! against the format registered for their path, timestamp-less lines are
//! folded into the preceding record, and record levels are detected from
//! first lines.

mod assemble;
mod extract;
mod format;
mod level;

pub use assemble::RecordAssembler;
pub use extract::TimestampExtractor;
pub use format::{FormatError, TimestampFormat};
pub use level::RecordLevelDetector;
