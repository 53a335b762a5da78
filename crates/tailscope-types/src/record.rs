use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::path::LogPath;

/// Style and level name for lines without a detected level
pub const PLAIN_LEVEL: &str = "PLAIN";

/// A single raw line as read from a follow process
///
/// Ephemeral: raw lines only live on the path between the adapter and the
/// record assembler and are never persisted.
#[derive(Clone, Debug)]
pub struct RawLine {
    pub text: String,
    pub source: LogPath,
    pub received_at: DateTime<Utc>,
}

impl RawLine {
    pub fn new(text: impl Into<String>, source: LogPath) -> Self {
        Self {
            text: text.into(),
            source,
            received_at: Utc::now(),
        }
    }
}

/// Canonical lifecycle event distilled from a backend diagnostic
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TailEventKind {
    FileNotFound,
    FileAppeared,
    FileDisappeared,
    FileTruncated,
    Unrecognized,
}

impl TailEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FileNotFound => "FILE_NOT_FOUND",
            Self::FileAppeared => "FILE_APPEARED",
            Self::FileDisappeared => "FILE_DISAPPEARED",
            Self::FileTruncated => "FILE_TRUNCATED",
            Self::Unrecognized => "UNRECOGNIZED",
        }
    }
}

/// Backend diagnostic mapped to a canonical event
///
/// Events drive session state transitions only; they are never delivered
/// as log data.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TailEvent {
    pub kind: TailEventKind,
    pub raw_message: String,
}

impl TailEvent {
    pub fn new(kind: TailEventKind, raw_message: impl Into<String>) -> Self {
        Self {
            kind,
            raw_message: raw_message.into(),
        }
    }
}

/// One logical log entry, possibly spanning several raw lines
///
/// The level and timestamp always come from the record's first line;
/// continuation lines only ever extend the text.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    pub text: String,
    pub level: String,
    pub timestamp: Option<NaiveDateTime>,
}

impl Record {
    pub fn new(text: impl Into<String>, level: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            level: level.into(),
            timestamp: None,
        }
    }

    pub fn with_timestamp(mut self, timestamp: NaiveDateTime) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Iterate the record's raw lines
    pub fn lines(&self) -> std::str::Lines<'_> {
        self.text.lines()
    }

    /// Record timestamp as epoch milliseconds, 0 when it has none
    pub fn timestamp_millis(&self) -> i64 {
        self.timestamp
            .map(|ts| ts.and_utc().timestamp_millis())
            .unwrap_or(0)
    }
}

/// Record paired with its session-scoped delivery order
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SequencedRecord {
    pub sequence: u64,
    pub record: Record,
}

impl SequencedRecord {
    pub fn new(sequence: u64, record: Record) -> Self {
        Self { sequence, record }
    }
}
