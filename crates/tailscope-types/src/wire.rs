use chrono::{DateTime, FixedOffset, Local};
use serde::{Deserialize, Serialize};

/// One displayed line with its style tag
///
/// The style is the record's detected level for a record's first line and
/// `PLAIN` for continuation lines.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StyledLine {
    pub text: String,
    pub style: String,
}

impl StyledLine {
    pub fn new(text: impl Into<String>, style: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            style: style.into(),
        }
    }
}

/// Delivery unit for flat tracking
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LinesPart {
    pub lines: Vec<StyledLine>,
}

impl LinesPart {
    pub fn new(lines: Vec<StyledLine>) -> Self {
        Self { lines }
    }
}

/// One line of a composite part, tagged with its origin
///
/// Lines of different inclusions interleave inside one part, so every line
/// carries its own source node, path, record timestamp (epoch millis, 0
/// when unknown), and the color assigned to its inclusion.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompositeLine {
    pub text: String,
    pub style: String,
    pub source_node: String,
    pub source_path: String,
    pub timestamp: i64,
    pub highlight_color: String,
}

/// Delivery unit for composite tracking
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CompositeLinesPart {
    pub lines: Vec<CompositeLine>,
}

impl CompositeLinesPart {
    pub fn new(lines: Vec<CompositeLine>) -> Self {
        Self { lines }
    }
}

/// Failure notice delivered to the affected client
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerFailure {
    pub message: String,
    pub timestamp: DateTime<FixedOffset>,
}

impl ServerFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            timestamp: Local::now().fixed_offset(),
        }
    }
}

/// Kind tag accompanying every push-channel message
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    Record,
    Metadata,
    Failure,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Record => "RECORD",
            Self::Metadata => "METADATA",
            Self::Failure => "FAILURE",
        }
    }
}
