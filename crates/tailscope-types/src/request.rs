use serde::{Deserialize, Serialize};

use crate::path::LogPath;

/// How a source's output is delivered
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrackingMode {
    /// Raw lines, no record grouping
    Flat,
    /// Lines assembled into timestamped records
    Grouped,
}

impl TrackingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Flat => "flat",
            Self::Grouped => "grouped",
        }
    }
}

/// Client intent to start or stop tailing one source
///
/// `tail_needed = true` starts (or joins) tracking with backlog lines;
/// `tail_needed = false` with the same destination stops it.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackingRequest {
    pub log_path: LogPath,
    pub timestamp_format: Option<String>,
    pub client_destination: Option<String>,
    pub tail_needed: bool,
}

impl TrackingRequest {
    pub fn new(
        log_path: LogPath,
        timestamp_format: Option<String>,
        client_destination: Option<String>,
        tail_needed: bool,
    ) -> Self {
        Self {
            log_path,
            timestamp_format,
            client_destination,
            tail_needed,
        }
    }

    /// Flat requests carry no timestamp format and are never grouped
    pub fn is_flat(&self) -> bool {
        self.timestamp_format.is_none()
    }

    /// Delivery mode implied by the request
    pub fn mode(&self) -> TrackingMode {
        if self.is_flat() {
            TrackingMode::Flat
        } else {
            TrackingMode::Grouped
        }
    }
}
