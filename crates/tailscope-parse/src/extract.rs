use std::collections::HashMap;

use chrono::NaiveDateTime;
use parking_lot::RwLock;
use tracing::{debug, warn};

use tailscope_types::LogPath;

use crate::format::{FormatError, TimestampFormat};

/// Lines starting with this prefix continue a stack trace and never start
/// a new record, whatever their content looks like
const STACK_TRACE_CONTINUATION: &str = "\tat ";

/// Per-path registry of compiled timestamp formats
///
/// An entry, once created, is immutable and lives for the process
/// lifetime, so re-subscription to a path never renegotiates its format.
/// The map grows with the number of distinct tracked paths and is never
/// evicted.
pub struct TimestampExtractor {
    formats: RwLock<HashMap<LogPath, TimestampFormat>>,
}

impl TimestampExtractor {
    pub fn new() -> Self {
        Self {
            formats: RwLock::new(HashMap::new()),
        }
    }

    /// Compile and store the pattern for a path
    ///
    /// First registration wins: a path that already has a format keeps
    /// it, whatever the new pattern says.
    pub fn register(&self, path: &LogPath, pattern: &str) -> Result<(), FormatError> {
        if self.formats.read().contains_key(path) {
            debug!("Format for '{path}' already registered, keeping the first one");
            return Ok(());
        }
        let format = TimestampFormat::compile(pattern)?;
        self.formats
            .write()
            .entry(path.clone())
            .or_insert(format);
        Ok(())
    }

    /// Whether a format has been registered for the path
    pub fn is_registered(&self, path: &LogPath) -> bool {
        self.formats.read().contains_key(path)
    }

    /// Parse the timestamp prefix of one line
    ///
    /// Returns the timestamp and the remaining body, or None for stack
    /// trace continuations, lines without a matching prefix, and paths
    /// with no registered format.
    pub fn extract<'a>(&self, path: &LogPath, line: &'a str) -> Option<(NaiveDateTime, &'a str)> {
        if line.starts_with(STACK_TRACE_CONTINUATION) {
            return None;
        }
        let formats = self.formats.read();
        let Some(format) = formats.get(path) else {
            warn!("No timestamp format registered for '{path}'");
            return None;
        };
        format.extract(line)
    }
}

impl Default for TimestampExtractor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn path() -> LogPath {
        LogPath::parse("/var/log/app.log")
    }

    #[test]
    fn test_extract_with_registered_format() {
        let extractor = TimestampExtractor::new();
        extractor.register(&path(), "dd.MM.yy HH:mm:ss").unwrap();

        let (timestamp, body) = extractor
            .extract(&path(), "02.10.14 09:21:58 started")
            .unwrap();
        assert_eq!(
            timestamp,
            NaiveDate::from_ymd_opt(2014, 10, 2)
                .unwrap()
                .and_hms_opt(9, 21, 58)
                .unwrap()
        );
        assert_eq!(body, "started");
    }

    #[test]
    fn test_first_registration_wins() {
        let extractor = TimestampExtractor::new();
        extractor.register(&path(), "dd.MM.yy HH:mm:ss").unwrap();
        // A later, different pattern for the same path is ignored
        extractor.register(&path(), "yyyy-MM-dd HH:mm:ss").unwrap();

        assert!(
            extractor
                .extract(&path(), "02.10.14 09:21:58 started")
                .is_some()
        );
        assert!(
            extractor
                .extract(&path(), "2014-10-02 09:21:58 started")
                .is_none()
        );
    }

    #[test]
    fn test_stack_trace_marker_never_starts_a_record() {
        let extractor = TimestampExtractor::new();
        extractor.register(&path(), "dd.MM.yy HH:mm:ss").unwrap();

        // Timestamp-like content after the marker is still a continuation
        assert!(
            extractor
                .extract(&path(), "\tat 02.10.14 09:21:58 SomeClass.method")
                .is_none()
        );
    }

    #[test]
    fn test_unregistered_path_yields_none() {
        let extractor = TimestampExtractor::new();
        assert!(
            extractor
                .extract(&path(), "02.10.14 09:21:58 started")
                .is_none()
        );
    }

    #[test]
    fn test_invalid_pattern_is_reported_once() {
        let extractor = TimestampExtractor::new();
        let err = extractor.register(&path(), "yyyy-QQ-dd").unwrap_err();
        assert!(matches!(err, FormatError::UnsupportedField { .. }));
        assert!(!extractor.is_registered(&path()));
    }
}
