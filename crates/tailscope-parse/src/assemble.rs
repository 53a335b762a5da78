use chrono::NaiveDateTime;

use tailscope_types::{PLAIN_LEVEL, Record};

/// Folds continuation lines into multi-line records
///
/// A line with a parsed timestamp completes the pending record and starts
/// a new one; a line without one extends the pending record. The
/// assembler is an ordinary state machine driven by one session worker,
/// so it needs no synchronization.
pub struct RecordAssembler {
    current: Option<Pending>,
    /// Emit a record once it holds this many lines even without a new
    /// timestamped line, so a degenerate source cannot buffer unboundedly
    max_lines: usize,
}

struct Pending {
    text: String,
    line_count: usize,
    timestamp: Option<NaiveDateTime>,
}

impl Pending {
    fn start(text: &str, timestamp: Option<NaiveDateTime>) -> Self {
        Self {
            text: text.to_string(),
            line_count: 1,
            timestamp,
        }
    }

    fn extend(&mut self, text: &str) {
        self.text.push('\n');
        self.text.push_str(text);
        self.line_count += 1;
    }

    fn into_record(self) -> Record {
        let record = Record::new(self.text, PLAIN_LEVEL);
        match self.timestamp {
            Some(timestamp) => record.with_timestamp(timestamp),
            None => record,
        }
    }
}

impl RecordAssembler {
    pub fn new(max_lines: usize) -> Self {
        Self {
            current: None,
            max_lines: max_lines.max(1),
        }
    }

    /// Feed one line with its extraction result
    ///
    /// Returns the record this line completed, if any. Emitted records
    /// carry the level placeholder; level detection happens downstream.
    pub fn push(&mut self, timestamp: Option<NaiveDateTime>, text: &str) -> Option<Record> {
        match timestamp {
            Some(timestamp) => {
                let completed = self.current.take();
                self.current = Some(Pending::start(text, Some(timestamp)));
                completed.map(Pending::into_record)
            }
            None => {
                match &mut self.current {
                    Some(pending) => pending.extend(text),
                    // Lines before the first timestamp still group together
                    None => self.current = Some(Pending::start(text, None)),
                }
                if self
                    .current
                    .as_ref()
                    .is_some_and(|p| p.line_count >= self.max_lines)
                {
                    return self.flush();
                }
                None
            }
        }
    }

    /// Release the pending record, if any
    ///
    /// Called on idle timeouts and teardown so the last record of a burst
    /// is not held back waiting for a successor line.
    pub fn flush(&mut self) -> Option<Record> {
        self.current.take().map(Pending::into_record)
    }

    /// Whether a record is pending
    pub fn is_empty(&self) -> bool {
        self.current.is_none()
    }
}
