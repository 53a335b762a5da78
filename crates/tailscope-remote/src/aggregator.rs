use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use tailscope_types::{
    CompositeLine, CompositeLinesPart, LinesPart, LogPath, PLAIN_LEVEL, SequencedRecord,
    StyledLine, TrackingMode, TrackingSettings,
};

use crate::color::ColorPicker;
use crate::protocol::{ClientSink, PushMessage};

/// Deadline used while nothing is pending; the timer branch is disabled
/// then, so it only has to be valid, not meaningful
const IDLE_DEADLINE: Duration = Duration::from_secs(3600);

/// Records from one session, tagged with their origin
#[derive(Clone, Debug)]
pub struct SourcedRecords {
    pub source_node: String,
    pub source_path: LogPath,
    pub records: Vec<SequencedRecord>,
}

/// Single-writer fan-in for one watched log
///
/// Every session feeding the log submits through one channel; a dedicated
/// task appends lines in arrival order and flushes when the buffered line
/// count reaches the size threshold or the oldest buffered line has
/// waited out the grouping timeout, whichever comes first. Teardown
/// flushes any partial batch.
pub struct CompositeAggregator {
    log: String,
    intake: mpsc::UnboundedSender<SourcedRecords>,
    cancel: CancellationToken,
    task: tokio::task::JoinHandle<()>,
}

impl CompositeAggregator {
    pub fn spawn(
        destination: impl Into<String>,
        log: impl Into<String>,
        mode: TrackingMode,
        tracking: TrackingSettings,
        sink: ClientSink,
    ) -> Self {
        let log = log.into();
        let (intake, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let worker = AggregatorWorker {
            destination: destination.into(),
            log: log.clone(),
            mode,
            size_threshold: tracking.size_threshold.max(1),
            timeout: tracking.timeout(),
            sink,
            colors: ColorPicker::new(),
            pending: Vec::new(),
            oldest: None,
        };
        let task = tokio::spawn(worker.run(rx, cancel.clone()));

        Self {
            log,
            intake,
            cancel,
            task,
        }
    }

    /// Queue records for batching
    pub fn submit(&self, records: SourcedRecords) {
        if self.intake.send(records).is_err() {
            debug!("Aggregator for {} is gone; records dropped", self.log);
        }
    }

    /// Deliver any partial batch and stop the worker
    pub async fn shutdown(self) {
        self.cancel.cancel();
        let _ = self.task.await;
    }
}

struct AggregatorWorker {
    destination: String,
    log: String,
    mode: TrackingMode,
    size_threshold: usize,
    timeout: Duration,
    sink: ClientSink,
    colors: ColorPicker,
    pending: Vec<CompositeLine>,
    /// Arrival instant of the first line in the pending buffer
    oldest: Option<Instant>,
}

impl AggregatorWorker {
    async fn run(
        mut self,
        mut intake: mpsc::UnboundedReceiver<SourcedRecords>,
        cancel: CancellationToken,
    ) {
        loop {
            let deadline = self
                .oldest
                .map(|at| at + self.timeout)
                .unwrap_or_else(|| Instant::now() + IDLE_DEADLINE);

            tokio::select! {
                _ = cancel.cancelled() => break,

                batch = intake.recv() => match batch {
                    Some(batch) => self.append(batch),
                    None => break,
                },

                _ = tokio::time::sleep_until(deadline), if self.oldest.is_some() => {
                    self.flush();
                }
            }
        }
        self.flush();
    }

    fn append(&mut self, batch: SourcedRecords) {
        let color = self
            .colors
            .color_for(&batch.source_node, &batch.source_path)
            .to_string();
        let source_path = batch.source_path.canonical();

        for sequenced in batch.records {
            let record = sequenced.record;
            let timestamp = record.timestamp_millis();

            // a record with empty text is still one blank line
            let texts: Vec<&str> = if record.text.is_empty() {
                vec![""]
            } else {
                record.lines().collect()
            };

            for (index, text) in texts.iter().enumerate() {
                let style = if index == 0 {
                    record.level.clone()
                } else {
                    PLAIN_LEVEL.to_string()
                };
                self.pending.push(CompositeLine {
                    text: (*text).to_string(),
                    style,
                    source_node: batch.source_node.clone(),
                    source_path: source_path.clone(),
                    timestamp,
                    highlight_color: color.clone(),
                });
                if self.oldest.is_none() {
                    self.oldest = Some(Instant::now());
                }
                if self.pending.len() >= self.size_threshold {
                    self.flush();
                }
            }
        }
    }

    fn flush(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        let lines = std::mem::take(&mut self.pending);
        self.oldest = None;
        debug!("Flushing {} line(s) for {}", lines.len(), self.log);

        let message = match self.mode {
            TrackingMode::Grouped => PushMessage::composite(
                &self.destination,
                &self.log,
                CompositeLinesPart::new(lines),
            ),
            TrackingMode::Flat => {
                let styled = lines
                    .into_iter()
                    .map(|line| StyledLine::new(line.text, line.style))
                    .collect();
                PushMessage::flat(&self.destination, &self.log, LinesPart::new(styled))
            }
        };
        self.sink.push(message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::PushBody;
    use chrono::NaiveDate;
    use tailscope_types::Record;
    use tokio::time::timeout;

    fn tracking(size_threshold: usize, timeout_ms: u64) -> TrackingSettings {
        TrackingSettings {
            size_threshold,
            timeout_ms,
            flat_tail_size: 45,
            group_tail_size: 20,
        }
    }

    fn single_line(node: &str, path: &str, text: &str) -> SourcedRecords {
        SourcedRecords {
            source_node: node.to_string(),
            source_path: LogPath::from(path),
            records: vec![SequencedRecord::new(0, Record::new(text, "INFO"))],
        }
    }

    fn composite_part(message: PushMessage) -> CompositeLinesPart {
        match message.payload {
            PushBody::Composite(part) => part,
            other => panic!("expected composite part, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_flushes_once_at_size_threshold() {
        let (sink, mut rx) = ClientSink::channel(8);
        let aggregator = CompositeAggregator::spawn(
            "web",
            "app",
            TrackingMode::Grouped,
            tracking(3, 60_000),
            sink,
        );

        aggregator.submit(single_line("local", "/log/a", "one"));
        aggregator.submit(single_line("local", "/log/b", "two"));
        aggregator.submit(single_line("local", "/log/a", "three"));

        let part = composite_part(rx.recv().await.unwrap());
        assert_eq!(part.lines.len(), 3);
        assert_eq!(part.lines[0].highlight_color, "blue");
        assert_eq!(part.lines[1].highlight_color, "green");
        assert_eq!(part.lines[2].highlight_color, "blue");
        assert_eq!(part.lines[0].source_path, "file:///log/a");

        // everything was flushed; nothing further may arrive
        let silent = timeout(Duration::from_millis(50), rx.recv()).await;
        assert!(silent.is_err());

        aggregator.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_flushes_partial_batch() {
        let (sink, mut rx) = ClientSink::channel(8);
        let aggregator = CompositeAggregator::spawn(
            "web",
            "app",
            TrackingMode::Grouped,
            tracking(100, 1000),
            sink,
        );

        let start = Instant::now();
        aggregator.submit(single_line("local", "/log/a", "lonely"));

        let part = composite_part(rx.recv().await.unwrap());
        assert_eq!(part.lines.len(), 1);
        assert!(start.elapsed() >= Duration::from_millis(1000));

        aggregator.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_teardown_flushes_partial_batch() {
        let (sink, mut rx) = ClientSink::channel(8);
        let aggregator = CompositeAggregator::spawn(
            "web",
            "app",
            TrackingMode::Grouped,
            tracking(100, 60_000),
            sink,
        );

        aggregator.submit(single_line("local", "/log/a", "one"));
        aggregator.submit(single_line("local", "/log/a", "two"));
        aggregator.shutdown().await;

        let part = composite_part(rx.recv().await.unwrap());
        assert_eq!(part.lines.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_record_lines_share_timestamp_and_color() {
        let (sink, mut rx) = ClientSink::channel(8);
        let aggregator = CompositeAggregator::spawn(
            "web",
            "app",
            TrackingMode::Grouped,
            tracking(3, 60_000),
            sink,
        );

        let timestamp = NaiveDate::from_ymd_opt(2014, 10, 2)
            .unwrap()
            .and_hms_opt(9, 21, 58)
            .unwrap();
        let record = Record::new("ERROR boom\n\tat a\n\tat b", "ERROR").with_timestamp(timestamp);
        aggregator.submit(SourcedRecords {
            source_node: "local".to_string(),
            source_path: LogPath::from("/log/a"),
            records: vec![SequencedRecord::new(7, record)],
        });

        let part = composite_part(rx.recv().await.unwrap());
        assert_eq!(part.lines.len(), 3);
        assert_eq!(part.lines[0].style, "ERROR");
        assert_eq!(part.lines[1].style, PLAIN_LEVEL);
        assert_eq!(part.lines[2].style, PLAIN_LEVEL);
        for line in &part.lines {
            assert_eq!(line.timestamp, 1412241718000);
            assert_eq!(line.highlight_color, "blue");
        }

        aggregator.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_flat_mode_delivers_untagged_lines() {
        let (sink, mut rx) = ClientSink::channel(8);
        let aggregator = CompositeAggregator::spawn(
            "web",
            "app",
            TrackingMode::Flat,
            tracking(1, 1000),
            sink,
        );

        aggregator.submit(single_line("local", "/log/a", "hello"));

        let message = rx.recv().await.unwrap();
        match message.payload {
            PushBody::Flat(part) => {
                assert_eq!(part.lines.len(), 1);
                assert_eq!(part.lines[0].text, "hello");
                assert_eq!(part.lines[0].style, "INFO");
            }
            other => panic!("expected flat part, got {other:?}"),
        }

        aggregator.shutdown().await;
    }
}
