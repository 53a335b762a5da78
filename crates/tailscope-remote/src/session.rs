use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use tailscope_parse::{RecordAssembler, RecordLevelDetector, TimestampExtractor};
use tailscope_tail::{TailBackend, TailOutput, TailProcessAdapter};
use tailscope_types::{
    AdapterSettings, LogPath, RawLine, Record, SequencedRecord, ServerFailure, TailEvent,
    TailEventKind,
};

use crate::protocol::{TrackedPayload, TrackingError};

/// Lifecycle of one tracking session
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Requested,
    Active,
    Retrying,
    Stopped,
    Failed,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Requested => "REQUESTED",
            Self::Active => "ACTIVE",
            Self::Retrying => "RETRYING",
            Self::Stopped => "STOPPED",
            Self::Failed => "FAILED",
        }
    }
}

/// Everything a session worker needs to run one follow process
#[derive(Clone)]
pub struct SessionConfig {
    pub path: LogPath,
    pub source_node: String,
    pub backend: TailBackend,
    pub adapter: AdapterSettings,
    pub backlog: u32,
    pub flat: bool,
    /// Longest record, in lines, before assembly force-releases it
    pub max_record_lines: usize,
    /// Quiet gap after which a pending record is considered complete
    pub idle_flush: Duration,
    /// Consecutive spawn failures tolerated on restart; `None` keeps trying
    pub spawn_attempt_limit: Option<u32>,
}

impl SessionConfig {
    fn follow_args(&self) -> Vec<String> {
        self.backend
            .follow_args(&self.adapter, self.path.target(), self.backlog)
    }
}

/// Agent-side handle to a running session worker
///
/// Destinations are the viewers subscribed to this session; the worker
/// fans every produced record out to all of them. The session ends when
/// [`SessionHandle::stop`] cancels the worker.
pub struct SessionHandle {
    destinations: Arc<RwLock<HashSet<String>>>,
    state: Arc<RwLock<SessionState>>,
    cancel: CancellationToken,
    task: tokio::task::JoinHandle<()>,
}

impl SessionHandle {
    /// Add a viewer; false when it was already subscribed
    pub fn subscribe(&self, destination: &str) -> bool {
        self.destinations.write().insert(destination.to_string())
    }

    /// Remove a viewer and return how many remain
    pub fn unsubscribe(&self, destination: &str) -> usize {
        let mut destinations = self.destinations.write();
        destinations.remove(destination);
        destinations.len()
    }

    pub fn viewer_count(&self) -> usize {
        self.destinations.read().len()
    }

    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    /// Cancel the worker and kill its follow process
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Wait for the worker to finish and return its final state
    pub async fn wait(mut self) -> SessionState {
        let _ = (&mut self.task).await;
        *self.state.read()
    }
}

/// Start a session worker for one follow process
pub fn spawn_session(
    config: SessionConfig,
    destination: String,
    extractor: Arc<TimestampExtractor>,
    levels: Arc<RecordLevelDetector>,
    outbound: mpsc::UnboundedSender<TrackedPayload>,
) -> SessionHandle {
    let destinations = Arc::new(RwLock::new(HashSet::from([destination])));
    let state = Arc::new(RwLock::new(SessionState::Requested));
    let cancel = CancellationToken::new();

    let worker = SessionWorker {
        config,
        extractor,
        levels,
        outbound,
        destinations: Arc::clone(&destinations),
        state: Arc::clone(&state),
        cancel: cancel.clone(),
        sequence: 0,
        lines_consumed: 0,
    };
    let task = tokio::spawn(worker.run());

    SessionHandle {
        destinations,
        state,
        cancel,
        task,
    }
}

struct SessionWorker {
    config: SessionConfig,
    extractor: Arc<TimestampExtractor>,
    levels: Arc<RecordLevelDetector>,
    outbound: mpsc::UnboundedSender<TrackedPayload>,
    destinations: Arc<RwLock<HashSet<String>>>,
    state: Arc<RwLock<SessionState>>,
    cancel: CancellationToken,
    /// Session-lifetime record counter; survives process restarts
    sequence: u64,
    /// Lines consumed since the last (re)start or truncation
    lines_consumed: u64,
}

impl SessionWorker {
    async fn run(mut self) {
        let cancel = self.cancel.clone();
        let mut assembler = RecordAssembler::new(self.config.max_record_lines);
        let mut spawn_failures: u32 = 0;
        let mut first_attempt = true;

        'session: loop {
            let args = self.config.follow_args();
            let mut adapter = match TailProcessAdapter::spawn(
                self.config.backend,
                &self.config.adapter.executable,
                &args,
                self.config.path.clone(),
            ) {
                Ok(adapter) => adapter,
                Err(source) => {
                    spawn_failures += 1;
                    let error = TrackingError::Spawn {
                        path: self.config.path.clone(),
                        source,
                    };
                    let fatal = first_attempt
                        || self
                            .config
                            .spawn_attempt_limit
                            .is_some_and(|limit| spawn_failures >= limit);
                    if fatal {
                        warn!("Giving up on {}: {error}", self.config.path);
                        self.report_failure(error.to_string());
                        self.set_state(SessionState::Failed);
                        return;
                    }
                    warn!(
                        "Restarting follow process for {} failed (attempt {spawn_failures}): {error}",
                        self.config.path
                    );
                    self.set_state(SessionState::Retrying);
                    if self.sleep_or_stop().await {
                        self.set_state(SessionState::Stopped);
                        return;
                    }
                    continue 'session;
                }
            };

            spawn_failures = 0;
            first_attempt = false;
            self.lines_consumed = 0;
            self.set_state(SessionState::Active);
            info!("Session for {} active", self.config.path);

            loop {
                let restart = tokio::select! {
                    _ = cancel.cancelled() => {
                        adapter.shutdown();
                        self.flush_pending(&mut assembler);
                        self.set_state(SessionState::Stopped);
                        debug!("Session for {} stopped", self.config.path);
                        return;
                    }

                    output = adapter.next() => match output {
                        Some(TailOutput::Line(raw)) => {
                            self.handle_line(&mut assembler, raw);
                            false
                        }
                        Some(TailOutput::Event(event)) => self.handle_event(&event),
                        Some(TailOutput::Exited { status }) => {
                            info!(
                                "Follow process for {} exited ({status:?}); restarting",
                                self.config.path
                            );
                            true
                        }
                        None => true,
                    },

                    _ = tokio::time::sleep(self.config.idle_flush), if !assembler.is_empty() => {
                        self.flush_pending(&mut assembler);
                        false
                    }
                };

                if restart {
                    adapter.shutdown();
                    self.flush_pending(&mut assembler);
                    self.set_state(SessionState::Retrying);
                    if self.sleep_or_stop().await {
                        self.set_state(SessionState::Stopped);
                        return;
                    }
                    continue 'session;
                }
            }
        }
    }

    fn handle_line(&mut self, assembler: &mut RecordAssembler, raw: RawLine) {
        self.lines_consumed += 1;

        if self.config.flat {
            let level = self.levels.level_for(&raw.text);
            self.emit_record(Record::new(raw.text, level));
            return;
        }

        let completed = match self.extractor.extract(&self.config.path, &raw.text) {
            Some((timestamp, body)) => assembler.push(Some(timestamp), body),
            None => assembler.push(None, &raw.text),
        };
        if let Some(record) = completed {
            self.emit_completed(record);
        }
    }

    /// Apply one lifecycle event; true when the process must be restarted
    fn handle_event(&mut self, event: &TailEvent) -> bool {
        if event.kind == TailEventKind::Unrecognized {
            debug!(
                "Ignoring unrecognized diagnostic from {}: {}",
                self.config.path, event.raw_message
            );
            return false;
        }

        if event.kind == TailEventKind::FileTruncated {
            debug!(
                "{} truncated; resetting line offset (was {})",
                self.config.path, self.lines_consumed
            );
            self.lines_consumed = 0;
        }

        self.forward_event(event.clone());

        let transient = matches!(
            event.kind,
            TailEventKind::FileNotFound | TailEventKind::FileDisappeared
        );
        transient && !self.config.backend.self_healing()
    }

    fn flush_pending(&mut self, assembler: &mut RecordAssembler) {
        if let Some(record) = assembler.flush() {
            self.emit_completed(record);
        }
    }

    fn emit_completed(&mut self, mut record: Record) {
        record.level = self.levels.level_for(&record.text);
        self.emit_record(record);
    }

    fn emit_record(&mut self, record: Record) {
        let sequenced = SequencedRecord::new(self.sequence, record);
        self.sequence += 1;

        for destination in self.snapshot_destinations() {
            let payload = TrackedPayload::Records {
                destination,
                source_node: self.config.source_node.clone(),
                source_path: self.config.path.clone(),
                records: vec![sequenced.clone()],
            };
            if self.outbound.send(payload).is_err() {
                debug!("Outbound channel closed; record from {} dropped", self.config.path);
            }
        }
    }

    fn forward_event(&self, event: TailEvent) {
        for destination in self.snapshot_destinations() {
            let payload = TrackedPayload::Event {
                destination,
                source_node: self.config.source_node.clone(),
                source_path: self.config.path.clone(),
                event: event.clone(),
            };
            if self.outbound.send(payload).is_err() {
                debug!("Outbound channel closed; event from {} dropped", self.config.path);
            }
        }
    }

    fn report_failure(&self, message: String) {
        for destination in self.snapshot_destinations() {
            let payload = TrackedPayload::Failure {
                destination,
                source_path: self.config.path.clone(),
                failure: ServerFailure::new(message.clone()),
            };
            if self.outbound.send(payload).is_err() {
                debug!("Outbound channel closed; failure for {} dropped", self.config.path);
            }
        }
    }

    fn snapshot_destinations(&self) -> Vec<String> {
        self.destinations.read().iter().cloned().collect()
    }

    /// Retry pause, interruptible by stop; true when the session was stopped
    async fn sleep_or_stop(&self) -> bool {
        tokio::select! {
            _ = self.cancel.cancelled() => true,
            _ = tokio::time::sleep(self.config.backend.retry_delay()) => false,
        }
    }

    fn set_state(&self, next: SessionState) {
        debug!(
            "Session for {} entering {}",
            self.config.path,
            next.as_str()
        );
        *self.state.write() = next;
    }
}
