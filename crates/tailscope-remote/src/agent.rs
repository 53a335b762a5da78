use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use tailscope_parse::{RecordLevelDetector, TimestampExtractor};
use tailscope_tail::TailBackend;
use tailscope_types::{
    ContainerKind, LogPath, ServerFailure, Settings, TrackingMode, TrackingRequest,
};

use crate::protocol::{TrackedPayload, TrackingError};
use crate::session::{SessionConfig, SessionHandle, SessionState, spawn_session};

/// Spawn failures tolerated when restarting a container follow process;
/// file backends retry indefinitely since file absence is transient
const CONTAINER_SPAWN_ATTEMPTS: u32 = 5;

/// Node-side request handler owning every live session of this node
///
/// Sessions are keyed by canonical log path so all viewers of one
/// physical source share one follow process. Stop requests drop one
/// viewer; the session is torn down when the last viewer leaves.
pub struct Agent {
    node: String,
    file_backend: TailBackend,
    settings: Settings,
    extractor: Arc<TimestampExtractor>,
    levels: Arc<RecordLevelDetector>,
    sessions: HashMap<String, SessionHandle>,
    outbound: mpsc::UnboundedSender<TrackedPayload>,
}

impl Agent {
    pub fn new(
        settings: Settings,
        file_backend: TailBackend,
        outbound: mpsc::UnboundedSender<TrackedPayload>,
    ) -> Result<Self, TrackingError> {
        let levels = RecordLevelDetector::new(&settings.levels.known)?;
        Ok(Self {
            node: settings.node.name.clone(),
            file_backend,
            settings,
            extractor: Arc::new(TimestampExtractor::new()),
            levels: Arc::new(levels),
            sessions: HashMap::new(),
            outbound,
        })
    }

    /// Consume tracking requests until cancelled, then stop every session
    pub async fn run(
        mut self,
        mut intake: mpsc::UnboundedReceiver<TrackingRequest>,
        cancel: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,

                request = intake.recv() => match request {
                    Some(request) => self.handle_request(request),
                    None => break,
                }
            }
        }
        self.shutdown();
    }

    pub fn handle_request(&mut self, request: TrackingRequest) {
        let Some(destination) = request.client_destination.clone() else {
            warn!(
                "Dropping tracking request for {} without a client destination",
                request.log_path
            );
            return;
        };

        if request.tail_needed {
            self.start_tracking(destination, request);
        } else {
            self.stop_tracking(&destination, &request.log_path);
        }
    }

    /// Start a session, or join the one already tailing the path
    ///
    /// Sessions are keyed by canonical path alone, so a later viewer of an
    /// already-tracked path inherits the first requester's delivery mode:
    /// a flat request joining a grouped session still receives assembled
    /// records, and vice versa. One physical source, one follow process.
    fn start_tracking(&mut self, destination: String, request: TrackingRequest) {
        let path = request.log_path.clone();
        let key = path.canonical();

        // a broken pattern must fail before any process starts
        if let Some(pattern) = &request.timestamp_format {
            if let Err(source) = self.extractor.register(&path, pattern) {
                let error = TrackingError::Pattern {
                    pattern: pattern.clone(),
                    source,
                };
                warn!("Rejecting tracking request for {path}: {error}");
                self.send_failure(&destination, &path, error.to_string());
                return;
            }
        }

        let failed = self
            .sessions
            .get(&key)
            .is_some_and(|session| session.state() == SessionState::Failed);
        if failed {
            self.sessions.remove(&key);
        }

        if let Some(session) = self.sessions.get(&key) {
            if session.subscribe(&destination) {
                info!("Viewer {destination} joined session for {path}");
            } else {
                debug!("Repeated tracking request for {path} from {destination}");
            }
            return;
        }

        let config = self.session_config(&path, request.is_flat());
        info!(
            "Starting {} session for {path} requested by {destination}",
            request.mode().as_str()
        );
        let handle = spawn_session(
            config,
            destination,
            Arc::clone(&self.extractor),
            Arc::clone(&self.levels),
            self.outbound.clone(),
        );
        self.sessions.insert(key, handle);
    }

    fn stop_tracking(&mut self, destination: &str, path: &LogPath) {
        let key = path.canonical();
        let Some(session) = self.sessions.get(&key) else {
            debug!("Stop request for untracked {path} from {destination}");
            return;
        };

        let remaining = session.unsubscribe(destination);
        if remaining == 0 {
            info!("Last viewer left {path}; terminating session");
            if let Some(session) = self.sessions.remove(&key) {
                session.stop();
            }
        } else {
            debug!("Viewer {destination} left {path}; {remaining} viewer(s) remain");
        }
    }

    fn session_config(&self, path: &LogPath, flat: bool) -> SessionConfig {
        let (backend, adapter) = match path.container_kind() {
            Some(ContainerKind::Docker) => {
                (TailBackend::Docker, self.settings.adapters.docker.clone())
            }
            Some(ContainerKind::Kubernetes) => (
                TailBackend::Kubernetes,
                self.settings.adapters.kubernetes.clone(),
            ),
            None => (self.file_backend, self.settings.adapters.file.clone()),
        };

        let mode = if flat {
            TrackingMode::Flat
        } else {
            TrackingMode::Grouped
        };
        let tracking = &self.settings.tracking;

        SessionConfig {
            path: path.clone(),
            source_node: self.node.clone(),
            backend,
            adapter,
            backlog: backend.backlog(true, tracking.tail_size(mode)),
            flat,
            max_record_lines: tracking.size_threshold,
            idle_flush: tracking.timeout(),
            spawn_attempt_limit: path
                .container_kind()
                .map(|_| CONTAINER_SPAWN_ATTEMPTS),
        }
    }

    fn send_failure(&self, destination: &str, path: &LogPath, message: String) {
        let payload = TrackedPayload::Failure {
            destination: destination.to_string(),
            source_path: path.clone(),
            failure: ServerFailure::new(message),
        };
        if self.outbound.send(payload).is_err() {
            warn!("Outbound channel closed; failure for {destination} lost");
        }
    }

    /// Stop every live session
    pub fn shutdown(&mut self) {
        for (key, session) in self.sessions.drain() {
            debug!("Stopping session for {key}");
            session.stop();
        }
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn viewer_count(&self, path: &LogPath) -> usize {
        self.sessions
            .get(&path.canonical())
            .map(SessionHandle::viewer_count)
            .unwrap_or(0)
    }

    pub fn session_state(&self, path: &LogPath) -> Option<SessionState> {
        self.sessions.get(&path.canonical()).map(SessionHandle::state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(10);

    fn agent() -> (Agent, mpsc::UnboundedReceiver<TrackedPayload>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let agent = Agent::new(Settings::default(), TailBackend::Gnu, tx).unwrap();
        (agent, rx)
    }

    fn start_request(path: &LogPath, destination: &str) -> TrackingRequest {
        TrackingRequest::new(path.clone(), None, Some(destination.to_string()), true)
    }

    fn stop_request(path: &LogPath, destination: &str) -> TrackingRequest {
        TrackingRequest::new(path.clone(), None, Some(destination.to_string()), false)
    }

    #[tokio::test]
    async fn test_invalid_pattern_fails_before_any_session() {
        let (mut agent, mut rx) = agent();
        let path = LogPath::from("/var/log/app.log");
        let request = TrackingRequest::new(
            path,
            Some("xyz".to_string()),
            Some("web".to_string()),
            true,
        );
        agent.handle_request(request);

        assert_eq!(agent.session_count(), 0);
        let payload = rx.try_recv().unwrap();
        match payload {
            TrackedPayload::Failure {
                destination,
                source_path,
                failure,
            } => {
                assert_eq!(destination, "web");
                assert_eq!(source_path.canonical(), "file:///var/log/app.log");
                assert!(failure.message.contains("invalid timestamp pattern 'xyz'"));
            }
            other => panic!("expected failure payload, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_viewers_share_one_session() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let path = LogPath::from(file.path().to_str().unwrap());
        let (mut agent, _rx) = agent();

        agent.handle_request(start_request(&path, "a"));
        assert_eq!(agent.session_count(), 1);
        assert_eq!(agent.viewer_count(&path), 1);

        // identical repeat is idempotent
        agent.handle_request(start_request(&path, "a"));
        assert_eq!(agent.session_count(), 1);
        assert_eq!(agent.viewer_count(&path), 1);

        agent.handle_request(start_request(&path, "b"));
        assert_eq!(agent.session_count(), 1);
        assert_eq!(agent.viewer_count(&path), 2);

        // first viewer leaving keeps the shared process alive
        agent.handle_request(stop_request(&path, "a"));
        assert_eq!(agent.session_count(), 1);
        assert_eq!(agent.viewer_count(&path), 1);

        // last viewer leaving tears the session down
        agent.handle_request(stop_request(&path, "b"));
        assert_eq!(agent.session_count(), 0);
    }

    #[tokio::test]
    async fn test_joining_viewer_inherits_first_requesters_mode() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let path = LogPath::from(file.path().to_str().unwrap());
        let (mut agent, _rx) = agent();

        agent.handle_request(start_request(&path, "a"));
        assert_eq!(agent.session_count(), 1);

        // a grouped request for the flat-tracked path joins the existing
        // session instead of spawning a second follow process
        agent.handle_request(TrackingRequest::new(
            path.clone(),
            Some("dd.MM.yy HH:mm:ss".to_string()),
            Some("b".to_string()),
            true,
        ));
        assert_eq!(agent.session_count(), 1);
        assert_eq!(agent.viewer_count(&path), 2);

        agent.handle_request(stop_request(&path, "a"));
        agent.handle_request(stop_request(&path, "b"));
        assert_eq!(agent.session_count(), 0);
    }

    #[tokio::test]
    async fn test_records_flow_from_file_to_outbound() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let path = LogPath::from(file.path().to_str().unwrap());
        let (mut agent, mut rx) = agent();

        agent.handle_request(start_request(&path, "web"));
        writeln!(file, "INFO ready").unwrap();
        file.flush().unwrap();

        let records = loop {
            let payload = timeout(WAIT, rx.recv())
                .await
                .expect("timed out waiting for records")
                .expect("outbound channel closed");
            if let TrackedPayload::Records { records, .. } = payload {
                break records;
            }
        };
        assert_eq!(records[0].sequence, 0);
        assert_eq!(records[0].record.text, "INFO ready");
        assert_eq!(records[0].record.level, "INFO");

        agent.handle_request(stop_request(&path, "web"));
        assert_eq!(agent.session_count(), 0);
    }
}
