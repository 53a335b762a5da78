use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use tailscope_types::{LogPath, ServerFailure, Settings, TrackingMode, TrackingRequest};

use crate::aggregator::{CompositeAggregator, SourcedRecords};
use crate::protocol::{AgentConnector, ClientSink, PushMessage, TrackedPayload, TrackingError};
use crate::watch::{Watch, WatchInclusion, WatchRegistry};

/// Client-facing half of the engine
///
/// Keeps the watch registry, one aggregator per open watch, and the
/// client sinks. Tracking requests leave through the connector seam;
/// session payloads come back through one channel and are routed here to
/// every watch that includes their source.
pub struct Coordinator {
    node: String,
    settings: Settings,
    connector: Arc<dyn AgentConnector>,
    watches: WatchRegistry,
    aggregators: HashMap<(String, String), CompositeAggregator>,
    sinks: HashMap<String, ClientSink>,
}

impl Coordinator {
    pub fn new(settings: Settings, connector: Arc<dyn AgentConnector>) -> Self {
        Self {
            node: settings.node.name.clone(),
            settings,
            connector,
            watches: WatchRegistry::new(),
            aggregators: HashMap::new(),
            sinks: HashMap::new(),
        }
    }

    /// Register the sink a client's push messages go to
    pub fn register_client(&mut self, destination: impl Into<String>, sink: ClientSink) {
        self.sinks.insert(destination.into(), sink);
    }

    /// Open a watch and start tracking its inclusions
    ///
    /// An existing watch with the same name is replaced. Inclusions that
    /// cannot be tracked are reported to the client sink as failures; the
    /// rest of the watch still opens.
    pub async fn open_watch(
        &mut self,
        destination: &str,
        log: &str,
        mode: TrackingMode,
        inclusions: Vec<WatchInclusion>,
    ) -> Result<(), TrackingError> {
        let Some(sink) = self.sinks.get(destination).cloned() else {
            return Err(TrackingError::UnregisteredClient {
                destination: destination.to_string(),
            });
        };

        let key = (destination.to_string(), log.to_string());
        if self.aggregators.contains_key(&key) {
            self.close_watch(destination, log).await;
        }

        info!(
            "Opening {} watch '{log}' for {destination} with {} inclusion(s)",
            mode.as_str(),
            inclusions.len()
        );
        let started = self.watches.open(Watch {
            destination: destination.to_string(),
            log: log.to_string(),
            mode,
            inclusions,
        });

        let aggregator =
            CompositeAggregator::spawn(destination, log, mode, self.settings.tracking, sink);
        self.aggregators.insert(key, aggregator);

        for inclusion in started {
            self.request_tracking(destination, log, mode, &inclusion);
        }
        Ok(())
    }

    /// Close a watch, stopping tracking for inclusions nobody else watches
    pub async fn close_watch(&mut self, destination: &str, log: &str) {
        let orphaned = self.watches.close(destination, log);
        for path in &orphaned {
            self.send_stop(destination, path);
        }
        let key = (destination.to_string(), log.to_string());
        if let Some(aggregator) = self.aggregators.remove(&key) {
            aggregator.shutdown().await;
        }
    }

    /// Drop a disconnecting client: its watches, aggregators and sink
    pub async fn disconnect_client(&mut self, destination: &str) {
        for path in self.watches.close_client(destination) {
            self.send_stop(destination, &path);
        }
        let keys: Vec<(String, String)> = self
            .aggregators
            .keys()
            .filter(|(dest, _)| dest == destination)
            .cloned()
            .collect();
        for key in keys {
            if let Some(aggregator) = self.aggregators.remove(&key) {
                aggregator.shutdown().await;
            }
        }
        self.sinks.remove(destination);
    }

    /// Route one session payload to every watch that includes its source
    pub fn route(&mut self, payload: TrackedPayload) {
        match payload {
            TrackedPayload::Records {
                destination,
                source_node,
                source_path,
                records,
            } => {
                let logs = self.watches.watching_logs(&destination, &source_path);
                if logs.is_empty() {
                    debug!("Records for unwatched {source_path} dropped");
                    return;
                }
                for log in logs {
                    let key = (destination.clone(), log);
                    if let Some(aggregator) = self.aggregators.get(&key) {
                        aggregator.submit(SourcedRecords {
                            source_node: source_node.clone(),
                            source_path: source_path.clone(),
                            records: records.clone(),
                        });
                    }
                }
            }
            TrackedPayload::Event {
                destination,
                source_path,
                event,
                ..
            } => {
                // transient notices bypass batching
                for log in self.watches.watching_logs(&destination, &source_path) {
                    self.push_to(
                        &destination,
                        PushMessage::notice(&destination, &log, event.clone()),
                    );
                }
            }
            TrackedPayload::Failure {
                destination,
                source_path,
                failure,
            } => {
                let logs = self.watches.watching_logs(&destination, &source_path);
                if logs.is_empty() {
                    // no watch left to blame; deliver without a log tag
                    self.push_to(&destination, PushMessage::failure(&destination, "", failure));
                    return;
                }
                for log in logs {
                    self.push_to(
                        &destination,
                        PushMessage::failure(&destination, &log, failure.clone()),
                    );
                }
            }
        }
    }

    /// Route payloads until cancelled, then close every watch
    pub async fn run(
        mut self,
        mut outbound: mpsc::UnboundedReceiver<TrackedPayload>,
        cancel: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,

                payload = outbound.recv() => match payload {
                    Some(payload) => self.route(payload),
                    None => break,
                }
            }
        }
        self.shutdown().await;
    }

    /// Close every open watch
    pub async fn shutdown(&mut self) {
        let open: Vec<(String, String)> = self.aggregators.keys().cloned().collect();
        for (destination, log) in open {
            self.close_watch(&destination, &log).await;
        }
    }

    pub fn watch_count(&self) -> usize {
        self.watches.watch_count()
    }

    fn request_tracking(
        &mut self,
        destination: &str,
        log: &str,
        mode: TrackingMode,
        inclusion: &WatchInclusion,
    ) {
        let node = inclusion.path.node().unwrap_or(&self.node).to_string();
        let format = match mode {
            TrackingMode::Grouped => inclusion
                .format
                .clone()
                .or_else(|| Some(self.settings.formats.default.clone())),
            TrackingMode::Flat => None,
        };
        let request = TrackingRequest::new(
            inclusion.path.clone(),
            format,
            Some(destination.to_string()),
            true,
        );
        if let Err(error) = self.connector.send_request(&node, request) {
            warn!("Cannot start tracking {}: {error}", inclusion.path);
            self.push_to(
                destination,
                PushMessage::failure(
                    destination,
                    log,
                    ServerFailure::new(format!("cannot track {}: {error}", inclusion.path)),
                ),
            );
        }
    }

    fn send_stop(&self, destination: &str, path: &LogPath) {
        let node = path.node().unwrap_or(&self.node).to_string();
        let request =
            TrackingRequest::new(path.clone(), None, Some(destination.to_string()), false);
        if let Err(error) = self.connector.send_request(&node, request) {
            debug!("Stop for {path} not delivered: {error}");
        }
    }

    fn push_to(&self, destination: &str, message: PushMessage) {
        match self.sinks.get(destination) {
            Some(sink) => sink.push(message),
            None => debug!("No sink for {destination}; message dropped"),
        }
    }
}
