use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use tailscope_parse::FormatError;
use tailscope_tail::DetectError;
use tailscope_types::{
    CompositeLinesPart, LinesPart, LogPath, MessageType, SequencedRecord, ServerFailure,
    TailEvent, TrackingRequest,
};

/// Failures raised while establishing or running a tracking session
#[derive(Debug, Error)]
pub enum TrackingError {
    #[error("no route to node '{node}'")]
    UnknownNode { node: String },
    #[error("node '{node}' ({address}) needs a network connector")]
    RemoteUnsupported { node: String, address: String },
    #[error("local agent is no longer accepting requests")]
    AgentStopped,
    #[error("no sink registered for client '{destination}'")]
    UnregisteredClient { destination: String },
    #[error("invalid timestamp pattern '{pattern}': {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: FormatError,
    },
    #[error("cannot start follow process for {path}: {source}")]
    Spawn {
        path: LogPath,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Detect(#[from] DetectError),
    #[error("invalid level configuration: {0}")]
    Levels(#[from] regex::Error),
}

/// Message from a session-owning node back to the requesting side
///
/// Transport-agnostic: the in-process wiring moves these over a tokio
/// channel, a network transport would serialize them as-is.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TrackedPayload {
    #[serde(rename_all = "camelCase")]
    Records {
        destination: String,
        source_node: String,
        source_path: LogPath,
        records: Vec<SequencedRecord>,
    },
    #[serde(rename_all = "camelCase")]
    Event {
        destination: String,
        source_node: String,
        source_path: LogPath,
        event: TailEvent,
    },
    #[serde(rename_all = "camelCase")]
    Failure {
        destination: String,
        source_path: LogPath,
        failure: ServerFailure,
    },
}

impl TrackedPayload {
    /// Client destination the payload is addressed to
    pub fn destination(&self) -> &str {
        match self {
            Self::Records { destination, .. }
            | Self::Event { destination, .. }
            | Self::Failure { destination, .. } => destination,
        }
    }
}

/// Body of one message pushed to a client
#[derive(Clone, Debug, Serialize)]
#[serde(untagged)]
pub enum PushBody {
    Composite(CompositeLinesPart),
    Flat(LinesPart),
    Notice(TailEvent),
    Failure(ServerFailure),
}

/// One message pushed to a client sink
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PushMessage {
    pub destination: String,
    pub log: String,
    pub kind: MessageType,
    pub payload: PushBody,
}

impl PushMessage {
    pub fn composite(destination: &str, log: &str, part: CompositeLinesPart) -> Self {
        Self {
            destination: destination.to_string(),
            log: log.to_string(),
            kind: MessageType::Record,
            payload: PushBody::Composite(part),
        }
    }

    pub fn flat(destination: &str, log: &str, part: LinesPart) -> Self {
        Self {
            destination: destination.to_string(),
            log: log.to_string(),
            kind: MessageType::Record,
            payload: PushBody::Flat(part),
        }
    }

    pub fn notice(destination: &str, log: &str, event: TailEvent) -> Self {
        Self {
            destination: destination.to_string(),
            log: log.to_string(),
            kind: MessageType::Metadata,
            payload: PushBody::Notice(event),
        }
    }

    pub fn failure(destination: &str, log: &str, failure: ServerFailure) -> Self {
        Self {
            destination: destination.to_string(),
            log: log.to_string(),
            kind: MessageType::Failure,
            payload: PushBody::Failure(failure),
        }
    }
}

/// Bounded push channel for one client
///
/// A slow consumer must never stall session workers, so a full channel
/// drops the message and counts the loss instead of blocking.
#[derive(Clone)]
pub struct ClientSink {
    tx: mpsc::Sender<PushMessage>,
    dropped: Arc<AtomicU64>,
}

impl ClientSink {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<PushMessage>) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            Self {
                tx,
                dropped: Arc::new(AtomicU64::new(0)),
            },
            rx,
        )
    }

    pub fn push(&self, message: PushMessage) {
        match self.tx.try_send(message) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(message)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(
                    "Push channel full for {}; dropping {} message ({dropped} dropped so far)",
                    message.destination,
                    message.kind.as_str()
                );
            }
            Err(mpsc::error::TrySendError::Closed(message)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                debug!("Push channel closed for {}; dropping message", message.destination);
            }
        }
    }

    /// Messages lost to the bounded-queue drop policy
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Resolves a node name to a tracking request intake
///
/// The seam between the coordinator and the nodes owning log paths. The
/// in-process implementation below covers the local node; a network
/// transport plugs in behind the same trait.
pub trait AgentConnector: Send + Sync {
    fn send_request(&self, node: &str, request: TrackingRequest) -> Result<(), TrackingError>;
}

/// In-process connector serving the local node only
pub struct LocalConnector {
    node: String,
    intake: mpsc::UnboundedSender<TrackingRequest>,
    /// Known peers from the routing table, reachable only once a network
    /// connector exists
    peers: Vec<(String, String)>,
}

impl LocalConnector {
    pub fn new(
        node: impl Into<String>,
        intake: mpsc::UnboundedSender<TrackingRequest>,
        peers: Vec<(String, String)>,
    ) -> Self {
        Self {
            node: node.into(),
            intake,
            peers,
        }
    }
}

impl AgentConnector for LocalConnector {
    fn send_request(&self, node: &str, request: TrackingRequest) -> Result<(), TrackingError> {
        if node == self.node {
            return self
                .intake
                .send(request)
                .map_err(|_| TrackingError::AgentStopped);
        }
        match self.peers.iter().find(|(name, _)| name == node) {
            Some((name, address)) => Err(TrackingError::RemoteUnsupported {
                node: name.clone(),
                address: address.clone(),
            }),
            None => Err(TrackingError::UnknownNode {
                node: node.to_string(),
            }),
        }
    }
}
