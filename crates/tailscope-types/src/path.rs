use std::fmt;

use serde::{Deserialize, Serialize};

/// Container runtime a log stream is read from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ContainerKind {
    Docker,
    Kubernetes,
}

impl ContainerKind {
    /// Scheme used in the canonical textual form
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Docker => "docker",
            Self::Kubernetes => "k8s",
        }
    }
}

/// Addressable log source
///
/// The canonical textual form doubles as the identity key in registries:
/// `file://<path>`, `node://<node><path>`, `docker://<target>`,
/// `k8s://<target>`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum LogPath {
    /// Plain file on the node handling the request
    LocalFile(String),
    /// File on a named cluster node
    NodeFile { node: String, path: String },
    /// Container log stream
    Container { kind: ContainerKind, target: String },
}

impl LogPath {
    /// Parse a textual log address
    ///
    /// Unprefixed input is taken as a local file path.
    pub fn parse(raw: &str) -> Self {
        if let Some(rest) = raw.strip_prefix("node://") {
            match rest.split_once('/') {
                Some((node, path)) => Self::NodeFile {
                    node: node.to_string(),
                    path: format!("/{path}"),
                },
                None => Self::NodeFile {
                    node: rest.to_string(),
                    path: String::new(),
                },
            }
        } else if let Some(target) = raw.strip_prefix("docker://") {
            Self::Container {
                kind: ContainerKind::Docker,
                target: target.to_string(),
            }
        } else if let Some(target) = raw
            .strip_prefix("k8s://")
            .or_else(|| raw.strip_prefix("kubernetes://"))
        {
            Self::Container {
                kind: ContainerKind::Kubernetes,
                target: target.to_string(),
            }
        } else if let Some(path) = raw.strip_prefix("file://") {
            Self::LocalFile(path.to_string())
        } else {
            Self::LocalFile(raw.to_string())
        }
    }

    /// Node that owns this source, if the address names one
    pub fn node(&self) -> Option<&str> {
        match self {
            Self::NodeFile { node, .. } => Some(node.as_str()),
            _ => None,
        }
    }

    /// Bare path or container target, as passed to the follow process
    pub fn target(&self) -> &str {
        match self {
            Self::LocalFile(path) => path,
            Self::NodeFile { path, .. } => path,
            Self::Container { target, .. } => target,
        }
    }

    /// Container runtime, for container sources
    pub fn container_kind(&self) -> Option<ContainerKind> {
        match self {
            Self::Container { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// Stable identity key
    pub fn canonical(&self) -> String {
        match self {
            Self::LocalFile(path) => format!("file://{path}"),
            Self::NodeFile { node, path } => format!("node://{node}{path}"),
            Self::Container { kind, target } => format!("{}://{}", kind.as_str(), target),
        }
    }
}

impl fmt::Display for LogPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}

impl From<&str> for LogPath {
    fn from(raw: &str) -> Self {
        Self::parse(raw)
    }
}

impl From<String> for LogPath {
    fn from(raw: String) -> Self {
        Self::parse(&raw)
    }
}

impl From<LogPath> for String {
    fn from(path: LogPath) -> Self {
        path.canonical()
    }
}
