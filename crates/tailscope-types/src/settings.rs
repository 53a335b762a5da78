use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::request::TrackingMode;

/// Engine settings, usually loaded from a TOML file
///
/// Every section has working defaults so a missing file yields a usable
/// single-node configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub node: NodeSettings,
    #[serde(default)]
    pub peers: Vec<PeerSettings>,
    #[serde(default)]
    pub tracking: TrackingSettings,
    #[serde(default)]
    pub levels: LevelSettings,
    #[serde(default)]
    pub formats: FormatSettings,
    #[serde(default)]
    pub adapters: AdaptersSettings,
}

/// Identity of the node running this process
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeSettings {
    #[serde(default = "default_node_name")]
    pub name: String,
}

impl Default for NodeSettings {
    fn default() -> Self {
        Self {
            name: default_node_name(),
        }
    }
}

fn default_node_name() -> String {
    "local".to_string()
}

/// Another node in the routing table
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PeerSettings {
    pub name: String,
    pub address: String,
}

/// Batching policy and backlog sizes
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct TrackingSettings {
    /// Lines buffered before a flush is forced
    #[serde(default = "default_size_threshold")]
    pub size_threshold: usize,
    /// Longest time a buffered line may wait before delivery
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Backlog lines requested when flat tracking starts
    #[serde(default = "default_flat_tail_size")]
    pub flat_tail_size: u32,
    /// Backlog lines requested when grouped tracking starts
    #[serde(default = "default_group_tail_size")]
    pub group_tail_size: u32,
}

impl TrackingSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Backlog size for a delivery mode
    pub fn tail_size(&self, mode: TrackingMode) -> u32 {
        match mode {
            TrackingMode::Flat => self.flat_tail_size,
            TrackingMode::Grouped => self.group_tail_size,
        }
    }
}

impl Default for TrackingSettings {
    fn default() -> Self {
        Self {
            size_threshold: default_size_threshold(),
            timeout_ms: default_timeout_ms(),
            flat_tail_size: default_flat_tail_size(),
            group_tail_size: default_group_tail_size(),
        }
    }
}

fn default_size_threshold() -> usize {
    20
}

fn default_timeout_ms() -> u64 {
    1000
}

fn default_flat_tail_size() -> u32 {
    45
}

fn default_group_tail_size() -> u32 {
    20
}

/// Level names recognized by record level detection
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LevelSettings {
    #[serde(default = "default_known_levels")]
    pub known: Vec<String>,
}

impl Default for LevelSettings {
    fn default() -> Self {
        Self {
            known: default_known_levels(),
        }
    }
}

fn default_known_levels() -> Vec<String> {
    ["TRACE", "DEBUG", "INFO", "WARN", "ERROR", "FATAL"]
        .into_iter()
        .map(str::to_string)
        .collect()
}

/// Timestamp format fallbacks
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FormatSettings {
    /// Pattern applied to composite inclusions that do not name one
    #[serde(default = "default_timestamp_pattern")]
    pub default: String,
}

impl Default for FormatSettings {
    fn default() -> Self {
        Self {
            default: default_timestamp_pattern(),
        }
    }
}

fn default_timestamp_pattern() -> String {
    "yyyy-MM-dd HH:mm:ss.SSS".to_string()
}

/// Command construction for one backend origin
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AdapterSettings {
    pub executable: String,
    /// Follow argv template with an `{n}` backlog placeholder; when
    /// absent, the backend's built-in template is used
    #[serde(default)]
    pub follow_command: Option<String>,
}

impl AdapterSettings {
    pub fn new(executable: impl Into<String>) -> Self {
        Self {
            executable: executable.into(),
            follow_command: None,
        }
    }
}

/// Per-origin adapter commands
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AdaptersSettings {
    #[serde(default = "default_file_adapter")]
    pub file: AdapterSettings,
    #[serde(default = "default_docker_adapter")]
    pub docker: AdapterSettings,
    #[serde(default = "default_kubernetes_adapter")]
    pub kubernetes: AdapterSettings,
}

impl Default for AdaptersSettings {
    fn default() -> Self {
        Self {
            file: default_file_adapter(),
            docker: default_docker_adapter(),
            kubernetes: default_kubernetes_adapter(),
        }
    }
}

fn default_file_adapter() -> AdapterSettings {
    AdapterSettings::new("tail")
}

fn default_docker_adapter() -> AdapterSettings {
    AdapterSettings::new("docker")
}

fn default_kubernetes_adapter() -> AdapterSettings {
    AdapterSettings::new("kubectl")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_form_working_configuration() {
        let settings = Settings::default();
        assert_eq!(settings.node.name, "local");
        assert!(settings.peers.is_empty());
        assert_eq!(settings.tracking.size_threshold, 20);
        assert_eq!(settings.tracking.timeout(), Duration::from_millis(1000));
        assert_eq!(settings.tracking.tail_size(TrackingMode::Flat), 45);
        assert_eq!(settings.tracking.tail_size(TrackingMode::Grouped), 20);
        assert_eq!(settings.levels.known.len(), 6);
        assert_eq!(settings.adapters.file.executable, "tail");
        assert!(settings.adapters.file.follow_command.is_none());
    }
}
