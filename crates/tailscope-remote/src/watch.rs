use std::collections::HashMap;

use tailscope_types::{LogPath, TrackingMode};

/// One inclusion of a watched log
#[derive(Clone, Debug)]
pub struct WatchInclusion {
    pub path: LogPath,
    /// Timestamp pattern for grouped tracking; flat watches carry none
    pub format: Option<String>,
}

impl WatchInclusion {
    pub fn new(path: LogPath, format: Option<String>) -> Self {
        Self { path, format }
    }
}

/// One client's view of one log
#[derive(Clone, Debug)]
pub struct Watch {
    pub destination: String,
    pub log: String,
    pub mode: TrackingMode,
    pub inclusions: Vec<WatchInclusion>,
}

/// Who watches what, and which inclusions still have an audience
///
/// The coordinator consults this before starting or stopping tracking:
/// an inclusion is started when its first watch opens and stopped only
/// when no remaining watch of that destination references it.
#[derive(Default)]
pub struct WatchRegistry {
    watches: HashMap<(String, String), Watch>,
}

impl WatchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a watch and return the inclusions that need tracking started
    ///
    /// Re-opening an existing watch replaces it; inclusions already
    /// watched by this destination are not returned again.
    pub fn open(&mut self, watch: Watch) -> Vec<WatchInclusion> {
        let key = (watch.destination.clone(), watch.log.clone());
        self.watches.remove(&key);

        let fresh: Vec<WatchInclusion> = watch
            .inclusions
            .iter()
            .filter(|inclusion| !self.is_watched(&watch.destination, &inclusion.path))
            .cloned()
            .collect();

        self.watches.insert(key, watch);
        fresh
    }

    /// Drop a watch and return the inclusions nobody else watches
    pub fn close(&mut self, destination: &str, log: &str) -> Vec<LogPath> {
        let key = (destination.to_string(), log.to_string());
        let Some(watch) = self.watches.remove(&key) else {
            return Vec::new();
        };
        watch
            .inclusions
            .into_iter()
            .map(|inclusion| inclusion.path)
            .filter(|path| !self.is_watched(destination, path))
            .collect()
    }

    /// Drop every watch of a disconnecting client
    pub fn close_client(&mut self, destination: &str) -> Vec<LogPath> {
        let logs: Vec<String> = self
            .watches
            .keys()
            .filter(|(dest, _)| dest == destination)
            .map(|(_, log)| log.clone())
            .collect();

        let mut orphaned = Vec::new();
        for log in logs {
            orphaned.extend(self.close(destination, &log));
        }
        orphaned
    }

    /// Whether any watch of this destination references the path
    pub fn is_watched(&self, destination: &str, path: &LogPath) -> bool {
        let canonical = path.canonical();
        self.watches
            .iter()
            .filter(|((dest, _), _)| dest == destination)
            .any(|(_, watch)| {
                watch
                    .inclusions
                    .iter()
                    .any(|inclusion| inclusion.path.canonical() == canonical)
            })
    }

    /// Logs of one destination that include the given source
    pub fn watching_logs(&self, destination: &str, path: &LogPath) -> Vec<String> {
        let canonical = path.canonical();
        self.watches
            .iter()
            .filter(|((dest, _), _)| dest == destination)
            .filter(|(_, watch)| {
                watch
                    .inclusions
                    .iter()
                    .any(|inclusion| inclusion.path.canonical() == canonical)
            })
            .map(|((_, log), _)| log.clone())
            .collect()
    }

    pub fn watch_count(&self) -> usize {
        self.watches.len()
    }
}
