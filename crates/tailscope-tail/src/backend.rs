use std::time::Duration;

use tailscope_types::{AdapterSettings, ContainerKind, TailEventKind};

/// The closed set of supported follow backends
///
/// Each variant carries the policy for one backend flavor: how its banner
/// identifies it, which follow options it takes, how long to wait before
/// restarting a dead process, and which diagnostic phrases map to which
/// lifecycle events.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TailBackend {
    /// GNU coreutils `tail`
    Gnu,
    /// BSD and macOS `tail`
    Bsd,
    /// Solaris `tail` (no `-F`, follow only via `-f`)
    Solaris,
    /// `docker logs --follow`
    Docker,
    /// `kubectl logs --follow`
    Kubernetes,
}

impl TailBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gnu => "gnu",
            Self::Bsd => "bsd",
            Self::Solaris => "solaris",
            Self::Docker => "docker",
            Self::Kubernetes => "kubernetes",
        }
    }

    /// Backend used for a container scheme
    pub fn for_container(kind: ContainerKind) -> Self {
        match kind {
            ContainerKind::Docker => Self::Docker,
            ContainerKind::Kubernetes => Self::Kubernetes,
        }
    }

    /// Match a `--version` probe banner to a file backend
    ///
    /// GNU prints its name on stdout, BSD rejects the flag with
    /// `illegal option --`, Solaris answers with a usage line. Checked in
    /// that order; container backends are never banner-detected.
    pub fn from_banner(banner: &str) -> Option<Self> {
        if banner.starts_with("tail (GNU coreutils)") {
            Some(Self::Gnu)
        } else if banner.contains("illegal option --") {
            Some(Self::Bsd)
        } else if banner.starts_with("usage: tail") {
            Some(Self::Solaris)
        } else {
            None
        }
    }

    /// Whether the backend re-follows a replaced or reappearing file on
    /// its own
    ///
    /// Self-healing backends stay ACTIVE across file lifecycle events;
    /// the others need the session to restart the process.
    pub fn self_healing(&self) -> bool {
        match self {
            Self::Gnu | Self::Bsd | Self::Docker | Self::Kubernetes => true,
            Self::Solaris => false,
        }
    }

    /// Pause before restarting a follow process
    pub fn retry_delay(&self) -> Duration {
        match self {
            // -F recovers by itself, restart only matters after a crash
            Self::Gnu | Self::Bsd => Duration::from_millis(5),
            Self::Solaris => Duration::from_millis(5000),
            Self::Docker | Self::Kubernetes => Duration::from_millis(1000),
        }
    }

    /// Map one stderr diagnostic line to a lifecycle event
    ///
    /// Substring match against the backend's known phrases, highest
    /// priority first. Unknown diagnostics classify as
    /// [`TailEventKind::Unrecognized`] and must never end a session.
    pub fn classify(&self, diagnostic: &str) -> TailEventKind {
        let text = diagnostic.to_ascii_lowercase();
        match self {
            Self::Gnu => {
                if text.contains("cannot open") {
                    TailEventKind::FileNotFound
                } else if text.contains("has appeared") || text.contains("has become accessible") {
                    TailEventKind::FileAppeared
                } else if text.contains("has been replaced") && text.contains("following new file") {
                    // rotation: a fresh file is being followed now
                    TailEventKind::FileAppeared
                } else if text.contains("has become inaccessible")
                    || text.contains("has been replaced with an untailable file")
                {
                    TailEventKind::FileDisappeared
                } else if text.contains("truncated") {
                    TailEventKind::FileTruncated
                } else {
                    TailEventKind::Unrecognized
                }
            }
            Self::Bsd | Self::Solaris => {
                if text.contains("cannot open") {
                    TailEventKind::FileNotFound
                } else {
                    TailEventKind::Unrecognized
                }
            }
            Self::Docker => {
                if text.contains("no such container") {
                    TailEventKind::FileNotFound
                } else {
                    TailEventKind::Unrecognized
                }
            }
            Self::Kubernetes => {
                if text.contains("not found") {
                    TailEventKind::FileNotFound
                } else {
                    TailEventKind::Unrecognized
                }
            }
        }
    }

    /// Built-in follow argv template, `{n}` standing for the backlog count
    pub fn follow_template(&self) -> &'static str {
        match self {
            Self::Gnu => "-F -n {n}",
            Self::Bsd => "-F -{n}",
            Self::Solaris => "-{n}f",
            Self::Docker | Self::Kubernetes => "logs --follow --tail={n}",
        }
    }

    /// Backlog line count to request from the follow process
    ///
    /// Zero when no previous lines are wanted, except on Kubernetes where
    /// `--tail=0` means "no limit" and the count is floored at one line.
    pub fn backlog(&self, include_previous: bool, tail_size: u32) -> u32 {
        let count = if include_previous { tail_size } else { 0 };
        match self {
            Self::Kubernetes => count.max(1),
            _ => count,
        }
    }

    /// Render the full follow argv for a target
    ///
    /// Uses the configured template when one is set, the built-in default
    /// otherwise. The target (path, container or pod name) is always the
    /// final argument.
    pub fn follow_args(&self, settings: &AdapterSettings, target: &str, backlog: u32) -> Vec<String> {
        let template = settings
            .follow_command
            .as_deref()
            .unwrap_or_else(|| self.follow_template());
        let mut args: Vec<String> = template
            .replace("{n}", &backlog.to_string())
            .split_whitespace()
            .map(str::to_string)
            .collect();
        args.push(target.to_string());
        args
    }
}
