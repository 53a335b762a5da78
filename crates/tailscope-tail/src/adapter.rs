use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use tailscope_types::{LogPath, RawLine, TailEvent};

use crate::backend::TailBackend;

/// One message from a follow process
#[derive(Debug)]
pub enum TailOutput {
    /// A content line read from stdout
    Line(RawLine),
    /// A diagnostic line read from stderr, already classified
    Event(TailEvent),
    /// The process exited; always the final message
    Exited { status: Option<i32> },
}

/// A spawned follow process with both pipes normalized into one stream
///
/// stdout lines become [`TailOutput::Line`], stderr lines are classified
/// by the backend's phrase table into [`TailOutput::Event`]. The exit
/// notification is only sent after both pipes are drained, so no output
/// can arrive after [`TailOutput::Exited`].
pub struct TailProcessAdapter {
    output: mpsc::UnboundedReceiver<TailOutput>,
    cancel: CancellationToken,
}

impl TailProcessAdapter {
    /// Spawn the follow process and start pumping its output
    pub fn spawn(
        backend: TailBackend,
        executable: &str,
        args: &[String],
        source: LogPath,
    ) -> std::io::Result<Self> {
        debug!("Starting follow process: {executable} {args:?}");

        let mut child = Command::new(executable)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let stdout_task = {
            let tx = tx.clone();
            let cancel = cancel.clone();
            let source = source.clone();
            tokio::spawn(async move {
                let Some(stdout) = stdout else { return };
                let mut lines = BufReader::new(stdout).lines();
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,

                        line = lines.next_line() => match line {
                            Ok(Some(text)) => {
                                let raw = RawLine::new(text, source.clone());
                                if tx.send(TailOutput::Line(raw)).is_err() {
                                    break;
                                }
                            }
                            Ok(None) => break,
                            Err(error) => {
                                warn!("Error reading follow output of {source}: {error}");
                                break;
                            }
                        }
                    }
                }
            })
        };

        let stderr_task = {
            let tx = tx.clone();
            let cancel = cancel.clone();
            let source = source.clone();
            tokio::spawn(async move {
                let Some(stderr) = stderr else { return };
                let mut lines = BufReader::new(stderr).lines();
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,

                        line = lines.next_line() => match line {
                            Ok(Some(text)) => {
                                let kind = backend.classify(&text);
                                debug!("Diagnostic from {source}: {} ({text})", kind.as_str());
                                let event = TailEvent::new(kind, text);
                                if tx.send(TailOutput::Event(event)).is_err() {
                                    break;
                                }
                            }
                            Ok(None) => break,
                            Err(error) => {
                                warn!("Error reading follow diagnostics of {source}: {error}");
                                break;
                            }
                        }
                    }
                }
            })
        };

        {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                let status = tokio::select! {
                    _ = cancel.cancelled() => {
                        if let Err(error) = child.kill().await {
                            warn!("Failed to kill follow process for {source}: {error}");
                        }
                        return;
                    }
                    status = child.wait() => status,
                };

                // drain both pipes before announcing the exit
                let _ = stdout_task.await;
                let _ = stderr_task.await;

                match status {
                    Ok(status) => {
                        debug!("Follow process for {source} exited: {status}");
                        let _ = tx.send(TailOutput::Exited {
                            status: status.code(),
                        });
                    }
                    Err(error) => {
                        warn!("Failed to await follow process for {source}: {error}");
                        let _ = tx.send(TailOutput::Exited { status: None });
                    }
                }
            });
        }

        Ok(Self { output: rx, cancel })
    }

    /// Next message, `None` once the adapter is fully shut down
    pub async fn next(&mut self) -> Option<TailOutput> {
        self.output.recv().await
    }

    /// Kill the follow process and stop the pump tasks
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

impl Drop for TailProcessAdapter {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tailscope_types::TailEventKind;

    fn sh(script: &str) -> Vec<String> {
        vec!["-c".to_string(), script.to_string()]
    }

    async fn collect_until_exit(adapter: &mut TailProcessAdapter) -> (Vec<TailOutput>, Option<i32>) {
        let mut outputs = Vec::new();
        loop {
            let message = tokio::time::timeout(Duration::from_secs(10), adapter.next())
                .await
                .expect("adapter output timed out")
                .expect("channel closed before exit notification");
            if let TailOutput::Exited { status } = message {
                return (outputs, status);
            }
            outputs.push(message);
        }
    }

    #[tokio::test]
    async fn test_reads_lines_then_reports_exit() {
        let source = LogPath::from("demo.log");
        let mut adapter = TailProcessAdapter::spawn(
            TailBackend::Gnu,
            "sh",
            &sh("echo one; echo two"),
            source,
        )
        .unwrap();

        let (outputs, status) = collect_until_exit(&mut adapter).await;
        let lines: Vec<String> = outputs
            .into_iter()
            .filter_map(|output| match output {
                TailOutput::Line(raw) => Some(raw.text),
                _ => None,
            })
            .collect();

        assert_eq!(lines, vec!["one", "two"]);
        assert_eq!(status, Some(0));
    }

    #[tokio::test]
    async fn test_classifies_stderr_diagnostics() {
        let script = r#"echo "tail: cannot open 'x.log' for reading: No such file or directory" >&2"#;
        let mut adapter = TailProcessAdapter::spawn(
            TailBackend::Gnu,
            "sh",
            &sh(script),
            LogPath::from("x.log"),
        )
        .unwrap();

        let (outputs, _) = collect_until_exit(&mut adapter).await;
        let events: Vec<TailEvent> = outputs
            .into_iter()
            .filter_map(|output| match output {
                TailOutput::Event(event) => Some(event),
                _ => None,
            })
            .collect();

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, TailEventKind::FileNotFound);
        assert!(events[0].raw_message.contains("cannot open"));
    }

    #[tokio::test]
    async fn test_shutdown_kills_follow_process() {
        let mut adapter = TailProcessAdapter::spawn(
            TailBackend::Gnu,
            "sh",
            &sh("sleep 30"),
            LogPath::from("slow.log"),
        )
        .unwrap();

        adapter.shutdown();

        // after shutdown all senders drop without an exit notification
        let drained = tokio::time::timeout(Duration::from_secs(10), async {
            while adapter.next().await.is_some() {}
        })
        .await;
        assert!(drained.is_ok());
    }

    #[tokio::test]
    async fn test_spawn_error_for_missing_executable() {
        let result = TailProcessAdapter::spawn(
            TailBackend::Gnu,
            "tailscope-no-such-binary",
            &[],
            LogPath::from("x.log"),
        );
        assert!(result.is_err());
    }
}
