use std::process::Stdio;

use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

use crate::backend::TailBackend;

/// Failure to identify the file-tail flavor at startup
#[derive(Debug, Error)]
pub enum DetectError {
    #[error("failed to probe '{command}': {source}")]
    Probe {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("unrecognized tail banner: {banner:?}")]
    UnrecognizedBanner { banner: String },
}

/// Identify the installed file-tail flavor by probing its banner
///
/// Runs `<executable> --version` and matches the first stdout line,
/// falling back to the first stderr line when stdout stays empty. An
/// unmatched banner is a startup error rather than a guess.
pub async fn detect_file_backend(executable: &str) -> Result<TailBackend, DetectError> {
    let output = Command::new(executable)
        .arg("--version")
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|source| DetectError::Probe {
            command: format!("{executable} --version"),
            source,
        })?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    let banner = banner_line(&stdout, &stderr);

    match TailBackend::from_banner(banner) {
        Some(backend) => {
            debug!("Detected {} tail from banner {banner:?}", backend.as_str());
            Ok(backend)
        }
        None => Err(DetectError::UnrecognizedBanner {
            banner: banner.to_string(),
        }),
    }
}

fn banner_line<'a>(stdout: &'a str, stderr: &'a str) -> &'a str {
    let first = stdout.lines().next().unwrap_or("").trim();
    if !first.is_empty() {
        return first;
    }
    stderr.lines().next().unwrap_or("").trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_banner_prefers_stdout() {
        assert_eq!(
            banner_line("tail (GNU coreutils) 9.4\nCopyright\n", "noise"),
            "tail (GNU coreutils) 9.4"
        );
    }

    #[test]
    fn test_banner_falls_back_to_stderr() {
        assert_eq!(
            banner_line("", "tail: illegal option -- -\nusage: tail ...\n"),
            "tail: illegal option -- -"
        );
        assert_eq!(banner_line("", ""), "");
    }

    #[tokio::test]
    async fn test_detect_fails_for_missing_executable() {
        let result = detect_file_backend("tailscope-no-such-binary").await;
        assert!(matches!(result, Err(DetectError::Probe { .. })));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_detect_matches_scripted_banner() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("fake-tail");
        std::fs::write(&script, "#!/bin/sh\necho 'tail (GNU coreutils) 9.4'\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let backend = detect_file_backend(script.to_str().unwrap()).await.unwrap();
        assert_eq!(backend, TailBackend::Gnu);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_detect_rejects_unknown_banner() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("odd-tail");
        std::fs::write(&script, "#!/bin/sh\necho 'sometail 0.1'\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let result = detect_file_backend(script.to_str().unwrap()).await;
        assert!(matches!(
            result,
            Err(DetectError::UnrecognizedBanner { .. })
        ));
    }
}
