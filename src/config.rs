use std::path::Path;

use anyhow::{Context, Result};
use tracing::debug;

use tailscope_types::Settings;

/// Settings file consulted when no `--config` is given
const DEFAULT_CONFIG_FILE: &str = "tailscope.toml";

/// Load engine settings
///
/// An explicitly named file must exist and parse. Without one, the
/// default file is used when present and built-in defaults otherwise, so
/// the binary runs on a bare machine with no configuration at all.
pub fn load(path: Option<&Path>) -> Result<Settings> {
    match path {
        Some(path) => read(path),
        None => {
            let default = Path::new(DEFAULT_CONFIG_FILE);
            if default.exists() {
                read(default)
            } else {
                debug!("No settings file found; using built-in defaults");
                Ok(Settings::default())
            }
        }
    }
}

fn read(path: &Path) -> Result<Settings> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read settings file {}", path.display()))?;
    toml::from_str(&text)
        .with_context(|| format!("failed to parse settings file {}", path.display()))
}
