use std::path::{Path, PathBuf};

use realtime_session::SessionConfig;
use serde::{Deserialize, Serialize};

use crate::error::{CliError, Result};

const APP_DIR: &str = "rtsession";

/// Configuration file contents.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub session: SessionConfig,
    /// Where credentials are stored. Defaults to `credentials.toml` next to the config.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credentials_file: Option<PathBuf>,
}

impl AppConfig {
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(APP_DIR).join("config.toml"))
    }

    /// Load from `path`, or the default location. A missing default file yields defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => match Self::default_path() {
                Some(path) if path.exists() => Self::from_file(&path),
                _ => Ok(Self::default()),
            },
        }
    }

    fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            CliError::config(format!("Failed to read {}: {e}", path.display()))
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| CliError::config(format!("Invalid config: {e}")))
    }

    /// Apply `RTSESSION_*` environment variables.
    pub fn apply_env(self) -> Result<Self> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    pub fn apply_overrides<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup("RTSESSION_CREDENTIALS_FILE") {
            self.credentials_file = Some(PathBuf::from(path));
        }
        self.session = self.session.with_overrides(lookup)?;
        Ok(self)
    }

    pub fn credentials_path(&self) -> PathBuf {
        self.credentials_file.clone().unwrap_or_else(|| {
            dirs::config_dir()
                .map(|dir| dir.join(APP_DIR))
                .unwrap_or_else(|| PathBuf::from("."))
                .join("credentials.toml")
        })
    }

    pub fn show(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| CliError::config(format!("Failed to render config: {e}")))
    }
}
