//! Configuration types for the update client.

use crate::error::{Result, UpdateError};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Environment variable naming a local releases directory.
pub const RELEASES_DIR_ENV: &str = "UPDRAFT_RELEASES_DIR";

/// Options consumed when an [`crate::UpdateManager`] is constructed.
///
/// Immutable for the lifetime of the manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdateOptions {
    /// Channel to check instead of the one in the installed manifest.
    #[serde(alias = "ExplicitChannel")]
    pub explicit_channel: Option<String>,
    /// Allow moving to an older version (or the same version on another channel).
    #[serde(alias = "AllowVersionDowngrade")]
    pub allow_version_downgrade: bool,
    /// Longest delta chain attempted before going straight to the full package.
    #[serde(alias = "MaximumDeltasBeforeFallback")]
    pub maximum_deltas_before_fallback: usize,
}

impl Default for UpdateOptions {
    fn default() -> Self {
        Self {
            explicit_channel: None,
            allow_version_downgrade: false,
            maximum_deltas_before_fallback: 10,
        }
    }
}

impl UpdateOptions {
    /// Resolve the channel to check: explicit > manifest > platform default.
    pub fn resolve_channel(&self, manifest_channel: &str) -> String {
        if let Some(explicit) = self.explicit_channel.as_deref().filter(|c| !c.is_empty()) {
            return explicit.to_owned();
        }
        if !manifest_channel.is_empty() {
            return manifest_channel.to_owned();
        }
        crate::locator::default_channel_name()
    }
}

/// Log output configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    /// Directory for daily-rolling log files. `None` logs to stderr only.
    pub directory: Option<PathBuf>,
    /// File name prefix for rolling logs.
    pub file_prefix: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            directory: None,
            file_prefix: "updraft".to_owned(),
        }
    }
}

/// Top-level configuration file for hosts and the sample binary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdaterConfig {
    /// Feed location: an `http(s)://` URL or a local directory.
    pub source: Option<String>,
    /// Update policy.
    pub options: UpdateOptions,
    /// Logging.
    pub log: LogConfig,
}

impl UpdaterConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| UpdateError::Parse(format!("config: {e}")))
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| UpdateError::Parse(format!("config: {e}")))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns the default config file path: `{config_dir}/updraft/config.toml`.
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp/updraft-config"))
            .join("updraft")
            .join("config.toml")
    }

    /// Feed location, falling back to [`releases_dir_from_env`].
    pub fn source_or_env(&self) -> Option<String> {
        self.source
            .clone()
            .filter(|s| !s.is_empty())
            .or_else(|| releases_dir_from_env().map(|p| p.to_string_lossy().into_owned()))
    }
}

/// Releases directory named by `UPDRAFT_RELEASES_DIR`, if set and non-empty.
pub fn releases_dir_from_env() -> Option<PathBuf> {
    std::env::var_os(RELEASES_DIR_ENV)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}
