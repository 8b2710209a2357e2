use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::dedup::CollapseMode;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config from {path}: {source}")]
    Read { path: PathBuf, source: io::Error },
    #[error("failed to write config to {path}: {source}")]
    Write { path: PathBuf, source: io::Error },
    #[error("failed to parse config from {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml_edit::de::Error,
    },
    #[error("failed to serialize config: {source}")]
    Serialize { source: toml_edit::ser::Error },
    #[error("failed to create config directory {path}: {source}")]
    CreateDir { path: PathBuf, source: io::Error },
}

/// Simulated device link parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    #[serde(default = "default_sample_interval_ms")]
    pub sample_interval_ms: u64,
    /// Samples kept per channel before the device prunes its oldest.
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    /// Upper bound (exclusive) of generated sample values.
    #[serde(default = "default_value_max")]
    pub value_max: f64,
}

fn default_sample_interval_ms() -> u64 {
    100
}
fn default_history_limit() -> usize {
    500
}
fn default_value_max() -> f64 {
    3.0
}

impl Default for DeviceConfig {
    fn default() -> Self {
        DeviceConfig {
            sample_interval_ms: default_sample_interval_ms(),
            history_limit: default_history_limit(),
            value_max: default_value_max(),
        }
    }
}

impl DeviceConfig {
    /// Sample period, at least 1 ms.
    #[must_use]
    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms.max(1))
    }
}

/// Ingestion, dedup and flush parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_frame_interval_ms")]
    pub frame_interval_ms: u64,
    #[serde(default = "default_window_capacity")]
    pub window_capacity: usize,
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    #[serde(default = "default_hash_history_limit")]
    pub hash_history_limit: usize,
    #[serde(default = "default_base_flush")]
    pub base_flush: usize,
    #[serde(default = "default_max_flush")]
    pub max_flush: usize,
    #[serde(default = "default_clamp_epsilon_ms")]
    pub clamp_epsilon_ms: f64,
    #[serde(default)]
    pub collapse: CollapseMode,
}

fn default_poll_interval_ms() -> u64 {
    100
}
fn default_frame_interval_ms() -> u64 {
    16
}
fn default_window_capacity() -> usize {
    200
}
fn default_debounce_ms() -> u64 {
    250
}
fn default_hash_history_limit() -> usize {
    64
}
fn default_base_flush() -> usize {
    8
}
fn default_max_flush() -> usize {
    64
}
fn default_clamp_epsilon_ms() -> f64 {
    0.5
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            poll_interval_ms: default_poll_interval_ms(),
            frame_interval_ms: default_frame_interval_ms(),
            window_capacity: default_window_capacity(),
            debounce_ms: default_debounce_ms(),
            hash_history_limit: default_hash_history_limit(),
            base_flush: default_base_flush(),
            max_flush: default_max_flush(),
            clamp_epsilon_ms: default_clamp_epsilon_ms(),
            collapse: CollapseMode::default(),
        }
    }
}

impl PipelineConfig {
    pub const MIN_POLL_INTERVAL_MS: u64 = 20;
    pub const MAX_POLL_INTERVAL_MS: u64 = 100;

    /// Poll cadence, clamped to 20..=100 ms.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(
            self.poll_interval_ms
                .clamp(Self::MIN_POLL_INTERVAL_MS, Self::MAX_POLL_INTERVAL_MS),
        )
    }

    /// Render cadence driving the flusher, at least 1 ms.
    #[must_use]
    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms.max(1))
    }
}

/// Top-level configuration.
///
/// Forward-compatible: unknown fields are silently ignored (no `deny_unknown_fields`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

impl Config {
    /// Load config from a TOML file. Returns default config if file doesn't exist.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(contents) => {
                toml_edit::de::from_str(&contents).map_err(|source| ConfigError::Parse {
                    path: path.to_owned(),
                    source,
                })
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Config::default()),
            Err(source) => Err(ConfigError::Read {
                path: path.to_owned(),
                source,
            }),
        }
    }

    /// Serialize this config to a TOML string with one `[section]` per table.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        let mut doc = toml_edit::ser::to_document(self)
            .map_err(|source| ConfigError::Serialize { source })?;
        expand_top_level_tables(&mut doc);
        Ok(doc.to_string())
    }

    /// Save config to a file, creating parent directories if needed.
    ///
    /// Uses atomic write: writes to `path.tmp` then renames over `path`.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::CreateDir {
                path: parent.to_owned(),
                source,
            })?;
        }

        let contents = self.to_toml()?;

        let tmp_path = path.with_extension("toml.tmp");
        std::fs::write(&tmp_path, &contents).map_err(|source| ConfigError::Write {
            path: tmp_path.clone(),
            source,
        })?;
        std::fs::rename(&tmp_path, path).map_err(|source| ConfigError::Write {
            path: path.to_owned(),
            source,
        })?;

        Ok(())
    }

    /// Returns the default config directory path.
    #[must_use]
    pub fn default_dir() -> Option<PathBuf> {
        Some(dirs::config_dir()?.join("imuplotd"))
    }

    /// Returns the default config file path.
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        Some(Self::default_dir()?.join("config.toml"))
    }
}

/// Convert top-level `InlineTable` values into proper `Table` entries so they
/// render as `[section]` headers instead of `section = { ... }` one-liners.
fn expand_top_level_tables(doc: &mut toml_edit::DocumentMut) {
    use toml_edit::{Item, Value};

    let keys: Vec<String> = doc.iter().map(|(k, _)| k.to_owned()).collect();
    for key in keys {
        let Some(item) = doc.get_mut(&key) else {
            continue;
        };
        if let Item::Value(Value::InlineTable(inline)) = item {
            let table = inline.clone().into_table();
            *item = Item::Table(table);
        }
    }
}

const HEADER: &str = "\
# imuplotd configuration
# Pipeline changes apply at the next `imuplotd start`; run `imuplotd config reload`
# after editing.

";

const NOTES: &str = "\n\
# poll_interval_ms is clamped to 20..=100.
# collapse = \"unchanged_value\" drops repeated readings within a poll;
# collapse = \"exact_pair\" drops only exact (timestamp, value) repeats.
";

/// Generate the default config file content for new users.
///
/// Built from `Config::default()` through the same serialization path as
/// `Config::save()`, so the file can never drift from the code defaults.
pub fn default_config_content() -> Result<String, ConfigError> {
    let body = Config::default().to_toml()?;
    Ok(format!("{HEADER}{body}{NOTES}"))
}

/// Write the default config with comments to the given path if it doesn't exist.
/// Creates parent directories as needed. Returns true if the file was created.
pub fn bootstrap_config(path: &Path) -> Result<bool, ConfigError> {
    if path.exists() {
        return Ok(false);
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|source| ConfigError::CreateDir {
            path: parent.to_owned(),
            source,
        })?;
    }

    std::fs::write(path, default_config_content()?).map_err(|source| ConfigError::Write {
        path: path.to_owned(),
        source,
    })?;

    Ok(true)
}
