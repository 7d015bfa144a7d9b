//! Configuration module.
//!
//! Handles loading, validating, and merging `imgfit.toml`. User values are
//! merged on top of stock defaults, so a config file only needs the keys it
//! wants to override.
//!
//! ## Configuration Options
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! [engine]
//! default_format = "jpg"      # Output format when nothing else decides
//! # format = "png"            # Force every derived file to this format
//! quality = 95                # Lossy encoding quality (1-100)
//! upload_max_dimension = 2000 # Longer edge cap applied on upload
//!
//! # Omit [engine.backends] entirely for a single native backend.
//! [engine.backends.native]
//! weight = 1
//! mimetypes = ["image/jpeg", "image/png", "image/webp", "image/tiff", "image/bmp"]
//!
//! [engine.backends.external]
//! weight = 0
//! mimetypes = ["image/gif"]
//! path = "gifsicle"
//! timeout_secs = 30
//!
//! [shard]
//! width = 0
//! depth = 0
//! rest_only = false
//!
//! [options]
//! enable_cascade_delete = false
//! async_persistence = false
//!
//! [storage]
//! source = "data/source"
//! destination = "data/cache"
//!
//! [store]
//! path = "data/store.json"
//! ```
//!
//! Unknown keys are rejected to catch typos early.

use crate::image_file::parse_format;
use crate::imaging::rust_backend::DEFAULT_MIME_TYPES;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Config file name looked up when `--config` is not given.
pub const CONFIG_FILENAME: &str = "imgfit.toml";

/// Length of a hex SHA-256 cache key; shard prefixes must fit inside it.
const KEY_LENGTH: usize = 64;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Top-level configuration loaded from `imgfit.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ImgfitConfig {
    pub engine: EngineConfig,
    pub shard: ShardConfig,
    pub options: OptionsConfig,
    pub storage: StorageConfig,
    pub store: StoreConfig,
}

impl ImgfitConfig {
    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let engine = &self.engine;
        if !(1..=100).contains(&engine.quality) {
            return Err(ConfigError::Validation(
                "engine.quality must be 1-100".into(),
            ));
        }
        if engine.upload_max_dimension == 0 {
            return Err(ConfigError::Validation(
                "engine.upload_max_dimension must be non-zero".into(),
            ));
        }
        if parse_format(&engine.default_format).is_none() {
            return Err(ConfigError::Validation(format!(
                "engine.default_format {:?} is not a known image format",
                engine.default_format
            )));
        }
        if let Some(format) = &engine.format
            && parse_format(format).is_none()
        {
            return Err(ConfigError::Validation(format!(
                "engine.format {format:?} is not a known image format"
            )));
        }
        if let Some(backends) = &engine.backends {
            if let Some(native) = &backends.native
                && native.mimetypes.is_empty()
            {
                return Err(ConfigError::Validation(
                    "engine.backends.native.mimetypes must not be empty".into(),
                ));
            }
            if let Some(external) = &backends.external {
                if external.mimetypes.is_empty() {
                    return Err(ConfigError::Validation(
                        "engine.backends.external.mimetypes must not be empty".into(),
                    ));
                }
                if external.timeout_secs == 0 {
                    return Err(ConfigError::Validation(
                        "engine.backends.external.timeout_secs must be non-zero".into(),
                    ));
                }
            }
        }
        // rest_only needs at least one key char left over for the file name
        let limit = if self.shard.rest_only {
            KEY_LENGTH - 1
        } else {
            KEY_LENGTH
        };
        match self.shard.width.checked_mul(self.shard.depth) {
            Some(prefix) if prefix <= limit => {}
            _ => {
                return Err(ConfigError::Validation(format!(
                    "shard.width * shard.depth must be at most {limit}"
                )));
            }
        }
        Ok(())
    }
}

/// Engine settings: output format, quality, and the backend registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Output format used when neither the request nor the source decides.
    pub default_format: String,
    /// Forced output format for every derived file.
    pub format: Option<String>,
    pub quality: u32,
    /// Longer-edge cap applied to uploads.
    pub upload_max_dimension: u32,
    /// Backend registry. `None` means a single native backend.
    pub backends: Option<BackendsConfig>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_format: "jpg".to_string(),
            format: None,
            quality: 95,
            upload_max_dimension: 2000,
            backends: None,
        }
    }
}

/// Which backends to register. Absent entries are not registered.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BackendsConfig {
    pub native: Option<NativeBackendConfig>,
    pub external: Option<ExternalBackendConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NativeBackendConfig {
    /// Lower weights are tried first.
    pub weight: i32,
    pub mimetypes: Vec<String>,
}

impl Default for NativeBackendConfig {
    fn default() -> Self {
        Self {
            weight: 0,
            mimetypes: DEFAULT_MIME_TYPES.iter().map(|m| m.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExternalBackendConfig {
    pub weight: i32,
    pub mimetypes: Vec<String>,
    /// Program name looked up on `PATH`, or an explicit file path.
    pub path: String,
    pub timeout_secs: u64,
}

impl Default for ExternalBackendConfig {
    fn default() -> Self {
        Self {
            weight: 0,
            mimetypes: vec!["image/gif".to_string()],
            path: crate::imaging::external_backend::DEFAULT_PROGRAM.to_string(),
            timeout_secs: crate::imaging::external_backend::DEFAULT_TIMEOUT.as_secs(),
        }
    }
}

/// Destination path layout for derived files.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ShardConfig {
    /// Characters per directory segment.
    pub width: usize,
    /// Number of directory segments.
    pub depth: usize,
    /// Name the file after the remainder of the key instead of the whole key.
    pub rest_only: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OptionsConfig {
    /// Track derived keys per source so deleting a source removes them.
    pub enable_cascade_delete: bool,
    /// Persist derived files in the background instead of before returning.
    pub async_persistence: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageConfig {
    pub source: PathBuf,
    pub destination: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            source: PathBuf::from("data/source"),
            destination: PathBuf::from("data/cache"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/store.json"),
        }
    }
}

/// Returns the stock default config as a `toml::Value::Table`.
///
/// This is the canonical representation of all default values, used as the
/// base layer for merging user overrides on top.
pub fn stock_defaults_value() -> Result<toml::Value, ConfigError> {
    Ok(toml::Value::try_from(ImgfitConfig::default())?)
}

/// Recursively merge `overlay` on top of `base`.
///
/// - Tables are merged key-by-key (overlay keys override base keys).
/// - Non-table values in overlay replace base values entirely.
/// - Keys in base that are not in overlay are preserved.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Load a config file as a raw TOML value.
///
/// Returns `Ok(None)` if the file does not exist.
/// Returns `Err` if the file exists but contains invalid TOML.
pub fn load_raw_config(path: &Path) -> Result<Option<toml::Value>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path)?;
    let value: toml::Value = toml::from_str(&content)?;
    Ok(Some(value))
}

/// Merge an optional overlay onto a base value, then deserialize and validate.
pub fn resolve_config(
    base: toml::Value,
    overlay: Option<toml::Value>,
) -> Result<ImgfitConfig, ConfigError> {
    let merged = match overlay {
        Some(ov) => merge_toml(base, ov),
        None => base,
    };
    let config: ImgfitConfig = merged.try_into()?;
    config.validate()?;
    Ok(config)
}

/// Load config from the file at `path`.
///
/// A missing file yields the stock defaults. User values are merged on top
/// of the defaults, unknown keys are rejected, and the result is validated.
pub fn load_config(path: &Path) -> Result<ImgfitConfig, ConfigError> {
    let base = stock_defaults_value()?;
    let overlay = load_raw_config(path)?;
    resolve_config(base, overlay)
}

/// Returns a fully-commented stock `imgfit.toml` with all keys and explanations.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# imgfit Configuration
# ====================
# All settings are optional. Remove or comment out any you don't need.
# Values shown below are the defaults.
# Unknown keys will cause an error.

# ---------------------------------------------------------------------------
# Engine
# ---------------------------------------------------------------------------
[engine]
# Output format used when neither the request nor the source decides.
default_format = "jpg"

# Force every derived file to one format.
# format = "png"

# Lossy encoding quality (1 = worst, 100 = best).
quality = 95

# Uploads are resized so their longer edge is at most this many pixels.
upload_max_dimension = 2000

# Backend registry. Without an [engine.backends] table a single native
# backend serves every built-in content type. With it, only the listed
# backends are registered, tried in ascending weight order.
#
# [engine.backends.native]
# weight = 1
# mimetypes = ["image/jpeg", "image/png", "image/gif", "image/webp", "image/tiff", "image/bmp"]
#
# The external backend is only registered if `path` resolves to a program.
# [engine.backends.external]
# weight = 0
# mimetypes = ["image/gif"]
# path = "gifsicle"
# timeout_secs = 30

# ---------------------------------------------------------------------------
# Derived file layout
# ---------------------------------------------------------------------------
[shard]
# A key "abcdef..." with width = 2, depth = 2 is stored as "ab/cd/abcdef....jpg".
width = 0
depth = 0
# Name the file after the rest of the key only ("ab/cd/ef....jpg").
rest_only = false

# ---------------------------------------------------------------------------
# Cache behaviour
# ---------------------------------------------------------------------------
[options]
# Remember which derived files belong to each source so deleting the source
# removes them too.
enable_cascade_delete = false

# Write derived files in the background. Faster responses, but a request
# right after may miss and regenerate.
async_persistence = false

# ---------------------------------------------------------------------------
# Locations
# ---------------------------------------------------------------------------
[storage]
source = "data/source"
destination = "data/cache"

[store]
path = "data/store.json"
"##
}
