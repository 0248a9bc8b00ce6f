//! Scaler configuration module.
//!
//! Handles loading, validating, and merging `scaler.toml`. Stock defaults are
//! the base layer; a user file only needs the keys it wants to override.
//!
//! ## Configuration Options
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! default_quality = 2          # Interpolation level without q0..q2 (0-2)
//! max_running_jobs = 4         # Concurrent pixel jobs before fast-failing
//! max_image_size = 0           # Cap on dw/dh * ws in pixels (0 = no cap)
//! whole_rotation_area = false  # Sample enough to show the whole rotated window
//! send_file_allowed = true     # Honor mo=file / mo=rawfile
//! min_subsample = 2            # Headroom divisor for decode subsampling
//! base_dirs = ["images"]       # Same tree at decreasing resolution
//! pyramid_cache_size = 1024    # Directory pyramids kept in the LRU cache
//!
//! [workers]
//! threads = 4                  # Async job workers (omit for auto = CPU cores)
//! ```
//!
//! Unknown keys are rejected to catch typos early.

use crate::imaging::ScaleQuality;
use crate::pyramid::DEFAULT_CACHE_CAPACITY;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Name of the configuration file looked up in the config directory.
pub const CONFIG_FILE: &str = "scaler.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Scaler configuration loaded from `scaler.toml`.
///
/// All fields have sensible defaults. Unknown keys are rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScalerConfig {
    /// Interpolation quality when a request carries no `q0`..`q2` flag.
    pub default_quality: u8,
    /// Size of the admission permit pool.
    pub max_running_jobs: usize,
    /// Upper bound for `dw * ws` and `dh * ws`. 0 disables the cap.
    pub max_image_size: u32,
    /// Grow the sampled area so a rotated window has no undefined corners.
    pub whole_rotation_area: bool,
    /// Whether `mo=file` and `mo=rawfile` may bypass the pixel pipeline.
    pub send_file_allowed: bool,
    /// Divisor applied to the decode subsample stride above quality 0.
    pub min_subsample: u32,
    /// Base directories, biggest resolution first.
    pub base_dirs: Vec<PathBuf>,
    /// Pyramids the directory lookup keeps cached.
    pub pyramid_cache_size: usize,
    /// Worker pool for asynchronous jobs.
    pub workers: WorkersConfig,
}

impl Default for ScalerConfig {
    fn default() -> Self {
        Self {
            default_quality: ScaleQuality::MAX,
            max_running_jobs: 4,
            max_image_size: 0,
            whole_rotation_area: false,
            send_file_allowed: true,
            min_subsample: 2,
            base_dirs: vec![PathBuf::from("images")],
            pyramid_cache_size: DEFAULT_CACHE_CAPACITY,
            workers: WorkersConfig::default(),
        }
    }
}

impl ScalerConfig {
    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_quality > ScaleQuality::MAX {
            return Err(ConfigError::Validation(
                "default_quality must be 0-2".into(),
            ));
        }
        if self.max_running_jobs == 0 {
            return Err(ConfigError::Validation(
                "max_running_jobs must be at least 1".into(),
            ));
        }
        if self.min_subsample == 0 {
            return Err(ConfigError::Validation(
                "min_subsample must be at least 1".into(),
            ));
        }
        if self.base_dirs.is_empty() {
            return Err(ConfigError::Validation(
                "base_dirs must not be empty".into(),
            ));
        }
        if self.pyramid_cache_size == 0 {
            return Err(ConfigError::Validation(
                "pyramid_cache_size must be at least 1".into(),
            ));
        }
        if self.workers.threads == Some(0) {
            return Err(ConfigError::Validation(
                "workers.threads must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn default_quality(&self) -> ScaleQuality {
        ScaleQuality::new(self.default_quality)
    }

    /// Resolve relative base dirs against `root`.
    pub fn with_root(mut self, root: &Path) -> Self {
        self.base_dirs = self
            .base_dirs
            .into_iter()
            .map(|d| if d.is_absolute() { d } else { root.join(d) })
            .collect();
        self
    }
}

/// Async worker pool settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WorkersConfig {
    /// Number of worker threads for asynchronous jobs.
    /// When absent, defaults to the number of CPU cores.
    /// Values larger than the core count are clamped down.
    pub threads: Option<usize>,
}

/// Resolve the effective thread count from config.
///
/// - `None` → use all available cores
/// - `Some(n)` → use `min(n, cores)` (user can constrain down, not up)
pub fn effective_threads(config: &WorkersConfig) -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    config.threads.map(|n| n.min(cores)).unwrap_or(cores)
}

/// Returns the stock default config as a `toml::Value::Table`.
///
/// This is the canonical representation of all default values, used as the
/// base layer for merging user overrides on top.
pub fn stock_defaults_value() -> Result<toml::Value, ConfigError> {
    Ok(toml::Value::try_from(ScalerConfig::default())?)
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

/// Load `scaler.toml` from a directory as a raw TOML value.
///
/// Returns `Ok(None)` if no `scaler.toml` exists in the directory.
/// Returns `Err` if the file exists but contains invalid TOML.
pub fn load_raw_config(dir: &Path) -> Result<Option<toml::Value>, ConfigError> {
    let config_path = dir.join(CONFIG_FILE);
    if !config_path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(&config_path)?;
    let value: toml::Value = toml::from_str(&content)?;
    Ok(Some(value))
}

/// Merge an optional overlay onto a base value, then deserialize and validate.
pub fn resolve_config(
    base: toml::Value,
    overlay: Option<toml::Value>,
) -> Result<ScalerConfig, ConfigError> {
    let merged = match overlay {
        Some(ov) => merge_toml(base, ov),
        None => base,
    };
    let config: ScalerConfig = merged.try_into()?;
    config.validate()?;
    Ok(config)
}

/// Load config from `scaler.toml` in the given directory.
///
/// Merges user values on top of stock defaults, rejects unknown keys,
/// validates the result and resolves relative base dirs against `dir`.
pub fn load_config(dir: &Path) -> Result<ScalerConfig, ConfigError> {
    let base = stock_defaults_value()?;
    let overlay = load_raw_config(dir)?;
    Ok(resolve_config(base, overlay)?.with_root(dir))
}

/// Returns a fully-commented stock `scaler.toml` with all keys and explanations.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# Pyramid Scaler Configuration
# ============================
# All settings are optional. Remove or comment out any you don't need.
# Values shown below are the defaults.
# Unknown keys will cause an error.

# Interpolation quality used when a request has no q0/q1/q2 flag.
#   0 = nearest neighbour (fastest)
#   1, 2 = bilinear
default_quality = 2

# Maximum number of pixel jobs running at once. Further requests fail
# immediately with "service overloaded" instead of waiting.
max_running_jobs = 4

# Largest destination size in pixels (dw * ws and dh * ws).
# Bigger requests are clamped down. 0 = unlimited.
max_image_size = 0

# When rotating, sample a larger area so the whole rotated window is
# visible with no empty corners.
whole_rotation_area = false

# Allow mo=file and mo=rawfile to send the source file unchanged.
send_file_allowed = true

# Decode-time subsampling keeps this many times more pixels than the
# target needs (at quality 1 and 2) so interpolation has data to work with.
min_subsample = 2

# Directories holding the same file tree at decreasing resolutions.
# Relative paths are resolved against the config directory.
base_dirs = ["images"]

# Number of image pyramids (with their inspected sizes and resolutions) kept
# in memory. Least recently used entries are dropped first.
pyramid_cache_size = 1024

# ---------------------------------------------------------------------------
# Workers
# ---------------------------------------------------------------------------
[workers]
# Threads running asynchronous jobs.
# Omit to auto-detect (= number of CPU cores).
# Values above the core count are clamped down.
# threads = 4
"##
}
