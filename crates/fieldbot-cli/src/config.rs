//! Configuration vault – reads/writes `~/.fieldbot/config.toml`.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use fieldbot_hal::{DriveConfig, RangeSensorConfig, SweepConfig};
use fieldbot_runtime::{AutonomyConfig, PlannerConfig, VisionConfig};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config at {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("failed to write config at {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Persisted rover configuration stored in `~/.fieldbot/config.toml`.
///
/// Every section falls back to its defaults, so a partial file is valid.
/// The `Debug` output never shows the vision API key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub autonomy: AutonomyConfig,
    pub drive: DriveConfig,
    pub range: RangeSensorConfig,
    pub sweep: SweepConfig,
    pub planner: PlannerConfig,
    pub vision: VisionConfig,
}

/// Return the path to `~/.fieldbot/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

/// Build the config path relative to the given home directory.
pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".fieldbot").join("config.toml")
}

/// Load the config from disk.  Returns `None` if the file does not exist.
pub fn load() -> Result<Option<Config>, ConfigError> {
    load_from(&config_path())
}

pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let mut cfg: Config = toml::from_str(&raw)?;
    apply_env_overrides(&mut cfg);
    Ok(Some(cfg))
}

/// Apply environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `FIELDBOT_VISION_URL` | `vision.api_url` |
/// | `FIELDBOT_MODEL` | `vision.model` |
/// | `FIELDBOT_TICK_MS` | `autonomy.tick_ms` |
/// | `GOOGLE_API_KEY` | `vision.api_key` |
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("FIELDBOT_VISION_URL") {
        cfg.vision.api_url = v;
    }
    if let Ok(v) = std::env::var("FIELDBOT_MODEL") {
        cfg.vision.model = v;
    }
    if let Ok(v) = std::env::var("FIELDBOT_TICK_MS")
        && let Ok(ms) = v.parse::<u64>()
        && ms > 0
    {
        cfg.autonomy.tick_ms = ms;
    }
    if let Ok(v) = std::env::var("GOOGLE_API_KEY")
        && !v.is_empty()
    {
        cfg.vision.api_key = v;
    }
}

/// Save the config to disk, creating `~/.fieldbot/` if necessary.
pub fn save(cfg: &Config) -> Result<(), ConfigError> {
    save_to(cfg, &config_path())
}

pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    let write_err = |source| ConfigError::Write {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(write_err)?;
        // Owner only (rwx------).
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700)).map_err(write_err)?;
        }
    }
    let raw = toml::to_string_pretty(cfg)?;
    // Owner-only read/write (rw-------): the file may hold the API key.
    #[cfg(unix)]
    {
        use std::io::Write;
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| f.write_all(raw.as_bytes()))
            .map_err(write_err)?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw).map_err(write_err)?;
    Ok(())
}
