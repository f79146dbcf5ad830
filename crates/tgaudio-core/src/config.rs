//! Layered configuration loaded from `~/.config/tgaudio/config.toml`.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Direction an [`crate::enumerator::Enumerator`] walks a peer's message history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Walk from the newest message backward; the peer cursor marks the
    /// newest message_id already processed.
    NewestFirst,
    /// Walk forward from the cursor.
    OldestFirst,
}

impl Default for Direction {
    fn default() -> Self {
        Direction::NewestFirst
    }
}

/// Global configuration for the download engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Number of concurrent fetch workers (1..=10).
    pub max_workers: usize,
    /// Token bucket burst capacity.
    pub rate_capacity: u32,
    /// Token bucket target refill rate, tokens/second.
    pub rate_refill_per_second: f64,
    /// Size of one chunk requested from the transport.
    pub chunk_size_bytes: u64,
    /// Per-chunk network timeout.
    pub chunk_timeout_seconds: u64,
    /// Maximum attempts (including the first) before a file is marked FAILED.
    pub max_attempts: u32,
    /// Base delay for the worker pool's retry backoff.
    pub retry_base_delay_seconds: f64,
    /// Cap on the retry backoff delay.
    pub retry_max_delay_seconds: f64,
    /// Optional cap on tasks admitted in one invocation, across all peers.
    pub global_limit: Option<u64>,
    /// Directory audio files are written into.
    pub download_dir: PathBuf,
    /// Re-emit FAILED/SKIPPED records instead of skipping them.
    pub force_reemit_failed: bool,
    /// Direction the enumerator walks each peer's history.
    pub direction: Direction,
    /// Grace period given to in-flight workers after a cancel signal.
    pub cancel_grace_seconds: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_workers: 3,
            rate_capacity: 10,
            rate_refill_per_second: 1.0,
            chunk_size_bytes: 1024 * 1024,
            chunk_timeout_seconds: 30,
            max_attempts: 3,
            retry_base_delay_seconds: 1.0,
            retry_max_delay_seconds: 60.0,
            global_limit: None,
            download_dir: PathBuf::from("."),
            force_reemit_failed: false,
            direction: Direction::NewestFirst,
            cancel_grace_seconds: 10,
        }
    }
}

/// Error returned when a loaded or supplied configuration is invalid.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("max_workers must be between 1 and 10, got {0}")]
    WorkersOutOfRange(usize),
    #[error("chunk_size_bytes must be at least 64 KiB, got {0}")]
    ChunkTooSmall(u64),
    #[error("rate_capacity must be at least 1, got {0}")]
    RateCapacityZero(u32),
    #[error("rate_refill_per_second must be positive, got {0}")]
    RateRefillNonPositive(f64),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Toml(#[from] toml::de::Error),
    #[error(transparent)]
    Xdg(#[from] xdg::BaseDirectoriesError),
}

impl Config {
    /// Validates the configuration against the bounds the engine relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=10).contains(&self.max_workers) {
            return Err(ConfigError::WorkersOutOfRange(self.max_workers));
        }
        if self.chunk_size_bytes < 64 * 1024 {
            return Err(ConfigError::ChunkTooSmall(self.chunk_size_bytes));
        }
        if self.rate_capacity == 0 {
            return Err(ConfigError::RateCapacityZero(self.rate_capacity));
        }
        if self.rate_refill_per_second <= 0.0 {
            return Err(ConfigError::RateRefillNonPositive(self.rate_refill_per_second));
        }
        Ok(())
    }
}

/// Path to the on-disk config file, `~/.config/tgaudio/config.toml`.
pub fn config_path() -> Result<PathBuf, ConfigError> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("tgaudio")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, writing a default file if none exists yet.
pub fn load_or_init() -> Result<Config, ConfigError> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = Config::default();
        let toml = toml::to_string_pretty(&default_cfg).expect("Config always serializes");
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!(path = %path.display(), "created default config");
        return Ok(default_cfg);
    }

    let data = fs::read_to_string(&path)?;
    let cfg: Config = toml::from_str(&data)?;
    cfg.validate()?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let cfg = Config::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.max_workers, 3);
        assert_eq!(cfg.direction, Direction::NewestFirst);
    }

    #[test]
    fn config_toml_roundtrip() {
        let cfg = Config::default();
        let toml = toml::to_string_pretty(&cfg).unwrap();
        let parsed: Config = toml::from_str(&toml).unwrap();
        assert_eq!(parsed.max_workers, cfg.max_workers);
        assert_eq!(parsed.rate_capacity, cfg.rate_capacity);
        assert_eq!(parsed.direction, cfg.direction);
    }

    #[test]
    fn rejects_workers_out_of_range() {
        let mut cfg = Config::default();
        cfg.max_workers = 0;
        assert!(matches!(cfg.validate(), Err(ConfigError::WorkersOutOfRange(0))));
        cfg.max_workers = 11;
        assert!(matches!(cfg.validate(), Err(ConfigError::WorkersOutOfRange(11))));
    }

    #[test]
    fn rejects_tiny_chunk_size() {
        let mut cfg = Config::default();
        cfg.chunk_size_bytes = 1024;
        assert!(matches!(cfg.validate(), Err(ConfigError::ChunkTooSmall(1024))));
    }
}
