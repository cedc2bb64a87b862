//! Configuration management for SeirChain

use crate::error::{ChainError, Result};
use crate::geometry::MAX_SUPPORTED_LEVEL;
use serde::{Deserialize, Deserializer};
use std::fs;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub miner: MinerConfig,
    #[serde(default)]
    pub consensus: ConsensusConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LedgerConfig {
    #[serde(default = "default_max_level")]
    pub max_level: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MinerConfig {
    /// Scales the global difficulty floor.
    #[serde(default = "default_base_difficulty")]
    pub base_difficulty: u64,
    /// Per-level growth factor of the difficulty curve.
    #[serde(default = "default_depth_multiplier")]
    pub depth_multiplier: u64,
    #[serde(default = "default_threads")]
    pub threads: usize,
    /// Nonce attempts between polls of the cancellation signal.
    #[serde(default = "default_check_interval")]
    pub check_interval: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConsensusConfig {
    #[serde(
        default = "default_sync_interval",
        deserialize_with = "deserialize_duration"
    )]
    pub sync_interval: Duration,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            max_level: default_max_level(),
        }
    }
}

impl Default for MinerConfig {
    fn default() -> Self {
        Self {
            base_difficulty: default_base_difficulty(),
            depth_multiplier: default_depth_multiplier(),
            threads: default_threads(),
            check_interval: default_check_interval(),
        }
    }
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            sync_interval: default_sync_interval(),
        }
    }
}

impl Config {
    /// Parse a TOML document and validate it.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Config = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.ledger.max_level > MAX_SUPPORTED_LEVEL {
            return Err(ChainError::ConfigError(format!(
                "ledger.max_level must be at most {}, got {}",
                MAX_SUPPORTED_LEVEL, self.ledger.max_level
            )));
        }
        if self.miner.base_difficulty == 0 {
            return Err(ChainError::ConfigError(
                "miner.base_difficulty must be at least 1".to_string(),
            ));
        }
        if self.miner.depth_multiplier == 0 {
            return Err(ChainError::ConfigError(
                "miner.depth_multiplier must be at least 1".to_string(),
            ));
        }
        if self.miner.threads == 0 {
            return Err(ChainError::ConfigError(
                "miner.threads must be at least 1".to_string(),
            ));
        }
        if self.miner.check_interval == 0 {
            return Err(ChainError::ConfigError(
                "miner.check_interval must be at least 1".to_string(),
            ));
        }
        if self.consensus.sync_interval.is_zero() {
            return Err(ChainError::ConfigError(
                "consensus.sync_interval must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Load configuration from `path`, falling back to defaults when the file
/// does not exist.
pub fn load_config(path: impl AsRef<Path>) -> Result<Config> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(Config::default());
    }
    let text = fs::read_to_string(path)?;
    if text.trim().is_empty() {
        return Ok(Config::default());
    }
    Config::from_toml_str(&text)
}

fn deserialize_duration<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
}

fn default_max_level() -> u32 {
    12
}

fn default_base_difficulty() -> u64 {
    1_000
}

fn default_depth_multiplier() -> u64 {
    1
}

fn default_threads() -> usize {
    2
}

fn default_check_interval() -> u64 {
    1_024
}

fn default_sync_interval() -> Duration {
    Duration::from_millis(250)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.ledger.max_level, 12);
        assert_eq!(config.miner.base_difficulty, 1_000);
        assert_eq!(config.consensus.sync_interval, Duration::from_millis(250));
    }

    #[test]
    fn test_full_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[ledger]
max_level = 6

[miner]
base_difficulty = 4
depth_multiplier = 3
threads = 3
check_interval = 64

[consensus]
sync_interval = "1s 500ms"
"#
        )
        .unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.ledger.max_level, 6);
        assert_eq!(config.miner.base_difficulty, 4);
        assert_eq!(config.miner.depth_multiplier, 3);
        assert_eq!(config.miner.threads, 3);
        assert_eq!(config.miner.check_interval, 64);
        assert_eq!(config.consensus.sync_interval, Duration::from_millis(1_500));
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = Config::from_toml_str("[miner]\nbase_difficulty = 9\n").unwrap();
        assert_eq!(config.miner.base_difficulty, 9);
        assert_eq!(config.miner.depth_multiplier, 1);
        assert_eq!(config.ledger.max_level, 12);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.miner.threads, 2);
    }

    #[test]
    fn test_invalid_ranges_rejected() {
        for text in [
            "[ledger]\nmax_level = 63\n",
            "[miner]\nbase_difficulty = 0\n",
            "[miner]\ndepth_multiplier = 0\n",
            "[miner]\nthreads = 0\n",
            "[consensus]\nsync_interval = \"bogus\"\n",
        ] {
            let err = Config::from_toml_str(text).unwrap_err();
            assert!(matches!(err, ChainError::ConfigError(_)), "{}", text);
        }
    }
}
