//! Configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::CoordError;

const LOCAL_CONFIG_FILE: &str = ".portcoord.yml";

/// Top-level portcoord configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[serde(rename = "log-level")]
    pub log_level: Option<String>,

    /// Exchange timing
    pub coordinator: CoordinatorConfig,

    /// Line parameters used when a channel is opened
    pub serial: SerialSettings,
}

impl Config {
    /// Validate configuration before use
    ///
    /// Call this early in startup to fail fast with clear error messages.
    pub fn validate(&self) -> Result<()> {
        self.coordinator.validate()?;
        self.serial.validate()?;
        Ok(())
    }

    /// Load configuration with fallback chain
    ///
    /// An explicit path must load. Otherwise the first usable file from
    /// [`search_paths`](Self::search_paths) wins, falling back to built-in
    /// defaults. Unusable files in the search path are skipped with a warning.
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            let config =
                Self::load_from_file(path).with_context(|| format!("Failed to load config from {}", path.display()))?;
            info!(source = "explicit", path = %path.display(), "Using portcoord config");
            return Ok(config);
        }

        for (source, path) in Self::search_paths() {
            if !path.exists() {
                debug!(source, path = %path.display(), "Config::load: not present");
                continue;
            }
            match Self::load_from_file(&path) {
                Ok(config) => {
                    info!(source, path = %path.display(), "Using portcoord config");
                    return Ok(config);
                }
                Err(e) => warn!(source, path = %path.display(), error = %e, "Skipping unusable config file"),
            }
        }

        info!(source = "defaults", "No config file found, using built-in timings");
        Ok(Self::default())
    }

    /// Candidate config files in priority order, tagged with their source
    ///
    /// Project-local `.portcoord.yml` first, then
    /// `<config_dir>/portcoord/portcoord.yml`.
    pub fn search_paths() -> Vec<(&'static str, PathBuf)> {
        let mut paths = vec![("project", PathBuf::from(LOCAL_CONFIG_FILE))];
        if let Some(config_dir) = dirs::config_dir() {
            paths.push(("user", config_dir.join("portcoord").join("portcoord.yml")));
        }
        paths
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).context("Failed to read config file")?;
        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;
        config.validate()?;

        debug!(
            path = %path.display(),
            retransmit_interval_ms = config.coordinator.retransmit_interval_ms,
            baud_rate = config.serial.baud_rate,
            "Config::load_from_file: parsed"
        );
        Ok(config)
    }
}

/// Timing for discovery and request exchanges
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Delay between retransmissions of an unanswered payload
    #[serde(rename = "retransmit-interval-ms")]
    pub retransmit_interval_ms: u64,

    /// Overall bound on a discovery exchange
    #[serde(rename = "discovery-timeout-ms")]
    pub discovery_timeout_ms: u64,

    /// Timeout used when a request asks for a negative timeout
    #[serde(rename = "default-request-timeout-ms")]
    pub default_request_timeout_ms: u64,

    /// Ceiling applied to request timeouts
    #[serde(rename = "max-request-timeout-ms")]
    pub max_request_timeout_ms: u64,

    /// Timeout handed to the transport when opening a channel
    #[serde(rename = "open-timeout-secs")]
    pub open_timeout_secs: u64,

    /// How long an exchange waits for its retransmission task to stop
    #[serde(rename = "shutdown-grace-ms")]
    pub shutdown_grace_ms: u64,

    /// Bound on the background exchange started by `send_with`
    #[serde(rename = "callback-timeout-ms")]
    pub callback_timeout_ms: u64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        debug!("CoordinatorConfig::default: called");
        Self {
            retransmit_interval_ms: 1500,
            discovery_timeout_ms: 30_000,
            default_request_timeout_ms: 1000,
            max_request_timeout_ms: 60_000,
            open_timeout_secs: 3,
            shutdown_grace_ms: 250,
            callback_timeout_ms: 60_000,
        }
    }
}

impl CoordinatorConfig {
    pub fn retransmit_interval(&self) -> Duration {
        Duration::from_millis(self.retransmit_interval_ms)
    }

    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_millis(self.discovery_timeout_ms)
    }

    pub fn open_timeout(&self) -> Duration {
        Duration::from_secs(self.open_timeout_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    pub fn callback_timeout(&self) -> Duration {
        Duration::from_millis(self.callback_timeout_ms.min(self.max_request_timeout_ms))
    }

    /// Clamp a caller-supplied request timeout into the supported range
    ///
    /// Negative values fall back to the default timeout; values above the
    /// ceiling are cut down to it. Zero is kept and means "don't wait".
    pub fn clamp_request_timeout(&self, timeout_ms: i64) -> Duration {
        let ms = if timeout_ms < 0 {
            self.default_request_timeout_ms
        } else {
            (timeout_ms as u64).min(self.max_request_timeout_ms)
        };
        debug!(%timeout_ms, clamped_ms = %ms, "CoordinatorConfig::clamp_request_timeout: called");
        Duration::from_millis(ms)
    }

    /// Check that the timings describe a usable exchange
    ///
    /// A zero retransmission interval is rejected: nothing could ever be sent.
    pub fn validate(&self) -> Result<(), CoordError> {
        if self.retransmit_interval_ms == 0 {
            return Err(CoordError::config("retransmit-interval-ms must be greater than zero"));
        }
        if self.discovery_timeout_ms == 0 {
            return Err(CoordError::config("discovery-timeout-ms must be greater than zero"));
        }
        if self.default_request_timeout_ms > self.max_request_timeout_ms {
            return Err(CoordError::config(format!(
                "default-request-timeout-ms ({}) exceeds max-request-timeout-ms ({})",
                self.default_request_timeout_ms, self.max_request_timeout_ms
            )));
        }
        Ok(())
    }
}

/// Parity checking mode for a serial line
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    #[default]
    None,
    Odd,
    Even,
    Mark,
    Space,
}

/// Serial line parameters, 9600 8N1 unless configured otherwise
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialSettings {
    #[serde(rename = "baud-rate")]
    pub baud_rate: u32,

    #[serde(rename = "data-bits")]
    pub data_bits: u8,

    #[serde(rename = "stop-bits")]
    pub stop_bits: u8,

    pub parity: Parity,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            baud_rate: 9600,
            data_bits: 8,
            stop_bits: 1,
            parity: Parity::None,
        }
    }
}

impl SerialSettings {
    fn validate(&self) -> Result<()> {
        if self.baud_rate == 0 {
            return Err(eyre::eyre!("baud-rate must be greater than zero"));
        }
        if !(5..=8).contains(&self.data_bits) {
            return Err(eyre::eyre!("data-bits must be between 5 and 8, got {}", self.data_bits));
        }
        if !matches!(self.stop_bits, 1 | 2) {
            return Err(eyre::eyre!("stop-bits must be 1 or 2, got {}", self.stop_bits));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serial_test::serial;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert!(config.log_level.is_none());
        assert_eq!(config.coordinator.retransmit_interval(), Duration::from_millis(1500));
        assert_eq!(config.coordinator.discovery_timeout(), Duration::from_secs(30));
        assert_eq!(config.coordinator.open_timeout(), Duration::from_secs(3));
        assert_eq!(config.serial.baud_rate, 9600);
        assert_eq!(config.serial.parity, Parity::None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_clamp_request_timeout() {
        let config = CoordinatorConfig::default();

        assert_eq!(config.clamp_request_timeout(-5), Duration::from_millis(1000));
        assert_eq!(config.clamp_request_timeout(999_999), Duration::from_millis(60_000));
        assert_eq!(config.clamp_request_timeout(3000), Duration::from_millis(3000));
        assert_eq!(config.clamp_request_timeout(0), Duration::ZERO);
    }

    proptest! {
        #[test]
        fn prop_clamped_timeout_stays_in_range(ms in any::<i64>()) {
            let config = CoordinatorConfig::default();
            let clamped = config.clamp_request_timeout(ms);
            prop_assert!(clamped <= Duration::from_millis(config.max_request_timeout_ms));
            if ms >= 0 && ms <= config.max_request_timeout_ms as i64 {
                prop_assert_eq!(clamped, Duration::from_millis(ms as u64));
            }
        }
    }

    #[test]
    fn test_deserialize_config() {
        let yaml = r#"
log-level: debug

coordinator:
  retransmit-interval-ms: 500
  discovery-timeout-ms: 10000
  open-timeout-secs: 5

serial:
  baud-rate: 115200
  data-bits: 7
  stop-bits: 2
  parity: even
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.log_level.as_deref(), Some("debug"));
        assert_eq!(config.coordinator.retransmit_interval_ms, 500);
        assert_eq!(config.coordinator.discovery_timeout_ms, 10_000);
        assert_eq!(config.coordinator.open_timeout_secs, 5);
        // Unspecified fields keep their defaults
        assert_eq!(config.coordinator.max_request_timeout_ms, 60_000);
        assert_eq!(config.serial.baud_rate, 115_200);
        assert_eq!(config.serial.data_bits, 7);
        assert_eq!(config.serial.stop_bits, 2);
        assert_eq!(config.serial.parity, Parity::Even);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.coordinator.retransmit_interval_ms = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.serial.data_bits = 9;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.coordinator.default_request_timeout_ms = 120_000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_retransmit_interval_is_configuration_error() {
        let config = CoordinatorConfig {
            retransmit_interval_ms: 0,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("retransmit-interval-ms"));
    }

    #[test]
    fn test_search_paths_prefer_project_file() {
        let paths = Config::search_paths();
        assert_eq!(paths[0], ("project", PathBuf::from(".portcoord.yml")));
        if let Some((source, path)) = paths.get(1) {
            assert_eq!(*source, "user");
            assert!(path.ends_with("portcoord/portcoord.yml"));
        }
    }

    #[test]
    fn test_load_explicit_path() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("portcoord.yml");
        fs::write(&path, "coordinator:\n  retransmit-interval-ms: 250\n").unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.coordinator.retransmit_interval_ms, 250);
    }

    #[test]
    fn test_load_explicit_path_invalid() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("portcoord.yml");
        fs::write(&path, "serial:\n  stop-bits: 3\n").unwrap();

        assert!(Config::load(Some(&path)).is_err());
        assert!(Config::load(Some(&temp.path().join("missing.yml"))).is_err());
    }

    #[test]
    #[serial]
    fn test_load_project_local_config() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join(".portcoord.yml"), "log-level: warn\n").unwrap();

        let previous = std::env::current_dir().unwrap();
        std::env::set_current_dir(temp.path()).unwrap();
        let result = Config::load(None);
        std::env::set_current_dir(previous).unwrap();

        assert_eq!(result.unwrap().log_level.as_deref(), Some("warn"));
    }
}
