//! Mapper configuration.
//!
//! Loaded from `~/.mapper/config.toml`. Every key is optional; a missing
//! file means all defaults.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::integrity::ChecksumPolicy;
use crate::mapper::Settings;

pub const DEFAULT_SERVER: &str = "https://api.immersal.com";

/// Mapper configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct Config {
    /// Base URL of the mapping service.
    pub server: String,

    /// Number of image banks to cycle through.
    pub bank_count: u32,

    pub status_interval_secs: u64,
    pub job_list_interval_secs: u64,

    /// Radius in meters for location-filtered job listings.
    pub job_list_radius: f64,

    pub request_timeout_secs: u64,

    /// What a map checksum mismatch does.
    pub checksum: ChecksumPolicy,

    /// A fixed device position, for hosts without a location source.
    pub location: Option<LocationConfig>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct LocationConfig {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub altitude: f64,

    /// Reported accuracy in meters.
    #[serde(default = "default_accuracy")]
    pub accuracy: f64,
}

fn default_accuracy() -> f64 {
    10.0
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: DEFAULT_SERVER.to_string(),
            bank_count: 1,
            status_interval_secs: 3,
            job_list_interval_secs: 3,
            job_list_radius: 200.0,
            request_timeout_secs: 30,
            checksum: ChecksumPolicy::default(),
            location: None,
        }
    }
}

impl Config {
    /// Load config from `~/.mapper/config.toml`, or defaults if absent.
    pub fn load() -> Result<Self, String> {
        let path = Self::path().ok_or("could not determine home directory")?;
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Result<Self, String> {
        if !path.exists() {
            log::debug!("no config at {}; using defaults", path.display());
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .map_err(|e| format!("failed to read {}: {e}", path.display()))?;

        let config: Self = toml::from_str(&contents)
            .map_err(|e| format!("invalid config at {}: {e}", path.display()))?;

        config
            .validate()
            .map_err(|e| format!("invalid config at {}: {e}", path.display()))
    }

    fn validate(self) -> Result<Self, String> {
        if self.server.is_empty() {
            return Err("server is empty".to_string());
        }
        if self.bank_count == 0 {
            return Err("bank-count must be at least 1".to_string());
        }
        if self.status_interval_secs == 0 || self.job_list_interval_secs == 0 {
            return Err("poll intervals must be at least 1 second".to_string());
        }
        if self.job_list_radius <= 0.0 {
            return Err("job-list-radius must be positive".to_string());
        }
        Ok(self)
    }

    /// The config file path: `~/.mapper/config.toml`.
    pub fn path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".mapper").join("config.toml"))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn settings(&self) -> Settings {
        Settings {
            max_banks: self.bank_count,
            status_interval: Duration::from_secs(self.status_interval_secs),
            job_list_interval: Duration::from_secs(self.job_list_interval_secs),
            job_list_radius: self.job_list_radius,
            poll_status: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::fs;

    use tempfile::TempDir;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let config = Config::load_from(&dir.path().join("config.toml")).unwrap();

        assert_eq!(config, Config::default());
        assert_eq!(config.checksum, ChecksumPolicy::Enforce);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            "bank-count = 4\nchecksum = \"warn\"\n\n[location]\nlatitude = 60.17\nlongitude = 24.94\n",
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();

        assert_eq!(config.bank_count, 4);
        assert_eq!(config.checksum, ChecksumPolicy::Warn);
        assert_eq!(config.server, DEFAULT_SERVER);
        let location = config.location.unwrap();
        assert_eq!(location.altitude, 0.0);
        assert_eq!(location.accuracy, 10.0);
    }

    #[test]
    fn zero_banks_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "bank-count = 0\n").unwrap();

        let err = Config::load_from(&path).unwrap_err();
        assert!(err.contains("bank-count"));
    }

    #[test]
    fn unknown_checksum_policy_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "checksum = \"ignore\"\n").unwrap();

        assert!(Config::load_from(&path).is_err());
    }

    #[test]
    fn settings_carry_intervals() {
        let config = Config {
            status_interval_secs: 5,
            ..Config::default()
        };
        let settings = config.settings();

        assert_eq!(settings.status_interval, Duration::from_secs(5));
        assert_eq!(settings.max_banks, 1);
        assert!(settings.poll_status);
    }
}
