use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::core::extractor::StatusPolicy;
use crate::core::store::LogFormat;

pub const DEFAULT_OUTPUT: &str = "rfid_pcscreader_records.json";
pub const DEFAULT_COOLDOWN_SECS: f64 = 1.5;
pub const DEFAULT_POLL_TIMEOUT_SECS: f64 = 1.0;
pub const DEFAULT_FAILURE_BACKOFF_SECS: f64 = 0.2;
pub const DEFAULT_DUPLICATE_PAUSE_SECS: f64 = 0.2;
pub const DEFAULT_READER_ERROR_BACKOFF_SECS: f64 = 0.5;
pub const DEFAULT_NO_READER_BACKOFF_SECS: f64 = 1.0;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("{field} must be a finite, non-negative number of seconds (got {value})")]
    InvalidDuration { field: &'static str, value: f64 },

    #[error("poll_timeout_secs must be greater than zero")]
    ZeroPollTimeout,
}

/// Settings for the acquisition loop and its record log.
///
/// Durations are given in seconds so config files stay readable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AcquisitionConfig {
    pub output: PathBuf,
    pub format: LogFormat,
    pub status_policy: StatusPolicy,
    pub cooldown_secs: f64,
    pub poll_timeout_secs: f64,
    pub failure_backoff_secs: f64,
    pub duplicate_pause_secs: f64,
    pub reader_error_backoff_secs: f64,
    pub no_reader_backoff_secs: f64,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            output: PathBuf::from(DEFAULT_OUTPUT),
            format: LogFormat::default(),
            status_policy: StatusPolicy::default(),
            cooldown_secs: DEFAULT_COOLDOWN_SECS,
            poll_timeout_secs: DEFAULT_POLL_TIMEOUT_SECS,
            failure_backoff_secs: DEFAULT_FAILURE_BACKOFF_SECS,
            duplicate_pause_secs: DEFAULT_DUPLICATE_PAUSE_SECS,
            reader_error_backoff_secs: DEFAULT_READER_ERROR_BACKOFF_SECS,
            no_reader_backoff_secs: DEFAULT_NO_READER_BACKOFF_SECS,
        }
    }
}

impl AcquisitionConfig {
    /// Load a JSON config file; missing keys take their defaults
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let config: Self = serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let fields = [
            ("cooldown_secs", self.cooldown_secs),
            ("poll_timeout_secs", self.poll_timeout_secs),
            ("failure_backoff_secs", self.failure_backoff_secs),
            ("duplicate_pause_secs", self.duplicate_pause_secs),
            ("reader_error_backoff_secs", self.reader_error_backoff_secs),
            ("no_reader_backoff_secs", self.no_reader_backoff_secs),
        ];

        for (field, value) in fields {
            seconds(field, value)?;
        }

        if self.poll_timeout_secs == 0.0 {
            return Err(ConfigError::ZeroPollTimeout);
        }

        Ok(())
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs_f64(self.cooldown_secs)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.poll_timeout_secs)
    }

    pub fn failure_backoff(&self) -> Duration {
        Duration::from_secs_f64(self.failure_backoff_secs)
    }

    pub fn duplicate_pause(&self) -> Duration {
        Duration::from_secs_f64(self.duplicate_pause_secs)
    }

    pub fn reader_error_backoff(&self) -> Duration {
        Duration::from_secs_f64(self.reader_error_backoff_secs)
    }

    pub fn no_reader_backoff(&self) -> Duration {
        Duration::from_secs_f64(self.no_reader_backoff_secs)
    }

    /// Same timings with every pause set to zero; handy for driving the loop in tests.
    pub fn without_pauses(mut self) -> Self {
        self.failure_backoff_secs = 0.0;
        self.duplicate_pause_secs = 0.0;
        self.reader_error_backoff_secs = 0.0;
        self.no_reader_backoff_secs = 0.0;
        self
    }
}

fn seconds(field: &'static str, value: f64) -> Result<Duration, ConfigError> {
    Duration::try_from_secs_f64(value).map_err(|_| ConfigError::InvalidDuration { field, value })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn config_file(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults() {
        let config = AcquisitionConfig::default();
        assert_eq!(config.output, PathBuf::from("rfid_pcscreader_records.json"));
        assert_eq!(config.cooldown(), Duration::from_millis(1500));
        assert_eq!(config.poll_timeout(), Duration::from_secs(1));
        assert_eq!(config.failure_backoff(), Duration::from_millis(200));
        assert_eq!(config.format, LogFormat::Array);
        assert_eq!(config.status_policy, StatusPolicy::Lenient);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let file = config_file(r#"{ "cooldown_secs": 3.0, "format": "lines" }"#);
        let config = AcquisitionConfig::from_file(file.path()).unwrap();

        assert_eq!(config.cooldown(), Duration::from_secs(3));
        assert_eq!(config.format, LogFormat::Lines);
        assert_eq!(config.poll_timeout(), Duration::from_secs(1));
        assert_eq!(config.output, PathBuf::from(DEFAULT_OUTPUT));
    }

    #[test]
    fn test_full_file() {
        let file = config_file(
            r#"{
                "output": "/var/lib/badges/log.json",
                "format": "array",
                "status_policy": "strict",
                "cooldown_secs": 2.5,
                "poll_timeout_secs": 0.5,
                "failure_backoff_secs": 0.1,
                "duplicate_pause_secs": 0.3,
                "reader_error_backoff_secs": 1.0,
                "no_reader_backoff_secs": 5.0
            }"#,
        );
        let config = AcquisitionConfig::from_file(file.path()).unwrap();

        assert_eq!(config.output, PathBuf::from("/var/lib/badges/log.json"));
        assert_eq!(config.status_policy, StatusPolicy::Strict);
        assert_eq!(config.poll_timeout(), Duration::from_millis(500));
        assert_eq!(config.no_reader_backoff(), Duration::from_secs(5));
    }

    #[test]
    fn test_unknown_key_rejected() {
        let file = config_file(r#"{ "cooldown": 3.0 }"#);
        assert!(matches!(
            AcquisitionConfig::from_file(file.path()),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_missing_file() {
        let err = AcquisitionConfig::from_file(Path::new("/nonexistent/pcsc-uid-logger.json"))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
        assert!(err.to_string().contains("Failed to read config file"));
    }

    #[test]
    fn test_invalid_durations() {
        let config = AcquisitionConfig {
            cooldown_secs: -1.0,
            ..AcquisitionConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidDuration {
                field: "cooldown_secs",
                ..
            })
        ));

        let config = AcquisitionConfig {
            failure_backoff_secs: f64::NAN,
            ..AcquisitionConfig::default()
        };
        assert!(config.validate().is_err());

        let config = AcquisitionConfig {
            poll_timeout_secs: 0.0,
            ..AcquisitionConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::ZeroPollTimeout)));
    }

    #[test]
    fn test_without_pauses() {
        let config = AcquisitionConfig::default().without_pauses();
        assert_eq!(config.duplicate_pause(), Duration::ZERO);
        assert_eq!(config.failure_backoff(), Duration::ZERO);
        assert_eq!(config.reader_error_backoff(), Duration::ZERO);
        assert_eq!(config.no_reader_backoff(), Duration::ZERO);
        assert_eq!(config.cooldown(), Duration::from_millis(1500));
    }
}
