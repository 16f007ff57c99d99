//! Application configuration management.
//!
//! Configuration is layered: built-in defaults, then an optional TOML file,
//! then `CLASSBEACON__SECTION__KEY` environment overrides. The result is
//! validated before use.
//!
//! ```toml
//! [session]
//! class_code_prefix = "CS-2024"
//!
//! [attendance]
//! late_after_secs = 600
//! timezone = "America/New_York"
//!
//! [[attendance.roster]]
//! id = "7"
//! name = "John Doe"
//! roll_number = "CS2021007"
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::TimeDelta;
use chrono_tz::Tz;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::bluetooth::{RetryPolicy, DEFAULT_BEACON_SERVICE_UUID};
use crate::ledger::RosterEntry;

/// Environment variable prefix for overrides.
pub const ENV_PREFIX: &str = "CLASSBEACON";

/// Longest accepted device TTL or late threshold (one day).
pub const MAX_PERIOD_SECS: u64 = 86_400;

static CLASS_CODE_PREFIX_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Z0-9]+(?:-[A-Z0-9]+)*$").expect("class code pattern is valid"));

/// Errors raised while loading, saving or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The layered sources could not be read or deserialized.
    #[error("Failed to load configuration: {0}")]
    LoadError(#[from] config::ConfigError),

    /// The configuration file could not be written.
    #[error("Failed to write {path}: {source}")]
    WriteError {
        /// Target path.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The configuration could not be serialized to TOML.
    #[error("Failed to serialize configuration: {0}")]
    SerializeError(#[from] toml::ser::Error),

    /// A single field is invalid.
    #[error("Invalid value for '{field}': {message}")]
    ValidationError {
        /// Dotted field path.
        field: String,
        /// What is wrong.
        message: String,
    },

    /// Several fields are invalid.
    #[error("{} configuration errors", .0.len())]
    MultipleValidationErrors(Vec<ConfigError>),
}

/// Result alias for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// HTTP server settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Socket address to listen on.
    pub bind_address: String,
    /// Use production logging (JSON files + compact stdout).
    pub production: bool,
    /// Directory for production log files. A platform default when unset.
    pub log_dir: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:3000".to_string(),
            production: false,
            log_dir: None,
        }
    }
}

/// Session settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Prefix of generated class codes.
    pub class_code_prefix: String,
    /// Length of one elapsed-time tick.
    pub tick_interval_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            class_code_prefix: "CS-2024".to_string(),
            tick_interval_ms: 1000,
        }
    }
}

/// Scanning settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Length of one scan.
    pub window_secs: u64,
    /// Registry entries expire this long after their last sighting.
    pub device_ttl_secs: u64,
    /// Service UUID carried by classroom beacons.
    pub service_uuid: String,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            window_secs: 10,
            device_ttl_secs: 60,
            service_uuid: DEFAULT_BEACON_SERVICE_UUID.to_string(),
        }
    }
}

/// Attendance rules and roster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AttendanceConfig {
    /// Confirmations later than this after the ledger opens count as late.
    pub late_after_secs: u64,
    /// Delay between check-in and automatic confirmation.
    pub confirmation_delay_ms: u64,
    /// Weakest signal accepted at check-in.
    pub proximity_threshold_dbm: i16,
    /// IANA timezone for displayed times.
    pub timezone: String,
    /// Class roster. The built-in sample class is used when absent.
    pub roster: Option<Vec<RosterEntry>>,
}

impl Default for AttendanceConfig {
    fn default() -> Self {
        Self {
            late_after_secs: 600,
            confirmation_delay_ms: 2000,
            proximity_threshold_dbm: -70,
            timezone: "UTC".to_string(),
            roster: None,
        }
    }
}

/// Retry settings for demo connections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay after the first failure.
    pub initial_backoff_ms: u64,
    /// Upper bound for any single delay.
    pub max_backoff_ms: u64,
    /// Deadline for a single attempt.
    pub attempt_timeout_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 250,
            max_backoff_ms: 2000,
            attempt_timeout_ms: 10_000,
        }
    }
}

/// Main application configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// HTTP server.
    pub server: ServerConfig,
    /// Session lifecycle.
    pub session: SessionConfig,
    /// Scanning.
    pub scan: ScanConfig,
    /// Attendance rules.
    pub attendance: AttendanceConfig,
    /// Connection retries.
    pub retry: RetryConfig,
}

impl Config {
    /// Load defaults, the file at `path` (if given and present) and
    /// environment overrides, then validate.
    ///
    /// # Errors
    ///
    /// Returns an error if a source cannot be parsed or validation fails.
    pub fn load(path: Option<&Path>) -> ConfigResult<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(
                config::File::from(path)
                    .format(config::FileFormat::Toml)
                    .required(false),
            );
        }

        let loaded: Self = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        loaded.validate()?;
        Ok(loaded)
    }

    /// Save as TOML, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let write_error = |source| ConfigError::WriteError {
            path: path.display().to_string(),
            source,
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(write_error)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(write_error)?;
        Ok(())
    }

    /// Check every field, collecting all problems.
    ///
    /// # Errors
    ///
    /// A single [`ConfigError::ValidationError`] or
    /// [`ConfigError::MultipleValidationErrors`].
    pub fn validate(&self) -> ConfigResult<()> {
        let mut errors = Vec::new();
        let mut invalid = |field: &str, message: String| {
            errors.push(ConfigError::ValidationError {
                field: field.to_string(),
                message,
            });
        };

        if self.server.bind_address.parse::<std::net::SocketAddr>().is_err() {
            invalid(
                "server.bind_address",
                format!("'{}' is not a socket address", self.server.bind_address),
            );
        }
        if !is_valid_class_code_prefix(&self.session.class_code_prefix) {
            invalid(
                "session.class_code_prefix",
                "must be upper-case letters and digits separated by '-'".to_string(),
            );
        }
        if self.session.tick_interval_ms == 0 {
            invalid("session.tick_interval_ms", "must be greater than 0".to_string());
        }
        if self.scan.window_secs == 0 {
            invalid("scan.window_secs", "must be greater than 0".to_string());
        }
        if !(1..=MAX_PERIOD_SECS).contains(&self.scan.device_ttl_secs) {
            invalid(
                "scan.device_ttl_secs",
                format!("must be between 1 and {MAX_PERIOD_SECS} seconds"),
            );
        }
        if self.attendance.late_after_secs > MAX_PERIOD_SECS {
            invalid(
                "attendance.late_after_secs",
                format!("cannot exceed {MAX_PERIOD_SECS} seconds"),
            );
        }
        if Uuid::parse_str(&self.scan.service_uuid).is_err() {
            invalid(
                "scan.service_uuid",
                format!("'{}' is not a UUID", self.scan.service_uuid),
            );
        }
        if !(-100..=0).contains(&self.attendance.proximity_threshold_dbm) {
            invalid(
                "attendance.proximity_threshold_dbm",
                "must be between -100 and 0 dBm".to_string(),
            );
        }
        if !is_valid_timezone(&self.attendance.timezone) {
            invalid(
                "attendance.timezone",
                format!("unknown timezone '{}'", self.attendance.timezone),
            );
        }
        if let Some(roster) = &self.attendance.roster {
            let mut seen = HashSet::new();
            for entry in roster {
                if entry.id.trim().is_empty() {
                    invalid("attendance.roster", "student id cannot be empty".to_string());
                } else if !seen.insert(entry.id.as_str()) {
                    invalid(
                        "attendance.roster",
                        format!("duplicate student id '{}'", entry.id),
                    );
                }
            }
        }
        if self.retry.max_attempts == 0 {
            invalid("retry.max_attempts", "must be at least 1".to_string());
        }
        if self.retry.initial_backoff_ms > self.retry.max_backoff_ms {
            invalid(
                "retry.initial_backoff_ms",
                "cannot exceed retry.max_backoff_ms".to_string(),
            );
        }

        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(ConfigError::MultipleValidationErrors(errors)),
        }
    }

    /// Display timezone. Falls back to UTC if unparsable.
    #[must_use]
    pub fn timezone(&self) -> Tz {
        self.attendance.timezone.parse().unwrap_or(chrono_tz::UTC)
    }

    /// Beacon service UUID. Falls back to the default if unparsable.
    #[must_use]
    pub fn service_uuid(&self) -> Uuid {
        Uuid::parse_str(&self.scan.service_uuid).unwrap_or(DEFAULT_BEACON_SERVICE_UUID)
    }

    /// Scan window.
    #[must_use]
    pub const fn scan_window(&self) -> Duration {
        Duration::from_secs(self.scan.window_secs)
    }

    /// Registry TTL. Saturates at [`TimeDelta::MAX`] for unvalidated values.
    #[must_use]
    pub fn device_ttl(&self) -> TimeDelta {
        seconds_delta(self.scan.device_ttl_secs)
    }

    /// Late threshold. Saturates at [`TimeDelta::MAX`] for unvalidated values.
    #[must_use]
    pub fn late_after(&self) -> TimeDelta {
        seconds_delta(self.attendance.late_after_secs)
    }

    /// Delay before an automatic confirmation.
    #[must_use]
    pub const fn confirmation_delay(&self) -> Duration {
        Duration::from_millis(self.attendance.confirmation_delay_ms)
    }

    /// Length of one session tick.
    #[must_use]
    pub const fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.session.tick_interval_ms)
    }

    /// Retry policy for demo connections.
    #[must_use]
    pub const fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.max_attempts,
            initial_backoff: Duration::from_millis(self.retry.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.retry.max_backoff_ms),
            attempt_timeout: Duration::from_millis(self.retry.attempt_timeout_ms),
        }
    }
}

fn seconds_delta(secs: u64) -> TimeDelta {
    i64::try_from(secs)
        .ok()
        .and_then(TimeDelta::try_seconds)
        .unwrap_or(TimeDelta::MAX)
}

/// Default configuration file location.
///
/// On Linux: `/etc/classbeacon/config.toml`.
/// Elsewhere: the platform config directory.
#[must_use]
pub fn default_config_path() -> PathBuf {
    #[cfg(target_os = "linux")]
    {
        PathBuf::from("/etc/classbeacon/config.toml")
    }
    #[cfg(not(target_os = "linux"))]
    {
        directories::ProjectDirs::from("", "", "classbeacon").map_or_else(
            || PathBuf::from("config.toml"),
            |dirs| dirs.config_dir().join("config.toml"),
        )
    }
}

/// Whether `prefix` is upper-case alphanumerics separated by `-`.
#[must_use]
pub fn is_valid_class_code_prefix(prefix: &str) -> bool {
    CLASS_CODE_PREFIX_RE.is_match(prefix)
}

/// Whether `tz` is a known IANA timezone name.
#[must_use]
pub fn is_valid_timezone(tz: &str) -> bool {
    tz.parse::<Tz>().is_ok()
}
