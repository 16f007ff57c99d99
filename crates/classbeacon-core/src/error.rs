//! Unified error types for the classbeacon core library.
//!
//! Each module has its own error type ([`SessionError`], [`LedgerError`],
//! [`BluetoothError`], [`ConfigError`]). [`BeaconError`] folds them into one
//! enum that carries an HTTP status and a machine-readable code, so the server
//! can surface any failure the same way.
//!
//! # Example
//!
//! ```rust
//! use classbeacon_core::error::{BeaconError, Result};
//!
//! fn require_student(found: bool, id: &str) -> Result<()> {
//!     if !found {
//!         return Err(BeaconError::UnknownStudent(id.to_string()));
//!     }
//!     Ok(())
//! }
//!
//! assert!(require_student(false, "42").is_err());
//! ```

use thiserror::Error;

use crate::bluetooth::BluetoothError;
use crate::config::ConfigError;
use crate::ledger::{AttendanceStatus, LedgerError};
use crate::session::SessionError;

/// The unified error type for all classbeacon operations.
#[derive(Debug, Error)]
pub enum BeaconError {
    // =========================================================================
    // SESSION ERRORS
    // =========================================================================
    /// A session is already running.
    #[error("A session is already active. Stop it before starting a new one.")]
    AlreadyActive,

    /// No session is running.
    #[error("No session is active. Start a session first.")]
    NotActive,

    // =========================================================================
    // LEDGER ERRORS
    // =========================================================================
    /// The student id is not on the roster.
    #[error("Unknown student: '{0}'")]
    UnknownStudent(String),

    /// The status change is not allowed by the attendance state machine.
    #[error("Student '{student_id}' cannot move from {from} to {to}")]
    InvalidTransition {
        /// Student id.
        student_id: String,
        /// Current status.
        from: AttendanceStatus,
        /// Requested status.
        to: AttendanceStatus,
    },

    /// The reported signal is too weak.
    #[error("Signal {rssi_dbm} dBm is too weak to check in (threshold {threshold_dbm} dBm). Move closer to the beacon.")]
    OutOfRange {
        /// Reported signal strength.
        rssi_dbm: i16,
        /// Configured threshold.
        threshold_dbm: i16,
    },

    // =========================================================================
    // BLUETOOTH ERRORS
    // =========================================================================
    /// No Bluetooth support for the requested operation.
    #[error("Bluetooth is not available: {0}. Install the native app or use a supported browser.")]
    CapabilityUnavailable(String),

    /// The adapter is powered off.
    #[error("Bluetooth adapter is powered off. Run 'bluetoothctl power on' to enable.")]
    AdapterPoweredOff,

    /// The hardware handshake failed.
    #[error("Failed to connect to Bluetooth device: {0}")]
    ConnectionFailed(String),

    /// No device matched the connection filter.
    #[error("No Bluetooth device found offering the requested service. Ensure it is powered on and nearby.")]
    NoMatchingDevice,

    /// Scanning failed.
    #[error("Bluetooth scan failed: {0}")]
    ScanFailed(String),

    /// Advertising failed.
    #[error("Failed to start beacon broadcast: {0}")]
    AdvertiseFailed(String),

    // =========================================================================
    // CONFIGURATION ERRORS
    // =========================================================================
    /// Configuration could not be loaded or is invalid.
    #[error("Configuration error: {0}")]
    Config(String),
}

/// A specialized [`Result`] type for classbeacon operations.
pub type Result<T> = std::result::Result<T, BeaconError>;

impl BeaconError {
    /// Returns `true` for invalid session transitions.
    #[inline]
    #[must_use]
    pub const fn is_session_error(&self) -> bool {
        matches!(self, Self::AlreadyActive | Self::NotActive)
    }

    /// Returns `true` for attendance ledger errors.
    #[inline]
    #[must_use]
    pub const fn is_ledger_error(&self) -> bool {
        matches!(
            self,
            Self::UnknownStudent(_) | Self::InvalidTransition { .. } | Self::OutOfRange { .. }
        )
    }

    /// Returns `true` for Bluetooth errors.
    #[inline]
    #[must_use]
    pub const fn is_bluetooth_error(&self) -> bool {
        matches!(
            self,
            Self::CapabilityUnavailable(_)
                | Self::AdapterPoweredOff
                | Self::ConnectionFailed(_)
                | Self::NoMatchingDevice
                | Self::ScanFailed(_)
                | Self::AdvertiseFailed(_)
        )
    }

    /// Returns `true` if retrying may succeed without user intervention.
    #[inline]
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::ConnectionFailed(_) | Self::ScanFailed(_))
    }

    /// Returns an HTTP-appropriate status code for this error.
    #[must_use]
    pub const fn http_status_code(&self) -> u16 {
        match self {
            // 400 Bad Request - rejected input
            Self::OutOfRange { .. } => 400,

            // 404 Not Found
            Self::UnknownStudent(_) | Self::NoMatchingDevice => 404,

            // 409 Conflict - state does not allow the operation
            Self::AlreadyActive | Self::NotActive | Self::InvalidTransition { .. } => 409,

            // 500 Internal Server Error
            Self::Config(_) => 500,

            // 503 Service Unavailable - Bluetooth hardware issues
            Self::CapabilityUnavailable(_)
            | Self::AdapterPoweredOff
            | Self::ConnectionFailed(_)
            | Self::ScanFailed(_)
            | Self::AdvertiseFailed(_) => 503,
        }
    }

    /// Returns a machine-readable error code for API responses.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::AlreadyActive => "session_already_active",
            Self::NotActive => "session_not_active",
            Self::UnknownStudent(_) => "unknown_student",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::OutOfRange { .. } => "out_of_range",
            Self::CapabilityUnavailable(_) => "capability_unavailable",
            Self::AdapterPoweredOff => "adapter_powered_off",
            Self::ConnectionFailed(_) => "connection_failed",
            Self::NoMatchingDevice => "no_matching_device",
            Self::ScanFailed(_) => "scan_failed",
            Self::AdvertiseFailed(_) => "advertise_failed",
            Self::Config(_) => "config_error",
        }
    }
}

// =============================================================================
// CONVERSIONS FROM MODULE-SPECIFIC ERRORS
// =============================================================================

impl From<SessionError> for BeaconError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::AlreadyActive => Self::AlreadyActive,
            SessionError::NotActive => Self::NotActive,
        }
    }
}

impl From<LedgerError> for BeaconError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::UnknownStudent(id) => Self::UnknownStudent(id),
            LedgerError::InvalidTransition {
                student_id,
                from,
                to,
            } => Self::InvalidTransition {
                student_id,
                from,
                to,
            },
            LedgerError::OutOfRange {
                rssi_dbm,
                threshold_dbm,
            } => Self::OutOfRange {
                rssi_dbm,
                threshold_dbm,
            },
            LedgerError::DuplicateStudent(id) => {
                Self::Config(format!("duplicate student id on roster: '{id}'"))
            }
        }
    }
}

impl From<BluetoothError> for BeaconError {
    fn from(err: BluetoothError) -> Self {
        match err {
            BluetoothError::CapabilityUnavailable { reason } => Self::CapabilityUnavailable(reason),
            BluetoothError::AdapterPoweredOff => Self::AdapterPoweredOff,
            BluetoothError::ConnectionFailed { message } => Self::ConnectionFailed(message),
            BluetoothError::NoMatchingDevice => Self::NoMatchingDevice,
            BluetoothError::ScanFailed { message } => Self::ScanFailed(message),
            BluetoothError::AdvertiseFailed { message } => Self::AdvertiseFailed(message),
        }
    }
}

impl From<ConfigError> for BeaconError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::MultipleValidationErrors(errors) => {
                let messages: Vec<String> = errors.iter().map(ToString::to_string).collect();
                Self::Config(messages.join("; "))
            }
            other => Self::Config(other.to_string()),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
