//! # classbeacon-core
//!
//! Core logic for a classroom attendance system built on Bluetooth Low
//! Energy proximity.
//!
//! A teacher's device broadcasts a beacon carrying a class code. Student
//! devices scan for it, and a student whose signal is strong enough moves
//! through `absent -> pending -> present | late` in an attendance ledger
//! that can be exported as CSV.
//!
//! ## Modules
//!
//! - [`session`] - session lifecycle, elapsed timer and cancellation scope
//! - [`registry`] - devices discovered during scans, keyed by id
//! - [`ledger`] - per-student attendance state machine and statistics
//! - [`export`] - CSV rendering of the ledger
//! - [`bluetooth`] - radio abstraction, connection retry and scan driver
//! - [`notify`] - user-facing notification fan-out
//! - [`clock`] - injectable wall clock
//! - [`config`] - layered configuration loading and validation
//! - [`error`] - unified error type
//! - [`types`] - shared API schemas

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![warn(missing_docs)]

pub mod bluetooth;
pub mod clock;
pub mod config;
pub mod error;
pub mod export;
pub mod ledger;
pub mod notify;
pub mod registry;
pub mod session;
pub mod types;

// Re-export primary types for convenience
#[cfg(feature = "bluetooth")]
pub use bluetooth::BluezRadio;
pub use bluetooth::{
    connect_with_retry, run_scan, BeaconAdvert, BeaconRadio, BluetoothError, BluetoothResult,
    Capability, ConnectFilter, ConnectedDevice, MockDevice, MockRadio, RetryPolicy, ScanSummary,
    Sighting,
};
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use config::{
    default_config_path, AttendanceConfig, Config, ConfigError, ConfigResult, RetryConfig,
    ScanConfig, ServerConfig, SessionConfig,
};
pub use error::{BeaconError, Result};
pub use export::{export_csv, export_filename, CSV_CONTENT_TYPE};
pub use ledger::{
    check_proximity, demo_roster, AttendanceLedger, AttendanceStats, AttendanceStatus,
    LedgerError, RateBand, RosterEntry, StudentRecord,
};
pub use notify::{Notification, NotificationLevel, Notifier};
pub use registry::{Device, DeviceRegistry};
pub use session::{
    spawn_ticker, ClassCodeSequence, SessionController, SessionError, SessionRole,
    SessionSnapshot,
};
pub use types::HealthResponse;
