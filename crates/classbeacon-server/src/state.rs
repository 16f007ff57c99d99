//! Application state shared across handlers.

use std::sync::Arc;
use std::time::Instant;

use classbeacon_core::notify::DEFAULT_HISTORY;
use classbeacon_core::{
    demo_roster, AttendanceLedger, BeaconError, BeaconRadio, ClassCodeSequence, Config,
    DeviceRegistry, Notifier, SessionController, SharedClock, StudentRecord, SystemClock,
};
use tokio::sync::RwLock;
use tracing::info;

use crate::api::error::ApiError;

/// Handle passed to every handler.
pub type SharedState = AppState;

/// Shared application state.
///
/// Each concern sits behind its own lock so a long scan never blocks a
/// session snapshot or a ledger read.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: Config,
    clock: SharedClock,
    notifier: Notifier,
    session: Arc<RwLock<SessionController>>,
    registry: Arc<RwLock<DeviceRegistry>>,
    ledger: Arc<RwLock<AttendanceLedger>>,
    radio: Arc<dyn BeaconRadio>,
    started_at: Instant,
}

impl AppState {
    /// Create state on the system clock.
    ///
    /// # Errors
    ///
    /// Returns an error if the configured roster is invalid.
    pub fn new(config: Config, radio: Arc<dyn BeaconRadio>) -> Result<Self, BeaconError> {
        Self::with_clock(config, radio, Arc::new(SystemClock))
    }

    /// Create state with an explicit clock.
    ///
    /// The ledger is seeded from the configured roster, or from the demo
    /// class dated today in the configured timezone.
    ///
    /// # Errors
    ///
    /// Returns an error if the configured roster has duplicate ids.
    pub fn with_clock(
        config: Config,
        radio: Arc<dyn BeaconRadio>,
        clock: SharedClock,
    ) -> Result<Self, BeaconError> {
        let notifier = Notifier::new(DEFAULT_HISTORY, Arc::clone(&clock));

        let records: Vec<StudentRecord> = match &config.attendance.roster {
            Some(roster) => roster.iter().cloned().map(StudentRecord::from).collect(),
            None => {
                let tz = config.timezone();
                let today = clock.now().with_timezone(&tz).date_naive();
                demo_roster(today, tz)
            }
        };
        info!(students = records.len(), "Seeding attendance ledger");

        let ledger = AttendanceLedger::new(records, config.late_after(), Arc::clone(&clock))?;
        let registry = DeviceRegistry::new(config.device_ttl(), Arc::clone(&clock));
        let session = SessionController::new(
            ClassCodeSequence::new(config.session.class_code_prefix.clone()),
            notifier.clone(),
            Arc::clone(&clock),
        );

        Ok(Self {
            inner: Arc::new(AppStateInner {
                config,
                clock,
                notifier,
                session: Arc::new(RwLock::new(session)),
                registry: Arc::new(RwLock::new(registry)),
                ledger: Arc::new(RwLock::new(ledger)),
                radio,
                started_at: Instant::now(),
            }),
        })
    }

    /// Loaded configuration.
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Wall clock used by every controller.
    pub fn clock(&self) -> &SharedClock {
        &self.inner.clock
    }

    /// Notification fan-out.
    pub fn notifier(&self) -> &Notifier {
        &self.inner.notifier
    }

    /// Session controller.
    pub fn session(&self) -> &Arc<RwLock<SessionController>> {
        &self.inner.session
    }

    /// Devices seen by scans.
    pub fn registry(&self) -> &Arc<RwLock<DeviceRegistry>> {
        &self.inner.registry
    }

    /// Attendance ledger.
    pub fn ledger(&self) -> &Arc<RwLock<AttendanceLedger>> {
        &self.inner.ledger
    }

    /// Radio backend.
    pub fn radio(&self) -> &Arc<dyn BeaconRadio> {
        &self.inner.radio
    }

    /// Seconds since the state was created.
    pub fn uptime_secs(&self) -> u64 {
        self.inner.started_at.elapsed().as_secs()
    }

    /// Convert a failure the user should see into an API error, echoing it
    /// as an error notification.
    pub fn report(&self, err: impl Into<BeaconError>) -> ApiError {
        let err = err.into();
        self.inner.notifier.error(err.to_string());
        ApiError::from(err)
    }
}
