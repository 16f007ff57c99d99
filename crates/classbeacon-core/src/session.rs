//! Classroom session lifecycle.
//!
//! A session is either broadcasting (teacher) or scanning (student). While it
//! is active, elapsed time advances once per tick and every scan or delayed
//! confirmation started under it hangs off the session's cancellation token,
//! so stopping the session halts all of them.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::clock::SharedClock;
use crate::notify::Notifier;

/// Errors for invalid session transitions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// `start` was called while a session is running.
    #[error("A session is already active")]
    AlreadyActive,

    /// `stop` (or a session-scoped action) was attempted with no session running.
    #[error("No session is active")]
    NotActive,
}

/// Which side of the beacon this session runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SessionRole {
    /// Broadcasts the class beacon.
    #[default]
    Teacher,
    /// Scans for the teacher's beacon.
    Student,
}

impl SessionRole {
    fn started_message(self) -> &'static str {
        match self {
            Self::Teacher => "Beacon started - Students can now connect",
            Self::Student => "Scanning started - Looking for beacon",
        }
    }

    fn stopped_message(self) -> &'static str {
        match self {
            Self::Teacher => "Beacon stopped",
            Self::Student => "Scanning stopped",
        }
    }
}

/// Hands out class codes of the form `<prefix>-<NNN>`.
#[derive(Debug, Clone)]
pub struct ClassCodeSequence {
    prefix: String,
    next: u32,
}

impl ClassCodeSequence {
    /// Start a sequence at `<prefix>-001`.
    #[must_use]
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            next: 1,
        }
    }

    /// Take the next code.
    pub fn next_code(&mut self) -> String {
        let code = format!("{}-{:03}", self.prefix, self.next);
        self.next = self.next.saturating_add(1);
        code
    }
}

/// Point-in-time view of the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "active": true,
    "session_id": "7d7c9d0e-5f1a-4c1e-9d0b-2f5d1c8e4a11",
    "role": "teacher",
    "class_code": "CS-2024-001",
    "elapsed_secs": 932,
    "elapsed_display": "15:32",
    "connected_devices": 17,
    "started_at_utc": "2024-09-02T09:00:00Z"
}))]
pub struct SessionSnapshot {
    /// Whether a session is running.
    pub active: bool,

    /// Identifier of the running session.
    pub session_id: Option<Uuid>,

    /// Role of the running session.
    pub role: Option<SessionRole>,

    /// Class code carried by the beacon for this session.
    #[schema(example = "CS-2024-001")]
    pub class_code: Option<String>,

    /// Seconds elapsed since start.
    pub elapsed_secs: u64,

    /// Elapsed time formatted as `m:ss`.
    #[schema(example = "15:32")]
    pub elapsed_display: String,

    /// Devices currently connected to or detected by the session.
    pub connected_devices: usize,

    /// When the session started.
    pub started_at_utc: Option<DateTime<Utc>>,
}

#[derive(Debug)]
struct ActiveSession {
    id: Uuid,
    role: SessionRole,
    class_code: String,
    elapsed_secs: u64,
    connected_devices: usize,
    started_at: DateTime<Utc>,
    token: CancellationToken,
}

/// Owns the session state machine.
#[derive(Debug)]
pub struct SessionController {
    active: Option<ActiveSession>,
    codes: ClassCodeSequence,
    notifier: Notifier,
    clock: SharedClock,
}

impl SessionController {
    /// Create an inactive controller.
    #[must_use]
    pub fn new(codes: ClassCodeSequence, notifier: Notifier, clock: SharedClock) -> Self {
        Self {
            active: None,
            codes,
            notifier,
            clock,
        }
    }

    /// Whether a session is running.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// Start a session.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::AlreadyActive`] if a session is running.
    pub fn start(&mut self, role: SessionRole) -> Result<SessionSnapshot, SessionError> {
        if self.active.is_some() {
            return Err(SessionError::AlreadyActive);
        }

        let session = ActiveSession {
            id: Uuid::new_v4(),
            role,
            class_code: self.codes.next_code(),
            elapsed_secs: 0,
            connected_devices: 0,
            started_at: self.clock.now(),
            token: CancellationToken::new(),
        };

        info!(
            session_id = %session.id,
            role = ?role,
            class_code = %session.class_code,
            "Session started"
        );

        self.active = Some(session);
        self.notifier.success(role.started_message());
        Ok(self.snapshot())
    }

    /// Stop the running session, cancelling its timer, scans and pending
    /// confirmations. Returns the final snapshot before reset.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NotActive`] if no session is running.
    pub fn stop(&mut self) -> Result<SessionSnapshot, SessionError> {
        let final_snapshot = self.snapshot();
        let session = self.active.take().ok_or(SessionError::NotActive)?;

        session.token.cancel();

        info!(
            session_id = %session.id,
            elapsed_secs = session.elapsed_secs,
            "Session stopped"
        );

        self.notifier.success(session.role.stopped_message());
        Ok(final_snapshot)
    }

    /// Advance elapsed time by one second if `session_id` is still the running
    /// session. Returns the new elapsed value.
    pub fn tick(&mut self, session_id: Uuid) -> Option<u64> {
        let session = self.active.as_mut().filter(|s| s.id == session_id)?;
        session.elapsed_secs += 1;
        Some(session.elapsed_secs)
    }

    /// Update the connected-device counter if `session_id` is still the
    /// running session. Returns whether the counter was written.
    pub fn set_connected_devices(&mut self, session_id: Uuid, count: usize) -> bool {
        match self.active.as_mut().filter(|s| s.id == session_id) {
            Some(session) => {
                session.connected_devices = count;
                true
            }
            None => false,
        }
    }

    /// A token that is cancelled when the running session stops.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NotActive`] if no session is running.
    pub fn child_token(&self) -> Result<CancellationToken, SessionError> {
        self.scope().map(|(_, token)| token)
    }

    /// Id of the running session with a token cancelled when it stops.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NotActive`] if no session is running.
    pub fn scope(&self) -> Result<(Uuid, CancellationToken), SessionError> {
        self.active
            .as_ref()
            .map(|s| (s.id, s.token.child_token()))
            .ok_or(SessionError::NotActive)
    }

    /// Current state.
    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        match &self.active {
            Some(s) => SessionSnapshot {
                active: true,
                session_id: Some(s.id),
                role: Some(s.role),
                class_code: Some(s.class_code.clone()),
                elapsed_secs: s.elapsed_secs,
                elapsed_display: format_elapsed(s.elapsed_secs),
                connected_devices: s.connected_devices,
                started_at_utc: Some(s.started_at),
            },
            None => SessionSnapshot {
                active: false,
                session_id: None,
                role: None,
                class_code: None,
                elapsed_secs: 0,
                elapsed_display: format_elapsed(0),
                connected_devices: 0,
                started_at_utc: None,
            },
        }
    }
}

/// Format seconds as `m:ss`.
#[must_use]
pub fn format_elapsed(secs: u64) -> String {
    format!("{}:{:02}", secs / 60, secs % 60)
}

/// Drive `tick` once per `period` until `token` is cancelled.
///
/// The first tick lands one full period after spawning.
pub fn spawn_ticker(
    session: Arc<RwLock<SessionController>>,
    session_id: Uuid,
    period: Duration,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                () = token.cancelled() => break,
                _ = interval.tick() => {
                    if session.write().await.tick(session_id).is_none() {
                        break;
                    }
                }
            }
        }

        debug!(%session_id, "Session ticker exited");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::TimeZone;

    fn controller() -> SessionController {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 9, 2, 9, 0, 0).unwrap());
        SessionController::new(
            ClassCodeSequence::new("CS-2024"),
            Notifier::default(),
            Arc::new(clock),
        )
    }

    #[test]
    fn test_start_then_start_fails() {
        let mut session = controller();
        session.start(SessionRole::Teacher).unwrap();
        assert_eq!(
            session.start(SessionRole::Teacher),
            Err(SessionError::AlreadyActive)
        );
    }

    #[test]
    fn test_stop_when_inactive_fails() {
        let mut session = controller();
        assert_eq!(session.stop(), Err(SessionError::NotActive));
    }

    #[test]
    fn test_active_flag_follows_last_call() {
        let mut session = controller();
        let calls = [true, false, true, true, false, false, true];
        let mut expected = false;

        for start in calls {
            let result = if start {
                session.start(SessionRole::Student).map(|_| ())
            } else {
                session.stop().map(|_| ())
            };
            if result.is_ok() {
                expected = start;
            }
            assert_eq!(session.is_active(), expected);
            assert_eq!(session.snapshot().active, start);
        }
    }

    #[test]
    fn test_elapsed_resets_on_stop() {
        let mut session = controller();
        let id = session.start(SessionRole::Teacher).unwrap().session_id.unwrap();
        for _ in 0..75 {
            session.tick(id);
        }
        assert!(session.set_connected_devices(id, 16));

        let last = session.stop().unwrap();
        assert_eq!(last.elapsed_secs, 75);
        assert_eq!(last.elapsed_display, "1:15");
        assert_eq!(last.connected_devices, 16);

        let now = session.snapshot();
        assert_eq!(now.elapsed_secs, 0);
        assert_eq!(now.connected_devices, 0);

        session.start(SessionRole::Teacher).unwrap();
        assert_eq!(session.snapshot().elapsed_secs, 0);
    }

    #[test]
    fn test_stale_tick_is_ignored() {
        let mut session = controller();
        let old = session.start(SessionRole::Teacher).unwrap().session_id.unwrap();
        session.stop().unwrap();
        session.start(SessionRole::Teacher).unwrap();

        assert_eq!(session.tick(old), None);
        assert_eq!(session.snapshot().elapsed_secs, 0);
    }

    #[test]
    fn test_counter_from_previous_session_is_dropped() {
        let mut session = controller();
        session.start(SessionRole::Teacher).unwrap();
        let (old, token) = session.scope().unwrap();
        session.stop().unwrap();
        assert!(token.is_cancelled());

        session.start(SessionRole::Teacher).unwrap();
        let (current, _) = session.scope().unwrap();
        assert_ne!(old, current);

        assert!(!session.set_connected_devices(old, 4));
        assert_eq!(session.snapshot().connected_devices, 0);
        assert!(session.set_connected_devices(current, 2));
        assert_eq!(session.snapshot().connected_devices, 2);
    }

    #[test]
    fn test_class_code_is_fixed_per_session() {
        let mut session = controller();
        let first = session.start(SessionRole::Teacher).unwrap();
        assert_eq!(first.class_code.as_deref(), Some("CS-2024-001"));
        assert_eq!(session.snapshot().class_code, first.class_code);

        session.stop().unwrap();
        let second = session.start(SessionRole::Teacher).unwrap();
        assert_eq!(second.class_code.as_deref(), Some("CS-2024-002"));
    }

    #[test]
    fn test_stop_cancels_child_tokens() {
        let mut session = controller();
        assert_eq!(session.child_token().unwrap_err(), SessionError::NotActive);

        session.start(SessionRole::Student).unwrap();
        let token = session.child_token().unwrap();
        assert!(!token.is_cancelled());

        session.stop().unwrap();
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_transitions_raise_notifications() {
        let notifier = Notifier::default();
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 9, 2, 9, 0, 0).unwrap());
        let mut session =
            SessionController::new(ClassCodeSequence::new("CS-2024"), notifier.clone(), Arc::new(clock));

        session.start(SessionRole::Teacher).unwrap();
        session.stop().unwrap();

        let messages: Vec<String> = notifier.recent().into_iter().map(|n| n.message).collect();
        assert_eq!(
            messages,
            vec!["Beacon started - Students can now connect", "Beacon stopped"]
        );
    }

    #[test]
    fn test_format_elapsed() {
        assert_eq!(format_elapsed(0), "0:00");
        assert_eq!(format_elapsed(59), "0:59");
        assert_eq!(format_elapsed(932), "15:32");
        assert_eq!(format_elapsed(3600), "60:00");
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticker_advances_and_stops_with_session() {
        let shared = Arc::new(RwLock::new(controller()));
        let (id, token) = {
            let mut guard = shared.write().await;
            let snapshot = guard.start(SessionRole::Teacher).unwrap();
            (snapshot.session_id.unwrap(), guard.child_token().unwrap())
        };

        let handle = spawn_ticker(shared.clone(), id, Duration::from_secs(1), token);

        tokio::time::sleep(Duration::from_millis(3500)).await;
        assert_eq!(shared.read().await.snapshot().elapsed_secs, 3);

        shared.write().await.stop().unwrap();
        handle.await.unwrap();

        assert_eq!(shared.read().await.snapshot().elapsed_secs, 0);
    }
}
