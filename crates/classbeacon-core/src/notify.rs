//! User-facing notifications.
//!
//! Session transitions, scans and connection attempts all surface a short
//! message to whoever is watching. The [`Notifier`] fans those out over a
//! broadcast channel and keeps a bounded history for clients that poll.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use utoipa::ToSchema;

use crate::clock::{SharedClock, SystemClock};

/// Default number of notifications retained for polling clients.
pub const DEFAULT_HISTORY: usize = 50;

/// Severity of a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum NotificationLevel {
    /// An action completed.
    Success,
    /// Informational, e.g. a scan window elapsed.
    Info,
    /// An action failed and the user should know.
    Error,
}

/// A single notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "level": "success",
    "message": "Beacon started - Students can now connect",
    "created_at_utc": "2024-09-02T09:00:00Z"
}))]
pub struct Notification {
    /// Severity.
    pub level: NotificationLevel,

    /// Message shown to the user.
    #[schema(example = "Beacon started - Students can now connect")]
    pub message: String,

    /// When the notification was raised.
    pub created_at_utc: DateTime<Utc>,
}

/// Broadcasts notifications and remembers the most recent ones.
#[derive(Debug, Clone)]
pub struct Notifier {
    sender: broadcast::Sender<Notification>,
    history: Arc<Mutex<VecDeque<Notification>>>,
    capacity: usize,
    clock: SharedClock,
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY, Arc::new(SystemClock))
    }
}

impl Notifier {
    /// Create a notifier retaining up to `capacity` notifications, stamped
    /// from `clock`.
    #[must_use]
    pub fn new(capacity: usize, clock: SharedClock) -> Self {
        let capacity = capacity.max(1);
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            history: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity,
            clock,
        }
    }

    /// Subscribe to notifications raised from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.sender.subscribe()
    }

    /// Raise a success notification.
    pub fn success(&self, message: impl Into<String>) {
        self.emit(NotificationLevel::Success, message);
    }

    /// Raise an informational notification.
    pub fn info(&self, message: impl Into<String>) {
        self.emit(NotificationLevel::Info, message);
    }

    /// Raise an error notification.
    pub fn error(&self, message: impl Into<String>) {
        self.emit(NotificationLevel::Error, message);
    }

    /// Raise a notification at `level`.
    pub fn emit(&self, level: NotificationLevel, message: impl Into<String>) {
        let notification = Notification {
            level,
            message: message.into(),
            created_at_utc: self.clock.now(),
        };

        tracing::debug!(level = ?notification.level, message = %notification.message, "notification");

        {
            let mut history = self.history.lock().unwrap_or_else(PoisonError::into_inner);
            if history.len() == self.capacity {
                history.pop_front();
            }
            history.push_back(notification.clone());
        }

        // No subscribers is fine; history still has it.
        let _ = self.sender.send(notification);
    }

    /// Most recent notifications, oldest first.
    #[must_use]
    pub fn recent(&self) -> Vec<Notification> {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::TimeZone;

    #[test]
    fn test_history_is_bounded() {
        let notifier = Notifier::new(2, Arc::new(SystemClock));
        notifier.info("one");
        notifier.info("two");
        notifier.success("three");

        let recent = notifier.recent();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].message, "two");
        assert_eq!(recent[1].message, "three");
        assert_eq!(recent[1].level, NotificationLevel::Success);
    }

    #[tokio::test]
    async fn test_subscribers_receive_notifications() {
        let notifier = Notifier::default();
        let mut rx = notifier.subscribe();

        notifier.error("Failed to connect to Bluetooth device");

        let received = rx.recv().await.unwrap();
        assert_eq!(received.level, NotificationLevel::Error);
        assert!(received.message.contains("Failed to connect"));
    }

    #[test]
    fn test_timestamps_come_from_clock() {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 9, 2, 9, 0, 0).unwrap());
        let notifier = Notifier::new(DEFAULT_HISTORY, Arc::new(clock.clone()));

        notifier.success("Beacon started - Students can now connect");
        clock.advance(chrono::Duration::seconds(90));
        notifier.info("Scan started");

        let recent = notifier.recent();
        assert_eq!(recent[0].created_at_utc, Utc.with_ymd_and_hms(2024, 9, 2, 9, 0, 0).unwrap());
        assert_eq!(recent[1].created_at_utc, Utc.with_ymd_and_hms(2024, 9, 2, 9, 1, 30).unwrap());
    }
}
