//! Registry of devices sighted by the scanner.
//!
//! Entries are keyed by device id. The first sighting fixes the display name
//! and signal strength; later sightings only refresh `last_seen`, which is
//! what the time-to-live is measured against.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use utoipa::ToSchema;

use crate::clock::SharedClock;

/// Name shown for devices that do not broadcast one.
pub const UNKNOWN_DEVICE_NAME: &str = "Unknown Beacon";

/// A device seen during scanning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "id": "AA:BB:CC:DD:EE:FF",
    "name": "Teacher Beacon CS101",
    "rssi_dbm": -45,
    "first_seen_utc": "2024-09-02T09:00:01Z",
    "last_seen_utc": "2024-09-02T09:00:07Z"
}))]
pub struct Device {
    /// Device identifier (MAC address or platform id).
    #[schema(example = "AA:BB:CC:DD:EE:FF")]
    pub id: String,

    /// Display name.
    #[schema(example = "Teacher Beacon CS101")]
    pub name: String,

    /// Signal strength at first sighting, in dBm.
    #[schema(example = -45)]
    pub rssi_dbm: i16,

    /// First sighting.
    pub first_seen_utc: DateTime<Utc>,

    /// Most recent sighting.
    pub last_seen_utc: DateTime<Utc>,
}

/// Deduplicated set of sighted devices with per-entry expiry.
#[derive(Debug)]
pub struct DeviceRegistry {
    devices: HashMap<String, Device>,
    ttl: Duration,
    clock: SharedClock,
}

impl DeviceRegistry {
    /// Create an empty registry whose entries expire `ttl` after their last sighting.
    #[must_use]
    pub fn new(ttl: Duration, clock: SharedClock) -> Self {
        Self {
            devices: HashMap::new(),
            ttl,
            clock,
        }
    }

    /// Record a sighting. Returns `true` if the device was not yet known.
    pub fn record_sighting(&mut self, id: &str, name: Option<&str>, rssi_dbm: i16) -> bool {
        let now = self.clock.now();

        if let Some(existing) = self.devices.get_mut(id) {
            existing.last_seen_utc = now;
            return false;
        }

        let name = name
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .unwrap_or(UNKNOWN_DEVICE_NAME);

        debug!(device_id = %id, name = %name, rssi_dbm, "New device sighted");

        self.devices.insert(
            id.to_string(),
            Device {
                id: id.to_string(),
                name: name.to_string(),
                rssi_dbm,
                first_seen_utc: now,
                last_seen_utc: now,
            },
        );
        true
    }

    /// Drop entries not seen within the TTL. Returns how many were removed.
    pub fn expire(&mut self) -> usize {
        // A TTL reaching past the start of time never expires anything.
        let Some(cutoff) = self.clock.now().checked_sub_signed(self.ttl) else {
            return 0;
        };
        let before = self.devices.len();
        self.devices.retain(|_, d| d.last_seen_utc >= cutoff);
        let removed = before - self.devices.len();
        if removed > 0 {
            debug!(removed, "Expired stale devices");
        }
        removed
    }

    /// Forget every device.
    pub fn clear(&mut self) {
        self.devices.clear();
    }

    /// Look up a device.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Device> {
        self.devices.get(id)
    }

    /// Number of devices.
    #[must_use]
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Devices in order of first sighting.
    #[must_use]
    pub fn devices(&self) -> Vec<Device> {
        let mut devices: Vec<Device> = self.devices.values().cloned().collect();
        devices.sort_by(|a, b| {
            a.first_seen_utc
                .cmp(&b.first_seen_utc)
                .then_with(|| a.id.cmp(&b.id))
        });
        devices
    }
}
