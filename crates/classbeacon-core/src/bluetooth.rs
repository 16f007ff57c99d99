//! Bluetooth Low Energy radio boundary.
//!
//! This module provides:
//! - The [`BeaconRadio`] trait every backend implements (capability probe,
//!   demo connection, scanning, beacon advertising)
//! - [`connect_with_retry`] for bounded-backoff connection attempts
//! - [`run_scan`] which drives a scan into the [`DeviceRegistry`]
//!
//! Backends: [`MockRadio`] (deterministic fake, always available) and
//! `BluezRadio` (BlueZ via `bluer`, behind the `bluetooth` feature).

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::registry::DeviceRegistry;

#[cfg(feature = "bluetooth")]
mod bluez;
mod mock;

#[cfg(feature = "bluetooth")]
pub use bluez::BluezRadio;
pub use mock::{MockDevice, MockRadio};

/// GATT battery service (0x180F).
pub const BATTERY_SERVICE_UUID: Uuid = Uuid::from_u128(0x0000_180f_0000_1000_8000_0080_5f9b_34fb);

/// GATT device information service (0x180A).
pub const DEVICE_INFORMATION_UUID: Uuid =
    Uuid::from_u128(0x0000_180a_0000_1000_8000_0080_5f9b_34fb);

/// Service UUID carried by classroom beacons unless configured otherwise.
pub const DEFAULT_BEACON_SERVICE_UUID: Uuid =
    Uuid::from_u128(0x1234_5678_1234_5678_1234_5678_9abc_def0);

/// Errors raised by radio backends.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BluetoothError {
    /// The platform has no usable Bluetooth stack for this operation.
    #[error("Bluetooth is not available: {reason}")]
    CapabilityUnavailable {
        /// Why the capability is missing.
        reason: String,
    },

    /// The adapter exists but is powered off.
    #[error("Bluetooth adapter is powered off")]
    AdapterPoweredOff,

    /// The hardware handshake was rejected or timed out.
    #[error("Connection failed: {message}")]
    ConnectionFailed {
        /// Backend detail.
        message: String,
    },

    /// No device matched the connection filter.
    #[error("No device found matching the requested services")]
    NoMatchingDevice,

    /// Discovery could not be started or aborted.
    #[error("Bluetooth scan failed: {message}")]
    ScanFailed {
        /// Backend detail.
        message: String,
    },

    /// The beacon advertisement could not be registered.
    #[error("Failed to start advertising: {message}")]
    AdvertiseFailed {
        /// Backend detail.
        message: String,
    },
}

impl BluetoothError {
    /// Whether retrying the same operation may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::ConnectionFailed { .. })
    }
}

/// Result alias for radio operations.
pub type BluetoothResult<T> = Result<T, BluetoothError>;

/// What the current platform can do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "native": true,
    "bluetooth_supported": true,
    "adapter_powered": true,
    "backend": "bluez"
}))]
pub struct Capability {
    /// Running as a native app (advertising possible), not a browser-like host.
    pub native: bool,

    /// A Bluetooth stack is reachable at all.
    pub bluetooth_supported: bool,

    /// Adapter power state, when the backend can tell.
    pub adapter_powered: Option<bool>,

    /// Backend name.
    #[schema(example = "bluez")]
    pub backend: String,
}

impl Capability {
    /// Whether scanning and connecting are possible.
    #[must_use]
    pub fn can_scan(&self) -> bool {
        self.bluetooth_supported && self.adapter_powered != Some(false)
    }

    /// Whether beacon advertising is possible.
    #[must_use]
    pub fn can_advertise(&self) -> bool {
        self.native && self.can_scan()
    }

    /// Fail unless scanning is possible.
    ///
    /// # Errors
    ///
    /// [`BluetoothError::CapabilityUnavailable`] without a stack,
    /// [`BluetoothError::AdapterPoweredOff`] with a powered-off adapter.
    pub fn require_scanning(&self) -> BluetoothResult<()> {
        if !self.bluetooth_supported {
            return Err(BluetoothError::CapabilityUnavailable {
                reason: format!("backend '{}' has no Bluetooth support", self.backend),
            });
        }
        if self.adapter_powered == Some(false) {
            return Err(BluetoothError::AdapterPoweredOff);
        }
        Ok(())
    }
}

/// Which devices a demo connection may pick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ConnectFilter {
    /// The device must advertise at least one of these services.
    pub services: Vec<Uuid>,

    /// Services we would like access to once connected.
    pub optional_services: Vec<Uuid>,
}

impl ConnectFilter {
    /// Any device exposing the battery service.
    #[must_use]
    pub fn battery_service() -> Self {
        Self {
            services: vec![BATTERY_SERVICE_UUID],
            optional_services: vec![DEVICE_INFORMATION_UUID],
        }
    }

    /// Whether a device advertising `advertised` matches.
    #[must_use]
    pub fn matches(&self, advertised: &[Uuid]) -> bool {
        self.services.is_empty() || self.services.iter().any(|s| advertised.contains(s))
    }
}

/// A device we connected to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ConnectedDevice {
    /// Device identifier.
    #[schema(example = "AA:BB:CC:DD:EE:FF")]
    pub id: String,

    /// Device name.
    #[schema(example = "Fitness Band")]
    pub name: String,
}

/// One advertisement received during a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sighting {
    /// Device identifier.
    pub id: String,
    /// Broadcast name, if any.
    pub name: Option<String>,
    /// Received signal strength in dBm.
    pub rssi_dbm: i16,
}

/// What a teacher beacon broadcasts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BeaconAdvert {
    /// Service UUID students filter on.
    pub service_uuid: Uuid,
    /// Class code of the running session.
    pub class_code: String,
}

/// A BLE radio backend.
#[async_trait]
pub trait BeaconRadio: Send + Sync + fmt::Debug {
    /// Report what this platform supports.
    async fn probe(&self) -> Capability;

    /// Connect to the first device matching `filter`.
    async fn connect(&self, filter: &ConnectFilter) -> BluetoothResult<ConnectedDevice>;

    /// Push sightings into `sink` until `window` elapses or `cancel` fires.
    async fn scan(
        &self,
        window: Duration,
        cancel: CancellationToken,
        sink: mpsc::Sender<Sighting>,
    ) -> BluetoothResult<()>;

    /// Start broadcasting a beacon.
    async fn advertise(&self, advert: &BeaconAdvert) -> BluetoothResult<()>;

    /// Stop broadcasting. A no-op when nothing is advertised.
    async fn stop_advertising(&self) -> BluetoothResult<()>;
}

/// Bounded exponential backoff for connection attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay after the first failure.
    pub initial_backoff: Duration,
    /// Upper bound for any single delay.
    pub max_backoff: Duration,
    /// Deadline for a single attempt.
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(2),
            attempt_timeout: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after failed attempt number `attempt` (1-based).
    #[must_use]
    pub fn backoff_after(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// Connect to a device matching `filter`, retrying transient failures.
///
/// # Errors
///
/// Capability errors immediately; [`BluetoothError::ConnectionFailed`] once
/// `policy.max_attempts` attempts have failed; any non-transient error as-is.
pub async fn connect_with_retry(
    radio: &dyn BeaconRadio,
    filter: &ConnectFilter,
    policy: &RetryPolicy,
) -> BluetoothResult<ConnectedDevice> {
    radio.probe().await.require_scanning()?;

    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        let result = tokio::time::timeout(policy.attempt_timeout, radio.connect(filter))
            .await
            .unwrap_or_else(|_| {
                Err(BluetoothError::ConnectionFailed {
                    message: format!(
                        "timed out after {} ms",
                        policy.attempt_timeout.as_millis()
                    ),
                })
            });

        match result {
            Ok(device) => {
                info!(device_id = %device.id, name = %device.name, attempt, "Connected to device");
                return Ok(device);
            }
            Err(err) if err.is_transient() && attempt < max_attempts => {
                let delay = policy.backoff_after(attempt);
                warn!(
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis(),
                    error = %err,
                    "Connection attempt failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Outcome of a scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ScanSummary {
    /// Advertisements received.
    pub sightings: usize,
    /// Devices that were not in the registry before.
    pub new_devices: usize,
    /// Whether the scan ended because its session stopped.
    pub cancelled: bool,
}

/// Run one scan window, recording every sighting into `registry`.
///
/// The scan ends when `window` elapses or `cancel` fires, whichever is first,
/// even if the backend ignores the token.
///
/// # Errors
///
/// Capability errors before scanning, or the backend's scan error.
pub async fn run_scan(
    radio: &dyn BeaconRadio,
    registry: &RwLock<DeviceRegistry>,
    window: Duration,
    cancel: CancellationToken,
) -> BluetoothResult<ScanSummary> {
    radio.probe().await.require_scanning()?;

    let (tx, mut rx) = mpsc::channel::<Sighting>(64);

    let scan = {
        let cancel = cancel.clone();
        async move {
            tokio::select! {
                result = radio.scan(window, cancel.clone(), tx) => result,
                () = cancel.cancelled() => Ok(()),
                () = tokio::time::sleep(window) => Ok(()),
            }
        }
    };

    let record = async {
        let mut sightings = 0;
        let mut new_devices = 0;
        while let Some(sighting) = rx.recv().await {
            sightings += 1;
            let inserted = registry.write().await.record_sighting(
                &sighting.id,
                sighting.name.as_deref(),
                sighting.rssi_dbm,
            );
            if inserted {
                new_devices += 1;
            }
        }
        (sightings, new_devices)
    };

    let (result, (sightings, new_devices)) = tokio::join!(scan, record);
    result?;

    let summary = ScanSummary {
        sightings,
        new_devices,
        cancelled: cancel.is_cancelled(),
    };
    info!(?summary, "Scan finished");
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use std::sync::Arc;

    fn registry() -> RwLock<DeviceRegistry> {
        RwLock::new(DeviceRegistry::new(
            chrono::Duration::seconds(60),
            Arc::new(SystemClock),
        ))
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(150),
            attempt_timeout: Duration::from_secs(1),
        }
    }

    #[test]
    fn test_backoff_is_bounded() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff_after(1), Duration::from_millis(250));
        assert_eq!(policy.backoff_after(2), Duration::from_millis(500));
        assert_eq!(policy.backoff_after(3), Duration::from_secs(1));
        assert_eq!(policy.backoff_after(4), Duration::from_secs(2));
        assert_eq!(policy.backoff_after(40), Duration::from_secs(2));
    }

    #[test]
    fn test_only_connection_failures_are_transient() {
        assert!(BluetoothError::ConnectionFailed {
            message: "timeout".into()
        }
        .is_transient());
        assert!(!BluetoothError::NoMatchingDevice.is_transient());
        assert!(!BluetoothError::AdapterPoweredOff.is_transient());
    }

    #[test]
    fn test_capability_checks() {
        let off = Capability {
            native: true,
            bluetooth_supported: true,
            adapter_powered: Some(false),
            backend: "test".into(),
        };
        assert_eq!(off.require_scanning(), Err(BluetoothError::AdapterPoweredOff));
        assert!(!off.can_advertise());

        let browser = Capability {
            native: false,
            bluetooth_supported: true,
            adapter_powered: None,
            backend: "test".into(),
        };
        assert!(browser.can_scan());
        assert!(!browser.can_advertise());
    }

    #[test]
    fn test_filter_matches() {
        let filter = ConnectFilter::battery_service();
        assert!(filter.matches(&[DEVICE_INFORMATION_UUID, BATTERY_SERVICE_UUID]));
        assert!(!filter.matches(&[DEFAULT_BEACON_SERVICE_UUID]));
        assert!(ConnectFilter {
            services: vec![],
            optional_services: vec![]
        }
        .matches(&[]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_succeeds_after_transient_failures() {
        let radio = MockRadio::demo().with_connect_failures(2);
        let device = connect_with_retry(&radio, &ConnectFilter::battery_service(), &fast_policy())
            .await
            .unwrap();

        assert_eq!(device.name, "Fitness Band");
        assert_eq!(radio.connect_attempts(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_gives_up_after_max_attempts() {
        let radio = MockRadio::demo().with_connect_failures(5);
        let err = connect_with_retry(&radio, &ConnectFilter::battery_service(), &fast_policy())
            .await
            .unwrap_err();

        assert!(matches!(err, BluetoothError::ConnectionFailed { .. }));
        assert_eq!(radio.connect_attempts(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_matching_device_is_not_retried() {
        let radio = MockRadio::new(vec![MockDevice::new("dev-1", "Smart Board", -38)]);
        let err = connect_with_retry(&radio, &ConnectFilter::battery_service(), &fast_policy())
            .await
            .unwrap_err();

        assert_eq!(err, BluetoothError::NoMatchingDevice);
        assert_eq!(radio.connect_attempts(), 1);
    }

    #[tokio::test]
    async fn test_connect_requires_capability() {
        let radio = MockRadio::unsupported();
        let err = connect_with_retry(&radio, &ConnectFilter::battery_service(), &fast_policy())
            .await
            .unwrap_err();
        assert!(matches!(err, BluetoothError::CapabilityUnavailable { .. }));
        assert_eq!(radio.connect_attempts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scan_populates_registry_without_duplicates() {
        let radio = MockRadio::demo().with_sighting_interval(Duration::from_millis(500));
        let registry = registry();

        let summary = run_scan(
            &radio,
            &registry,
            Duration::from_secs(10),
            CancellationToken::new(),
        )
        .await
        .unwrap();

        assert!(summary.sightings > 4);
        assert_eq!(summary.new_devices, 4);
        assert!(!summary.cancelled);
        assert_eq!(registry.read().await.len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_halts_in_flight_scan() {
        let radio = Arc::new(MockRadio::demo().with_sighting_interval(Duration::from_secs(1)));
        let registry = Arc::new(registry());
        let token = CancellationToken::new();

        let task = {
            let radio = radio.clone();
            let registry = registry.clone();
            let token = token.clone();
            tokio::spawn(async move {
                run_scan(radio.as_ref(), &registry, Duration::from_secs(10), token).await
            })
        };

        tokio::time::sleep(Duration::from_millis(1500)).await;
        let started = tokio::time::Instant::now();
        token.cancel();

        let summary = task.await.unwrap().unwrap();
        assert!(summary.cancelled);
        assert!(summary.sightings < 4);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_scan_requires_capability() {
        let radio = MockRadio::unsupported();
        let result = run_scan(
            &radio,
            &registry(),
            Duration::from_secs(1),
            CancellationToken::new(),
        )
        .await;
        assert!(matches!(
            result,
            Err(BluetoothError::CapabilityUnavailable { .. })
        ));
    }
}
