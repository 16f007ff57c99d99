//! Deterministic in-memory radio.
//!
//! Replays a fixed set of devices in round-robin order at a fixed interval.
//! Used for development without hardware and throughout the tests.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use super::{
    BeaconAdvert, BeaconRadio, BluetoothError, BluetoothResult, Capability, ConnectFilter,
    ConnectedDevice, Sighting, BATTERY_SERVICE_UUID, DEFAULT_BEACON_SERVICE_UUID,
};

/// A device the mock radio pretends to see.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockDevice {
    /// Device identifier.
    pub id: String,
    /// Broadcast name.
    pub name: Option<String>,
    /// Signal strength reported on every sighting.
    pub rssi_dbm: i16,
    /// Advertised services.
    pub services: Vec<Uuid>,
}

impl MockDevice {
    /// A named device with no advertised services.
    #[must_use]
    pub fn new(id: &str, name: &str, rssi_dbm: i16) -> Self {
        Self {
            id: id.to_string(),
            name: Some(name.to_string()),
            rssi_dbm,
            services: Vec::new(),
        }
    }

    /// Add an advertised service.
    #[must_use]
    pub fn with_service(mut self, service: Uuid) -> Self {
        self.services.push(service);
        self
    }
}

/// Fake radio backend.
#[derive(Debug)]
pub struct MockRadio {
    capability: Capability,
    devices: Vec<MockDevice>,
    sighting_interval: Duration,
    connect_failures: AtomicU32,
    connect_attempts: AtomicU32,
    advertising: Mutex<Option<BeaconAdvert>>,
}

impl MockRadio {
    /// A native, powered radio that sees `devices`.
    #[must_use]
    pub fn new(devices: Vec<MockDevice>) -> Self {
        Self {
            capability: Capability {
                native: true,
                bluetooth_supported: true,
                adapter_powered: Some(true),
                backend: "mock".to_string(),
            },
            devices,
            sighting_interval: Duration::from_millis(250),
            connect_failures: AtomicU32::new(0),
            connect_attempts: AtomicU32::new(0),
            advertising: Mutex::new(None),
        }
    }

    /// The classroom sample: a teacher beacon, two room fixtures and a
    /// battery-service wearable for the connection demo.
    #[must_use]
    pub fn demo() -> Self {
        Self::new(vec![
            MockDevice::new("12:34:56:78:9A:01", "Teacher Beacon CS101", -45)
                .with_service(DEFAULT_BEACON_SERVICE_UUID),
            MockDevice::new("FE:DC:BA:98:76:02", "Lab Equipment #3", -62),
            MockDevice::new("A1:B2:C3:D4:E5:03", "Smart Board", -38),
            MockDevice::new("C0:FF:EE:00:00:04", "Fitness Band", -57)
                .with_service(BATTERY_SERVICE_UUID),
        ])
    }

    /// A host without any Bluetooth stack.
    #[must_use]
    pub fn unsupported() -> Self {
        Self::new(Vec::new()).with_capability(Capability {
            native: false,
            bluetooth_supported: false,
            adapter_powered: None,
            backend: "mock".to_string(),
        })
    }

    /// Override the reported capability.
    #[must_use]
    pub fn with_capability(mut self, capability: Capability) -> Self {
        self.capability = capability;
        self
    }

    /// Fail the next `failures` connection attempts with a transient error.
    #[must_use]
    pub fn with_connect_failures(self, failures: u32) -> Self {
        self.connect_failures.store(failures, Ordering::SeqCst);
        self
    }

    /// Time between successive sightings.
    #[must_use]
    pub fn with_sighting_interval(mut self, interval: Duration) -> Self {
        self.sighting_interval = interval;
        self
    }

    /// How many times `connect` has been called.
    #[must_use]
    pub fn connect_attempts(&self) -> u32 {
        self.connect_attempts.load(Ordering::SeqCst)
    }

    /// The advertisement currently broadcast, if any.
    #[must_use]
    pub fn current_advert(&self) -> Option<BeaconAdvert> {
        self.advertising
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn require_supported(&self) -> BluetoothResult<()> {
        self.capability.require_scanning()
    }
}

#[async_trait]
impl BeaconRadio for MockRadio {
    async fn probe(&self) -> Capability {
        self.capability.clone()
    }

    async fn connect(&self, filter: &ConnectFilter) -> BluetoothResult<ConnectedDevice> {
        self.require_supported()?;
        self.connect_attempts.fetch_add(1, Ordering::SeqCst);

        let failed = self
            .connect_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(BluetoothError::ConnectionFailed {
                message: "GATT server rejected the connection".to_string(),
            });
        }

        self.devices
            .iter()
            .find(|d| filter.matches(&d.services))
            .map(|d| ConnectedDevice {
                id: d.id.clone(),
                name: d.name.clone().unwrap_or_else(|| "Unknown Device".to_string()),
            })
            .ok_or(BluetoothError::NoMatchingDevice)
    }

    async fn scan(
        &self,
        window: Duration,
        cancel: CancellationToken,
        sink: mpsc::Sender<Sighting>,
    ) -> BluetoothResult<()> {
        self.require_supported()?;

        let deadline = Instant::now() + window;
        let mut ticker = tokio::time::interval(self.sighting_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut devices = self.devices.iter().cycle();

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                () = tokio::time::sleep_until(deadline) => break,
                _ = ticker.tick() => {
                    let Some(device) = devices.next() else { continue };
                    let sighting = Sighting {
                        id: device.id.clone(),
                        name: device.name.clone(),
                        rssi_dbm: device.rssi_dbm,
                    };
                    if sink.send(sighting).await.is_err() {
                        break;
                    }
                }
            }
        }

        debug!("Mock scan finished");
        Ok(())
    }

    async fn advertise(&self, advert: &BeaconAdvert) -> BluetoothResult<()> {
        if !self.capability.can_advertise() {
            return Err(BluetoothError::CapabilityUnavailable {
                reason: "advertising requires the native app".to_string(),
            });
        }
        *self
            .advertising
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(advert.clone());
        Ok(())
    }

    async fn stop_advertising(&self) -> BluetoothResult<()> {
        self.advertising
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_advertising_requires_native() {
        let browser = MockRadio::demo().with_capability(Capability {
            native: false,
            bluetooth_supported: true,
            adapter_powered: None,
            backend: "mock".into(),
        });
        let advert = BeaconAdvert {
            service_uuid: DEFAULT_BEACON_SERVICE_UUID,
            class_code: "CS-2024-001".into(),
        };

        assert!(matches!(
            browser.advertise(&advert).await,
            Err(BluetoothError::CapabilityUnavailable { .. })
        ));

        let native = MockRadio::demo();
        native.advertise(&advert).await.unwrap();
        assert_eq!(native.current_advert(), Some(advert));
        native.stop_advertising().await.unwrap();
        assert_eq!(native.current_advert(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scan_stops_when_receiver_dropped() {
        let radio = MockRadio::demo();
        let (tx, rx) = mpsc::channel(1);
        drop(rx);

        radio
            .scan(Duration::from_secs(10), CancellationToken::new(), tx)
            .await
            .unwrap();
    }
}
