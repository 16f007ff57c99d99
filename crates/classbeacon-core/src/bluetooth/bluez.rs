//! BlueZ backend via `bluer` (Linux only).

use std::collections::{BTreeSet, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use bluer::adv::{Advertisement, AdvertisementHandle, Type as AdvertisementType};
use bluer::{Adapter, AdapterEvent, DiscoveryFilter, DiscoveryTransport, Session};
use futures::{pin_mut, StreamExt};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use super::{
    BeaconAdvert, BeaconRadio, BluetoothError, BluetoothResult, Capability, ConnectFilter,
    ConnectedDevice, Sighting,
};

/// Radio backed by the system's default BlueZ adapter.
pub struct BluezRadio {
    // Keeps the D-Bus connection alive for the adapter.
    _session: Session,
    adapter: Adapter,
    scan_service: Option<Uuid>,
    advertisement: Mutex<Option<AdvertisementHandle>>,
}

impl std::fmt::Debug for BluezRadio {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BluezRadio")
            .field("adapter", &self.adapter.name())
            .field("scan_service", &self.scan_service)
            .finish_non_exhaustive()
    }
}

impl BluezRadio {
    /// Open the default adapter. Scans only report devices advertising
    /// `scan_service` when it is set.
    ///
    /// # Errors
    ///
    /// [`BluetoothError::CapabilityUnavailable`] if BlueZ or an adapter is missing.
    pub async fn new(scan_service: Option<Uuid>) -> BluetoothResult<Self> {
        let session = Session::new().await.map_err(unavailable)?;
        let adapter = session.default_adapter().await.map_err(unavailable)?;
        info!(adapter = %adapter.name(), "Using Bluetooth adapter");

        Ok(Self {
            _session: session,
            adapter,
            scan_service,
            advertisement: Mutex::new(None),
        })
    }

    async fn ensure_powered(&self) -> BluetoothResult<()> {
        let powered = self.adapter.is_powered().await.map_err(unavailable)?;
        if powered {
            Ok(())
        } else {
            Err(BluetoothError::AdapterPoweredOff)
        }
    }

    async fn set_filter(&self, services: &[Uuid]) -> BluetoothResult<()> {
        let mut filter = DiscoveryFilter::default();
        filter.transport = DiscoveryTransport::Le;
        filter.uuids = services.iter().copied().collect::<HashSet<_>>();
        self.adapter
            .set_discovery_filter(filter)
            .await
            .map_err(|e| BluetoothError::ScanFailed {
                message: e.to_string(),
            })
    }
}

fn unavailable(err: bluer::Error) -> BluetoothError {
    BluetoothError::CapabilityUnavailable {
        reason: err.to_string(),
    }
}

fn connection_failed(err: bluer::Error) -> BluetoothError {
    BluetoothError::ConnectionFailed {
        message: err.to_string(),
    }
}

#[async_trait]
impl BeaconRadio for BluezRadio {
    async fn probe(&self) -> Capability {
        Capability {
            native: true,
            bluetooth_supported: true,
            adapter_powered: self.adapter.is_powered().await.ok(),
            backend: "bluez".to_string(),
        }
    }

    async fn connect(&self, filter: &ConnectFilter) -> BluetoothResult<ConnectedDevice> {
        self.ensure_powered().await?;
        self.set_filter(&filter.services).await?;

        let events = self
            .adapter
            .discover_devices()
            .await
            .map_err(connection_failed)?;
        pin_mut!(events);

        while let Some(event) = events.next().await {
            let AdapterEvent::DeviceAdded(addr) = event else {
                continue;
            };
            let device = self.adapter.device(addr).map_err(connection_failed)?;
            let services: Vec<Uuid> = device
                .uuids()
                .await
                .ok()
                .flatten()
                .map(|set| set.into_iter().collect())
                .unwrap_or_default();

            if !filter.matches(&services) {
                continue;
            }

            debug!(%addr, "Connecting to matching device");
            device.connect().await.map_err(connection_failed)?;
            let name = device
                .name()
                .await
                .ok()
                .flatten()
                .unwrap_or_else(|| "Unknown Device".to_string());

            return Ok(ConnectedDevice {
                id: addr.to_string(),
                name,
            });
        }

        Err(BluetoothError::NoMatchingDevice)
    }

    async fn scan(
        &self,
        window: Duration,
        cancel: CancellationToken,
        sink: mpsc::Sender<Sighting>,
    ) -> BluetoothResult<()> {
        self.ensure_powered().await?;
        let services: Vec<Uuid> = self.scan_service.into_iter().collect();
        self.set_filter(&services).await?;

        let events = self
            .adapter
            .discover_devices()
            .await
            .map_err(|e| BluetoothError::ScanFailed {
                message: e.to_string(),
            })?;
        pin_mut!(events);

        let deadline = tokio::time::sleep(window);
        tokio::pin!(deadline);

        loop {
            let event = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                () = &mut deadline => break,
                event = events.next() => match event {
                    Some(event) => event,
                    None => break,
                },
            };

            let AdapterEvent::DeviceAdded(addr) = event else {
                continue;
            };
            let Ok(device) = self.adapter.device(addr) else {
                continue;
            };
            // Cached devices without a current RSSI are not in range.
            let Some(rssi_dbm) = device.rssi().await.ok().flatten() else {
                continue;
            };
            let name = device.name().await.ok().flatten();

            let sighting = Sighting {
                id: addr.to_string(),
                name,
                rssi_dbm,
            };
            if sink.send(sighting).await.is_err() {
                break;
            }
        }

        Ok(())
    }

    async fn advertise(&self, advert: &BeaconAdvert) -> BluetoothResult<()> {
        self.ensure_powered().await?;

        let mut le_advertisement = Advertisement::default();
        le_advertisement.advertisement_type = AdvertisementType::Peripheral;
        le_advertisement.service_uuids = BTreeSet::from([advert.service_uuid]);
        le_advertisement.local_name = Some(advert.class_code.clone());
        le_advertisement.discoverable = Some(true);

        let handle = self
            .adapter
            .advertise(le_advertisement)
            .await
            .map_err(|e| BluetoothError::AdvertiseFailed {
                message: e.to_string(),
            })?;

        info!(class_code = %advert.class_code, "Advertising beacon");
        *self.advertisement.lock().await = Some(handle);
        Ok(())
    }

    async fn stop_advertising(&self) -> BluetoothResult<()> {
        // Dropping the handle unregisters the advertisement.
        if self.advertisement.lock().await.take().is_some() {
            info!("Stopped advertising beacon");
        }
        Ok(())
    }
}
