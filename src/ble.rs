//! Heart rate straps and watches over Bluetooth Low Energy, via btleplug.

use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{bleuuid::uuid_from_u16, Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager as BleManager, Peripheral};
use futures::future;
use futures::stream::{self, Stream, StreamExt};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::device::{DeviceConnection, HeartRateDevice, FALLBACK_DEVICE_NAME};
use crate::error::DeviceError;
use crate::measurement::HeartRateMeasurement;

const HEART_RATE_SERVICE_UUID: u16 = 0x180D;
const HEART_RATE_MEASUREMENT_CHARACTERISTIC_UUID: u16 = 0x2A37;
const POLAR_ELECTRO_OY_MANUFACTURER_ID: u16 = 0x6B;
const POLAR_ELECTRO_EU_MANUFACTURER_ID: u16 = 0xD1;

pub struct BleHeartRateDevice {
    name_filter: Option<String>,
    scan_timeout: Duration,
    peripheral: Mutex<Option<Peripheral>>,
}

impl BleHeartRateDevice {
    pub fn new(name_filter: Option<String>, scan_timeout: Duration) -> Self {
        Self {
            name_filter,
            scan_timeout,
            peripheral: Mutex::new(None),
        }
    }

    async fn first_adapter() -> Result<Adapter, DeviceError> {
        let manager = BleManager::new().await?;
        let adapter = manager.adapters().await?.into_iter().next().ok_or(DeviceError::NoAdapter)?;

        if let Ok(info) = adapter.adapter_info().await {
            debug!(adapter = %info, "Using Bluetooth adapter");
        }

        Ok(adapter)
    }

    async fn scan_for_sensor(&self, adapter: &Adapter) -> Result<Peripheral, DeviceError> {
        let mut events = adapter.events().await?;

        info!(timeout_secs = self.scan_timeout.as_secs(), "Scanning for heart rate devices...");
        adapter.start_scan(ScanFilter::default()).await?;

        let found = tokio::time::timeout(self.scan_timeout, self.discover(adapter, &mut events)).await;

        if let Err(err) = adapter.stop_scan().await {
            warn!(error = %err, "Failed to stop scan");
        }

        found.map_err(|_| DeviceError::NoDevice)?
    }

    async fn discover<S>(&self, adapter: &Adapter, events: &mut S) -> Result<Peripheral, DeviceError>
    where
        S: Stream<Item = CentralEvent> + Unpin,
    {
        for peripheral in adapter.peripherals().await? {
            if self.is_wanted(&peripheral).await {
                return Ok(peripheral);
            }
        }

        while let Some(event) = events.next().await {
            let id = match event {
                CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => id,
                _ => continue,
            };

            let peripheral = adapter.peripheral(&id).await?;
            if self.is_wanted(&peripheral).await {
                return Ok(peripheral);
            }
        }

        Err(DeviceError::NoDevice)
    }

    async fn is_wanted(&self, peripheral: &Peripheral) -> bool {
        let props = match peripheral.properties().await {
            Ok(Some(props)) => props,
            _ => return false,
        };

        let advertises_heart_rate = props.services.contains(&uuid_from_u16(HEART_RATE_SERVICE_UUID));
        let is_polar = props
            .manufacturer_data
            .keys()
            .any(|k| *k == POLAR_ELECTRO_OY_MANUFACTURER_ID || *k == POLAR_ELECTRO_EU_MANUFACTURER_ID);

        if !advertises_heart_rate && !is_polar {
            return false;
        }

        match (&self.name_filter, &props.local_name) {
            (None, _) => true,
            (Some(filter), Some(name)) => name.to_lowercase().contains(&filter.to_lowercase()),
            (Some(_), None) => false,
        }
    }
}

async fn has_heartrate_service(peripheral: &Peripheral) -> Result<bool, btleplug::Error> {
    peripheral.discover_services().await?;

    Ok(peripheral
        .services()
        .iter()
        .any(|service| service.uuid == uuid_from_u16(HEART_RATE_SERVICE_UUID)))
}

fn get_heartrate_measurement_characteristic(peripheral: &Peripheral) -> Option<Characteristic> {
    peripheral
        .characteristics()
        .into_iter()
        .find(|c| c.uuid == uuid_from_u16(HEART_RATE_MEASUREMENT_CHARACTERISTIC_UUID))
}

/// Ends `samples` as soon as `events` yields an item matching `is_end`, or runs dry.
/// `events` must already be subscribed so nothing emitted before the first poll is lost.
fn take_until_event<S, E, F>(samples: S, events: E, mut is_end: F) -> impl Stream<Item = S::Item>
where
    S: Stream,
    E: Stream + Unpin,
    F: FnMut(&E::Item) -> bool,
{
    let ended = events.filter(move |event| future::ready(is_end(event))).into_future();
    samples.take_until(ended)
}

#[async_trait]
impl HeartRateDevice for BleHeartRateDevice {
    async fn connect(&self) -> Result<DeviceConnection, DeviceError> {
        let adapter = Self::first_adapter().await?;
        let peripheral = self.scan_for_sensor(&adapter).await?;

        let device_name = peripheral
            .properties()
            .await?
            .and_then(|props| props.local_name)
            .unwrap_or_else(|| FALLBACK_DEVICE_NAME.to_string());

        peripheral.connect().await?;

        let characteristic = match has_heartrate_service(&peripheral).await {
            Ok(true) => get_heartrate_measurement_characteristic(&peripheral),
            Ok(false) => None,
            Err(err) => {
                let _ = peripheral.disconnect().await;
                return Err(err.into());
            }
        };

        let Some(characteristic) = characteristic else {
            let _ = peripheral.disconnect().await;
            return Err(DeviceError::Connection(format!(
                "{device_name} has no Heart Rate Measurement characteristic"
            )));
        };

        if let Err(err) = peripheral.subscribe(&characteristic).await {
            let _ = peripheral.disconnect().await;
            return Err(DeviceError::Subscription(err.to_string()));
        }

        let notifications = match peripheral.notifications().await {
            Ok(notifications) => notifications,
            Err(err) => {
                let _ = peripheral.disconnect().await;
                return Err(DeviceError::Subscription(err.to_string()));
            }
        };

        info!(device = %device_name, "Subscribed to heart rate notifications");

        let disconnect_events = match adapter.events().await {
            Ok(events) => events,
            Err(err) => {
                warn!(error = %err, "Cannot watch for device disconnects");
                stream::pending().boxed()
            }
        };

        let peripheral_id = peripheral.id();
        let measurement_uuid = characteristic.uuid;
        let samples = notifications
            .filter_map(move |notification| async move {
                if notification.uuid != measurement_uuid {
                    return None;
                }

                match HeartRateMeasurement::parse(&notification.value) {
                    Ok(measurement) => Some(measurement.heart_rate),
                    Err(err) => {
                        warn!(error = %err, "Dropping malformed heart rate notification");
                        None
                    }
                }
            });
        let samples = take_until_event(samples, disconnect_events, move |event| {
            matches!(event, CentralEvent::DeviceDisconnected(gone) if *gone == peripheral_id)
        })
        .boxed();

        *self.peripheral.lock().await = Some(peripheral);

        Ok(DeviceConnection { device_name, samples })
    }

    async fn disconnect(&self) -> Result<(), DeviceError> {
        let Some(peripheral) = self.peripheral.lock().await.take() else {
            return Ok(());
        };

        if peripheral.is_connected().await.unwrap_or(false) {
            peripheral.disconnect().await?;
        }

        Ok(())
    }
}
