//! Connection lifecycle around the accumulator.
//!
//! At most one device session is live. Every accumulator mutation happens inside a
//! short synchronous critical section, so sample updates, resets and session
//! transitions never interleave.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::stream::StreamExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::accumulator::{TelemetryAccumulator, WatchData};
use crate::device::{DeviceConnection, HeartRateDevice};
use crate::error::DeviceError;
use crate::profile::ProfileSource;

struct ActiveSession {
    device: Arc<dyn HeartRateDevice>,
    pump: JoinHandle<()>,
}

pub struct WatchController {
    accumulator: Arc<Mutex<TelemetryAccumulator>>,
    profile: Arc<dyn ProfileSource>,
    updates: Arc<watch::Sender<WatchData>>,
    session: tokio::sync::Mutex<Option<ActiveSession>>,
}

fn lock(accumulator: &Mutex<TelemetryAccumulator>) -> MutexGuard<'_, TelemetryAccumulator> {
    accumulator.lock().unwrap_or_else(PoisonError::into_inner)
}

impl WatchController {
    pub fn new(profile: impl ProfileSource + 'static) -> Self {
        let accumulator = TelemetryAccumulator::new();
        let (updates, _) = watch::channel(accumulator.snapshot());

        Self {
            accumulator: Arc::new(Mutex::new(accumulator)),
            profile: Arc::new(profile),
            updates: Arc::new(updates),
            session: tokio::sync::Mutex::new(None),
        }
    }

    /// Connects to `device` and starts streaming its samples into the accumulator.
    ///
    /// Any live session is disconnected first. On failure the accumulator is left
    /// exactly as it was and the error is returned.
    pub async fn connect(&self, device: Arc<dyn HeartRateDevice>) -> Result<String, DeviceError> {
        let mut session = self.session.lock().await;

        if let Some(active) = session.take() {
            info!("Replacing existing device session");
            if let Err(err) = self.teardown(active).await {
                warn!(error = %err, "Error while disconnecting previous device");
            }
        }

        let DeviceConnection { device_name, samples } = match device.connect().await {
            Ok(connection) => connection,
            Err(err) => {
                warn!(error = %err, "Heart rate device connection failed");
                return Err(err);
            }
        };

        {
            let mut acc = lock(&self.accumulator);
            acc.start_session(device_name.clone());
            self.updates.send_replace(acc.snapshot());
        }

        info!(device = %device_name, "Heart rate device connected");

        let pump = tokio::spawn(pump_samples(
            samples,
            Arc::clone(&self.accumulator),
            Arc::clone(&self.profile),
            Arc::clone(&self.updates),
        ));

        *session = Some(ActiveSession { device, pump });

        Ok(device_name)
    }

    /// Stops notifications and ends the session. The calorie total is kept.
    pub async fn disconnect(&self) -> Result<(), DeviceError> {
        let Some(active) = self.session.lock().await.take() else {
            return Ok(());
        };

        self.teardown(active).await
    }

    async fn teardown(&self, active: ActiveSession) -> Result<(), DeviceError> {
        active.pump.abort();
        let _ = active.pump.await;

        {
            let mut acc = lock(&self.accumulator);
            acc.end_session();
            self.updates.send_replace(acc.snapshot());
        }

        let result = active.device.disconnect().await;
        info!("Heart rate device disconnected");
        result
    }

    pub fn reset_accumulator(&self) {
        let mut acc = lock(&self.accumulator);
        acc.reset_accumulator();
        self.updates.send_replace(acc.snapshot());
        debug!("Calorie accumulator reset");
    }

    pub fn snapshot(&self) -> WatchData {
        lock(&self.accumulator).snapshot()
    }

    pub fn is_connected(&self) -> bool {
        lock(&self.accumulator).is_connected()
    }

    /// Receives a fresh [`WatchData`] after every change.
    pub fn subscribe(&self) -> watch::Receiver<WatchData> {
        self.updates.subscribe()
    }
}

async fn pump_samples(
    mut samples: futures::stream::BoxStream<'static, u8>,
    accumulator: Arc<Mutex<TelemetryAccumulator>>,
    profile: Arc<dyn ProfileSource>,
    updates: Arc<watch::Sender<WatchData>>,
) {
    while let Some(bpm) = samples.next().await {
        let profile = profile.profile();
        let mut acc = lock(&accumulator);
        acc.on_sample(bpm, &profile);
        updates.send_replace(acc.snapshot());
    }

    // The stream only ends on its own when the device dropped the link.
    let mut acc = lock(&accumulator);
    acc.end_session();
    updates.send_replace(acc.snapshot());
    info!(device = acc.device_name().unwrap_or_default(), "Heart rate device dropped the connection");
}
