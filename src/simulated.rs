//! In-process heart rate device
//!
//! Stands in for a real wearable in tests and in `pulseburn watch --simulate`.
//! Samples are pushed through a [`SimulatedStrap`] handle; dropping the handle
//! or calling [`SimulatedStrap::drop_link`] ends the stream the way a device-initiated
//! disconnect would.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::device::{DeviceConnection, HeartRateDevice};
use crate::error::DeviceError;

/// Which step of `connect()` should fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureMode {
    None,
    Connect,
    Subscribe,
}

pub struct SimulatedDevice {
    name: String,
    failure: std::sync::Mutex<FailureMode>,
    strap_tx: mpsc::UnboundedSender<SimulatedStrap>,
    // Holds the strap when nobody receives it, so the link stays up.
    unclaimed: std::sync::Mutex<Option<SimulatedStrap>>,
    connected: Arc<AtomicBool>,
    connect_count: AtomicUsize,
}

impl SimulatedDevice {
    /// Returns the device and a receiver yielding one [`SimulatedStrap`] per successful connection.
    pub fn new(name: impl Into<String>) -> (Self, mpsc::UnboundedReceiver<SimulatedStrap>) {
        let (strap_tx, strap_rx) = mpsc::unbounded_channel();
        let device = Self {
            name: name.into(),
            failure: std::sync::Mutex::new(FailureMode::None),
            strap_tx,
            unclaimed: std::sync::Mutex::new(None),
            connected: Arc::new(AtomicBool::new(false)),
            connect_count: AtomicUsize::new(0),
        };
        (device, strap_rx)
    }

    pub fn set_failure(&self, mode: FailureMode) {
        if let Ok(mut failure) = self.failure.lock() {
            *failure = mode;
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn connect_count(&self) -> usize {
        self.connect_count.load(Ordering::SeqCst)
    }

    fn failure(&self) -> FailureMode {
        self.failure.lock().map(|f| *f).unwrap_or(FailureMode::None)
    }

    fn set_unclaimed(&self, strap: Option<SimulatedStrap>) {
        if let Ok(mut unclaimed) = self.unclaimed.lock() {
            *unclaimed = strap;
        }
    }
}

#[async_trait]
impl HeartRateDevice for SimulatedDevice {
    async fn connect(&self) -> Result<DeviceConnection, DeviceError> {
        match self.failure() {
            FailureMode::Connect => {
                return Err(DeviceError::Connection("pairing rejected by simulated device".into()))
            }
            FailureMode::Subscribe => {
                return Err(DeviceError::Subscription("simulated characteristic refused notifications".into()))
            }
            FailureMode::None => {}
        }

        let (tx, rx) = mpsc::channel(64);
        self.connected.store(true, Ordering::SeqCst);
        self.connect_count.fetch_add(1, Ordering::SeqCst);

        let unclaimed = self.strap_tx.send(SimulatedStrap { tx }).err().map(|err| err.0);
        self.set_unclaimed(unclaimed);

        let connected = Arc::clone(&self.connected);
        let samples = ReceiverStream::new(rx)
            .map(Some)
            .chain(futures::stream::once(async move {
                connected.store(false, Ordering::SeqCst);
                None
            }))
            .filter_map(futures::future::ready)
            .boxed();

        Ok(DeviceConnection {
            device_name: self.name.clone(),
            samples,
        })
    }

    async fn disconnect(&self) -> Result<(), DeviceError> {
        self.set_unclaimed(None);
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// Device-side handle of one simulated connection.
pub struct SimulatedStrap {
    tx: mpsc::Sender<u8>,
}

impl SimulatedStrap {
    /// Sends one heart rate notification. Returns false once the link is gone.
    pub async fn notify(&self, bpm: u8) -> bool {
        self.tx.send(bpm).await.is_ok()
    }

    /// Simulates the device dropping the link on its own.
    pub fn drop_link(self) {
        drop(self.tx);
    }

    /// Emits a synthetic workout: ramps from `from` to `to` bpm, one sample per `interval`.
    pub async fn play_ramp(&self, from: u8, to: u8, interval: Duration) {
        let step: i16 = if to >= from { 1 } else { -1 };
        let mut bpm = i16::from(from);
        loop {
            if !self.notify(bpm as u8).await {
                return;
            }
            if bpm == i16::from(to) {
                return;
            }
            bpm += step;
            tokio::time::sleep(interval).await;
        }
    }
}
