//! Device-connection seam between a heart rate wearable and the accumulator.

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::DeviceError;

/// Name reported when the peripheral does not advertise one.
pub const FALLBACK_DEVICE_NAME: &str = "Iron Watch";

/// A live, subscribed device. Dropping `samples` unsubscribes.
pub struct DeviceConnection {
    pub device_name: String,
    /// Heart rate in bpm, one item per notification. Ends when the device drops the link.
    pub samples: BoxStream<'static, u8>,
}

impl std::fmt::Debug for DeviceConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceConnection")
            .field("device_name", &self.device_name)
            .finish_non_exhaustive()
    }
}

#[async_trait]
pub trait HeartRateDevice: Send + Sync {
    /// Pairs, subscribes to heart rate notifications and returns the sample stream.
    async fn connect(&self) -> Result<DeviceConnection, DeviceError>;

    /// Tears down the link. Safe to call when not connected.
    async fn disconnect(&self) -> Result<(), DeviceError>;
}
