//! Real-time calorie burn estimation from a Bluetooth heart rate wearable.

pub mod accumulator;
pub mod ble;
pub mod cache;
pub mod device;
pub mod error;
pub mod estimator;
pub mod logging;
pub mod measurement;
pub mod osc;
pub mod profile;
pub mod settings;
pub mod simulated;
pub mod watch;

pub use accumulator::{SessionState, TelemetryAccumulator, WatchData};
pub use device::{DeviceConnection, HeartRateDevice};
pub use error::DeviceError;
pub use profile::{BiologicalSex, PhysiologicalProfile, ProfileSource};
pub use watch::WatchController;
