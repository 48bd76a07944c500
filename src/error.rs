use thiserror::Error;

/// Failures of the device-connection lifecycle. These always reach the caller of `connect()`.
#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("No Bluetooth adapter available")]
    NoAdapter,

    #[error("No heart rate device found")]
    NoDevice,

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Notification subscription error: {0}")]
    Subscription(String),
}

impl From<btleplug::Error> for DeviceError {
    fn from(err: btleplug::Error) -> Self {
        DeviceError::Connection(err.to_string())
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum MeasurementError {
    #[error("Heart rate measurement too short ({len} bytes, need {needed})")]
    TooShort { len: usize, needed: usize },
}

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Failed to get local app data directory")]
    NoDataDir,

    #[error("Settings io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Settings json error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Cache io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cache json error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum OscError {
    #[error("OSC socket error: {0}")]
    Io(#[from] std::io::Error),

    #[error("OSC encode error: {0}")]
    Encode(#[from] rosc::OscError),

    #[error("Time is too far in the future")]
    TimeOutOfRange,
}
