//! Running calorie total fed by heart rate samples.
//!
//! Elapsed time is charged at the heart rate of the sample that closes the
//! interval. The clock anchor is rebased on every processed sample and on
//! every session start, so no interval is ever charged twice.

use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::estimator::{self, NOISE_FLOOR_BPM};
use crate::profile::PhysiologicalProfile;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    AwaitingFirstSample,
    Streaming,
}

/// What the display layer reads.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchData {
    pub heart_rate: Option<u8>,
    pub calories_burned: f64,
    pub device_name: Option<String>,
    pub is_connected: bool,
}

#[derive(Debug)]
pub struct TelemetryAccumulator {
    state: SessionState,
    last_sample_at: Instant,
    accumulated_calories: f64,
    latest_heart_rate: Option<u8>,
    device_name: Option<String>,
}

impl Default for TelemetryAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

impl TelemetryAccumulator {
    pub fn new() -> Self {
        Self {
            state: SessionState::Disconnected,
            last_sample_at: Instant::now(),
            accumulated_calories: 0.0,
            latest_heart_rate: None,
            device_name: None,
        }
    }

    /// Begins a session on a freshly connected device. Time before this call is never charged.
    pub fn start_session(&mut self, device_name: impl Into<String>) {
        self.start_session_at(device_name, Instant::now());
    }

    pub fn start_session_at(&mut self, device_name: impl Into<String>, now: Instant) {
        self.last_sample_at = now;
        self.latest_heart_rate = None;
        self.device_name = Some(device_name.into());
        self.state = SessionState::AwaitingFirstSample;
    }

    /// Ends the session. The running total is kept.
    pub fn end_session(&mut self) {
        self.state = SessionState::Disconnected;
        self.latest_heart_rate = None;
    }

    /// Processes one sample and returns the calories it added.
    pub fn on_sample(&mut self, heart_rate: u8, profile: &PhysiologicalProfile) -> f64 {
        self.on_sample_at(heart_rate, profile, Instant::now())
    }

    pub fn on_sample_at(&mut self, heart_rate: u8, profile: &PhysiologicalProfile, now: Instant) -> f64 {
        if self.state == SessionState::Disconnected {
            trace!(bpm = heart_rate, "Ignoring sample outside of a session");
            return 0.0;
        }

        let elapsed = now.saturating_duration_since(self.last_sample_at);
        self.last_sample_at = now;
        self.latest_heart_rate = Some(heart_rate);
        self.state = SessionState::Streaming;

        if heart_rate <= NOISE_FLOOR_BPM {
            debug!(bpm = heart_rate, "Heart rate at or below noise floor, no burn credited");
            return 0.0;
        }

        let delta = estimator::calories_delta(heart_rate, profile, elapsed);
        self.accumulated_calories += delta;

        trace!(
            bpm = heart_rate,
            elapsed_ms = elapsed.as_millis() as u64,
            delta_kcal = delta,
            total_kcal = self.accumulated_calories,
            "Sample processed"
        );

        delta
    }

    pub fn reset_accumulator(&mut self) {
        self.accumulated_calories = 0.0;
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state != SessionState::Disconnected
    }

    pub fn accumulated_calories(&self) -> f64 {
        self.accumulated_calories
    }

    pub fn latest_heart_rate(&self) -> Option<u8> {
        self.latest_heart_rate
    }

    pub fn device_name(&self) -> Option<&str> {
        self.device_name.as_deref()
    }

    pub fn snapshot(&self) -> WatchData {
        WatchData {
            heart_rate: self.latest_heart_rate,
            calories_burned: self.accumulated_calories,
            device_name: self.device_name.clone(),
            is_connected: self.is_connected(),
        }
    }
}
