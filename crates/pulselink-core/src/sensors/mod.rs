//! Climate sensor interface
//!
//! Raw acquisition (DHT22/SHT40 bus timing, calibration) lives in the
//! platform crate. The windower only needs something that can be polled for a
//! temperature/humidity pair and that reports failures instead of NaNs.

use thiserror_no_std::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorError {
    #[error("{sensor} read failed during {operation}: {details}")]
    ReadFailed {
        sensor: &'static str,
        operation: &'static str,
        details: &'static str,
    },
    #[error("{sensor} returned an implausible reading")]
    InvalidReading { sensor: &'static str },
    #[error("{sensor} timed out during {operation}")]
    Timeout {
        sensor: &'static str,
        operation: &'static str,
    },
}

/// Typed readings from a temperature/humidity sensor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClimateReading {
    pub temperature_celsius: f32,
    pub humidity_percent: f32,
}

impl ClimateReading {
    /// A reading is usable only if both channels are finite numbers.
    pub fn is_valid(&self) -> bool {
        self.temperature_celsius.is_finite() && self.humidity_percent.is_finite()
    }
}

/// Trait for sensors that produce temperature/humidity pairs.
#[allow(async_fn_in_trait)]
pub trait ClimateSensor {
    /// Take one measurement.
    async fn read(&mut self) -> Result<ClimateReading, SensorError>;
}
