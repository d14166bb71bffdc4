//! Synthetic climate sensor with periodic read failures

use pulselink_core::sensors::{ClimateReading, ClimateSensor, SensorError};

/// Seconds of simulated time per poll, matching the default poll cadence.
const SECONDS_PER_READ: f64 = 2.0;

/// Generates slowly varying temperature/humidity readings.
///
/// Every `fail_every`-th read reports a checksum error, exercising the
/// windower's hold-last-value path.
pub struct MockClimateSensor {
    reads: u64,
    fail_every: Option<u64>,
}

impl MockClimateSensor {
    pub fn new(fail_every: Option<u64>) -> Self {
        Self {
            reads: 0,
            fail_every: fail_every.filter(|&n| n > 0),
        }
    }

    fn reading_at(t: f64) -> ClimateReading {
        // Temperature: 20–26 °C sinusoidal with slow drift
        let temperature = 23.0 + 3.0 * (t / 120.0).sin() + 0.5 * (t / 37.0).cos();
        // Humidity: 40–60 % with a different period
        let humidity = 50.0 + 10.0 * (t / 180.0).sin() + 2.0 * (t / 23.0).cos();

        ClimateReading {
            temperature_celsius: temperature as f32,
            humidity_percent: humidity as f32,
        }
    }
}

impl ClimateSensor for MockClimateSensor {
    async fn read(&mut self) -> Result<ClimateReading, SensorError> {
        self.reads += 1;
        if self.fail_every.is_some_and(|n| self.reads % n == 0) {
            return Err(SensorError::ReadFailed {
                sensor: "mock-dht",
                operation: "read",
                details: "checksum mismatch",
            });
        }
        Ok(Self::reading_at(self.reads as f64 * SECONDS_PER_READ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embassy_futures::block_on;

    #[test]
    fn test_fails_on_schedule() {
        let mut sensor = MockClimateSensor::new(Some(3));
        let outcomes: Vec<bool> = (0..6).map(|_| block_on(sensor.read()).is_ok()).collect();
        assert_eq!(outcomes, [true, true, false, true, true, false]);
    }

    #[test]
    fn test_readings_stay_plausible() {
        let mut sensor = MockClimateSensor::new(None);
        for _ in 0..500 {
            let reading = block_on(sensor.read()).unwrap();
            assert!(reading.is_valid());
            assert!((19.0..=27.0).contains(&reading.temperature_celsius));
            assert!((37.0..=63.0).contains(&reading.humidity_percent));
        }
    }
}
