//! Sample value and its line-delimited JSON wire format
//!
//! Wire shape (one object per line, floats with exactly two decimals):
//!
//! ```text
//! {"ts":10000,"temp":23.50,"hum":41.20,"bpm":72,"connected":true}
//! ```
//!
//! A missing sensor value is written as `null`, never as a sentinel number.

use core::fmt::{self, Display, Write};

use alloc::string::String;
use serde::Deserialize;
use thiserror_no_std::Error;

/// Upper bound for one encoded record, newline excluded.
pub const MAX_RECORD_LEN: usize = 192;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecordError {
    #[error("Record is not a valid sample object")]
    Malformed,
}

/// One periodic reading: sensor values, the derived pulse rate, when it was
/// taken and whether the node intended to be online at the time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    /// Milliseconds since boot
    pub timestamp_ms: u64,
    /// Degrees Celsius, `None` if no valid reading was ever taken
    pub temperature: Option<f32>,
    /// Relative humidity in percent
    pub humidity: Option<f32>,
    /// Pulse events per minute
    pub rate_bpm: u32,
    pub connected: bool,
}

#[derive(Deserialize)]
struct WireRecord {
    ts: u64,
    temp: Option<f32>,
    hum: Option<f32>,
    bpm: u32,
    connected: bool,
}

impl Sample {
    /// Encode as a single wire record (no trailing newline).
    pub fn to_record(&self) -> String {
        let mut out = String::with_capacity(80);
        // Writing into a String cannot fail
        let _ = write!(out, "{{\"ts\":{},\"temp\":", self.timestamp_ms);
        write_reading(&mut out, self.temperature);
        out.push_str(",\"hum\":");
        write_reading(&mut out, self.humidity);
        let _ = write!(
            out,
            ",\"bpm\":{},\"connected\":{}}}",
            self.rate_bpm, self.connected
        );
        out
    }

    /// Decode a wire record. Field order is not significant.
    pub fn from_record(line: &str) -> Result<Self, RecordError> {
        let wire: WireRecord = serde_json::from_str(line.trim_end()).map_err(|e| {
            log::debug!("Rejecting record {:?}: {}", line, e);
            RecordError::Malformed
        })?;

        Ok(Self {
            timestamp_ms: wire.ts,
            temperature: wire.temp,
            humidity: wire.hum,
            rate_bpm: wire.bpm,
            connected: wire.connected,
        })
    }
}

fn write_reading(out: &mut String, value: Option<f32>) {
    match value {
        Some(v) if v.is_finite() => {
            let _ = write!(out, "{:.2}", v);
        }
        _ => out.push_str("null"),
    }
}

impl Display for Sample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[Sample] ts: {}", self.timestamp_ms)?;
        match self.temperature {
            Some(t) => write!(f, ", temperature: {:.2}°C", t)?,
            None => f.write_str(", temperature: --")?,
        }
        match self.humidity {
            Some(h) => write!(f, ", humidity: {:.2}%", h)?,
            None => f.write_str(", humidity: --")?,
        }
        write!(
            f,
            ", rate: {} bpm, connected: {}",
            self.rate_bpm, self.connected
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Sample {
        Sample {
            timestamp_ms: 10_000,
            temperature: Some(23.5),
            humidity: Some(41.234),
            rate_bpm: 72,
            connected: true,
        }
    }

    #[test]
    fn test_record_shape() {
        assert_eq!(
            sample().to_record(),
            r#"{"ts":10000,"temp":23.50,"hum":41.23,"bpm":72,"connected":true}"#
        );
    }

    #[test]
    fn test_missing_readings_are_null() {
        let s = Sample {
            temperature: None,
            humidity: Some(f32::NAN),
            connected: false,
            ..sample()
        };
        assert_eq!(
            s.to_record(),
            r#"{"ts":10000,"temp":null,"hum":null,"bpm":72,"connected":false}"#
        );

        let decoded = Sample::from_record(&s.to_record()).unwrap();
        assert_eq!(decoded.temperature, None);
        assert_eq!(decoded.humidity, None);
    }

    #[test]
    fn test_decode_ignores_field_order() {
        let decoded =
            Sample::from_record(r#"{"bpm":60,"connected":false,"hum":50.00,"temp":-3.25,"ts":42}"#)
                .unwrap();
        assert_eq!(decoded.timestamp_ms, 42);
        assert_eq!(decoded.temperature, Some(-3.25));
        assert_eq!(decoded.humidity, Some(50.0));
        assert_eq!(decoded.rate_bpm, 60);
        assert!(!decoded.connected);
    }

    #[test]
    fn test_rejects_partial_record() {
        assert_eq!(
            Sample::from_record(r#"{"ts":1,"temp":2"#),
            Err(RecordError::Malformed)
        );
    }

    #[test]
    fn test_encoded_fits_record_bound() {
        let s = Sample {
            timestamp_ms: u64::MAX,
            temperature: Some(-f32::MAX),
            humidity: Some(f32::MAX),
            rate_bpm: u32::MAX,
            connected: false,
        };
        assert!(s.to_record().len() <= MAX_RECORD_LEN);
    }
}
