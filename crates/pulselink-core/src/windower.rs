//! Turns pulse edges and sensor polls into one [`Sample`] per window
//!
//! The pulse counter is the only state shared with interrupt context. The ISR
//! side is a single lock-free increment; the main loop takes the count with a
//! read-and-reset inside a critical section and does nothing else there.

use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use log::{debug, warn};

use crate::config::SamplingConfig;
use crate::sample::Sample;
use crate::sensors::ClimateSensor;

/// Pulse counter shared between the edge interrupt and the main loop.
///
/// ```rust,ignore
/// static PULSES: PulseCounter = PulseCounter::new();
///
/// #[handler]
/// fn on_gpio() {
///     PULSES.on_level(button.is_high());
/// }
/// ```
pub struct PulseCounter {
    count: AtomicU32,
    last_level: AtomicBool,
}

impl PulseCounter {
    pub const fn new() -> Self {
        Self {
            count: AtomicU32::new(0),
            last_level: AtomicBool::new(false),
        }
    }

    /// Count one rising edge. Interrupt safe: no allocation, no locks.
    pub fn on_edge(&self) {
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    /// Feed the current pin level from a change interrupt. Only low→high
    /// transitions are counted, so a pin firing on both edges counts once per
    /// pulse.
    pub fn on_level(&self, high: bool) {
        let was_high = self.last_level.swap(high, Ordering::Relaxed);
        if high && !was_high {
            self.on_edge();
        }
    }

    /// Atomically read the accumulated count and reset it to zero.
    pub fn take(&self) -> u32 {
        // Interrupts are masked only for the swap itself
        critical_section::with(|_| self.count.swap(0, Ordering::AcqRel))
    }

    /// Current count without resetting it.
    pub fn peek(&self) -> u32 {
        self.count.load(Ordering::Relaxed)
    }
}

impl Default for PulseCounter {
    fn default() -> Self {
        Self::new()
    }
}

/// Latest valid sensor values. Holds the previous reading through transient
/// failures so a bad poll shows up as staleness rather than a gap.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct HeldReading {
    temperature: Option<f32>,
    humidity: Option<f32>,
}

pub struct Windower<'a, S> {
    sensor: S,
    pulses: &'a PulseCounter,
    poll_interval_ms: u64,
    window_ms: u64,
    last_poll: Option<u64>,
    window_start: u64,
    held: HeldReading,
}

impl<'a, S: ClimateSensor> Windower<'a, S> {
    /// Create a windower whose first window starts at `now_ms`.
    ///
    /// `config` must have passed [`crate::config::NodeConfig::validate`].
    pub fn new(sensor: S, pulses: &'a PulseCounter, config: SamplingConfig, now_ms: u64) -> Self {
        Self {
            sensor,
            pulses,
            poll_interval_ms: config.poll_interval_ms.max(1),
            window_ms: config.window_ms.max(1),
            last_poll: None,
            window_start: now_ms,
            held: HeldReading::default(),
        }
    }

    /// Run once per main-loop iteration.
    ///
    /// Polls the sensor when due and, once the current window has elapsed,
    /// returns the window's sample. Window boundaries advance in whole
    /// multiples of the window length from the first window start, so late
    /// calls do not shift later windows.
    pub async fn tick(&mut self, now_ms: u64, connected: bool) -> Option<Sample> {
        self.poll_if_due(now_ms).await;

        let elapsed = now_ms.saturating_sub(self.window_start);
        if elapsed < self.window_ms {
            return None;
        }

        let pulses = self.pulses.take();
        let windows = elapsed / self.window_ms;
        // A stalled loop hands us several windows' worth of pulses at once
        let rate_bpm = self.scale_to_per_minute(pulses, windows * self.window_ms);

        if windows > 1 {
            warn!(
                "Main loop stalled for {} windows; emitting a single sample",
                windows
            );
        }
        self.window_start += windows * self.window_ms;

        debug!("Window closed: {} pulses -> {} bpm", pulses, rate_bpm);

        Some(Sample {
            timestamp_ms: now_ms,
            temperature: self.held.temperature,
            humidity: self.held.humidity,
            rate_bpm,
            connected,
        })
    }

    /// Start of the window currently being accumulated.
    pub fn window_start(&self) -> u64 {
        self.window_start
    }

    fn scale_to_per_minute(&self, pulses: u32, span_ms: u64) -> u32 {
        let rate = u64::from(pulses) * 60_000 / span_ms.max(1);
        u32::try_from(rate).unwrap_or(u32::MAX)
    }

    async fn poll_if_due(&mut self, now_ms: u64) {
        let due = match self.last_poll {
            None => true,
            Some(last) => now_ms.saturating_sub(last) >= self.poll_interval_ms,
        };
        if !due {
            return;
        }
        self.last_poll = Some(now_ms);

        match self.sensor.read().await {
            Ok(reading) if reading.is_valid() => {
                self.held = HeldReading {
                    temperature: Some(reading.temperature_celsius),
                    humidity: Some(reading.humidity_percent),
                };
            }
            Ok(reading) => {
                warn!("Discarding invalid climate reading {:?}, keeping last value", reading);
            }
            Err(e) => {
                warn!("Climate sensor read failed ({}), keeping last value", e);
            }
        }
    }
}
