//! Pulse generator thread standing in for the edge interrupt

use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::info;
use pulselink_core::windower::PulseCounter;

/// Width of the simulated high phase of each pulse.
const PULSE_WIDTH: Duration = Duration::from_millis(20);

/// Period between rising edges for `bpm` pulses per minute.
pub fn pulse_period(bpm: u32) -> Option<Duration> {
    if bpm == 0 {
        return None;
    }
    Some(Duration::from_millis(60_000 / u64::from(bpm)).max(PULSE_WIDTH * 2))
}

/// Drive `counter` with a square wave at `bpm`, as the input pin would.
///
/// Returns `None` when `bpm` is zero and no thread is needed.
pub fn spawn_pulse_generator(counter: &'static PulseCounter, bpm: u32) -> Option<JoinHandle<()>> {
    let period = pulse_period(bpm)?;
    info!("Generating pulses every {} ms", period.as_millis());

    Some(thread::spawn(move || {
        loop {
            counter.on_level(true);
            thread::sleep(PULSE_WIDTH);
            counter.on_level(false);
            thread::sleep(period - PULSE_WIDTH);
        }
    }))
}
