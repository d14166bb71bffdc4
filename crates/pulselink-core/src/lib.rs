//! Hardware-independent core library for pulselink
//!
//! This crate contains all platform-agnostic logic for the pulselink edge
//! telemetry node: pulse windowing, the sample wire format, the bounded
//! offline queue (volatile and flash-backed), reconnect backoff and the
//! connectivity-gated delivery controller.
//!
//! It is `#![no_std]` with `extern crate alloc` so it compiles on both
//! embedded targets (ESP32) and desktop hosts (for the simulator and tests).

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod backoff;
pub mod command;
pub mod config;
pub mod controller;
pub mod events;
pub mod node;
pub mod queue;
pub mod sample;
pub mod sensors;
pub mod storage;
pub mod uplink;
pub mod windower;

#[cfg(test)]
pub(crate) mod test_support;
