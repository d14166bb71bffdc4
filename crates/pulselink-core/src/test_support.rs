//! Test doubles shared by the queue, controller and node tests

use std::collections::VecDeque;
use std::string::{String, ToString};
use std::vec::Vec;

use crate::events::{EventChannel, EventSubscriber};
use crate::queue::RecordSink;
use crate::uplink::Uplink;

pub fn labels(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// Sink that records what it was offered and answers from a script.
pub struct CollectingSink {
    pub accepted: Vec<String>,
    pub offered: Vec<String>,
    outcomes: Vec<bool>,
}

impl CollectingSink {
    pub fn accepting() -> Self {
        Self::with_outcomes(Vec::new())
    }

    /// Refuse the `index`-th offer (0-based) and accept every other one.
    pub fn failing_at(index: usize) -> Self {
        let mut outcomes = vec![true; index + 1];
        outcomes[index] = false;
        Self::with_outcomes(outcomes)
    }

    /// Answer offers from `outcomes` in order; offers past the end succeed.
    pub fn with_outcomes(outcomes: Vec<bool>) -> Self {
        Self {
            accepted: Vec::new(),
            offered: Vec::new(),
            outcomes,
        }
    }
}

impl RecordSink for CollectingSink {
    async fn accept(&mut self, record: &str) -> bool {
        let ok = self.outcomes.get(self.offered.len()).copied().unwrap_or(true);
        self.offered.push(record.to_string());
        if ok {
            self.accepted.push(record.to_string());
        }
        ok
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UplinkRefused;

/// Scriptable [`Uplink`] that keeps everything it published.
#[derive(Default)]
pub struct ScriptedUplink {
    pub link_up: bool,
    /// Outcomes of upcoming handshakes; an empty script succeeds
    pub connect_script: VecDeque<bool>,
    /// Outcomes of upcoming publishes; an empty script succeeds
    pub publish_script: VecDeque<bool>,
    /// Drop the session once this many more publishes have gone through
    pub lose_session_after: Option<usize>,
    pub connected: bool,
    pub published: Vec<String>,
    pub connect_attempts: usize,
}

impl ScriptedUplink {
    pub fn healthy() -> Self {
        Self {
            link_up: true,
            ..Self::default()
        }
    }

    pub fn refusing_handshakes(count: usize) -> Self {
        Self {
            link_up: true,
            connect_script: core::iter::repeat_n(false, count).collect(),
            ..Self::default()
        }
    }
}

impl Uplink for ScriptedUplink {
    type Error = UplinkRefused;

    async fn bring_up_link(&mut self) -> bool {
        self.link_up
    }

    async fn connect(&mut self) -> Result<(), UplinkRefused> {
        self.connect_attempts += 1;
        if self.connect_script.pop_front().unwrap_or(true) {
            self.connected = true;
            Ok(())
        } else {
            Err(UplinkRefused)
        }
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn publish(&mut self, record: &str) -> Result<(), UplinkRefused> {
        if !self.connected || !self.publish_script.pop_front().unwrap_or(true) {
            return Err(UplinkRefused);
        }
        self.published.push(record.to_string());
        if let Some(left) = self.lose_session_after.as_mut() {
            *left = left.saturating_sub(1);
            if *left == 0 {
                self.connected = false;
                self.lose_session_after = None;
            }
        }
        Ok(())
    }

    fn disconnect(&mut self) {
        self.connected = false;
    }
}

pub type TestChannel = EventChannel;

/// Collect every event currently waiting for `subscriber`, rendered as lines.
pub fn drain_lines(subscriber: &mut EventSubscriber<'_>) -> Vec<String> {
    let mut lines = Vec::new();
    while let Some(event) = subscriber.try_next_message_pure() {
        lines.push(event.to_string());
    }
    lines
}
