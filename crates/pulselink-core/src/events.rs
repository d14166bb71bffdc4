//! Operator-facing event stream
//!
//! The controller publishes one [`NodeEvent`] per observable action. Events are
//! sent with `publish_immediate`, so a slow subscriber loses the oldest events
//! instead of stalling the control loop. `Display` renders each event as the
//! line an operator sees on the console.

use core::fmt::{self, Display};

use embassy_sync::{
    blocking_mutex::raw::CriticalSectionRawMutex,
    pubsub::{PubSubChannel, Publisher, Subscriber},
};

/// Events buffered per subscriber before the oldest is overwritten
pub const EVENT_CHANNEL_CAPACITY: usize = 32;

/// - Subscriber 0: console printer
/// - Subscriber 1: spare (tests, remote diagnostics)
pub const EVENT_SUBSCRIBERS: usize = 2;

/// Only the delivery controller publishes
pub const EVENT_PUBLISHERS: usize = 1;

/// Longest unknown command echoed back; longer input is cut
pub const MAX_ECHOED_COMMAND: usize = 32;

pub type EventChannel = PubSubChannel<
    CriticalSectionRawMutex,
    NodeEvent,
    EVENT_CHANNEL_CAPACITY,
    EVENT_SUBSCRIBERS,
    EVENT_PUBLISHERS,
>;

pub type EventPublisher<'a> = Publisher<
    'a,
    CriticalSectionRawMutex,
    NodeEvent,
    EVENT_CHANNEL_CAPACITY,
    EVENT_SUBSCRIBERS,
    EVENT_PUBLISHERS,
>;

pub type EventSubscriber<'a> = Subscriber<
    'a,
    CriticalSectionRawMutex,
    NodeEvent,
    EVENT_CHANNEL_CAPACITY,
    EVENT_SUBSCRIBERS,
    EVENT_PUBLISHERS,
>;

#[derive(Debug, Clone, PartialEq)]
pub enum NodeEvent {
    /// A sample was admitted to the queue
    Enqueued { size: usize },
    /// The queue refused a sample; it is dropped unless published directly
    EnqueueFailed,
    QueueSize(usize),
    /// A drain pass finished
    Flushed { delivered: usize, failed: usize },
    /// The operator changed the connectivity intent
    IntentChanged(bool),
    Connecting,
    Connected,
    /// Handshake failed; next attempt after `retry_in_ms`
    ConnectFailed { retry_in_ms: u64 },
    /// Lower-level link not available; treated as a failed attempt
    LinkDown { retry_in_ms: u64 },
    /// Liveness check found the session gone
    ConnectionLost,
    /// Session closed because the intent was withdrawn
    Disconnected,
    /// A sample published directly (bypassing the queue) was refused
    PublishFailed,
    /// The queue could not be read while draining
    QueueFault,
    UnknownCommand(heapless::String<MAX_ECHOED_COMMAND>),
}

impl NodeEvent {
    /// Build an [`NodeEvent::UnknownCommand`], cutting the text to fit.
    pub fn unknown_command(text: &str) -> Self {
        let mut echoed = heapless::String::new();
        for c in text.chars() {
            if echoed.push(c).is_err() {
                break;
            }
        }
        Self::UnknownCommand(echoed)
    }
}

impl Display for NodeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Enqueued { .. } => f.write_str("ENQUEUE"),
            Self::EnqueueFailed => f.write_str("[ERROR] ENQUEUE failed"),
            Self::QueueSize(n) => write!(f, "QUEUE_SIZE {}", n),
            Self::Flushed { delivered, .. } => write!(f, "FLUSH {}", delivered),
            Self::IntentChanged(on) => write!(f, "[STATE] CONNECTED={}", on),
            Self::Connecting => f.write_str("[UPLINK] connecting"),
            Self::Connected => f.write_str("[UPLINK] connected"),
            Self::ConnectFailed { retry_in_ms } => {
                write!(f, "[UPLINK] connect failed, retry in {} ms", retry_in_ms)
            }
            Self::LinkDown { retry_in_ms } => {
                write!(f, "[UPLINK] link down, retry in {} ms", retry_in_ms)
            }
            Self::ConnectionLost => f.write_str("[UPLINK] connection lost"),
            Self::Disconnected => f.write_str("[UPLINK] disconnected"),
            Self::PublishFailed => f.write_str("[UPLINK] publish failed"),
            Self::QueueFault => f.write_str("[ERROR] QUEUE fault"),
            Self::UnknownCommand(cmd) => write!(f, "[WARN] Unknown command: {}", cmd),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operator_lines() {
        assert_eq!(NodeEvent::Enqueued { size: 4 }.to_string(), "ENQUEUE");
        assert_eq!(NodeEvent::QueueSize(3).to_string(), "QUEUE_SIZE 3");
        assert_eq!(
            NodeEvent::Flushed {
                delivered: 2,
                failed: 1
            }
            .to_string(),
            "FLUSH 2"
        );
        assert_eq!(
            NodeEvent::IntentChanged(false).to_string(),
            "[STATE] CONNECTED=false"
        );
        assert_eq!(
            NodeEvent::unknown_command("REBOOT").to_string(),
            "[WARN] Unknown command: REBOOT"
        );
    }

    #[test]
    fn test_unknown_command_is_cut_to_fit() {
        let long = "x".repeat(100);
        match NodeEvent::unknown_command(&long) {
            NodeEvent::UnknownCommand(cmd) => assert_eq!(cmd.len(), MAX_ECHOED_COMMAND),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_slow_subscriber_loses_oldest() {
        let channel = EventChannel::new();
        let mut subscriber = channel.subscriber().unwrap();
        let publisher = channel.publisher().unwrap();

        for n in 0..EVENT_CHANNEL_CAPACITY + 5 {
            publisher.publish_immediate(NodeEvent::QueueSize(n));
        }
        assert_eq!(
            subscriber.try_next_message_pure(),
            Some(NodeEvent::QueueSize(5))
        );
    }
}
