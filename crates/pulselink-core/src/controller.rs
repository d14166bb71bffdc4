//! Connectivity-gated delivery of samples
//!
//! [`DeliveryController`] owns the queue and the uplink. It tracks the actual
//! channel state separately from the operator's intent:
//!
//! ```text
//!                 intent && link up && backoff elapsed
//!  Disconnected ────────────────────────────────────────▶ Connecting
//!       ▲  ▲                                                 │
//!       │  └──────────── handshake failed (backoff ×2) ◀─────┤
//!       │                                                    │ handshake ok
//!       └──── liveness lost / intent withdrawn ◀── Connected ◀┘ (backoff reset)
//! ```
//!
//! Every sample is persisted before any transmission is attempted. While
//! connected the queue is drained right after each enqueue, so the new
//! record goes out behind the backlog and strict FIFO order holds. The one
//! exception is the fallback when the queue refuses a record: that record is
//! published directly and can overtake older records still queued.
//!
//! Drains follow the backend's [`crate::queue::DrainPolicy`]. With the
//! durable queue a record the uplink refuses is dropped, not retried; the
//! volatile ring keeps it and everything behind it for the next drain.

use log::{debug, error, info, warn};

use crate::backoff::Backoff;
use crate::config::BackoffConfig;
use crate::events::{EventPublisher, NodeEvent};
use crate::queue::BufferedQueue;
use crate::sample::Sample;
use crate::uplink::{Uplink, UplinkSink};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Disconnected,
    Connecting,
    Connected,
}

pub struct DeliveryController<'a, Q: BufferedQueue, U: Uplink> {
    queue: Q,
    uplink: U,
    backoff: Backoff,
    state: ChannelState,
    /// Intent as of the previous [`Self::poll`], for edge detection
    intent: bool,
    events: EventPublisher<'a>,
}

impl<'a, Q: BufferedQueue, U: Uplink> DeliveryController<'a, Q, U> {
    pub fn new(queue: Q, uplink: U, backoff: BackoffConfig, events: EventPublisher<'a>) -> Self {
        Self {
            queue,
            uplink,
            backoff: Backoff::new(backoff),
            state: ChannelState::Disconnected,
            intent: false,
            events,
        }
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    /// Intent observed by the last [`Self::poll`].
    pub fn intent(&self) -> bool {
        self.intent
    }

    pub fn backoff(&self) -> &Backoff {
        &self.backoff
    }

    pub fn queue(&self) -> &Q {
        &self.queue
    }

    pub fn queue_mut(&mut self) -> &mut Q {
        &mut self.queue
    }

    pub fn uplink(&self) -> &U {
        &self.uplink
    }

    pub fn uplink_mut(&mut self) -> &mut U {
        &mut self.uplink
    }

    pub fn emit(&self, event: NodeEvent) {
        debug!("Event: {}", event);
        self.events.publish_immediate(event);
    }

    pub fn report_queue_size(&self) {
        self.emit(NodeEvent::QueueSize(self.queue.len()));
    }

    /// Run once per loop iteration with the current intent flag.
    ///
    /// A false→true edge connects immediately (ignoring any pending backoff)
    /// and drains the backlog; a true→false edge closes the session. While the
    /// intent stays true the connection is maintained and a fresh connection
    /// drains whatever accumulated while it was down.
    pub async fn poll(&mut self, now_ms: u64, intent: bool) {
        if intent != self.intent {
            self.apply_intent(now_ms, intent).await;
            return;
        }

        if !intent {
            return;
        }

        let was_connected = self.state == ChannelState::Connected;
        self.maintain_connection(now_ms).await;
        if !was_connected && self.state == ChannelState::Connected && !self.queue.is_empty() {
            self.drain(now_ms).await;
            self.report_queue_size();
        }
    }

    /// Apply an operator command in place of [`Self::poll`].
    ///
    /// Unlike a value change seen by `poll`, every command takes full effect:
    /// `true` reports the state, connects if needed and drains; `false`
    /// reports the state and closes any open session. Both end with the
    /// queue size.
    pub async fn command(&mut self, now_ms: u64, online: bool) {
        self.apply_intent(now_ms, online).await;
    }

    async fn apply_intent(&mut self, now_ms: u64, intent: bool) {
        self.intent = intent;
        info!("Connectivity intent set to {}", intent);
        self.emit(NodeEvent::IntentChanged(intent));

        if intent {
            self.backoff.retry_now(now_ms);
            self.maintain_connection(now_ms).await;
            if self.state == ChannelState::Connected {
                self.drain(now_ms).await;
            }
        } else if self.state == ChannelState::Connected {
            self.uplink.disconnect();
            self.state = ChannelState::Disconnected;
            self.emit(NodeEvent::Disconnected);
        }
        self.report_queue_size();
    }

    /// Persist a freshly produced sample and, when online, flush the queue.
    pub async fn on_sample(&mut self, now_ms: u64, sample: &Sample) {
        debug!("{}", sample);
        let record = sample.to_record();
        let online = self.intent && self.state == ChannelState::Connected;

        match self.queue.enqueue(&record) {
            Ok(size) => self.emit(NodeEvent::Enqueued { size }),
            Err(e) => {
                error!("Failed to enqueue sample at {} ms: {}", sample.timestamp_ms, e);
                self.emit(NodeEvent::EnqueueFailed);
                if online {
                    self.publish_direct(now_ms, &record).await;
                }
            }
        }

        if online && !self.queue.is_empty() {
            self.drain(now_ms).await;
        }
        self.report_queue_size();
    }

    async fn publish_direct(&mut self, now_ms: u64, record: &str) {
        if let Err(e) = self.uplink.publish(record).await {
            warn!("Direct publish failed: {:?}", e);
            self.emit(NodeEvent::PublishFailed);
        }
        self.check_liveness(now_ms);
    }

    async fn maintain_connection(&mut self, now_ms: u64) {
        match self.state {
            ChannelState::Connected => self.check_liveness(now_ms),
            ChannelState::Disconnected if self.backoff.ready(now_ms) => {
                self.try_connect(now_ms).await;
            }
            _ => {}
        }
    }

    async fn try_connect(&mut self, now_ms: u64) {
        if !self.uplink.bring_up_link().await {
            let retry_in_ms = self.backoff.on_failure(now_ms);
            warn!("Link layer down, retrying in {} ms", retry_in_ms);
            self.emit(NodeEvent::LinkDown { retry_in_ms });
            return;
        }

        self.state = ChannelState::Connecting;
        self.emit(NodeEvent::Connecting);

        match self.uplink.connect().await {
            Ok(()) => {
                self.state = ChannelState::Connected;
                self.backoff.on_success();
                info!("Uplink connected");
                self.emit(NodeEvent::Connected);
            }
            Err(e) => {
                self.state = ChannelState::Disconnected;
                let retry_in_ms = self.backoff.on_failure(now_ms);
                warn!(
                    "Uplink handshake failed ({:?}), retrying in {} ms",
                    e, retry_in_ms
                );
                self.emit(NodeEvent::ConnectFailed { retry_in_ms });
            }
        }
    }

    fn check_liveness(&mut self, now_ms: u64) {
        if self.state == ChannelState::Connected && !self.uplink.is_connected() {
            warn!("Uplink session lost");
            self.state = ChannelState::Disconnected;
            self.backoff.retry_now(now_ms);
            self.emit(NodeEvent::ConnectionLost);
        }
    }

    async fn drain(&mut self, now_ms: u64) {
        let mut sink = UplinkSink::new(&mut self.uplink);
        let result = self.queue.drain_all(&mut sink).await;
        match result {
            Ok(report) => {
                if report.failed() > 0 {
                    warn!(
                        "Drain delivered {} of {} record(s)",
                        report.delivered, report.attempted
                    );
                }
                self.emit(NodeEvent::Flushed {
                    delivered: report.delivered,
                    failed: report.failed(),
                });
            }
            Err(e) => {
                error!("Drain aborted: {}", e);
                self.emit(NodeEvent::QueueFault);
            }
        }
        self.check_liveness(now_ms);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{DurableQueue, VolatileQueue};
    use crate::storage::MemFlash;
    use crate::test_support::{ScriptedUplink, TestChannel, drain_lines, labels};
    use embassy_futures::block_on;

    fn sample(timestamp_ms: u64) -> Sample {
        Sample {
            timestamp_ms,
            temperature: Some(21.5),
            humidity: Some(40.25),
            rate_bpm: 72,
            connected: false,
        }
    }

    fn records(timestamps: &[u64]) -> Vec<String> {
        timestamps.iter().map(|&t| sample(t).to_record()).collect()
    }

    fn check_offline_backlog_flushes_on_reconnect<Q: BufferedQueue>(queue: Q) {
        let channel = TestChannel::new();
        let mut events = channel.subscriber().unwrap();
        let mut controller = DeliveryController::new(
            queue,
            ScriptedUplink::healthy(),
            BackoffConfig::default(),
            channel.publisher().unwrap(),
        );

        for t in [10_000, 20_000, 30_000] {
            block_on(controller.poll(t, false));
            block_on(controller.on_sample(t, &sample(t)));
        }
        assert_eq!(controller.queue().len(), 3);
        assert!(controller.uplink().published.is_empty());
        assert_eq!(controller.uplink().connect_attempts, 0);
        assert_eq!(
            drain_lines(&mut events),
            labels(&[
                "ENQUEUE",
                "QUEUE_SIZE 1",
                "ENQUEUE",
                "QUEUE_SIZE 2",
                "ENQUEUE",
                "QUEUE_SIZE 3"
            ])
        );

        block_on(controller.poll(31_000, true));
        assert_eq!(
            controller.uplink().published,
            records(&[10_000, 20_000, 30_000])
        );
        assert!(controller.queue().is_empty());
        assert_eq!(
            drain_lines(&mut events),
            labels(&[
                "[STATE] CONNECTED=true",
                "[UPLINK] connecting",
                "[UPLINK] connected",
                "FLUSH 3",
                "QUEUE_SIZE 0"
            ])
        );
    }

    #[test]
    fn test_offline_backlog_flushes_on_reconnect() {
        check_offline_backlog_flushes_on_reconnect(VolatileQueue::new(16));
        check_offline_backlog_flushes_on_reconnect(
            DurableQueue::open(MemFlash::new(), 16).unwrap(),
        );
    }

    #[test]
    fn test_online_sample_is_sent_once_through_the_queue() {
        let channel = TestChannel::new();
        let mut events = channel.subscriber().unwrap();
        let mut controller = DeliveryController::new(
            VolatileQueue::new(16),
            ScriptedUplink::healthy(),
            BackoffConfig::default(),
            channel.publisher().unwrap(),
        );
        block_on(controller.poll(0, true));
        drain_lines(&mut events);

        block_on(controller.poll(10_000, true));
        block_on(controller.on_sample(10_000, &sample(10_000)));

        assert_eq!(controller.uplink().published, records(&[10_000]));
        assert_eq!(
            drain_lines(&mut events),
            labels(&["ENQUEUE", "FLUSH 1", "QUEUE_SIZE 0"])
        );
    }

    #[test]
    fn test_failed_handshakes_back_off_exponentially() {
        let channel = TestChannel::new();
        let mut events = channel.subscriber().unwrap();
        let mut controller = DeliveryController::new(
            VolatileQueue::new(16),
            ScriptedUplink::refusing_handshakes(2),
            BackoffConfig {
                floor_ms: 1_000,
                ceiling_ms: 30_000,
            },
            channel.publisher().unwrap(),
        );

        block_on(controller.poll(1_000, true));
        assert_eq!(controller.state(), ChannelState::Disconnected);
        assert_eq!(controller.backoff().next_attempt_at(), 3_000);

        block_on(controller.poll(2_999, true));
        assert_eq!(controller.uplink().connect_attempts, 1);

        block_on(controller.poll(3_000, true));
        assert_eq!(controller.uplink().connect_attempts, 2);
        assert_eq!(controller.backoff().next_attempt_at(), 7_000);

        block_on(controller.poll(7_000, true));
        assert_eq!(controller.state(), ChannelState::Connected);
        assert_eq!(controller.backoff().current_delay_ms(), 1_000);

        assert_eq!(
            drain_lines(&mut events),
            labels(&[
                "[STATE] CONNECTED=true",
                "[UPLINK] connecting",
                "[UPLINK] connect failed, retry in 2000 ms",
                "QUEUE_SIZE 0",
                "[UPLINK] connecting",
                "[UPLINK] connect failed, retry in 4000 ms",
                "[UPLINK] connecting",
                "[UPLINK] connected"
            ])
        );
    }

    #[test]
    fn test_link_down_counts_as_failed_attempt() {
        let channel = TestChannel::new();
        let mut events = channel.subscriber().unwrap();
        let mut uplink = ScriptedUplink::healthy();
        uplink.link_up = false;
        let mut controller = DeliveryController::new(
            VolatileQueue::new(16),
            uplink,
            BackoffConfig::default(),
            channel.publisher().unwrap(),
        );

        block_on(controller.poll(0, true));
        assert_eq!(controller.uplink().connect_attempts, 0);
        assert_eq!(controller.backoff().next_attempt_at(), 2_000);
        assert_eq!(
            drain_lines(&mut events),
            labels(&[
                "[STATE] CONNECTED=true",
                "[UPLINK] link down, retry in 2000 ms",
                "QUEUE_SIZE 0"
            ])
        );
    }

    #[test]
    fn test_session_loss_mid_drain_keeps_unsent_records() {
        let channel = TestChannel::new();
        let mut events = channel.subscriber().unwrap();
        let mut uplink = ScriptedUplink::healthy();
        uplink.lose_session_after = Some(1);
        let mut controller = DeliveryController::new(
            VolatileQueue::new(16),
            uplink,
            BackoffConfig::default(),
            channel.publisher().unwrap(),
        );
        for t in [10_000, 20_000, 30_000] {
            block_on(controller.on_sample(t, &sample(t)));
        }
        drain_lines(&mut events);

        block_on(controller.poll(31_000, true));
        assert_eq!(controller.state(), ChannelState::Disconnected);
        assert_eq!(controller.queue().len(), 2);
        assert_eq!(
            drain_lines(&mut events),
            labels(&[
                "[STATE] CONNECTED=true",
                "[UPLINK] connecting",
                "[UPLINK] connected",
                "FLUSH 1",
                "[UPLINK] connection lost",
                "QUEUE_SIZE 2"
            ])
        );

        // Loss schedules an immediate retry; reconnecting drains the rest
        block_on(controller.poll(31_050, true));
        assert_eq!(
            controller.uplink().published,
            records(&[10_000, 20_000, 30_000])
        );
        assert_eq!(
            drain_lines(&mut events),
            labels(&[
                "[UPLINK] connecting",
                "[UPLINK] connected",
                "FLUSH 2",
                "QUEUE_SIZE 0"
            ])
        );
    }

    #[test]
    fn test_withdrawn_intent_disconnects_and_buffers() {
        let channel = TestChannel::new();
        let mut events = channel.subscriber().unwrap();
        let mut controller = DeliveryController::new(
            VolatileQueue::new(16),
            ScriptedUplink::healthy(),
            BackoffConfig::default(),
            channel.publisher().unwrap(),
        );
        block_on(controller.poll(0, true));
        drain_lines(&mut events);

        block_on(controller.poll(5_000, false));
        assert!(!controller.uplink().connected);
        block_on(controller.on_sample(10_000, &sample(10_000)));

        assert!(controller.uplink().published.is_empty());
        assert_eq!(controller.queue().len(), 1);
        assert_eq!(
            drain_lines(&mut events),
            labels(&[
                "[STATE] CONNECTED=false",
                "[UPLINK] disconnected",
                "QUEUE_SIZE 0",
                "ENQUEUE",
                "QUEUE_SIZE 1"
            ])
        );
    }

    #[test]
    fn test_storage_fault_falls_back_to_direct_publish() {
        let channel = TestChannel::new();
        let mut events = channel.subscriber().unwrap();
        let mut controller = DeliveryController::new(
            DurableQueue::open(MemFlash::new(), 16).unwrap(),
            ScriptedUplink::healthy(),
            BackoffConfig::default(),
            channel.publisher().unwrap(),
        );
        block_on(controller.poll(0, true));
        drain_lines(&mut events);

        controller.queue_mut().storage_mut().set_capacity(Some(0));
        block_on(controller.on_sample(10_000, &sample(10_000)));

        assert_eq!(controller.uplink().published, records(&[10_000]));
        assert_eq!(
            drain_lines(&mut events),
            labels(&["[ERROR] ENQUEUE failed", "QUEUE_SIZE 0"])
        );
    }

    #[test]
    fn test_storage_fault_offline_drops_sample() {
        let channel = TestChannel::new();
        let mut events = channel.subscriber().unwrap();
        let mut controller = DeliveryController::new(
            DurableQueue::open(MemFlash::new(), 16).unwrap(),
            ScriptedUplink::healthy(),
            BackoffConfig::default(),
            channel.publisher().unwrap(),
        );
        controller.queue_mut().storage_mut().set_capacity(Some(0));
        block_on(controller.on_sample(10_000, &sample(10_000)));

        // The loop keeps running; later samples are accepted again
        controller.queue_mut().storage_mut().set_capacity(None);
        block_on(controller.on_sample(20_000, &sample(20_000)));

        assert!(controller.uplink().published.is_empty());
        assert_eq!(
            drain_lines(&mut events),
            labels(&[
                "[ERROR] ENQUEUE failed",
                "QUEUE_SIZE 0",
                "ENQUEUE",
                "QUEUE_SIZE 1"
            ])
        );
    }
}
