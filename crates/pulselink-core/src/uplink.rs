//! Remote channel toward the collector

use core::fmt::Debug;

use log::warn;

use crate::queue::RecordSink;

/// Transport to the remote collector.
///
/// Implementations bound every call by their own transport timeout; the
/// controller never cancels an attempt.
#[allow(async_fn_in_trait)]
pub trait Uplink {
    type Error: Debug;

    /// Make sure the lower-level link (Wi-Fi, Ethernet, loopback) is up.
    async fn bring_up_link(&mut self) -> bool;

    /// Open a fresh session with the collector.
    async fn connect(&mut self) -> Result<(), Self::Error>;

    /// Liveness of the current session.
    fn is_connected(&self) -> bool;

    async fn publish(&mut self, record: &str) -> Result<(), Self::Error>;

    /// Close the session, if any.
    fn disconnect(&mut self);
}

/// Presents an [`Uplink`] as a drain target.
pub struct UplinkSink<'u, U: Uplink> {
    uplink: &'u mut U,
}

impl<'u, U: Uplink> UplinkSink<'u, U> {
    pub fn new(uplink: &'u mut U) -> Self {
        Self { uplink }
    }
}

impl<U: Uplink> RecordSink for UplinkSink<'_, U> {
    async fn accept(&mut self, record: &str) -> bool {
        match self.uplink.publish(record).await {
            Ok(()) => true,
            Err(e) => {
                warn!("Publish of queued record failed: {:?}", e);
                false
            }
        }
    }
}
