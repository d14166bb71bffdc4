//! Bounded FIFO buffer for serialized samples
//!
//! Two interchangeable backends implement [`BufferedQueue`]:
//!
//! - [`DurableQueue`]: newline-delimited records in a flash file, reattached on
//!   boot. Drains **best-effort**: every record is offered to the sink once and
//!   the queue is cleared afterwards, whatever the sink answered. A pass cut
//!   short by a storage error drops the records it already offered.
//! - [`VolatileQueue`]: RAM ring, lost on restart. Drains **conservatively**:
//!   stops at the first record the sink refuses and keeps it and everything
//!   after it for the next pass.
//!
//! Both evict the oldest records when an insertion would exceed capacity, and
//! both admit a record completely or not at all.

pub mod durable;
pub mod volatile;

pub use durable::DurableQueue;
pub use volatile::VolatileQueue;

use thiserror_no_std::Error;

use crate::sample::MAX_RECORD_LEN;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    #[error("Storage failure during {operation}")]
    Storage { operation: &'static str },
    #[error("Record rejected: {0}")]
    InvalidRecord(&'static str),
    #[error("Out of memory")]
    OutOfMemory,
}

/// How a backend treats sink failures while draining.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainPolicy {
    /// Offer every record once, then clear the queue (at-most-once per pass).
    BestEffort,
    /// Stop at the first refused record; it and its successors stay queued.
    StopOnFailure,
}

/// Outcome of one drain pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Records offered to the sink
    pub attempted: usize,
    /// Records the sink accepted
    pub delivered: usize,
}

impl DrainReport {
    pub fn failed(&self) -> usize {
        self.attempted - self.delivered
    }
}

/// Destination for drained records, typically the live uplink.
#[allow(async_fn_in_trait)]
pub trait RecordSink {
    /// Deliver one record. `false` means the record was not accepted.
    async fn accept(&mut self, record: &str) -> bool;
}

#[allow(async_fn_in_trait)]
pub trait BufferedQueue {
    /// Drain semantics of this backend.
    const POLICY: DrainPolicy;

    /// Maximum number of records retained.
    fn capacity(&self) -> usize;

    /// Number of records currently buffered.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append `record`, evicting the oldest records if capacity would be
    /// exceeded. Returns the size afterwards. On error the queue is unchanged.
    fn enqueue(&mut self, record: &str) -> Result<usize, QueueError>;

    /// Deliver buffered records oldest first according to [`Self::POLICY`].
    async fn drain_all<K: RecordSink>(&mut self, sink: &mut K) -> Result<DrainReport, QueueError>;
}

/// Records must be non-empty single lines that fit the line buffer.
pub(crate) fn check_record(record: &str) -> Result<(), QueueError> {
    if record.is_empty() {
        return Err(QueueError::InvalidRecord("empty"));
    }
    if record.len() > MAX_RECORD_LEN {
        return Err(QueueError::InvalidRecord("too long"));
    }
    if record.contains(['\n', '\r']) {
        return Err(QueueError::InvalidRecord("contains a line break"));
    }
    Ok(())
}
