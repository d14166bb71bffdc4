use alloc::collections::VecDeque;
use alloc::string::String;

use log::debug;

use super::{BufferedQueue, DrainPolicy, DrainReport, QueueError, RecordSink, check_record};

/// RAM ring buffer of records. Contents are lost on restart.
///
/// Drains with [`DrainPolicy::StopOnFailure`]: a record leaves the ring only
/// once the sink has accepted it, so a connection that drops mid-drain does
/// not silently discard the remainder.
pub struct VolatileQueue {
    records: VecDeque<String>,
    capacity: usize,
}

impl VolatileQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            records: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    /// Iterate buffered records oldest → newest.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.records.iter().map(String::as_str)
    }
}

impl BufferedQueue for VolatileQueue {
    const POLICY: DrainPolicy = DrainPolicy::StopOnFailure;

    fn capacity(&self) -> usize {
        self.capacity
    }

    fn len(&self) -> usize {
        self.records.len()
    }

    fn enqueue(&mut self, record: &str) -> Result<usize, QueueError> {
        check_record(record)?;

        // Allocate before touching the ring so a failure leaves it intact
        let mut owned = String::new();
        owned
            .try_reserve_exact(record.len())
            .map_err(|_| QueueError::OutOfMemory)?;
        owned.push_str(record);

        if self.records.len() >= self.capacity {
            let evicted = self.records.len() + 1 - self.capacity;
            self.records.drain(..evicted);
            debug!("Ring full, evicted {} oldest record(s)", evicted);
        } else {
            self.records
                .try_reserve(1)
                .map_err(|_| QueueError::OutOfMemory)?;
        }
        self.records.push_back(owned);

        Ok(self.records.len())
    }

    async fn drain_all<K: RecordSink>(&mut self, sink: &mut K) -> Result<DrainReport, QueueError> {
        let mut report = DrainReport::default();

        while let Some(record) = self.records.front() {
            report.attempted += 1;
            if !sink.accept(record).await {
                debug!(
                    "Sink refused record, {} left in ring for the next pass",
                    self.records.len()
                );
                break;
            }
            self.records.pop_front();
            report.delivered += 1;
        }

        Ok(report)
    }
}
