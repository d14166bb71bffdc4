//! Flash-backed queue: one newline-terminated record per line in a single file
//!
//! ## Eviction
//!
//! Dropping the oldest records means rewriting the file without its head.
//! The survivors are first copied into a staging file; the commit point is
//! the removal of the live file, after which the staging file is renamed into
//! place. Recovery on open resolves any interrupted compaction:
//!
//! | live file | staging file | meaning                         | action            |
//! |-----------|--------------|---------------------------------|-------------------|
//! | present   | present      | crashed before the commit point | discard staging   |
//! | missing   | present      | crashed after the commit point  | promote staging   |
//! | missing   | missing      | fresh volume                    | create live file  |
//!
//! A crash can therefore cost at most the records being evicted. A record
//! torn by power loss during append never ends in a newline and is cut off
//! during recovery.

use alloc::string::String;
use alloc::vec::Vec;
use core::fmt::Debug;

use log::{debug, error, info, warn};

use super::{BufferedQueue, DrainPolicy, DrainReport, QueueError, RecordSink, check_record};
use crate::sample::MAX_RECORD_LEN;
use crate::storage::FlashStorage;

pub const QUEUE_FILE: &str = "queue.ndjson";
pub const STAGING_FILE: &str = "queue.tmp";

/// Bytes moved per storage call while scanning or copying
const COPY_CHUNK: usize = 512;

fn storage_err<E: Debug>(operation: &'static str) -> impl FnOnce(E) -> QueueError {
    move |e| {
        error!("Queue storage {} failed: {:?}", operation, e);
        QueueError::Storage { operation }
    }
}

/// Result of a full pass over the live file.
struct Scan {
    /// Non-empty newline-terminated lines
    records: usize,
    /// Length up to and including the last newline
    complete_len: usize,
    total_len: usize,
}

/// Durable [`BufferedQueue`] over any [`FlashStorage`].
///
/// Drains with [`DrainPolicy::BestEffort`]: each record is offered to the sink
/// exactly once per pass and the file is cleared afterwards.
pub struct DurableQueue<F: FlashStorage> {
    storage: F,
    capacity: usize,
    /// Cached record count, kept in step with every mutation
    count: usize,
    /// Cached length of the live file
    bytes: usize,
    /// Set when a failed operation left the files in a state only
    /// [`Self::recover`] can resolve
    needs_recovery: bool,
}

impl<F: FlashStorage> DurableQueue<F> {
    /// Mount the volume (formatting it if it cannot be mounted) and reattach
    /// the existing queue file, repairing any interrupted write.
    pub fn open(mut storage: F, capacity: usize) -> Result<Self, QueueError> {
        if let Err(e) = storage.mount() {
            warn!("Queue volume mount failed ({:?}), formatting", e);
            storage.format().map_err(storage_err("format"))?;
        }

        let mut queue = Self {
            storage,
            capacity: capacity.max(1),
            count: 0,
            bytes: 0,
            needs_recovery: true,
        };
        queue.recover()?;
        info!("Queue reattached with {} record(s)", queue.count);
        Ok(queue)
    }

    /// Count records by scanning the live file instead of using the cache.
    pub fn count_records(&self) -> Result<usize, QueueError> {
        Ok(self.scan()?.records)
    }

    pub fn storage(&self) -> &F {
        &self.storage
    }

    pub fn storage_mut(&mut self) -> &mut F {
        &mut self.storage
    }

    pub fn into_inner(self) -> F {
        self.storage
    }

    fn ensure_recovered(&mut self) -> Result<(), QueueError> {
        if self.needs_recovery {
            self.recover()?;
        }
        Ok(())
    }

    fn recover(&mut self) -> Result<(), QueueError> {
        let has_live = self
            .storage
            .exists(QUEUE_FILE)
            .map_err(storage_err("recover"))?;
        let has_staging = self
            .storage
            .exists(STAGING_FILE)
            .map_err(storage_err("recover"))?;

        match (has_live, has_staging) {
            (true, true) => {
                warn!("Discarding uncommitted queue compaction");
                self.storage
                    .remove(STAGING_FILE)
                    .map_err(storage_err("recover"))?;
            }
            (false, true) => {
                warn!("Completing interrupted queue compaction");
                self.storage
                    .rename(STAGING_FILE, QUEUE_FILE)
                    .map_err(storage_err("recover"))?;
            }
            (false, false) => {
                self.storage
                    .create(QUEUE_FILE)
                    .map_err(storage_err("create"))?;
            }
            (true, false) => {}
        }

        let scan = self.scan()?;
        if scan.complete_len < scan.total_len {
            warn!(
                "Dropping {} byte(s) of a torn record",
                scan.total_len - scan.complete_len
            );
            self.storage
                .truncate(QUEUE_FILE, scan.complete_len)
                .map_err(storage_err("recover"))?;
        }

        self.count = scan.records;
        self.bytes = scan.complete_len;
        self.needs_recovery = false;

        if self.count > self.capacity {
            let excess = self.count - self.capacity;
            warn!(
                "Queue holds {} records over capacity {}, evicting {}",
                self.count, self.capacity, excess
            );
            self.evict(excess)?;
        }
        Ok(())
    }

    fn scan(&self) -> Result<Scan, QueueError> {
        let total_len = self.storage.len(QUEUE_FILE).map_err(storage_err("scan"))?;
        let mut buf = [0u8; COPY_CHUNK];
        let mut scan = Scan {
            records: 0,
            complete_len: 0,
            total_len,
        };
        let mut line_has_bytes = false;
        let mut offset = 0;

        while offset < total_len {
            let n = self
                .storage
                .read_at(QUEUE_FILE, offset, &mut buf)
                .map_err(storage_err("scan"))?;
            if n == 0 {
                break;
            }
            for (i, &b) in buf[..n].iter().enumerate() {
                if b == b'\n' {
                    if line_has_bytes {
                        scan.records += 1;
                    }
                    scan.complete_len = offset + i + 1;
                    line_has_bytes = false;
                } else {
                    line_has_bytes = true;
                }
            }
            offset += n;
        }
        Ok(scan)
    }

    /// Byte offset just past the `records`-th record.
    fn offset_after(&self, records: usize) -> Result<usize, QueueError> {
        let mut buf = [0u8; COPY_CHUNK];
        let mut seen = 0;
        let mut line_has_bytes = false;
        let mut offset = 0;

        while seen < records && offset < self.bytes {
            let want = (self.bytes - offset).min(COPY_CHUNK);
            let n = self
                .storage
                .read_at(QUEUE_FILE, offset, &mut buf[..want])
                .map_err(storage_err("scan"))?;
            if n == 0 {
                break;
            }
            for (i, &b) in buf[..n].iter().enumerate() {
                if b == b'\n' {
                    if line_has_bytes {
                        seen += 1;
                        if seen == records {
                            return Ok(offset + i + 1);
                        }
                    }
                    line_has_bytes = false;
                } else {
                    line_has_bytes = true;
                }
            }
            offset += n;
        }
        Ok(offset)
    }

    /// Drop the `records` oldest records.
    fn evict(&mut self, records: usize) -> Result<(), QueueError> {
        let start = self.offset_after(records)?;
        let end = self.bytes;
        self.compact(start, end)?;
        self.count = self.count.saturating_sub(records);
        self.bytes = end - start;
        debug!("Evicted {} oldest record(s)", records);
        Ok(())
    }

    /// Rewrite the live file to hold only bytes `start..end`.
    fn compact(&mut self, start: usize, end: usize) -> Result<(), QueueError> {
        if let Err(e) = self.stage(start, end) {
            if let Err(cleanup) = self.storage.remove(STAGING_FILE) {
                debug!("Staging cleanup failed: {:?}", cleanup);
            }
            return Err(e);
        }

        if let Err(e) = self.storage.remove(QUEUE_FILE) {
            if let Err(cleanup) = self.storage.remove(STAGING_FILE) {
                debug!("Staging cleanup failed: {:?}", cleanup);
            }
            return Err(storage_err("commit")(e));
        }

        // Committed: from here on the staging file is the queue
        if let Err(e) = self.storage.rename(STAGING_FILE, QUEUE_FILE) {
            self.needs_recovery = true;
            return Err(storage_err("commit")(e));
        }
        Ok(())
    }

    fn stage(&mut self, start: usize, end: usize) -> Result<(), QueueError> {
        self.storage
            .create(STAGING_FILE)
            .map_err(storage_err("stage"))?;

        let mut buf = [0u8; COPY_CHUNK];
        let mut offset = start;
        while offset < end {
            let want = (end - offset).min(COPY_CHUNK);
            let n = self
                .storage
                .read_at(QUEUE_FILE, offset, &mut buf[..want])
                .map_err(storage_err("stage"))?;
            if n == 0 {
                error!("Queue file ended {} bytes early while staging", end - offset);
                return Err(QueueError::Storage { operation: "stage" });
            }
            self.storage
                .append(STAGING_FILE, &buf[..n])
                .map_err(storage_err("stage"))?;
            offset += n;
        }
        Ok(())
    }

    /// Drop the records an aborted drain already offered, keeping the rest.
    fn drop_offered(&mut self, offered: usize) {
        if offered == 0 {
            return;
        }
        if let Err(e) = self.evict(offered) {
            error!(
                "Could not drop {} already offered record(s) ({}); they will be sent again",
                offered, e
            );
        }
    }

    /// Cut the live file back to `len` after a failed insertion.
    fn rollback(&mut self, len: usize) {
        if let Err(e) = self.storage.truncate(QUEUE_FILE, len) {
            error!(
                "Queue rollback failed ({:?}); recovery will drop the torn tail",
                e
            );
            self.needs_recovery = true;
        }
    }
}

impl<F: FlashStorage> BufferedQueue for DurableQueue<F> {
    const POLICY: DrainPolicy = DrainPolicy::BestEffort;

    fn capacity(&self) -> usize {
        self.capacity
    }

    fn len(&self) -> usize {
        self.count
    }

    fn enqueue(&mut self, record: &str) -> Result<usize, QueueError> {
        check_record(record)?;
        self.ensure_recovered()?;

        let prev_bytes = self.bytes;
        let mut line = String::with_capacity(record.len() + 1);
        line.push_str(record);
        line.push('\n');

        // One append per record keeps the newline as the last byte written,
        // so a torn write is never mistaken for a complete record
        if let Err(e) = self.storage.append(QUEUE_FILE, line.as_bytes()) {
            let err = storage_err("append")(e);
            self.rollback(prev_bytes);
            return Err(err);
        }
        self.bytes += line.len();
        self.count += 1;

        if self.count > self.capacity {
            let excess = self.count - self.capacity;
            if let Err(e) = self.evict(excess) {
                if self.needs_recovery {
                    // Past the commit point the insertion can only be
                    // completed, not undone
                    self.recover()?;
                    return Ok(self.count);
                }
                self.count -= 1;
                self.bytes = prev_bytes;
                self.rollback(prev_bytes);
                return Err(e);
            }
        }

        Ok(self.count)
    }

    async fn drain_all<K: RecordSink>(&mut self, sink: &mut K) -> Result<DrainReport, QueueError> {
        self.ensure_recovered()?;

        let mut report = DrainReport::default();
        let mut buf = [0u8; COPY_CHUNK];
        let mut line: Vec<u8> = Vec::with_capacity(MAX_RECORD_LEN);
        let mut overlong = false;
        let mut offset = 0;
        let end = self.bytes;

        while offset < end {
            let want = (end - offset).min(COPY_CHUNK);
            let n = match self.storage.read_at(QUEUE_FILE, offset, &mut buf[..want]) {
                Ok(n) => n,
                Err(e) => {
                    let err = storage_err("read")(e);
                    self.drop_offered(report.attempted);
                    return Err(err);
                }
            };
            if n == 0 {
                break;
            }
            offset += n;

            for &b in &buf[..n] {
                if b != b'\n' {
                    if line.len() < MAX_RECORD_LEN {
                        line.push(b);
                    } else {
                        overlong = true;
                    }
                    continue;
                }
                if line.is_empty() {
                    continue;
                }

                report.attempted += 1;
                match core::str::from_utf8(&line) {
                    Ok(record) if !overlong => {
                        if sink.accept(record).await {
                            report.delivered += 1;
                        }
                    }
                    _ => warn!("Dropping unreadable queued record"),
                }
                line.clear();
                overlong = false;
            }
        }

        // Every record has had its one attempt
        self.storage
            .truncate(QUEUE_FILE, 0)
            .map_err(storage_err("clear"))?;
        self.count = 0;
        self.bytes = 0;

        Ok(report)
    }
}
