//! RAM-backed [`FlashStorage`] with fault injection
//!
//! Behaves like a tiny flash filesystem and can be told to run out of space,
//! come up corrupted, lose power after a given number of write operations,
//! or fail a single read.
//! A torn append at power loss persists the first half of the write.

use alloc::collections::BTreeMap;
use alloc::string::{String, ToString};
use alloc::vec::Vec;
use core::cell::Cell;

use thiserror_no_std::Error;

use super::FlashStorage;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemFlashError {
    #[error("Volume is not mounted")]
    NotMounted,
    #[error("Volume is corrupt")]
    Corrupt,
    #[error("File not found")]
    NotFound,
    #[error("Target file already exists")]
    AlreadyExists,
    #[error("No space left on volume")]
    NoSpace,
    #[error("Power lost")]
    PowerLoss,
    #[error("Read error")]
    ReadFault,
}

#[derive(Debug, Default)]
pub struct MemFlash {
    files: BTreeMap<String, Vec<u8>>,
    mounted: bool,
    corrupt: bool,
    capacity_bytes: Option<usize>,
    /// Remaining write operations before the power is cut
    writes_until_power_loss: Option<usize>,
    powered_off: bool,
    /// Successful reads left before one read fails
    reads_until_fault: Cell<Option<usize>>,
}

impl MemFlash {
    /// An empty, formatted volume with unlimited space.
    pub fn new() -> Self {
        Self::default()
    }

    /// An empty volume holding at most `bytes` bytes across all files.
    pub fn with_capacity(bytes: usize) -> Self {
        Self {
            capacity_bytes: Some(bytes),
            ..Self::default()
        }
    }

    /// A volume whose first mount fails until it is formatted.
    pub fn corrupted() -> Self {
        Self {
            corrupt: true,
            ..Self::default()
        }
    }

    /// Allow `writes` more mutating operations, then lose power on the next.
    pub fn cut_power_after(&mut self, writes: usize) {
        self.writes_until_power_loss = Some(writes);
    }

    /// Let `reads` more reads succeed, then fail the next one once.
    pub fn fail_read_after(&mut self, reads: usize) {
        self.reads_until_fault.set(Some(reads));
    }

    /// Restore power. The volume must be mounted again, as after a reboot.
    pub fn power_cycle(&mut self) {
        self.powered_off = false;
        self.writes_until_power_loss = None;
        self.mounted = false;
    }

    pub fn is_powered_off(&self) -> bool {
        self.powered_off
    }

    /// Limit the volume to `bytes` bytes (or lift the limit with `None`).
    pub fn set_capacity(&mut self, bytes: Option<usize>) {
        self.capacity_bytes = bytes;
    }

    /// Raw contents of `name`, bypassing mount state.
    pub fn file(&self, name: &str) -> Option<&[u8]> {
        self.files.get(name).map(Vec::as_slice)
    }

    /// Replace the raw contents of `name`, bypassing mount state.
    pub fn put_file(&mut self, name: &str, bytes: &[u8]) {
        self.files.insert(name.to_string(), bytes.to_vec());
    }

    pub fn used_bytes(&self) -> usize {
        self.files.values().map(Vec::len).sum()
    }

    fn check_access(&self) -> Result<(), MemFlashError> {
        if self.powered_off {
            return Err(MemFlashError::PowerLoss);
        }
        if !self.mounted {
            return Err(MemFlashError::NotMounted);
        }
        Ok(())
    }

    /// Account for one mutating operation. `Err` means power was lost before
    /// the operation could run.
    fn begin_write(&mut self) -> Result<(), MemFlashError> {
        self.check_access()?;
        match self.writes_until_power_loss {
            Some(0) => {
                self.powered_off = true;
                Err(MemFlashError::PowerLoss)
            }
            Some(n) => {
                self.writes_until_power_loss = Some(n - 1);
                Ok(())
            }
            None => Ok(()),
        }
    }

    fn free_bytes(&self) -> usize {
        match self.capacity_bytes {
            Some(cap) => cap.saturating_sub(self.used_bytes()),
            None => usize::MAX,
        }
    }
}

impl FlashStorage for MemFlash {
    type Error = MemFlashError;

    fn mount(&mut self) -> Result<(), Self::Error> {
        if self.powered_off {
            return Err(MemFlashError::PowerLoss);
        }
        if self.corrupt {
            return Err(MemFlashError::Corrupt);
        }
        self.mounted = true;
        Ok(())
    }

    fn format(&mut self) -> Result<(), Self::Error> {
        if self.powered_off {
            return Err(MemFlashError::PowerLoss);
        }
        self.files.clear();
        self.corrupt = false;
        self.mounted = true;
        Ok(())
    }

    fn exists(&self, name: &str) -> Result<bool, Self::Error> {
        self.check_access()?;
        Ok(self.files.contains_key(name))
    }

    fn create(&mut self, name: &str) -> Result<(), Self::Error> {
        self.begin_write()?;
        self.files.insert(name.to_string(), Vec::new());
        Ok(())
    }

    fn len(&self, name: &str) -> Result<usize, Self::Error> {
        self.check_access()?;
        self.files
            .get(name)
            .map(Vec::len)
            .ok_or(MemFlashError::NotFound)
    }

    fn read_at(&self, name: &str, offset: usize, buf: &mut [u8]) -> Result<usize, Self::Error> {
        self.check_access()?;
        match self.reads_until_fault.get() {
            Some(0) => {
                self.reads_until_fault.set(None);
                return Err(MemFlashError::ReadFault);
            }
            Some(n) => self.reads_until_fault.set(Some(n - 1)),
            None => {}
        }
        let data = self.files.get(name).ok_or(MemFlashError::NotFound)?;
        if offset >= data.len() {
            return Ok(0);
        }
        let n = buf.len().min(data.len() - offset);
        buf[..n].copy_from_slice(&data[offset..offset + n]);
        Ok(n)
    }

    fn append(&mut self, name: &str, bytes: &[u8]) -> Result<(), Self::Error> {
        let was_powered = !self.powered_off;
        if let Err(e) = self.begin_write() {
            if was_powered && self.powered_off {
                // Torn write: half of the data made it to flash
                let torn = &bytes[..bytes.len() / 2];
                self.files
                    .entry(name.to_string())
                    .or_default()
                    .extend_from_slice(torn);
            }
            return Err(e);
        }

        let free = self.free_bytes();
        let file = self.files.entry(name.to_string()).or_default();
        if bytes.len() > free {
            file.extend_from_slice(&bytes[..free]);
            return Err(MemFlashError::NoSpace);
        }
        file.extend_from_slice(bytes);
        Ok(())
    }

    fn truncate(&mut self, name: &str, len: usize) -> Result<(), Self::Error> {
        self.begin_write()?;
        let file = self.files.get_mut(name).ok_or(MemFlashError::NotFound)?;
        file.truncate(len);
        Ok(())
    }

    fn rename(&mut self, from: &str, to: &str) -> Result<(), Self::Error> {
        self.begin_write()?;
        if self.files.contains_key(to) {
            return Err(MemFlashError::AlreadyExists);
        }
        let data = self.files.remove(from).ok_or(MemFlashError::NotFound)?;
        self.files.insert(to.to_string(), data);
        Ok(())
    }

    fn remove(&mut self, name: &str) -> Result<(), Self::Error> {
        self.begin_write()?;
        self.files
            .remove(name)
            .map(|_| ())
            .ok_or(MemFlashError::NotFound)
    }
}
