//! Flash-resident file storage used by the durable queue
//!
//! Modelled on small embedded filesystems (SPIFFS/LittleFS/FAT on SD): named
//! flat files, append, positional reads, truncate, rename and a format path
//! that returns a corrupted volume to an empty, valid state.
//!
//! Reads borrow the storage immutably so the queue can count records without
//! mutating anything.

pub mod mem;

pub use mem::{MemFlash, MemFlashError};

pub trait FlashStorage {
    type Error: core::fmt::Debug;

    /// Attach to the volume. Fails if the volume is unformatted or corrupt.
    fn mount(&mut self) -> Result<(), Self::Error>;

    /// Erase the volume and leave it mounted and empty.
    fn format(&mut self) -> Result<(), Self::Error>;

    fn exists(&self, name: &str) -> Result<bool, Self::Error>;

    /// Create `name` empty, truncating it if it already exists.
    fn create(&mut self, name: &str) -> Result<(), Self::Error>;

    /// Size of `name` in bytes.
    fn len(&self, name: &str) -> Result<usize, Self::Error>;

    /// Read up to `buf.len()` bytes starting at `offset`. Returns 0 at EOF.
    fn read_at(&self, name: &str, offset: usize, buf: &mut [u8]) -> Result<usize, Self::Error>;

    /// Append `bytes` to `name`, creating it if missing. On error an unknown
    /// prefix of `bytes` may have been written.
    fn append(&mut self, name: &str, bytes: &[u8]) -> Result<(), Self::Error>;

    /// Shrink `name` to `len` bytes.
    fn truncate(&mut self, name: &str, len: usize) -> Result<(), Self::Error>;

    /// Rename `from` to `to`. `to` must not exist.
    fn rename(&mut self, from: &str, to: &str) -> Result<(), Self::Error>;

    fn remove(&mut self, name: &str) -> Result<(), Self::Error>;
}
