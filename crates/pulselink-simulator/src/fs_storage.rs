//! Host filesystem standing in for the node's flash volume
//!
//! The data directory plays the role of the volume: each queue file is a
//! plain file inside it. Writes are synced before returning so a killed
//! simulator behaves like a node losing power.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::PathBuf;

use log::{info, warn};
use pulselink_core::storage::FlashStorage;

pub struct FsStorage {
    root: PathBuf,
}

impl FsStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }
}

impl FlashStorage for FsStorage {
    type Error = io::Error;

    fn mount(&mut self) -> io::Result<()> {
        fs::create_dir_all(&self.root)?;
        if !fs::metadata(&self.root)?.is_dir() {
            return Err(io::Error::other("data path is not a directory"));
        }
        info!("Mounted data directory {}", self.root.display());
        Ok(())
    }

    fn format(&mut self) -> io::Result<()> {
        warn!("Formatting data directory {}", self.root.display());
        if self.root.is_dir() {
            fs::remove_dir_all(&self.root)?;
        }
        fs::create_dir_all(&self.root)
    }

    fn exists(&self, name: &str) -> io::Result<bool> {
        self.path(name).try_exists()
    }

    fn create(&mut self, name: &str) -> io::Result<()> {
        File::create(self.path(name))?.sync_all()
    }

    fn len(&self, name: &str) -> io::Result<usize> {
        let len = fs::metadata(self.path(name))?.len();
        usize::try_from(len).map_err(io::Error::other)
    }

    fn read_at(&self, name: &str, offset: usize, buf: &mut [u8]) -> io::Result<usize> {
        let mut file = File::open(self.path(name))?;
        file.seek(SeekFrom::Start(offset as u64))?;

        let mut filled = 0;
        while filled < buf.len() {
            match file.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(filled)
    }

    fn append(&mut self, name: &str, bytes: &[u8]) -> io::Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path(name))?;
        file.write_all(bytes)?;
        file.sync_data()
    }

    fn truncate(&mut self, name: &str, len: usize) -> io::Result<()> {
        let file = OpenOptions::new().write(true).open(self.path(name))?;
        file.set_len(len as u64)?;
        file.sync_data()
    }

    fn rename(&mut self, from: &str, to: &str) -> io::Result<()> {
        let target = self.path(to);
        if target.try_exists()? {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("{} already exists", to),
            ));
        }
        fs::rename(self.path(from), target)
    }

    fn remove(&mut self, name: &str) -> io::Result<()> {
        fs::remove_file(self.path(name))
    }
}
