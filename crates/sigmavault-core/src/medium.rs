//! Block medium: the fixed-size physical byte store the engine scatters into.
//!
//! A medium is created pre-filled with OS-random noise so that cells never
//! written by the engine are indistinguishable from cells that were; the
//! signal/noise ratio across the medium stays unmeasurable. Capacity is
//! fixed at open and writes past the end fail with `CapacityExceeded`.

use crate::error::{Result, VaultError};
use crate::hardening::secure_random;
use parking_lot::{Mutex, RwLock};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

/// Advisory capability flags of a backend.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MediumCapabilities {
    pub sparse: bool,
    pub truncate: bool,
    pub range_read: bool,
    pub concurrent: bool,
    pub seekable: bool,
    pub persistent: bool,
}

/// Contract every storage backend satisfies.
///
/// The engine requires `range_read`, `seekable` and `concurrent`; the other
/// flags are advisory.
pub trait BlockMedium: Send + Sync {
    /// Fill `buf` from `offset`.
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()>;

    /// Write `data` at `offset`.
    fn write_at(&self, offset: u64, data: &[u8]) -> Result<()>;

    /// Fixed capacity in bytes.
    fn size(&self) -> u64;

    /// Flush to durable storage where the backend has any.
    fn sync(&self) -> Result<()>;

    fn capabilities(&self) -> MediumCapabilities;

    /// Write single-byte cells; backends override to batch under one lock.
    fn write_cells(&self, cells: &[(u64, u8)]) -> Result<()> {
        for &(addr, byte) in cells {
            self.write_at(addr, &[byte])?;
        }
        Ok(())
    }

    /// Read single-byte cells in order.
    fn read_cells(&self, addrs: &[u64]) -> Result<Vec<u8>> {
        let mut out = vec![0u8; addrs.len()];
        for (slot, &addr) in out.iter_mut().zip(addrs) {
            let mut cell = [0u8];
            self.read_at(addr, &mut cell)?;
            *slot = cell[0];
        }
        Ok(out)
    }
}

fn check_range(offset: u64, len: usize, size: u64) -> Result<()> {
    let end = offset.checked_add(len as u64).ok_or(VaultError::Overflow)?;
    if end > size {
        return Err(VaultError::CapacityExceeded { offset, len: len as u64, size });
    }
    Ok(())
}

/// In-memory medium for tests and ephemeral vaults. Not persistent.
pub struct MemoryMedium {
    data: RwLock<Vec<u8>>,
    size: u64,
}

impl MemoryMedium {
    /// Allocate `size` bytes of fresh noise.
    pub fn new(size: u64) -> Self {
        let mut data = vec![0u8; size as usize];
        secure_random(&mut data);
        MemoryMedium { data: RwLock::new(data), size }
    }

    /// Snapshot of the raw store, for tests.
    pub fn raw(&self) -> Vec<u8> {
        self.data.read().clone()
    }

    /// Overwrite a region with fresh noise, simulating foreign writes.
    pub fn clobber(&self, offset: u64, len: usize) {
        let mut data = self.data.write();
        let end = ((offset as usize) + len).min(data.len());
        secure_random(&mut data[offset as usize..end]);
    }
}

impl BlockMedium for MemoryMedium {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        check_range(offset, buf.len(), self.size)?;
        let data = self.data.read();
        buf.copy_from_slice(&data[offset as usize..offset as usize + buf.len()]);
        Ok(())
    }

    fn write_at(&self, offset: u64, data: &[u8]) -> Result<()> {
        check_range(offset, data.len(), self.size)?;
        let mut store = self.data.write();
        store[offset as usize..offset as usize + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn sync(&self) -> Result<()> {
        Ok(())
    }

    fn capabilities(&self) -> MediumCapabilities {
        MediumCapabilities {
            sparse: false,
            truncate: true,
            range_read: true,
            concurrent: true,
            seekable: true,
            persistent: false,
        }
    }

    fn write_cells(&self, cells: &[(u64, u8)]) -> Result<()> {
        for &(addr, _) in cells {
            check_range(addr, 1, self.size)?;
        }
        let mut store = self.data.write();
        for &(addr, byte) in cells {
            store[addr as usize] = byte;
        }
        Ok(())
    }

    fn read_cells(&self, addrs: &[u64]) -> Result<Vec<u8>> {
        for &addr in addrs {
            check_range(addr, 1, self.size)?;
        }
        let store = self.data.read();
        Ok(addrs.iter().map(|&a| store[a as usize]).collect())
    }
}

/// File-backed persistent medium.
pub struct FileMedium {
    file: Mutex<File>,
    size: u64,
}

impl FileMedium {
    /// Create a new vault file of `size` bytes, materialized with noise.
    pub fn create(path: &Path, size: u64) -> Result<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(|e| VaultError::MediumUnavailable(format!("{}: {e}", path.display())))?;

        let mut noise = vec![0u8; 64 * 1024];
        let mut remaining = size;
        while remaining > 0 {
            let take = remaining.min(noise.len() as u64) as usize;
            secure_random(&mut noise[..take]);
            file.write_all(&noise[..take])?;
            remaining -= take as u64;
        }
        file.sync_all()?;

        Ok(FileMedium { file: Mutex::new(file), size })
    }

    /// Open an existing vault file; the capacity is its current length.
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| VaultError::MediumUnavailable(format!("{}: {e}", path.display())))?;
        let size = file.metadata()?.len();
        if size == 0 {
            return Err(VaultError::MediumUnavailable("vault file is empty".into()));
        }
        Ok(FileMedium { file: Mutex::new(file), size })
    }
}

impl BlockMedium for FileMedium {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        check_range(offset, buf.len(), self.size)?;
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(buf)?;
        Ok(())
    }

    fn write_at(&self, offset: u64, data: &[u8]) -> Result<()> {
        check_range(offset, data.len(), self.size)?;
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)?;
        Ok(())
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn sync(&self) -> Result<()> {
        self.file.lock().sync_all()?;
        Ok(())
    }

    fn capabilities(&self) -> MediumCapabilities {
        MediumCapabilities {
            sparse: false,
            truncate: false,
            range_read: true,
            concurrent: true,
            seekable: true,
            persistent: true,
        }
    }

    fn write_cells(&self, cells: &[(u64, u8)]) -> Result<()> {
        for &(addr, _) in cells {
            check_range(addr, 1, self.size)?;
        }
        let mut file = self.file.lock();
        for &(addr, byte) in cells {
            file.seek(SeekFrom::Start(addr))?;
            file.write_all(&[byte])?;
        }
        Ok(())
    }

    fn read_cells(&self, addrs: &[u64]) -> Result<Vec<u8>> {
        for &addr in addrs {
            check_range(addr, 1, self.size)?;
        }
        let mut file = self.file.lock();
        let mut out = vec![0u8; addrs.len()];
        for (slot, &addr) in out.iter_mut().zip(addrs) {
            let mut cell = [0u8];
            file.seek(SeekFrom::Start(addr))?;
            file.read_exact(&mut cell)?;
            *slot = cell[0];
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_medium_round_trips() {
        let m = MemoryMedium::new(4096);
        m.write_at(100, b"scattered").unwrap();
        let mut buf = [0u8; 9];
        m.read_at(100, &mut buf).unwrap();
        assert_eq!(&buf, b"scattered");
    }

    #[test]
    fn writes_past_capacity_fail() {
        let m = MemoryMedium::new(64);
        assert!(matches!(
            m.write_at(60, b"overflow!"),
            Err(VaultError::CapacityExceeded { .. })
        ));
        assert!(m.write_at(u64::MAX, b"x").is_err());
    }

    #[test]
    fn fresh_medium_reads_as_noise() {
        let m = MemoryMedium::new(4096);
        let mut buf = vec![0u8; 4096];
        m.read_at(0, &mut buf).unwrap();
        // A uniform 4 KiB region has ~16 of each byte value; all-zero or
        // single-valued output would mean the medium leaked structure.
        let zeros = buf.iter().filter(|&&b| b == 0).count();
        assert!(zeros < 256, "unwritten region is not noise-like ({} zeros)", zeros);
    }

    #[test]
    fn batched_cells_round_trip() {
        let m = MemoryMedium::new(1024);
        let cells = vec![(10u64, 0xaa), (500u64, 0xbb), (1023u64, 0xcc)];
        m.write_cells(&cells).unwrap();
        let got = m.read_cells(&[10, 500, 1023]).unwrap();
        assert_eq!(got, vec![0xaa, 0xbb, 0xcc]);
    }

    #[test]
    fn file_medium_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vault.bin");
        {
            let m = FileMedium::create(&path, 8192).unwrap();
            assert_eq!(m.size(), 8192);
            m.write_cells(&[(0, 0x5a), (8191, 0xa5)]).unwrap();
            m.sync().unwrap();
        }
        let m = FileMedium::open(&path).unwrap();
        assert_eq!(m.size(), 8192);
        assert_eq!(m.read_cells(&[0, 8191]).unwrap(), vec![0x5a, 0xa5]);
    }

    #[test]
    fn clobber_changes_cells() {
        let m = MemoryMedium::new(1024);
        m.write_at(0, &[0u8; 1024]).unwrap();
        m.clobber(0, 1024);
        let raw = m.raw();
        assert!(raw.iter().any(|&b| b != 0));
    }
}
