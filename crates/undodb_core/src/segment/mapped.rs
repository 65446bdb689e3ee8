//! Memory-mapped segment file.

#![allow(unsafe_code)]

use crate::error::{CoreError, CoreResult};
use crate::segment::header::{Header, DIRTY_OFFSET};
use fs2::FileExt;
use memmap2::{Mmap, MmapMut, MmapOptions};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

enum Map {
    ReadOnly(Mmap),
    ReadWrite(MmapMut),
}

/// A memory-mapped segment file.
///
/// All access goes through offset-based read/write helpers; the segment
/// never hands out pointers, so a remap (open at a different address,
/// [`Segment::grow`]) invalidates nothing.
///
/// Offsets handed to the accessors come from the segment's own
/// bookkeeping; an out-of-range offset means the file is corrupt beyond
/// what this layer can report and panics like any other slice access.
pub struct Segment {
    file: File,
    map: Map,
    path: PathBuf,
    locked: bool,
}

impl Segment {
    /// Creates (or truncates) a segment file of `size` bytes and maps it
    /// read-write. The header is not written; the caller initializes it.
    pub fn create(path: &Path, size: u64) -> CoreResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.set_len(size)?;
        let map = unsafe { MmapOptions::new().map_mut(&file)? };
        Ok(Self {
            file,
            map: Map::ReadWrite(map),
            path: path.to_path_buf(),
            locked: false,
        })
    }

    /// Opens an existing segment file read-write.
    pub fn open_rw(path: &Path) -> CoreResult<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let map = unsafe { MmapOptions::new().map_mut(&file)? };
        Ok(Self {
            file,
            map: Map::ReadWrite(map),
            path: path.to_path_buf(),
            locked: false,
        })
    }

    /// Opens an existing segment file read-only.
    pub fn open_ro(path: &Path) -> CoreResult<Self> {
        let file = OpenOptions::new().read(true).open(path)?;
        let map = unsafe { MmapOptions::new().map(&file)? };
        Ok(Self {
            file,
            map: Map::ReadOnly(map),
            path: path.to_path_buf(),
            locked: false,
        })
    }

    /// Acquires a non-blocking exclusive lock on the segment file.
    pub fn lock_exclusive(&mut self) -> CoreResult<()> {
        if self.file.try_lock_exclusive().is_err() {
            return Err(CoreError::no_access(&self.path));
        }
        self.locked = true;
        Ok(())
    }

    /// Extends the file to `new_size` and remaps it.
    pub fn grow(&mut self, new_size: u64) -> CoreResult<()> {
        debug_assert!(new_size >= self.len());
        self.file.set_len(new_size)?;
        let map = unsafe { MmapOptions::new().map_mut(&self.file)? };
        self.map = Map::ReadWrite(map);
        Ok(())
    }

    /// Whether the segment is mapped writable.
    #[must_use]
    pub fn is_writable(&self) -> bool {
        matches!(self.map, Map::ReadWrite(_))
    }

    /// Mapped length in bytes.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.bytes().len() as u64
    }

    /// Whether the mapping is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes().is_empty()
    }

    /// Path of the underlying file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes a fresh header.
    pub fn write_header(&mut self, header: &Header) {
        let bytes = header.encode();
        self.slice_mut(0, bytes.len()).copy_from_slice(&bytes);
    }

    /// Sets the on-disk dirty byte and flushes it synchronously.
    pub fn set_dirty(&mut self) -> CoreResult<()> {
        if self.read_u8(DIRTY_OFFSET) != 0 {
            return Ok(());
        }
        self.write_u8(DIRTY_OFFSET, 1);
        self.flush_dirty_byte()
    }

    /// Clears the on-disk dirty byte and flushes it synchronously.
    pub fn clear_dirty(&mut self) -> CoreResult<()> {
        if self.read_u8(DIRTY_OFFSET) == 0 {
            return Ok(());
        }
        self.write_u8(DIRTY_OFFSET, 0);
        self.flush_dirty_byte()
    }

    /// Flushes the whole mapping to disk.
    pub fn flush(&self) -> CoreResult<()> {
        if let Map::ReadWrite(map) = &self.map {
            map.flush()?;
        }
        Ok(())
    }

    fn flush_dirty_byte(&self) -> CoreResult<()> {
        if let Map::ReadWrite(map) = &self.map {
            map.flush_range(DIRTY_OFFSET as usize, 1)?;
        }
        Ok(())
    }

    fn bytes(&self) -> &[u8] {
        match &self.map {
            Map::ReadOnly(map) => map,
            Map::ReadWrite(map) => map,
        }
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        match &mut self.map {
            Map::ReadWrite(map) => map,
            Map::ReadOnly(_) => panic!("write access to a read-only segment"),
        }
    }

    /// Borrows `len` bytes at `offset`.
    pub(crate) fn slice(&self, offset: u64, len: usize) -> &[u8] {
        let start = offset as usize;
        &self.bytes()[start..start + len]
    }

    /// Mutably borrows `len` bytes at `offset`.
    pub(crate) fn slice_mut(&mut self, offset: u64, len: usize) -> &mut [u8] {
        let start = offset as usize;
        &mut self.bytes_mut()[start..start + len]
    }

    pub(crate) fn read_u8(&self, offset: u64) -> u8 {
        self.slice(offset, 1)[0]
    }

    pub(crate) fn write_u8(&mut self, offset: u64, value: u8) {
        self.slice_mut(offset, 1)[0] = value;
    }

    pub(crate) fn read_i8(&self, offset: u64) -> i8 {
        self.read_u8(offset) as i8
    }

    pub(crate) fn write_i8(&mut self, offset: u64, value: i8) {
        self.write_u8(offset, value as u8);
    }

    pub(crate) fn read_u16(&self, offset: u64) -> u16 {
        u16::from_le_bytes(self.slice(offset, 2).try_into().expect("2 bytes"))
    }

    pub(crate) fn write_u16(&mut self, offset: u64, value: u16) {
        self.slice_mut(offset, 2).copy_from_slice(&value.to_le_bytes());
    }

    pub(crate) fn read_u32(&self, offset: u64) -> u32 {
        u32::from_le_bytes(self.slice(offset, 4).try_into().expect("4 bytes"))
    }

    pub(crate) fn write_u32(&mut self, offset: u64, value: u32) {
        self.slice_mut(offset, 4).copy_from_slice(&value.to_le_bytes());
    }

    pub(crate) fn read_u64(&self, offset: u64) -> u64 {
        u64::from_le_bytes(self.slice(offset, 8).try_into().expect("8 bytes"))
    }

    pub(crate) fn write_u64(&mut self, offset: u64, value: u64) {
        self.slice_mut(offset, 8).copy_from_slice(&value.to_le_bytes());
    }

    pub(crate) fn read_i64(&self, offset: u64) -> i64 {
        self.read_u64(offset) as i64
    }

    pub(crate) fn write_i64(&mut self, offset: u64, value: i64) {
        self.write_u64(offset, value as u64);
    }

    pub(crate) fn copy_within(&mut self, src: u64, dst: u64, len: usize) {
        let bytes = self.bytes_mut();
        bytes.copy_within(src as usize..src as usize + len, dst as usize);
    }
}

impl std::fmt::Debug for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Segment")
            .field("path", &self.path)
            .field("len", &self.len())
            .field("writable", &self.is_writable())
            .field("locked", &self.locked)
            .finish()
    }
}
