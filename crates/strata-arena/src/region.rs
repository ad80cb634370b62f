//! The mapped region and its suballocator.
//!
//! A [`Region`] is one file, mapped whole, holding the header, the index
//! slot table, and the data area. Read-write regions take an advisory
//! exclusive lock (writer intent); read-only regions take no lock and
//! observe a concurrent writer's state as the OS propagates pages.
//!
//! Allocation is a first-fit free list threaded through freed block
//! payloads, backed by a bump cursor. Every block is preceded by a `u64`
//! capacity header, so freed blocks can be reused and same-size rewrites
//! can happen in place. An allocation either fully succeeds or fails with
//! a capacity error leaving the region untouched.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use memmap2::{Mmap, MmapMut, MmapOptions};
use strata_error::{Result, StrataError};
use strata_types::{OpenMode, RegionOffset};
use tracing::{debug, info};

use crate::header::{
    self, DATA_START, MIN_REGION_SIZE, OFF_BUMP_CURSOR, OFF_FREE_HEAD, REGION_FILE_NAME,
};

/// Alignment of every allocation payload.
const BLOCK_ALIGN: u64 = 8;

/// Bytes of bookkeeping preceding each payload.
const BLOCK_HEADER: u64 = 8;

enum Mapping {
    ReadWrite(MmapMut),
    ReadOnly(Mmap),
}

impl Mapping {
    fn as_slice(&self) -> &[u8] {
        match self {
            Self::ReadWrite(m) => m,
            Self::ReadOnly(m) => m,
        }
    }

    fn as_mut_slice(&mut self) -> &mut [u8] {
        match self {
            Self::ReadWrite(m) => m,
            Self::ReadOnly(_) => unreachable!("write access to a read-only mapping"),
        }
    }
}

/// A memory-mapped region file.
pub struct Region {
    map: Mapping,
    file: File,
    path: PathBuf,
    mode: OpenMode,
    capacity: u64,
}

impl Region {
    /// Open or create the region under the database directory `path`.
    ///
    /// `ReadWrite` creates the directory and file when absent and sizes the
    /// file to `size`; reopening an existing file validates the header and
    /// requires the same size. `ReadOnly` requires both directory and file
    /// to exist and ignores `size`.
    pub fn open(path: &Path, mode: OpenMode, size: u64) -> Result<Self> {
        match mode {
            OpenMode::ReadWrite => Self::open_read_write(path, size),
            OpenMode::ReadOnly => Self::open_read_only(path),
        }
    }

    fn open_read_write(dir: &Path, size: u64) -> Result<Self> {
        if size < MIN_REGION_SIZE {
            return Err(StrataError::invalid_state(format!(
                "region size {size} below minimum {MIN_REGION_SIZE}"
            )));
        }
        fs::create_dir_all(dir)?;
        let path = dir.join(REGION_FILE_NAME);

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        file.try_lock_exclusive()?;

        let existing = file.metadata()?.len();
        let fresh = existing == 0;
        if fresh {
            file.set_len(size)?;
        } else if existing != size {
            fs2::FileExt::unlock(&file)?;
            return Err(StrataError::SizeMismatch {
                expected: size,
                actual: existing,
            });
        }

        // Safety: the file is exclusively locked by this process and sized
        // above; the mapping never outlives `file`.
        let mut map = unsafe { MmapOptions::new().len(size as usize).map_mut(&file)? };

        if fresh {
            header::init_header(&mut map, size);
            info!(path = %path.display(), capacity = size, "region created");
        } else {
            header::validate_header(&map, size)?;
            info!(path = %path.display(), capacity = size, "region reopened");
        }

        Ok(Self {
            map: Mapping::ReadWrite(map),
            file,
            path,
            mode: OpenMode::ReadWrite,
            capacity: size,
        })
    }

    fn open_read_only(dir: &Path) -> Result<Self> {
        if !dir.is_dir() {
            return Err(StrataError::RegionMissing {
                path: dir.to_path_buf(),
            });
        }
        let path = dir.join(REGION_FILE_NAME);
        if !path.is_file() {
            return Err(StrataError::RegionMissing { path });
        }

        let file = OpenOptions::new().read(true).open(&path)?;
        let len = file.metadata()?.len();

        // Safety: read-only shared mapping; a concurrent writer mutates the
        // file in place, which is the documented observation model.
        let map = unsafe { MmapOptions::new().len(len as usize).map(&file)? };
        header::validate_header(&map, len)?;
        info!(path = %path.display(), capacity = len, "region opened read-only");

        Ok(Self {
            map: Mapping::ReadOnly(map),
            file,
            path,
            mode: OpenMode::ReadOnly,
            capacity: len,
        })
    }

    /// Open mode of this region.
    #[inline]
    #[must_use]
    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    /// Total capacity in bytes.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Path of the region file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flush the mapping to disk. No-op for read-only regions.
    pub fn flush(&self) -> Result<()> {
        if let Mapping::ReadWrite(m) = &self.map {
            m.flush()?;
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Raw access
    // -----------------------------------------------------------------------

    /// Borrow `len` bytes at `offset`, bounds-checked against the mapping.
    pub fn bytes(&self, offset: RegionOffset, len: usize) -> Result<&[u8]> {
        let start = offset.get() as usize;
        let end = start.checked_add(len).ok_or_else(|| {
            StrataError::corrupt(format!("byte range overflows at offset {offset}"))
        })?;
        let map = self.map.as_slice();
        if end > map.len() {
            return Err(StrataError::corrupt(format!(
                "byte range [{start}, {end}) outside region of {} bytes",
                map.len()
            )));
        }
        Ok(&map[start..end])
    }

    fn bytes_mut(&mut self, offset: RegionOffset, len: usize) -> Result<&mut [u8]> {
        let start = offset.get() as usize;
        let end = start
            .checked_add(len)
            .filter(|&e| e <= self.capacity as usize)
            .ok_or_else(|| {
                StrataError::corrupt(format!("byte range at offset {offset} outside region"))
            })?;
        Ok(&mut self.map.as_mut_slice()[start..end])
    }

    /// Overwrite `data` at `offset`. The caller must stay within a block it
    /// allocated.
    pub fn write_bytes(&mut self, offset: RegionOffset, data: &[u8]) -> Result<()> {
        self.bytes_mut(offset, data.len())?.copy_from_slice(data);
        Ok(())
    }

    pub(crate) fn read_u32_at(&self, off: usize) -> u32 {
        header::read_u32(self.map.as_slice(), off)
    }

    pub(crate) fn read_u64_at(&self, off: usize) -> u64 {
        header::read_u64(self.map.as_slice(), off)
    }

    pub(crate) fn read_u16_at(&self, off: usize) -> u16 {
        header::read_u16(self.map.as_slice(), off)
    }

    pub(crate) fn write_u16_at(&mut self, off: usize, v: u16) {
        header::write_u16(self.map.as_mut_slice(), off, v);
    }

    pub(crate) fn write_u32_at(&mut self, off: usize, v: u32) {
        header::write_u32(self.map.as_mut_slice(), off, v);
    }

    pub(crate) fn write_u64_at(&mut self, off: usize, v: u64) {
        header::write_u64(self.map.as_mut_slice(), off, v);
    }

    pub(crate) fn copy_within(&mut self, src: std::ops::Range<usize>, dst: usize) {
        self.map.as_mut_slice().copy_within(src, dst);
    }

    // -----------------------------------------------------------------------
    // Suballocator
    // -----------------------------------------------------------------------

    fn block_size(len: usize) -> u64 {
        ((len as u64).max(BLOCK_ALIGN) + BLOCK_ALIGN - 1) & !(BLOCK_ALIGN - 1)
    }

    /// Allocate a block of at least `len` bytes, returning the payload
    /// offset. Fails atomically with a capacity error when the region is
    /// exhausted.
    pub fn allocate(&mut self, len: usize) -> Result<RegionOffset> {
        let need = Self::block_size(len);

        // First fit from the free list.
        let mut prev: Option<u64> = None;
        let mut cur = self.read_u64_at(OFF_FREE_HEAD);
        while cur != 0 {
            let cap = self.read_u64_at(cur as usize - BLOCK_HEADER as usize);
            let next = self.read_u64_at(cur as usize);
            if cap >= need {
                match prev {
                    None => self.write_u64_at(OFF_FREE_HEAD, next),
                    Some(p) => self.write_u64_at(p as usize, next),
                }
                debug!(offset = cur, capacity = cap, requested = len, "block reused");
                return Ok(RegionOffset::new(cur));
            }
            prev = Some(cur);
            cur = next;
        }

        // Bump allocation.
        let cursor = self.read_u64_at(OFF_BUMP_CURSOR);
        let payload = cursor + BLOCK_HEADER;
        let end = payload + need;
        if end > self.capacity {
            let available = self.capacity.saturating_sub(cursor + BLOCK_HEADER);
            return Err(StrataError::Capacity {
                requested: need,
                available,
            });
        }
        self.write_u64_at(cursor as usize, need);
        self.write_u64_at(OFF_BUMP_CURSOR, end);
        Ok(RegionOffset::new(payload))
    }

    /// Return a block to the free list. The payload is clobbered.
    pub fn deallocate(&mut self, offset: RegionOffset) {
        debug_assert!(offset.get() >= DATA_START + BLOCK_HEADER);
        let head = self.read_u64_at(OFF_FREE_HEAD);
        self.write_u64_at(offset.get() as usize, head);
        self.write_u64_at(OFF_FREE_HEAD, offset.get());
    }

    /// Capacity of the block whose payload starts at `offset`.
    #[must_use]
    pub fn block_capacity(&self, offset: RegionOffset) -> u64 {
        self.read_u64_at(offset.get() as usize - BLOCK_HEADER as usize)
    }
}

impl Drop for Region {
    fn drop(&mut self) {
        if let Mapping::ReadWrite(m) = &self.map {
            let _ = m.flush();
            let _ = fs2::FileExt::unlock(&self.file);
        }
    }
}

impl std::fmt::Debug for Region {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Region")
            .field("path", &self.path)
            .field("mode", &self.mode)
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}
