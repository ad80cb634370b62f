//! On-disk layout of the region header and index slot table.
//!
//! The header occupies the start of the mapped file and is mutated in
//! place, so a read-only mapping of the same file observes registration
//! and allocator state live. All integers are little-endian.
//!
//! ```text
//! offset  size  field
//! 0       8     magic
//! 8       4     format version
//! 12      4     flags (reserved)
//! 16      8     capacity (must equal the file length)
//! 24      8     free-list head (payload offset, 0 = empty)
//! 32      8     bump cursor (first unallocated byte)
//! 40      24    reserved
//! 64      2048  index slot table (64 slots x 32 bytes)
//! 4096          data region
//! ```

use strata_error::{Result, StrataError};

/// Magic number for StrataBase region files ("STRATBSE").
pub const REGION_MAGIC: u64 = 0x5354_5241_5442_5345;

/// Current region format version.
pub const REGION_VERSION: u32 = 1;

/// Name of the region file inside the database directory.
pub const REGION_FILE_NAME: &str = "strata.db";

/// Maximum number of record types one region can hold.
pub const MAX_INDEX_SLOTS: usize = 64;

/// First byte of the data region; everything below is header.
pub const DATA_START: u64 = 4096;

/// Smallest region a header plus any data fits in.
pub const MIN_REGION_SIZE: u64 = DATA_START + 4096;

pub(crate) const OFF_MAGIC: usize = 0;
pub(crate) const OFF_VERSION: usize = 8;
pub(crate) const OFF_CAPACITY: usize = 16;
pub(crate) const OFF_FREE_HEAD: usize = 24;
pub(crate) const OFF_BUMP_CURSOR: usize = 32;
pub(crate) const SLOT_TABLE_START: usize = 64;
pub(crate) const SLOT_SIZE: usize = 32;

// Field offsets within one slot.
pub(crate) const SLOT_TAG: usize = 0;
pub(crate) const SLOT_REGISTERED: usize = 2;
pub(crate) const SLOT_DIR_CAPACITY: usize = 4;
pub(crate) const SLOT_DIR_OFFSET: usize = 8;
pub(crate) const SLOT_LIVE_COUNT: usize = 16;
pub(crate) const SLOT_NEXT_ID: usize = 24;

/// Byte size of one object-directory entry: id, offset, len, padding.
pub(crate) const DIR_ENTRY_SIZE: usize = 24;

/// Base offset of slot `i` inside the mapping.
#[inline]
pub(crate) const fn slot_base(i: usize) -> usize {
    SLOT_TABLE_START + i * SLOT_SIZE
}

pub(crate) fn read_u16(map: &[u8], off: usize) -> u16 {
    u16::from_le_bytes(map[off..off + 2].try_into().expect("len 2"))
}

pub(crate) fn read_u32(map: &[u8], off: usize) -> u32 {
    u32::from_le_bytes(map[off..off + 4].try_into().expect("len 4"))
}

pub(crate) fn read_u64(map: &[u8], off: usize) -> u64 {
    u64::from_le_bytes(map[off..off + 8].try_into().expect("len 8"))
}

pub(crate) fn write_u16(map: &mut [u8], off: usize, v: u16) {
    map[off..off + 2].copy_from_slice(&v.to_le_bytes());
}

pub(crate) fn write_u32(map: &mut [u8], off: usize, v: u32) {
    map[off..off + 4].copy_from_slice(&v.to_le_bytes());
}

pub(crate) fn write_u64(map: &mut [u8], off: usize, v: u64) {
    map[off..off + 8].copy_from_slice(&v.to_le_bytes());
}

/// Stamp a fresh header into a zeroed mapping.
pub(crate) fn init_header(map: &mut [u8], capacity: u64) {
    write_u64(map, OFF_MAGIC, REGION_MAGIC);
    write_u32(map, OFF_VERSION, REGION_VERSION);
    write_u64(map, OFF_CAPACITY, capacity);
    write_u64(map, OFF_FREE_HEAD, 0);
    write_u64(map, OFF_BUMP_CURSOR, DATA_START);
    // The slot table relies on the file being created zeroed: an
    // all-zero slot is an unregistered slot.
}

/// Validate a header against the mapped file.
pub(crate) fn validate_header(map: &[u8], file_len: u64) -> Result<()> {
    if map.len() < DATA_START as usize {
        return Err(StrataError::corrupt(format!(
            "region file is {} bytes, smaller than the {} byte header",
            map.len(),
            DATA_START
        )));
    }
    let magic = read_u64(map, OFF_MAGIC);
    if magic != REGION_MAGIC {
        return Err(StrataError::corrupt(format!(
            "bad magic {magic:#018x}, expected {REGION_MAGIC:#018x}"
        )));
    }
    let version = read_u32(map, OFF_VERSION);
    if version != REGION_VERSION {
        return Err(StrataError::corrupt(format!(
            "unsupported region format version {version}"
        )));
    }
    let capacity = read_u64(map, OFF_CAPACITY);
    if capacity != file_len {
        return Err(StrataError::corrupt(format!(
            "header capacity {capacity} does not match file length {file_len}"
        )));
    }
    let bump = read_u64(map, OFF_BUMP_CURSOR);
    if bump < DATA_START || bump > capacity {
        return Err(StrataError::corrupt(format!(
            "bump cursor {bump} outside data region [{DATA_START}, {capacity}]"
        )));
    }
    Ok(())
}
