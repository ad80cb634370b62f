//! Index slots and per-type object directories.
//!
//! Each registered record type owns one slot in the header table and one
//! object directory in the data region: a sorted array of
//! `{ id, offset, len }` entries, binary-searched by id and grown by
//! doubling. The directory plus the slot counters (`live_count`,
//! `next_id`) are the persisted container state of a typed index; the
//! ordered secondary indices are heap state rebuilt from it.
//!
//! All reads go straight to the mapping so a read-only process observes a
//! concurrent writer's registrations, creations, and id-allocator state.

use strata_error::{Result, StrataError};
use strata_types::{RegionOffset, TypeTag};
use tracing::{debug, info};

use crate::header::{
    slot_base, DIR_ENTRY_SIZE, MAX_INDEX_SLOTS, SLOT_DIR_CAPACITY, SLOT_DIR_OFFSET,
    SLOT_LIVE_COUNT, SLOT_NEXT_ID, SLOT_REGISTERED, SLOT_TAG,
};
use crate::region::Region;

/// Handle to one registered slot in the region header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotId(usize);

/// One decoded directory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirEntry {
    pub id: u64,
    pub offset: RegionOffset,
    pub len: u32,
}

/// Initial directory capacity, in entries.
const DIR_INITIAL_CAPACITY: u32 = 16;

impl Region {
    // -----------------------------------------------------------------------
    // Slot table
    // -----------------------------------------------------------------------

    /// Find the slot registered for `tag`, reading the live slot table.
    #[must_use]
    pub fn find_slot(&self, tag: TypeTag) -> Option<SlotId> {
        (0..MAX_INDEX_SLOTS).map(SlotId).find(|&slot| {
            self.read_u16_at(slot.field(SLOT_REGISTERED)) == 1
                && self.read_u16_at(slot.field(SLOT_TAG)) == tag.get()
        })
    }

    /// Return the slot for `tag`, claiming a free one if the tag is new.
    pub fn register_slot(&mut self, tag: TypeTag) -> Result<SlotId> {
        if let Some(slot) = self.find_slot(tag) {
            return Ok(slot);
        }
        let slot = (0..MAX_INDEX_SLOTS)
            .map(SlotId)
            .find(|&s| self.read_u16_at(s.field(SLOT_REGISTERED)) == 0)
            .ok_or_else(|| {
                StrataError::invalid_state(format!(
                    "region slot table full ({MAX_INDEX_SLOTS} indices)"
                ))
            })?;

        self.write_u16_at(slot.field(SLOT_TAG), tag.get());
        self.write_u32_at(slot.field(SLOT_DIR_CAPACITY), 0);
        self.write_u64_at(slot.field(SLOT_DIR_OFFSET), 0);
        self.write_u32_at(slot.field(SLOT_LIVE_COUNT), 0);
        self.write_u64_at(slot.field(SLOT_NEXT_ID), 0);
        // Registered flag last, so a concurrent reader never sees a
        // half-initialized slot as registered.
        self.write_u16_at(slot.field(SLOT_REGISTERED), 1);
        info!(tag = tag.get(), slot = slot.0, "index slot registered");
        Ok(slot)
    }

    /// The id allocator position persisted for `slot`.
    #[must_use]
    pub fn slot_next_id(&self, slot: SlotId) -> u64 {
        self.read_u64_at(slot.field(SLOT_NEXT_ID))
    }

    /// Persist the id allocator position for `slot`.
    pub fn set_slot_next_id(&mut self, slot: SlotId, next_id: u64) {
        self.write_u64_at(slot.field(SLOT_NEXT_ID), next_id);
    }

    /// Number of live objects recorded for `slot`.
    #[must_use]
    pub fn slot_live_count(&self, slot: SlotId) -> u32 {
        self.read_u32_at(slot.field(SLOT_LIVE_COUNT))
    }

    // -----------------------------------------------------------------------
    // Object directory
    // -----------------------------------------------------------------------

    fn dir_offset(&self, slot: SlotId) -> u64 {
        self.read_u64_at(slot.field(SLOT_DIR_OFFSET))
    }

    fn dir_capacity(&self, slot: SlotId) -> u32 {
        self.read_u32_at(slot.field(SLOT_DIR_CAPACITY))
    }

    fn entry_base(&self, slot: SlotId, pos: u32) -> usize {
        self.dir_offset(slot) as usize + pos as usize * DIR_ENTRY_SIZE
    }

    fn read_entry(&self, slot: SlotId, pos: u32) -> DirEntry {
        let base = self.entry_base(slot, pos);
        DirEntry {
            id: self.read_u64_at(base),
            offset: RegionOffset::new(self.read_u64_at(base + 8)),
            len: self.read_u32_at(base + 16),
        }
    }

    fn write_entry(&mut self, slot: SlotId, pos: u32, entry: DirEntry) {
        let base = self.entry_base(slot, pos);
        self.write_u64_at(base, entry.id);
        self.write_u64_at(base + 8, entry.offset.get());
        self.write_u32_at(base + 16, entry.len);
        self.write_u32_at(base + 20, 0);
    }

    /// Binary search for `id`; `Ok(pos)` when present, `Err(pos)` is the
    /// insertion point.
    fn dir_search(&self, slot: SlotId, id: u64) -> std::result::Result<u32, u32> {
        let mut lo = 0u32;
        let mut hi = self.slot_live_count(slot);
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let probe = self.read_entry(slot, mid).id;
            match probe.cmp(&id) {
                std::cmp::Ordering::Less => lo = mid + 1,
                std::cmp::Ordering::Greater => hi = mid,
                std::cmp::Ordering::Equal => return Ok(mid),
            }
        }
        Err(lo)
    }

    /// Look up the storage of object `id`.
    #[must_use]
    pub fn dir_lookup(&self, slot: SlotId, id: u64) -> Option<(RegionOffset, u32)> {
        let pos = self.dir_search(slot, id).ok()?;
        let entry = self.read_entry(slot, pos);
        Some((entry.offset, entry.len))
    }

    /// Record a new object. Grows the directory when full; fails atomically
    /// on exhaustion.
    pub fn dir_insert(&mut self, slot: SlotId, entry: DirEntry) -> Result<()> {
        let live = self.slot_live_count(slot);
        if live == self.dir_capacity(slot) {
            self.dir_grow(slot)?;
        }
        let pos = match self.dir_search(slot, entry.id) {
            Ok(_) => {
                return Err(StrataError::invalid_state(format!(
                    "directory already holds object {}",
                    entry.id
                )));
            }
            Err(pos) => pos,
        };
        // Shift the tail one entry to the right. Ids are monotonic, so this
        // is a no-op append in the common case.
        if pos < live {
            let src_start = self.entry_base(slot, pos);
            let src_end = self.entry_base(slot, live);
            self.copy_within(src_start..src_end, src_start + DIR_ENTRY_SIZE);
        }
        self.write_entry(slot, pos, entry);
        self.write_u32_at(slot.field(SLOT_LIVE_COUNT), live + 1);
        Ok(())
    }

    /// Repoint an existing object at new storage.
    pub fn dir_update(&mut self, slot: SlotId, entry: DirEntry) -> Result<()> {
        let pos = self.dir_search(slot, entry.id).map_err(|_| {
            StrataError::invalid_state(format!("directory missing object {}", entry.id))
        })?;
        self.write_entry(slot, pos, entry);
        Ok(())
    }

    /// Forget an object, compacting the tail.
    pub fn dir_remove(&mut self, slot: SlotId, id: u64) -> Result<()> {
        let live = self.slot_live_count(slot);
        let pos = self
            .dir_search(slot, id)
            .map_err(|_| StrataError::invalid_state(format!("directory missing object {id}")))?;
        if pos + 1 < live {
            let src_start = self.entry_base(slot, pos + 1);
            let src_end = self.entry_base(slot, live);
            self.copy_within(src_start..src_end, src_start - DIR_ENTRY_SIZE);
        }
        self.write_u32_at(slot.field(SLOT_LIVE_COUNT), live - 1);
        Ok(())
    }

    /// Snapshot every entry, in id order.
    #[must_use]
    pub fn dir_entries(&self, slot: SlotId) -> Vec<DirEntry> {
        let live = self.slot_live_count(slot);
        (0..live).map(|pos| self.read_entry(slot, pos)).collect()
    }

    fn dir_grow(&mut self, slot: SlotId) -> Result<()> {
        let old_capacity = self.dir_capacity(slot);
        let old_offset = self.dir_offset(slot);
        let live = self.slot_live_count(slot);
        let new_capacity = (old_capacity * 2).max(DIR_INITIAL_CAPACITY);

        let new_offset = self.allocate(new_capacity as usize * DIR_ENTRY_SIZE)?;
        if live > 0 {
            let used = live as usize * DIR_ENTRY_SIZE;
            let old = self
                .bytes(RegionOffset::new(old_offset), used)?
                .to_vec();
            self.write_bytes(new_offset, &old)?;
        }
        if old_offset != 0 {
            self.deallocate(RegionOffset::new(old_offset));
        }
        self.write_u64_at(slot.field(SLOT_DIR_OFFSET), new_offset.get());
        self.write_u32_at(slot.field(SLOT_DIR_CAPACITY), new_capacity);
        debug!(
            slot = slot.0,
            capacity = new_capacity,
            "object directory grown"
        );
        Ok(())
    }
}

impl SlotId {
    fn field(self, field_offset: usize) -> usize {
        slot_base(self.0) + field_offset
    }
}
