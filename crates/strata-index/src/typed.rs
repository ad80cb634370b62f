//! The multi-keyed typed index.
//!
//! A [`TypedIndex`] owns every live record of one type. For a read-write
//! database it keeps decoded records in an ordered heap map (primary key)
//! plus one ordered map per declared secondary key, and writes every
//! mutation through to the region, whose object directory stays the
//! authoritative, process-shareable container state. A read-only index
//! keeps no heap state at all: lookups decode straight out of the live
//! mapping and therefore observe a concurrent writer.
//!
//! Journaling: while at least one revision frame is open, each mutation
//! records its reversal action in the top frame. `undo` applies the top
//! frame in a fixed order (reinsert removed, restore modified, erase
//! created, rewind the id allocator).

use std::any::TypeId;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use strata_arena::{DirEntry, Region, SlotId};
use strata_error::{Result, StrataError};
use strata_types::{ByteReader, ByteWriter, ObjectId, Record, RegionOffset, TypeTag};
use tracing::{debug, info};

use crate::journal::{UndoJournal, UndoState};
use crate::key::{IndexedRecord, KeyMap, KeyRegistry, SecondaryKey, SecondaryMap};

/// Object-safe surface the database uses to fan session operations out
/// across indices of different record types.
pub trait AbstractIndex: Send + Sync + 'static {
    fn type_tag(&self) -> TypeTag;
    fn type_name(&self) -> &'static str;
    fn revision(&self) -> i64;
    fn journal_depth(&self) -> usize;
    /// Open an empty frame for `revision`. No-op on read-only indices.
    fn push_frame(&self, revision: i64);
    /// Apply and pop the top frame. `Ok(false)` when no frame is open.
    fn undo(&self) -> Result<bool>;
    /// Discard frames with revision at or below `through`.
    fn commit(&self, through: i64);
    /// Merge the top frame into the one below. Returns whether a merge
    /// happened (and the index revision decremented).
    fn squash(&self) -> bool;
    /// Set the revision counter. Requires an empty journal; the database
    /// gates the public path further.
    fn set_revision(&self, revision: i64) -> Result<()>;
}

struct Stored<R> {
    record: R,
    offset: RegionOffset,
    len: u32,
}

struct Core<R> {
    by_id: BTreeMap<ObjectId, Stored<R>>,
    secondaries: Vec<Box<dyn SecondaryMap<R>>>,
    journal: UndoJournal<R>,
    revision: i64,
    next_id: u64,
}

/// All live records of type `R`, ordered by primary key and every declared
/// secondary key.
pub struct TypedIndex<R: IndexedRecord> {
    region: Arc<RwLock<Region>>,
    slot: SlotId,
    read_only: bool,
    sessions_ever: Arc<AtomicBool>,
    core: RwLock<Core<R>>,
}

impl<R: IndexedRecord> std::fmt::Debug for TypedIndex<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypedIndex")
            .field("slot", &self.slot)
            .field("read_only", &self.read_only)
            .finish_non_exhaustive()
    }
}

fn decode_record<R: Record>(bytes: &[u8]) -> Result<R> {
    let mut reader = ByteReader::new(bytes);
    let record = R::decode(&mut reader)?;
    reader.finish()?;
    Ok(record)
}

fn encode_record<R: Record>(record: &R) -> Vec<u8> {
    let mut writer = ByteWriter::new();
    record.encode(&mut writer);
    writer.into_vec()
}

impl<R: IndexedRecord> TypedIndex<R> {
    /// Open the index for `R` inside `region`, loading persisted objects
    /// for read-write regions. Read-only regions require the slot to
    /// already exist.
    pub fn open(region: Arc<RwLock<Region>>, sessions_ever: Arc<AtomicBool>) -> Result<Self> {
        let read_only = region.read().mode().is_read_only();
        let slot = if read_only {
            region
                .read()
                .find_slot(R::TYPE_TAG)
                .ok_or(StrataError::IndexMissing {
                    type_name: R::TYPE_NAME,
                })?
        } else {
            region.write().register_slot(R::TYPE_TAG)?
        };

        let mut registry = KeyRegistry::new();
        R::secondary_keys(&mut registry);
        let mut core = Core {
            by_id: BTreeMap::new(),
            secondaries: registry.maps,
            journal: UndoJournal::new(),
            revision: 0,
            next_id: 0,
        };

        if !read_only {
            let guard = region.read();
            core.next_id = guard.slot_next_id(slot);
            for entry in guard.dir_entries(slot) {
                let record: R = decode_record(guard.bytes(entry.offset, entry.len as usize)?)?;
                for map in &mut core.secondaries {
                    map.insert(&record);
                }
                core.by_id.insert(
                    record.id(),
                    Stored {
                        record,
                        offset: entry.offset,
                        len: entry.len,
                    },
                );
            }
            if !core.by_id.is_empty() {
                info!(
                    type_name = R::TYPE_NAME,
                    objects = core.by_id.len(),
                    next_id = core.next_id,
                    "index state loaded from region"
                );
            }
        }

        Ok(Self {
            region,
            slot,
            read_only,
            sessions_ever,
            core: RwLock::new(core),
        })
    }

    /// Whether this index rejects mutations.
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Number of live objects.
    #[must_use]
    pub fn len(&self) -> usize {
        if self.read_only {
            self.region.read().slot_live_count(self.slot) as usize
        } else {
            self.core.read().by_id.len()
        }
    }

    /// Whether no objects are live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // -----------------------------------------------------------------------
    // Mutations
    // -----------------------------------------------------------------------

    /// Allocate an id, construct a record with it, run `init`, and insert
    /// into every ordered index. On a unique-key violation the id is not
    /// consumed.
    pub fn emplace(&self, init: impl FnOnce(&mut R)) -> Result<R>
    where
        R: Default,
    {
        if self.read_only {
            return Err(StrataError::ReadOnly);
        }
        let mut core = self.core.write();
        let core = &mut *core;

        let id = ObjectId::new(core.next_id);
        let mut record = R::default();
        record.set_id(id);
        init(&mut record);
        if record.id() != id {
            return Err(StrataError::invalid_state(
                "constructor reassigned the primary key",
            ));
        }
        for map in &core.secondaries {
            if let Some((key, _)) = map.conflicts(&record) {
                return Err(StrataError::unique_violation(R::TYPE_NAME, key));
            }
        }

        let data = encode_record(&record);
        let (offset, len) = {
            let mut region = self.region.write();
            let offset = region.allocate(data.len())?;
            region.write_bytes(offset, &data)?;
            if let Err(e) = region.dir_insert(
                self.slot,
                DirEntry {
                    id: id.get(),
                    offset,
                    len: data.len() as u32,
                },
            ) {
                region.deallocate(offset);
                return Err(e);
            }
            region.set_slot_next_id(self.slot, id.get() + 1);
            (offset, data.len() as u32)
        };

        for map in &mut core.secondaries {
            map.insert(&record);
        }
        if let Some(frame) = core.journal.top_mut() {
            frame.on_create(id);
        }
        core.by_id.insert(
            id,
            Stored {
                record: record.clone(),
                offset,
                len,
            },
        );
        core.next_id = id.get() + 1;
        debug!(type_name = R::TYPE_NAME, id = id.get(), "object created");
        Ok(record)
    }

    /// Mutate the record with id `id` in place, reindexing it under every
    /// secondary key. The pre-mutation value is captured into the top
    /// revision frame first. A unique-key violation leaves the record
    /// unchanged.
    pub fn modify(&self, id: ObjectId, mutator: impl FnOnce(&mut R)) -> Result<R> {
        if self.read_only {
            return Err(StrataError::ReadOnly);
        }
        let mut core = self.core.write();
        let core = &mut *core;

        let old = core
            .by_id
            .get(&id)
            .map(|s| s.record.clone())
            .ok_or_else(|| StrataError::not_found(R::TYPE_NAME, id.get()))?;
        if let Some(frame) = core.journal.top_mut() {
            frame.on_modify(id, &old);
        }

        let mut new = old.clone();
        mutator(&mut new);
        if new.id() != id {
            return Err(StrataError::invalid_state(
                "mutator reassigned the primary key",
            ));
        }
        for map in &core.secondaries {
            if let Some((key, _)) = map.conflicts(&new) {
                return Err(StrataError::unique_violation(R::TYPE_NAME, key));
            }
        }

        self.rewrite(core, id, &old, new)
    }

    /// Erase the record with id `id`, recording the reversal value in the
    /// top revision frame.
    pub fn erase(&self, id: ObjectId) -> Result<()> {
        if self.read_only {
            return Err(StrataError::ReadOnly);
        }
        let mut core = self.core.write();
        let core = &mut *core;

        let stored = core
            .by_id
            .remove(&id)
            .ok_or_else(|| StrataError::not_found(R::TYPE_NAME, id.get()))?;
        if let Some(frame) = core.journal.top_mut() {
            frame.on_remove(id, &stored.record);
        }
        for map in &mut core.secondaries {
            map.remove(&stored.record);
        }
        let mut region = self.region.write();
        region.dir_remove(self.slot, id.get())?;
        region.deallocate(stored.offset);
        debug!(type_name = R::TYPE_NAME, id = id.get(), "object erased");
        Ok(())
    }

    /// Overwrite storage and reindex `id` from `old` to `new`. The caller
    /// has already validated keys and journaled.
    fn rewrite(&self, core: &mut Core<R>, id: ObjectId, old: &R, new: R) -> Result<R> {
        let data = encode_record(&new);
        let old_offset = core.by_id.get(&id).expect("record present").offset;
        let new_offset = {
            let mut region = self.region.write();
            if (data.len() as u64) <= region.block_capacity(old_offset) {
                region.write_bytes(old_offset, &data)?;
                region.dir_update(
                    self.slot,
                    DirEntry {
                        id: id.get(),
                        offset: old_offset,
                        len: data.len() as u32,
                    },
                )?;
                old_offset
            } else {
                let fresh = region.allocate(data.len())?;
                region.write_bytes(fresh, &data)?;
                region.dir_update(
                    self.slot,
                    DirEntry {
                        id: id.get(),
                        offset: fresh,
                        len: data.len() as u32,
                    },
                )?;
                region.deallocate(old_offset);
                fresh
            }
        };

        for map in &mut core.secondaries {
            map.remove(old);
            map.insert(&new);
        }
        let stored = core.by_id.get_mut(&id).expect("record present");
        stored.record = new.clone();
        stored.offset = new_offset;
        stored.len = data.len() as u32;
        Ok(new)
    }

    // -----------------------------------------------------------------------
    // Lookups
    // -----------------------------------------------------------------------

    /// Fetch the record with id `id`.
    pub fn get(&self, id: ObjectId) -> Result<R> {
        if self.read_only {
            let region = self.region.read();
            let (offset, len) = region
                .dir_lookup(self.slot, id.get())
                .ok_or_else(|| StrataError::not_found(R::TYPE_NAME, id.get()))?;
            decode_record(region.bytes(offset, len as usize)?)
        } else {
            self.core
                .read()
                .by_id
                .get(&id)
                .map(|s| s.record.clone())
                .ok_or_else(|| StrataError::not_found(R::TYPE_NAME, id.get()))
        }
    }

    /// First record whose key `K` extracts to exactly `key` (lowest id on
    /// a non-unique tie).
    pub fn find_by<K: SecondaryKey<R>>(&self, key: &K::Key) -> Result<Option<R>> {
        if self.read_only {
            let mut best: Option<R> = None;
            for record in self.snapshot()? {
                if K::extract(&record) == *key
                    && best.as_ref().map_or(true, |b| record.id() < b.id())
                {
                    best = Some(record);
                }
            }
            Ok(best)
        } else {
            let core = self.core.read();
            let map = Self::key_map::<K>(&core)?;
            Ok(map
                .find(key)
                .map(|id| core.by_id[&id].record.clone()))
        }
    }

    /// All live records in `K` order (ties broken by id). The returned
    /// snapshot is stable under later mutations.
    pub fn iter_by<K: SecondaryKey<R>>(&self) -> Result<Vec<R>> {
        if self.read_only {
            let mut records = self.snapshot()?;
            records.sort_by(|a, b| {
                (K::extract(a), a.id()).cmp(&(K::extract(b), b.id()))
            });
            Ok(records)
        } else {
            let core = self.core.read();
            let map = core
                .secondaries
                .iter()
                .find(|m| m.key_type_id() == TypeId::of::<K>())
                .ok_or_else(|| {
                    StrataError::invalid_state(format!(
                        "key {} not declared on {}",
                        std::any::type_name::<K>(),
                        R::TYPE_NAME
                    ))
                })?;
            Ok(map
                .ordered_ids()
                .into_iter()
                .map(|id| core.by_id[&id].record.clone())
                .collect())
        }
    }

    /// All live records in primary-key order.
    pub fn iter(&self) -> Result<Vec<R>> {
        if self.read_only {
            self.snapshot()
        } else {
            Ok(self
                .core
                .read()
                .by_id
                .values()
                .map(|s| s.record.clone())
                .collect())
        }
    }

    /// All live records in id order, decoded from the live mapping.
    fn snapshot(&self) -> Result<Vec<R>> {
        let region = self.region.read();
        region
            .dir_entries(self.slot)
            .into_iter()
            .map(|entry| decode_record(region.bytes(entry.offset, entry.len as usize)?))
            .collect()
    }

    fn key_map<'c, K: SecondaryKey<R>>(core: &'c Core<R>) -> Result<&'c KeyMap<R, K>> {
        core.secondaries
            .iter()
            .find(|m| m.key_type_id() == TypeId::of::<K>())
            .and_then(|m| m.as_any().downcast_ref::<KeyMap<R, K>>())
            .ok_or_else(|| {
                StrataError::invalid_state(format!(
                    "key {} not declared on {}",
                    std::any::type_name::<K>(),
                    R::TYPE_NAME
                ))
            })
    }

    // -----------------------------------------------------------------------
    // Journal control
    // -----------------------------------------------------------------------

    /// Set the revision counter through the gated public path: rejected
    /// once any session has ever been opened on the owning database.
    pub fn set_revision_checked(&self, revision: i64) -> Result<()> {
        if self.sessions_ever.load(Ordering::Relaxed) {
            return Err(StrataError::invalid_state(
                "cannot set revision after a session has been opened",
            ));
        }
        self.set_revision(revision)
    }

    fn undo_frame(&self) -> Result<bool> {
        let mut core = self.core.write();
        let core = &mut *core;
        let Some(frame) = core.journal.pop_top() else {
            return Ok(false);
        };
        let next_id_before = frame.next_id_before();
        let states = frame.into_states();
        let created: Vec<ObjectId> = states
            .iter()
            .filter(|(_, st)| matches!(st, UndoState::Created))
            .map(|(id, _)| *id)
            .collect();

        // Reinsert erased records first, then restore modified values, then
        // erase frame-created records, then rewind the allocator.
        for (id, state) in &states {
            if let UndoState::Removed(old) = state {
                self.reinsert(core, *id, old, &created)?;
            }
        }
        for (id, state) in &states {
            if let UndoState::Modified(old) = state {
                let current = core
                    .by_id
                    .get(id)
                    .map(|s| s.record.clone())
                    .ok_or_else(|| {
                        StrataError::invalid_state(format!(
                            "journal refers to missing {} object {id}",
                            R::TYPE_NAME
                        ))
                    })?;
                self.rewrite(core, *id, &current, old.clone())?;
            }
        }
        for (id, state) in &states {
            if matches!(state, UndoState::Created) {
                let stored = core.by_id.remove(id).ok_or_else(|| {
                    StrataError::invalid_state(format!(
                        "journal refers to missing {} object {id}",
                        R::TYPE_NAME
                    ))
                })?;
                for map in &mut core.secondaries {
                    map.remove(&stored.record);
                }
                let mut region = self.region.write();
                region.dir_remove(self.slot, id.get())?;
                region.deallocate(stored.offset);
            }
        }

        core.next_id = next_id_before;
        self.region
            .write()
            .set_slot_next_id(self.slot, next_id_before);
        core.revision -= 1;
        debug!(
            type_name = R::TYPE_NAME,
            revision = core.revision,
            "frame undone"
        );
        Ok(true)
    }

    /// Reinsert an erased record during undo. The restored state was valid,
    /// so the only tolerated key overlap is with records this same frame is
    /// about to erase.
    fn reinsert(
        &self,
        core: &mut Core<R>,
        id: ObjectId,
        old: &R,
        pending_erase: &[ObjectId],
    ) -> Result<()> {
        for map in &core.secondaries {
            if let Some((key, conflicting)) = map.conflicts(old) {
                if conflicting.iter().any(|c| !pending_erase.contains(c)) {
                    return Err(StrataError::unique_violation(R::TYPE_NAME, key));
                }
            }
        }
        let data = encode_record(old);
        let (offset, len) = {
            let mut region = self.region.write();
            let offset = region.allocate(data.len())?;
            region.write_bytes(offset, &data)?;
            if let Err(e) = region.dir_insert(
                self.slot,
                DirEntry {
                    id: id.get(),
                    offset,
                    len: data.len() as u32,
                },
            ) {
                region.deallocate(offset);
                return Err(e);
            }
            (offset, data.len() as u32)
        };
        for map in &mut core.secondaries {
            map.insert(old);
        }
        core.by_id.insert(
            id,
            Stored {
                record: old.clone(),
                offset,
                len,
            },
        );
        Ok(())
    }
}

impl<R: IndexedRecord> AbstractIndex for TypedIndex<R> {
    fn type_tag(&self) -> TypeTag {
        R::TYPE_TAG
    }

    fn type_name(&self) -> &'static str {
        R::TYPE_NAME
    }

    fn revision(&self) -> i64 {
        self.core.read().revision
    }

    fn journal_depth(&self) -> usize {
        self.core.read().journal.depth()
    }

    fn push_frame(&self, revision: i64) {
        if self.read_only {
            return;
        }
        self.sessions_ever.store(true, Ordering::Relaxed);
        let mut core = self.core.write();
        let next_id = core.next_id;
        core.journal.push_frame(revision, next_id);
        core.revision = revision;
    }

    fn undo(&self) -> Result<bool> {
        self.undo_frame()
    }

    fn commit(&self, through: i64) {
        self.core.write().journal.commit_through(through);
    }

    fn squash(&self) -> bool {
        let mut core = self.core.write();
        if core.journal.squash_top() {
            core.revision -= 1;
            true
        } else {
            false
        }
    }

    fn set_revision(&self, revision: i64) -> Result<()> {
        let mut core = self.core.write();
        if !core.journal.is_empty() {
            return Err(StrataError::invalid_state(
                "cannot set revision while the undo stack is not empty",
            ));
        }
        core.revision = revision;
        Ok(())
    }
}
