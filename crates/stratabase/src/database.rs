//! The database façade.
//!
//! A [`Database`] owns the mapped region, the registry of typed indices,
//! and the global session stack. Session operations fan out across every
//! registered index so journal depths stay synchronized; the database
//! revision is derived from the first-registered index (−1 before any
//! index exists).

use std::any::Any;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use strata_arena::Region;
use strata_error::{Result, StrataError};
use strata_index::{AbstractIndex, IndexedRecord, TypedIndex};
use strata_types::{ObjectId, OpenMode};
use tracing::{debug, info};

use crate::handle::IndexHandle;
use crate::session::Session;

struct RegistryEntry {
    ops: Arc<dyn AbstractIndex>,
    any: Arc<dyn Any + Send + Sync>,
}

#[derive(Default)]
struct Registry {
    /// Registration order; the first entry is the revision source.
    entries: Vec<RegistryEntry>,
    by_tag: HashMap<u16, usize>,
}

/// An embeddable object database over one memory-mapped region.
pub struct Database {
    region: Arc<RwLock<Region>>,
    registry: RwLock<Registry>,
    mode: OpenMode,
    sessions_ever: Arc<AtomicBool>,
}

impl Database {
    /// Open the database directory at `path`.
    ///
    /// `ReadWrite` creates the directory and region file when absent and
    /// sizes the region to `size` bytes; `ReadOnly` requires an existing
    /// region and ignores `size`.
    pub fn open(path: impl AsRef<Path>, mode: OpenMode, size: u64) -> Result<Self> {
        let region = Region::open(path.as_ref(), mode, size)?;
        Ok(Self {
            region: Arc::new(RwLock::new(region)),
            registry: RwLock::new(Registry::default()),
            mode,
            sessions_ever: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Whether this database rejects mutations.
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.mode.is_read_only()
    }

    /// Region capacity in bytes.
    #[must_use]
    pub fn capacity(&self) -> u64 {
        self.region.read().capacity()
    }

    /// Number of registered indices.
    #[must_use]
    pub fn index_count(&self) -> usize {
        self.registry.read().entries.len()
    }

    /// Flush the mapping to disk.
    pub fn flush(&self) -> Result<()> {
        self.region.read().flush()
    }

    // -----------------------------------------------------------------------
    // Registration
    // -----------------------------------------------------------------------

    /// Register record type `R`'s typed index.
    ///
    /// Read-write databases claim a region slot on first registration and
    /// reload persisted state on reopen. Read-only databases require the
    /// slot to already exist. When sessions are open, the new index's
    /// journal is back-filled with one empty frame per open session so its
    /// depth matches every other index.
    pub fn add_index<R: IndexedRecord>(&self) -> Result<()> {
        let mut registry = self.registry.write();
        if registry.by_tag.contains_key(&R::TYPE_TAG.get()) {
            return Err(StrataError::AlreadyRegistered {
                type_name: R::TYPE_NAME,
            });
        }

        let index = Arc::new(TypedIndex::<R>::open(
            Arc::clone(&self.region),
            Arc::clone(&self.sessions_ever),
        )?);

        // Adopt the database revision and mirror the open session stack.
        let (revision, depth) = registry
            .entries
            .first()
            .map_or((0, 0), |e| (e.ops.revision(), e.ops.journal_depth()));
        index.set_revision(revision.max(0))?;
        let depth = depth as i64;
        for frame_revision in (revision - depth + 1)..=revision {
            index.push_frame(frame_revision);
        }

        info!(
            type_name = R::TYPE_NAME,
            tag = R::TYPE_TAG.get(),
            revision = revision.max(0),
            backfilled = depth,
            "index registered"
        );

        let position = registry.entries.len();
        registry.entries.push(RegistryEntry {
            ops: Arc::clone(&index) as Arc<dyn AbstractIndex>,
            any: index,
        });
        registry.by_tag.insert(R::TYPE_TAG.get(), position);
        Ok(())
    }

    fn typed<R: IndexedRecord>(&self) -> Result<Arc<TypedIndex<R>>> {
        let registry = self.registry.read();
        let position = registry
            .by_tag
            .get(&R::TYPE_TAG.get())
            .copied()
            .ok_or_else(|| {
                StrataError::invalid_state(format!(
                    "index for {} is not registered",
                    R::TYPE_NAME
                ))
            })?;
        registry.entries[position]
            .any
            .clone()
            .downcast::<TypedIndex<R>>()
            .map_err(|_| {
                StrataError::invalid_state(format!(
                    "type tag {} was registered by a different record type",
                    R::TYPE_TAG
                ))
            })
    }

    /// Handle to `R`'s typed index.
    pub fn index<R: IndexedRecord>(&self) -> Result<IndexHandle<R>> {
        Ok(IndexHandle::new(self.typed::<R>()?))
    }

    // -----------------------------------------------------------------------
    // Record operations
    // -----------------------------------------------------------------------

    /// Create a record of type `R`: allocate its id, run `init`, insert
    /// into every ordered index.
    pub fn create<R: IndexedRecord + Default>(&self, init: impl FnOnce(&mut R)) -> Result<R> {
        if self.is_read_only() {
            return Err(StrataError::ReadOnly);
        }
        self.typed::<R>()?.emplace(init)
    }

    /// Mutate the record with id `id` in place, reindexing it.
    pub fn modify<R: IndexedRecord>(
        &self,
        id: ObjectId,
        mutator: impl FnOnce(&mut R),
    ) -> Result<R> {
        if self.is_read_only() {
            return Err(StrataError::ReadOnly);
        }
        self.typed::<R>()?.modify(id, mutator)
    }

    /// Erase the record with id `id`.
    pub fn remove<R: IndexedRecord>(&self, id: ObjectId) -> Result<()> {
        if self.is_read_only() {
            return Err(StrataError::ReadOnly);
        }
        self.typed::<R>()?.erase(id)
    }

    /// Fetch the record with id `id`.
    pub fn get<R: IndexedRecord>(&self, id: ObjectId) -> Result<R> {
        self.typed::<R>()?.get(id)
    }

    // -----------------------------------------------------------------------
    // Sessions and revisions
    // -----------------------------------------------------------------------

    /// Current revision: the first-registered index's counter, or −1 when
    /// no index is registered.
    #[must_use]
    pub fn revision(&self) -> i64 {
        self.registry
            .read()
            .entries
            .first()
            .map_or(-1, |e| e.ops.revision())
    }

    /// Set the revision on every index. Only legal while no frame is open
    /// anywhere.
    pub fn set_revision(&self, revision: i64) -> Result<()> {
        if self.is_read_only() {
            return Err(StrataError::ReadOnly);
        }
        let registry = self.registry.read();
        if registry.entries.iter().any(|e| e.ops.journal_depth() > 0) {
            return Err(StrataError::invalid_state(
                "cannot set revision while the undo stack is not empty",
            ));
        }
        for entry in &registry.entries {
            entry.ops.set_revision(revision)?;
        }
        Ok(())
    }

    /// Start an undo session bracketing one revision across all indices.
    ///
    /// With `enabled = false` (or on a read-only database) the returned
    /// session is an inert sentinel: nothing is journaled and dropping it
    /// reverts nothing.
    pub fn start_undo_session(&self, enabled: bool) -> Session<'_> {
        if !enabled || self.is_read_only() {
            return Session::disabled(self, self.revision());
        }
        self.sessions_ever.store(true, Ordering::Relaxed);
        let revision = self.revision() + 1;
        let registry = self.registry.read();
        for entry in &registry.entries {
            entry.ops.push_frame(revision);
        }
        debug!(revision, "undo session started");
        Session::enabled(self, revision)
    }

    /// Revert the top revision frame on every index and decrement the
    /// revision. No-op when no frame is open.
    pub fn undo(&self) -> Result<()> {
        let registry = self.registry.read();
        for entry in &registry.entries {
            entry.ops.undo()?;
        }
        Ok(())
    }

    /// Revert every open revision frame.
    pub fn undo_all(&self) -> Result<()> {
        loop {
            let depth = {
                let registry = self.registry.read();
                registry
                    .entries
                    .first()
                    .map_or(0, |e| e.ops.journal_depth())
            };
            if depth == 0 {
                return Ok(());
            }
            self.undo()?;
        }
    }

    /// Discard reverse information for every frame with revision at or
    /// below `through`, making those revisions permanent.
    pub fn commit(&self, through: i64) {
        let registry = self.registry.read();
        for entry in &registry.entries {
            entry.ops.commit(through);
        }
        info!(through, "revisions committed");
    }

    pub(crate) fn squash_all(&self) {
        let registry = self.registry.read();
        for entry in &registry.entries {
            entry.ops.squash();
        }
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("mode", &self.mode)
            .field("revision", &self.revision())
            .field("indices", &self.index_count())
            .finish_non_exhaustive()
    }
}
