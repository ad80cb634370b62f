//! Cloneable handles to a registered typed index.

use std::sync::Arc;

use strata_error::Result;
use strata_index::{AbstractIndex, IndexedRecord, SecondaryKey, TypedIndex};
use strata_types::ObjectId;

/// A handle to one registered typed index.
///
/// Handles are cheap to clone and stay valid for the life of the mapping;
/// lookups made through a handle observe mutations performed through the
/// owning [`Database`](crate::Database).
pub struct IndexHandle<R: IndexedRecord> {
    inner: Arc<TypedIndex<R>>,
}

impl<R: IndexedRecord> IndexHandle<R> {
    pub(crate) fn new(inner: Arc<TypedIndex<R>>) -> Self {
        Self { inner }
    }

    /// Fetch the record with id `id`.
    pub fn get(&self, id: ObjectId) -> Result<R> {
        self.inner.get(id)
    }

    /// First record whose key `K` extracts to exactly `key`.
    pub fn find_by<K: SecondaryKey<R>>(&self, key: &K::Key) -> Result<Option<R>> {
        self.inner.find_by::<K>(key)
    }

    /// Ordered snapshot iterator over all live records in `K` order.
    pub fn iter_by<K: SecondaryKey<R>>(&self) -> Result<std::vec::IntoIter<R>> {
        Ok(self.inner.iter_by::<K>()?.into_iter())
    }

    /// Ordered snapshot iterator in primary-key order.
    pub fn iter(&self) -> Result<std::vec::IntoIter<R>> {
        Ok(self.inner.iter()?.into_iter())
    }

    /// Number of live records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Whether no records are live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// This index's revision counter.
    #[must_use]
    pub fn revision(&self) -> i64 {
        AbstractIndex::revision(&*self.inner)
    }

    /// Set this index's revision counter directly. Rejected while any
    /// frame is open on the index, and rejected outright once any session
    /// has ever been opened on the database.
    pub fn set_revision(&self, revision: i64) -> Result<()> {
        self.inner.set_revision_checked(revision)
    }
}

impl<R: IndexedRecord> Clone for IndexHandle<R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<R: IndexedRecord> std::fmt::Debug for IndexHandle<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexHandle")
            .field("type_name", &R::TYPE_NAME)
            .field("len", &self.len())
            .finish()
    }
}
