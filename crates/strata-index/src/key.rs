//! Secondary key declarations and their ordered maps.
//!
//! A key is a zero-sized marker type implementing [`SecondaryKey`]: it
//! names the extracted key type, whether the key is unique, and how to
//! pull it out of a record. Composite keys are tuples; descending
//! components wrap in [`std::cmp::Reverse`].
//!
//! Entries are stored as `(key, id)` pairs in a `BTreeMap`, which gives
//! non-unique keys a deterministic id tie-break and lets unique keys probe
//! for collisions with a range scan.

use std::any::{Any, TypeId};
use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;

use strata_types::{ObjectId, Record};

/// A declared secondary key of record type `R`.
pub trait SecondaryKey<R>: 'static {
    /// The extracted, ordered key.
    type Key: Ord + Clone + fmt::Debug + Send + Sync + 'static;

    /// Whether two live records may share this key.
    const UNIQUE: bool = false;

    /// Pull the key out of a record.
    fn extract(record: &R) -> Self::Key;
}

/// Collects the secondary keys a record type declares at registration.
pub struct KeyRegistry<R: Record> {
    pub(crate) maps: Vec<Box<dyn SecondaryMap<R>>>,
}

impl<R: Record> KeyRegistry<R> {
    pub(crate) fn new() -> Self {
        Self { maps: Vec::new() }
    }

    /// Declare key `K` on this index.
    pub fn add<K: SecondaryKey<R>>(&mut self) {
        debug_assert!(
            !self.maps.iter().any(|m| m.key_type_id() == TypeId::of::<K>()),
            "secondary key declared twice"
        );
        self.maps.push(Box::new(KeyMap::<R, K>::new()));
    }
}

/// A record type together with its secondary key declarations.
pub trait IndexedRecord: Record {
    /// Declare every secondary key of this type. Called once, when the
    /// index is registered.
    fn secondary_keys(registry: &mut KeyRegistry<Self>);
}

/// Type-erased ordered map over one secondary key.
pub(crate) trait SecondaryMap<R>: Send + Sync {
    /// For unique keys: the rendered key plus the ids (other than the
    /// record's own) currently holding it. `None` when insertable or the
    /// key is non-unique.
    fn conflicts(&self, record: &R) -> Option<(String, Vec<ObjectId>)>;

    fn insert(&mut self, record: &R);

    fn remove(&mut self, record: &R);

    /// Ids in key order (ties broken by id).
    fn ordered_ids(&self) -> Vec<ObjectId>;

    fn key_type_id(&self) -> TypeId;

    fn as_any(&self) -> &dyn Any;
}

pub(crate) struct KeyMap<R, K: SecondaryKey<R>> {
    entries: BTreeMap<(K::Key, ObjectId), ()>,
    _marker: PhantomData<fn(&R) -> K::Key>,
}

impl<R: Record, K: SecondaryKey<R>> KeyMap<R, K> {
    fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
            _marker: PhantomData,
        }
    }

    /// First id carrying exactly `key`, in id order.
    pub(crate) fn find(&self, key: &K::Key) -> Option<ObjectId> {
        self.entries
            .range((key.clone(), ObjectId::ZERO)..=(key.clone(), ObjectId::MAX))
            .next()
            .map(|((_, id), ())| *id)
    }
}

impl<R: Record, K: SecondaryKey<R>> SecondaryMap<R> for KeyMap<R, K> {
    fn conflicts(&self, record: &R) -> Option<(String, Vec<ObjectId>)> {
        if !K::UNIQUE {
            return None;
        }
        let key = K::extract(record);
        let holders: Vec<ObjectId> = self
            .entries
            .range((key.clone(), ObjectId::ZERO)..=(key.clone(), ObjectId::MAX))
            .filter(|((_, id), ())| *id != record.id())
            .map(|((_, id), ())| *id)
            .collect();
        (!holders.is_empty()).then(|| (format!("{key:?}"), holders))
    }

    fn insert(&mut self, record: &R) {
        self.entries.insert((K::extract(record), record.id()), ());
    }

    fn remove(&mut self, record: &R) {
        let removed = self.entries.remove(&(K::extract(record), record.id()));
        debug_assert!(removed.is_some(), "record missing from secondary map");
    }

    fn ordered_ids(&self) -> Vec<ObjectId> {
        self.entries.keys().map(|(_, id)| *id).collect()
    }

    fn key_type_id(&self) -> TypeId {
        TypeId::of::<K>()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
