//! Foundation types shared by every StrataBase crate.
//!
//! Identifier newtypes live here, together with the little-endian byte
//! codec used to persist records into the region and the [`Record`] trait
//! applications implement for their stored types.

pub mod codec;
pub mod record;

pub use codec::{ByteReader, ByteWriter};
pub use record::Record;

use std::fmt;

/// Primary key of a stored object.
///
/// Allocated per record type, starting at 0 and strictly monotonic for the
/// lifetime of a database: an id is never reused, even after the creating
/// session is undone (the allocator is rewound, but a dropped creation
/// leaves a gap only when later sessions already consumed ids).
#[derive(
    Debug,
    Default,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    serde::Serialize,
    serde::Deserialize,
)]
#[repr(transparent)]
pub struct ObjectId(u64);

impl ObjectId {
    /// The first id handed out by a fresh index.
    pub const ZERO: Self = Self(0);

    /// Largest representable id; used as an upper bound in key-range probes.
    pub const MAX: Self = Self(u64::MAX);

    /// Create an id from a raw value.
    #[inline]
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Get the raw value.
    #[inline]
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// The id following this one.
    #[inline]
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Compile-time-stable tag identifying a record type's index inside a
/// database and its slot in the region header.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[repr(transparent)]
pub struct TypeTag(u16);

impl TypeTag {
    /// Create a tag from a raw value.
    #[inline]
    #[must_use]
    pub const fn new(raw: u16) -> Self {
        Self(raw)
    }

    /// Get the raw value.
    #[inline]
    #[must_use]
    pub const fn get(self) -> u16 {
        self.0
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Offset of an allocation inside the mapped region.
///
/// The region may be mapped at a different base address in every process
/// that opens it, so nothing address-shaped is ever persisted; all
/// persisted references are offsets relative to the region base.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct RegionOffset(u64);

impl RegionOffset {
    /// Sentinel for "no allocation". Offset 0 is inside the region header
    /// and is never handed out by the allocator.
    pub const NULL: Self = Self(0);

    /// Create an offset from a raw value.
    #[inline]
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Get the raw value.
    #[inline]
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Whether this is the null sentinel.
    #[inline]
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for RegionOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.0)
    }
}

/// How a database maps its region file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpenMode {
    /// Create the file (and enclosing directory) if absent, size it, and
    /// take an exclusive writer-intent lock.
    ReadWrite,
    /// Map an existing file read-only; no lock is taken, and the mapping
    /// observes a concurrent writer's state as pages propagate.
    ReadOnly,
}

impl OpenMode {
    /// Whether mutations are rejected in this mode.
    #[inline]
    #[must_use]
    pub const fn is_read_only(self) -> bool {
        matches!(self, Self::ReadOnly)
    }
}
