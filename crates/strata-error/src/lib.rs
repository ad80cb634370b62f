use std::path::PathBuf;

use thiserror::Error;

/// Primary error type for StrataBase operations.
///
/// Structured variants for the conditions callers branch on; free-form
/// detail strings only where no caller ever inspects the payload.
#[derive(Error, Debug)]
pub enum StrataError {
    // === Region errors ===
    /// File I/O or mapping failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Read-only open of a region that does not exist on disk.
    #[error("region not found: '{path}'")]
    RegionMissing { path: PathBuf },

    /// The region file exists but its size does not match the requested one.
    #[error("region size mismatch: requested {expected} bytes, file is {actual}")]
    SizeMismatch { expected: u64, actual: u64 },

    /// Region exhausted; the current operation was rolled back.
    #[error("region capacity exceeded: requested {requested} bytes, {available} available")]
    Capacity { requested: u64, available: u64 },

    /// Region header failed validation on open.
    #[error("region is corrupt: {detail}")]
    Corrupt { detail: String },

    // === Registration errors ===
    /// The same record type was registered twice on one database.
    #[error("index for {type_name} is already registered")]
    AlreadyRegistered { type_name: &'static str },

    /// Read-only database asked for an index the region has never seen.
    #[error("index for {type_name} does not exist in read-only region")]
    IndexMissing { type_name: &'static str },

    // === Data errors ===
    /// Primary-key lookup on an id that does not exist.
    #[error("{type_name} object {id} not found")]
    NotFound { type_name: &'static str, id: u64 },

    /// Insert or modify would break a unique secondary key.
    #[error("unique key violation on {type_name}: {key}")]
    UniqueViolation { type_name: &'static str, key: String },

    // === Lifecycle errors ===
    /// Mutation attempted against a read-only database.
    #[error("attempt to write a read-only database")]
    ReadOnly,

    /// Operation is not legal in the current session/journal state.
    #[error("invalid state: {detail}")]
    InvalidState { detail: String },
}

impl StrataError {
    /// Create a corruption error.
    pub fn corrupt(detail: impl Into<String>) -> Self {
        Self::Corrupt {
            detail: detail.into(),
        }
    }

    /// Create an invalid-state error.
    pub fn invalid_state(detail: impl Into<String>) -> Self {
        Self::InvalidState {
            detail: detail.into(),
        }
    }

    /// Create a not-found error.
    pub fn not_found(type_name: &'static str, id: u64) -> Self {
        Self::NotFound { type_name, id }
    }

    /// Create a unique-key violation error.
    pub fn unique_violation(type_name: &'static str, key: impl Into<String>) -> Self {
        Self::UniqueViolation {
            type_name,
            key: key.into(),
        }
    }

    /// Whether this is an I/O-class failure (missing paths included).
    #[must_use]
    pub const fn is_io(&self) -> bool {
        matches!(self, Self::Io(_) | Self::RegionMissing { .. })
    }

    /// Whether this is a capacity-class failure.
    #[must_use]
    pub const fn is_capacity(&self) -> bool {
        matches!(self, Self::Capacity { .. } | Self::SizeMismatch { .. })
    }

    /// Whether this is a constraint failure the caller can recover from by
    /// choosing different data.
    #[must_use]
    pub const fn is_constraint(&self) -> bool {
        matches!(self, Self::UniqueViolation { .. })
    }
}

/// Result type alias using `StrataError`.
pub type Result<T> = std::result::Result<T, StrataError>;
