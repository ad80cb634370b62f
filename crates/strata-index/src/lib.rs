//! Typed multi-key indices and their undo journals.
//!
//! [`TypedIndex`] keeps every live record of one type ordered by primary
//! key and by each declared [`SecondaryKey`], written through to a
//! [`strata_arena::Region`]. [`UndoJournal`] records per-frame reversal
//! actions so a database session can revert groups of mutations.

pub mod journal;
pub mod key;
pub mod typed;

pub use journal::{RevisionFrame, UndoJournal, UndoState};
pub use key::{IndexedRecord, KeyRegistry, SecondaryKey};
pub use typed::{AbstractIndex, TypedIndex};
