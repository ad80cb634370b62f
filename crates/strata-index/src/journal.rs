//! Per-index undo journal: a stack of revision frames.
//!
//! Each frame records, per object id, exactly one reversal action for the
//! mutations performed while the frame was on top:
//!
//! - `Created` — the id was created during the frame; reversal erases it.
//! - `Modified(old)` — first pre-modification value; reversal restores it.
//! - `Removed(old)` — value at erase time (or the pre-frame value when the
//!   object was modified first); reversal reinserts it.
//!
//! An id is in at most one state per frame. Modifying a created object
//! records nothing; erasing a created object cancels the creation; erasing
//! a modified object turns its `Modified` into `Removed` carrying the
//! pre-frame value.
//!
//! Only the top frame accumulates state. Frames beneath are immutable
//! until a squash merges the top into them or undo makes them top again.

use std::collections::BTreeMap;
use std::collections::VecDeque;

use strata_types::ObjectId;
use tracing::debug;

/// Reversal action for one object id within one frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UndoState<R> {
    Created,
    Modified(R),
    Removed(R),
}

/// Reverse-information for one session on one index.
#[derive(Debug, Clone)]
pub struct RevisionFrame<R> {
    revision: i64,
    next_id_before: u64,
    states: BTreeMap<ObjectId, UndoState<R>>,
}

impl<R: Clone> RevisionFrame<R> {
    fn new(revision: i64, next_id_before: u64) -> Self {
        Self {
            revision,
            next_id_before,
            states: BTreeMap::new(),
        }
    }

    /// Revision this frame reverses.
    #[must_use]
    pub fn revision(&self) -> i64 {
        self.revision
    }

    /// Id allocator position when the frame was opened.
    #[must_use]
    pub fn next_id_before(&self) -> u64 {
        self.next_id_before
    }

    /// Number of ids with recorded reversal actions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.states.len()
    }

    /// Whether the frame recorded no mutations.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Record a creation.
    pub fn on_create(&mut self, id: ObjectId) {
        let prior = self.states.insert(id, UndoState::Created);
        debug_assert!(prior.is_none(), "id {id} created twice in one frame");
    }

    /// Record the first modification of `id` within this frame. Later
    /// modifications and modifications of frame-created ids record nothing.
    pub fn on_modify(&mut self, id: ObjectId, old: &R) {
        self.states
            .entry(id)
            .or_insert_with(|| UndoState::Modified(old.clone()));
    }

    /// Record an erase. `current` is the record value at erase time.
    pub fn on_remove(&mut self, id: ObjectId, current: &R) {
        match self.states.remove(&id) {
            // Created-then-erased within the frame: no net object.
            Some(UndoState::Created) => {}
            // The pre-frame value wins over the value at erase time.
            Some(UndoState::Modified(old)) => {
                self.states.insert(id, UndoState::Removed(old));
            }
            Some(UndoState::Removed(old)) => {
                debug_assert!(false, "id {id} erased twice in one frame");
                self.states.insert(id, UndoState::Removed(old));
            }
            None => {
                self.states.insert(id, UndoState::Removed(current.clone()));
            }
        }
    }

    /// Iterate recorded states in id order.
    pub fn states(&self) -> impl Iterator<Item = (ObjectId, &UndoState<R>)> {
        self.states.iter().map(|(id, st)| (*id, st))
    }

    /// Consume the frame, yielding its states in id order.
    #[must_use]
    pub fn into_states(self) -> BTreeMap<ObjectId, UndoState<R>> {
        self.states
    }

    /// Merge `top` (the frame that was above `self`) into this frame.
    fn absorb(&mut self, top: Self) {
        for (id, state) in top.states {
            match state {
                // Ids are never reused, so a creation in the top frame is
                // unknown to this one.
                UndoState::Created => {
                    let prior = self.states.insert(id, UndoState::Created);
                    debug_assert!(prior.is_none(), "id {id} known below its creating frame");
                }
                // If this frame created or already snapshotted the id, its
                // reversal information stands.
                UndoState::Modified(value) => {
                    self.states.entry(id).or_insert(UndoState::Modified(value));
                }
                UndoState::Removed(value) => match self.states.remove(&id) {
                    Some(UndoState::Created) => {}
                    Some(UndoState::Modified(old)) => {
                        self.states.insert(id, UndoState::Removed(old));
                    }
                    Some(UndoState::Removed(old)) => {
                        debug_assert!(false, "id {id} removed in two stacked frames");
                        self.states.insert(id, UndoState::Removed(old));
                    }
                    None => {
                        self.states.insert(id, UndoState::Removed(value));
                    }
                },
            }
        }
    }
}

/// Stack of revision frames for one typed index.
///
/// The back of the deque is the top (only mutable) frame; `commit`
/// discards from the front.
#[derive(Debug)]
pub struct UndoJournal<R> {
    frames: VecDeque<RevisionFrame<R>>,
}

impl<R: Clone> UndoJournal<R> {
    /// Create an empty journal.
    #[must_use]
    pub fn new() -> Self {
        Self {
            frames: VecDeque::new(),
        }
    }

    /// Number of open frames.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Whether no frame is open.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Push an empty frame for `revision`.
    pub fn push_frame(&mut self, revision: i64, next_id_before: u64) {
        self.frames
            .push_back(RevisionFrame::new(revision, next_id_before));
    }

    /// The top frame, if any. Only the top frame records mutations.
    pub fn top_mut(&mut self) -> Option<&mut RevisionFrame<R>> {
        self.frames.back_mut()
    }

    /// Pop the top frame for application by the index.
    pub fn pop_top(&mut self) -> Option<RevisionFrame<R>> {
        self.frames.pop_back()
    }

    /// Discard the top frame, making its mutations permanent.
    pub fn pop_without_undo(&mut self) -> bool {
        self.frames.pop_back().is_some()
    }

    /// Discard frames with `revision <= through`, from the bottom. Live
    /// records are untouched; only reverse information is freed.
    pub fn commit_through(&mut self, through: i64) -> usize {
        let mut discarded = 0;
        while let Some(front) = self.frames.front() {
            if front.revision() > through {
                break;
            }
            self.frames.pop_front();
            discarded += 1;
        }
        if discarded > 0 {
            debug!(through, discarded, "journal frames committed");
        }
        discarded
    }

    /// Merge the top frame into the one below it. Returns `false` (and does
    /// nothing) when fewer than two frames are open.
    pub fn squash_top(&mut self) -> bool {
        if self.frames.len() < 2 {
            return false;
        }
        let top = self.frames.pop_back().expect("depth checked");
        let lower = self.frames.back_mut().expect("depth checked");
        debug!(
            top_revision = top.revision(),
            into_revision = lower.revision(),
            "squashing frame"
        );
        lower.absorb(top);
        true
    }

    /// Revision of the top frame, if any.
    #[must_use]
    pub fn top_revision(&self) -> Option<i64> {
        self.frames.back().map(RevisionFrame::revision)
    }
}

impl<R: Clone> Default for UndoJournal<R> {
    fn default() -> Self {
        Self::new()
    }
}
