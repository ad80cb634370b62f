//! Undo sessions: scoped handles that revert on drop.

use strata_error::Result;
use tracing::{debug, error};

use crate::database::Database;

/// A scoped handle bracketing one revision across every index of a
/// database.
///
/// Dropping an enabled session reverts every mutation performed while it
/// was the innermost session, unless [`push`](Session::push) or
/// [`squash`](Session::squash) ran first. The revert runs from `Drop`, so
/// it also happens on unwinding. Sessions move freely; after a move only
/// the new owner reverts on drop.
pub struct Session<'db> {
    db: &'db Database,
    revision: i64,
    apply: bool,
}

impl<'db> Session<'db> {
    pub(crate) fn enabled(db: &'db Database, revision: i64) -> Self {
        Self {
            db,
            revision,
            apply: true,
        }
    }

    pub(crate) fn disabled(db: &'db Database, revision: i64) -> Self {
        Self {
            db,
            revision,
            apply: false,
        }
    }

    /// The revision assigned when this session was opened. An immutable
    /// tag: it does not change when [`squash`](Session::squash) lowers the
    /// database revision.
    #[must_use]
    pub fn revision(&self) -> i64 {
        self.revision
    }

    /// Make this session's frame permanent: dropping the session no longer
    /// reverts it (a later [`Database::undo`] still can). Idempotent.
    pub fn push(&mut self) {
        if self.apply {
            self.apply = false;
            debug!(revision = self.revision, "session pushed");
        }
    }

    /// Merge this session's frame into the enclosing session's frame,
    /// decrementing the database revision. With no enclosing frame this
    /// behaves like [`push`](Session::push).
    pub fn squash(&mut self) {
        if self.apply {
            self.db.squash_all();
            self.apply = false;
            debug!(revision = self.revision, "session squashed");
        }
    }

    /// Revert this session's frame now instead of at drop.
    pub fn undo(&mut self) -> Result<()> {
        if self.apply {
            self.apply = false;
            self.db.undo()?;
        }
        Ok(())
    }
}

impl Drop for Session<'_> {
    fn drop(&mut self) {
        if !self.apply {
            return;
        }
        debug!(revision = self.revision, "session dropped, reverting");
        if let Err(e) = self.db.undo() {
            // Reversal only restores state that was valid; failure here
            // means the database is inconsistent.
            if std::thread::panicking() {
                error!(error = %e, "session revert failed during unwind");
            } else {
                panic!("session revert failed, database state is inconsistent: {e}");
            }
        }
    }
}

impl std::fmt::Debug for Session<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("revision", &self.revision)
            .field("reverts_on_drop", &self.apply)
            .finish()
    }
}
