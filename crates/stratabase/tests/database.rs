//! End-to-end database scenarios: registration, cross-process visibility,
//! session revert/push/squash composition, and revision bookkeeping.

use std::cmp::Reverse;

use stratabase::{
    ByteReader, ByteWriter, Database, IndexedRecord, KeyRegistry, ObjectId, OpenMode, Record,
    Result, SecondaryKey, StrataError, TypeTag,
};
use tempfile::tempdir;

const REGION_SIZE: u64 = 8 * 1024 * 1024;

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq)]
struct Book {
    id: ObjectId,
    a: i32,
    b: i32,
}

impl Record for Book {
    const TYPE_TAG: TypeTag = TypeTag::new(0);
    const TYPE_NAME: &'static str = "book";

    fn id(&self) -> ObjectId {
        self.id
    }

    fn set_id(&mut self, id: ObjectId) {
        self.id = id;
    }

    fn encode(&self, w: &mut ByteWriter) {
        w.put_u64(self.id.get());
        w.put_i32(self.a);
        w.put_i32(self.b);
    }

    fn decode(r: &mut ByteReader<'_>) -> Result<Self> {
        Ok(Self {
            id: ObjectId::new(r.get_u64()?),
            a: r.get_i32()?,
            b: r.get_i32()?,
        })
    }
}

struct ByA;
impl SecondaryKey<Book> for ByA {
    type Key = i32;
    fn extract(record: &Book) -> i32 {
        record.a
    }
}

struct ByB;
impl SecondaryKey<Book> for ByB {
    type Key = i32;
    fn extract(record: &Book) -> i32 {
        record.b
    }
}

impl IndexedRecord for Book {
    fn secondary_keys(registry: &mut KeyRegistry<Self>) {
        registry.add::<ByA>();
        registry.add::<ByB>();
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
struct Author {
    id: ObjectId,
    name: String,
    num_books: i32,
}

impl Record for Author {
    const TYPE_TAG: TypeTag = TypeTag::new(1);
    const TYPE_NAME: &'static str = "author";

    fn id(&self) -> ObjectId {
        self.id
    }

    fn set_id(&mut self, id: ObjectId) {
        self.id = id;
    }

    fn encode(&self, w: &mut ByteWriter) {
        w.put_u64(self.id.get());
        w.put_str(&self.name);
        w.put_i32(self.num_books);
    }

    fn decode(r: &mut ByteReader<'_>) -> Result<Self> {
        Ok(Self {
            id: ObjectId::new(r.get_u64()?),
            name: r.get_str()?.to_owned(),
            num_books: r.get_i32()?,
        })
    }
}

struct ByName;
impl SecondaryKey<Author> for ByName {
    type Key = String;
    fn extract(record: &Author) -> String {
        record.name.clone()
    }
}

/// Most-published first, names ascending on a tie, then id.
struct ByNumBooks;
impl SecondaryKey<Author> for ByNumBooks {
    type Key = (Reverse<i32>, String, ObjectId);
    const UNIQUE: bool = true;
    fn extract(record: &Author) -> Self::Key {
        (Reverse(record.num_books), record.name.clone(), record.id())
    }
}

impl IndexedRecord for Author {
    fn secondary_keys(registry: &mut KeyRegistry<Self>) {
        registry.add::<ByName>();
        registry.add::<ByNumBooks>();
    }
}

fn book_db(dir: &std::path::Path) -> Database {
    let db = Database::open(dir, OpenMode::ReadWrite, REGION_SIZE).unwrap();
    db.add_index::<Book>().unwrap();
    db
}

fn book_ab(db: &Database, id: u64) -> (i32, i32) {
    let book = db.get::<Book>(ObjectId::new(id)).unwrap();
    (book.a, book.b)
}

// ---------------------------------------------------------------------------
// Open, create, and cross-mapping visibility
// ---------------------------------------------------------------------------

#[test]
fn open_and_create() {
    let dir = tempdir().unwrap();

    let db = Database::open(dir.path(), OpenMode::ReadWrite, REGION_SIZE).unwrap();
    let db2 = Database::open(dir.path(), OpenMode::ReadOnly, REGION_SIZE).unwrap();

    // The index does not exist yet in the read-only view.
    assert!(matches!(
        db2.add_index::<Book>().unwrap_err(),
        StrataError::IndexMissing { .. }
    ));

    db.add_index::<Book>().unwrap();
    assert!(matches!(
        db.add_index::<Book>().unwrap_err(),
        StrataError::AlreadyRegistered { .. }
    ));

    // The writer registered it, so the read-only view finds it now.
    db2.add_index::<Book>().unwrap();

    let new_book = db
        .create::<Book>(|b| {
            b.a = 3;
            b.b = 4;
        })
        .unwrap();
    assert_eq!(new_book.id(), ObjectId::ZERO);

    let copy = db2.get::<Book>(ObjectId::ZERO).unwrap();
    assert_eq!((copy.a, copy.b), (3, 4));

    db.modify::<Book>(new_book.id(), |b| {
        b.a = 5;
        b.b = 6;
    })
    .unwrap();
    assert_eq!(book_ab(&db, 0), (5, 6));
    assert_eq!(book_ab(&db2, 0), (5, 6));

    {
        let _session = db.start_undo_session(true);
        db.modify::<Book>(new_book.id(), |b| {
            b.a = 7;
            b.b = 8;
        })
        .unwrap();
        assert_eq!(book_ab(&db, 0), (7, 8));
    }
    assert_eq!(book_ab(&db, 0), (5, 6));

    {
        let _session = db.start_undo_session(true);
        let book2 = db
            .create::<Book>(|b| {
                b.a = 9;
                b.b = 10;
            })
            .unwrap();
        assert_eq!(book2.id(), ObjectId::new(1));
        assert_eq!(book_ab(&db, 0), (5, 6));
        assert_eq!(book_ab(&db, 1), (9, 10));
    }
    assert!(matches!(
        db2.get::<Book>(ObjectId::new(1)).unwrap_err(),
        StrataError::NotFound { .. }
    ));
    assert_eq!(book_ab(&db, 0), (5, 6));

    {
        let mut session = db.start_undo_session(true);
        db.modify::<Book>(new_book.id(), |b| {
            b.a = 7;
            b.b = 8;
        })
        .unwrap();
        session.push();
    }
    assert_eq!(book_ab(&db, 0), (7, 8));
    db.undo().unwrap();
    assert_eq!(book_ab(&db, 0), (5, 6));
    assert_eq!(book_ab(&db2, 0), (5, 6));
}

// ---------------------------------------------------------------------------
// Session composition
// ---------------------------------------------------------------------------

#[test]
fn dropped_session_reverts_modifications() {
    let dir = tempdir().unwrap();
    let db = book_db(dir.path());
    let book = db
        .create::<Book>(|b| {
            b.a = 5;
            b.b = 6;
        })
        .unwrap();

    {
        let _session = db.start_undo_session(true);
        db.modify::<Book>(book.id(), |b| {
            b.a = 7;
            b.b = 8;
        })
        .unwrap();
        assert_eq!(book_ab(&db, 0), (7, 8));
    }
    assert_eq!(book_ab(&db, 0), (5, 6));
}

#[test]
fn dropped_session_reverts_creation_and_rewinds_ids() {
    let dir = tempdir().unwrap();
    let db = book_db(dir.path());
    db.create::<Book>(|b| {
        b.a = 1;
        b.b = 1;
    })
    .unwrap();

    {
        let _session = db.start_undo_session(true);
        let inside = db.create::<Book>(|b| b.a = 9).unwrap();
        assert_eq!(inside.id(), ObjectId::new(1));
    }
    assert!(matches!(
        db.get::<Book>(ObjectId::new(1)).unwrap_err(),
        StrataError::NotFound { .. }
    ));

    // The allocator was rewound: the next creation gets id 1 again.
    let next = db.create::<Book>(|b| b.a = 2).unwrap();
    assert_eq!(next.id(), ObjectId::new(1));
}

#[test]
fn pushed_session_survives_drop_and_undoes_later() {
    let dir = tempdir().unwrap();
    let db = book_db(dir.path());
    let book = db
        .create::<Book>(|b| {
            b.a = 5;
            b.b = 6;
        })
        .unwrap();
    let before = db.revision();

    {
        let mut session = db.start_undo_session(true);
        db.modify::<Book>(book.id(), |b| {
            b.a = 7;
            b.b = 8;
        })
        .unwrap();
        session.push();
    }
    assert_eq!(book_ab(&db, 0), (7, 8));
    assert_eq!(db.revision(), before + 1);

    db.undo().unwrap();
    assert_eq!(book_ab(&db, 0), (5, 6));
    assert_eq!(db.revision(), before);
}

#[test]
fn squash_merges_into_the_enclosing_session() {
    let dir = tempdir().unwrap();
    let db = book_db(dir.path());
    db.set_revision(42).unwrap();
    let book = db
        .create::<Book>(|b| {
            b.a = 3;
            b.b = 4;
        })
        .unwrap();

    let s1 = db.start_undo_session(true);
    assert_eq!(s1.revision(), 43);
    db.modify::<Book>(book.id(), |b| {
        b.a = 5;
        b.b = 6;
    })
    .unwrap();

    {
        let mut s2 = db.start_undo_session(true);
        assert_eq!(s2.revision(), 44);
        db.modify::<Book>(book.id(), |b| {
            b.a = 7;
            b.b = 8;
        })
        .unwrap();

        s2.squash();
        assert_eq!(db.revision(), 43);
        // The session keeps its construction-time revision tag.
        assert_eq!(s2.revision(), 44);
    }

    // The squashed mutations belong to s1 now.
    assert_eq!(db.revision(), 43);
    assert_eq!(book_ab(&db, 0), (7, 8));

    drop(s1);
    assert_eq!(db.revision(), 42);
    assert_eq!(book_ab(&db, 0), (3, 4));
}

#[test]
fn squash_of_the_outermost_session_behaves_like_push() {
    let dir = tempdir().unwrap();
    let db = book_db(dir.path());
    let book = db.create::<Book>(|b| b.a = 1).unwrap();

    {
        let mut session = db.start_undo_session(true);
        db.modify::<Book>(book.id(), |b| b.a = 2).unwrap();
        session.squash();
    }
    // No frame below: the mutation sticks, and a later undo reverts it.
    assert_eq!(db.get::<Book>(book.id()).unwrap().a, 2);
    db.undo().unwrap();
    assert_eq!(db.get::<Book>(book.id()).unwrap().a, 1);
}

#[test]
fn disabled_session_is_inert() {
    let dir = tempdir().unwrap();
    let db = book_db(dir.path());
    let before = db.revision();

    {
        let _session = db.start_undo_session(false);
        db.create::<Book>(|b| b.a = 1).unwrap();
    }
    assert_eq!(db.revision(), before);
    assert_eq!(db.get::<Book>(ObjectId::ZERO).unwrap().a, 1);

    // Nothing was journaled, so undo has nothing to revert.
    db.undo().unwrap();
    assert_eq!(db.revision(), before);
    assert_eq!(db.get::<Book>(ObjectId::ZERO).unwrap().a, 1);
}

#[test]
fn ids_are_contiguous_within_a_session() {
    let dir = tempdir().unwrap();
    let db = book_db(dir.path());
    db.create::<Book>(|b| b.a = 0).unwrap();

    {
        let _session = db.start_undo_session(true);
        for expected in 1..5u64 {
            let created = db.create::<Book>(|b| b.a = expected as i32).unwrap();
            assert_eq!(created.id(), ObjectId::new(expected));
        }
    }

    // Dropping the session restored the allocator.
    let next = db.create::<Book>(|b| b.a = 9).unwrap();
    assert_eq!(next.id(), ObjectId::new(1));
}

// ---------------------------------------------------------------------------
// Revision bookkeeping
// ---------------------------------------------------------------------------

#[test]
fn check_revision() {
    let dir = tempdir().unwrap();
    let db = Database::open(dir.path(), OpenMode::ReadWrite, REGION_SIZE).unwrap();

    // No indices exist yet.
    assert_eq!(db.revision(), -1);

    db.add_index::<Book>().unwrap();
    assert_eq!(db.revision(), 0);

    db.set_revision(42).unwrap();
    assert_eq!(db.revision(), 42);

    let new_book = db
        .create::<Book>(|b| {
            b.a = 1;
            b.b = 2;
        })
        .unwrap();
    db.modify::<Book>(new_book.id(), |b| {
        b.a = 3;
        b.b = 4;
    })
    .unwrap();

    {
        let session1 = db.start_undo_session(true);
        assert_eq!(db.revision(), 43);
        assert_eq!(session1.revision(), 43);
        assert!(matches!(
            db.set_revision(13).unwrap_err(),
            StrataError::InvalidState { .. }
        ));

        db.modify::<Book>(new_book.id(), |b| {
            b.a = 5;
            b.b = 6;
        })
        .unwrap();
        assert_eq!(book_ab(&db, 0), (5, 6));

        {
            let mut session2 = db.start_undo_session(true);
            db.modify::<Book>(new_book.id(), |b| {
                b.a = 7;
                b.b = 8;
            })
            .unwrap();
            assert_eq!(db.revision(), 44);
            assert_eq!(session2.revision(), 44);

            session2.squash();
            assert_eq!(db.revision(), 43);
            // The session's own revision attribute does not follow.
            assert_eq!(session2.revision(), 44);
        }

        // session2 went out of scope after its squash: nothing reverted.
        assert_eq!(db.revision(), 43);
        assert_eq!(book_ab(&db, 0), (7, 8));

        assert_eq!(session1.revision(), 43);
        // A moved session carries the revert-on-drop contract with it.
        let session = session1;
        assert_eq!(db.revision(), 43);
        assert_eq!(session.revision(), 43);
    }

    // session1 (as `session`) went out of scope and undid revision 43.
    assert_eq!(db.revision(), 42);
    assert_eq!(book_ab(&db, 0), (3, 4));

    let db2 = db;
    assert_eq!(db2.revision(), 42);

    {
        let session = db2.start_undo_session(true);
        assert_eq!(session.revision(), 43);

        // Registering an index inside an open session: the new index picks
        // up the outer session's revision and journal depth.
        db2.add_index::<Author>().unwrap();

        let new_author = db2
            .create::<Author>(|a| {
                a.name = "Mark Twain".to_owned();
                a.num_books = 13;
            })
            .unwrap();

        let bindx = db2.index::<Book>().unwrap();
        assert_eq!(bindx.revision(), 43);
        let aindx = db2.index::<Author>().unwrap();
        assert_eq!(aindx.revision(), 43);

        // Direct revision writes are off the table once sessions exist.
        assert!(matches!(
            aindx.set_revision(13).unwrap_err(),
            StrataError::InvalidState { .. }
        ));

        {
            let mut session = db2.start_undo_session(true);
            assert_eq!(db2.revision(), 44);
            assert_eq!(bindx.revision(), 44);
            assert_eq!(aindx.revision(), 44);

            db2.create::<Author>(|a| {
                a.name = "F. Scott Fitzgerald".to_owned();
                a.num_books = 13;
            })
            .unwrap();

            let first = aindx.iter_by::<ByNumBooks>().unwrap().next().unwrap();
            assert_eq!(first.name, "F. Scott Fitzgerald");

            db2.modify::<Author>(new_author.id(), |a| a.num_books += 11)
                .unwrap();
            let first = aindx.iter_by::<ByNumBooks>().unwrap().next().unwrap();
            assert_eq!(first.name, "Mark Twain");

            session.push();
        }

        assert_eq!(db2.revision(), 44);
        let twain = aindx
            .find_by::<ByName>(&"Mark Twain".to_owned())
            .unwrap()
            .unwrap();
        assert_eq!(twain.num_books, 24);

        db2.commit(44);
        assert_eq!(db2.revision(), 44);
    }

    // The outer session's frame was committed away; dropping it changed
    // nothing.
    assert_eq!(db2.revision(), 44);
    let aindx = db2.index::<Author>().unwrap();
    assert_eq!(aindx.len(), 2);
}

#[test]
fn set_revision_gated_by_open_sessions() {
    let dir = tempdir().unwrap();
    let db = book_db(dir.path());
    db.create::<Book>(|b| b.a = 1).unwrap();

    let mut session = db.start_undo_session(true);
    db.modify::<Book>(ObjectId::ZERO, |b| b.a = 2).unwrap();
    assert!(matches!(
        db.set_revision(7).unwrap_err(),
        StrataError::InvalidState { .. }
    ));

    // Committing through the open revision empties every journal.
    db.commit(session.revision());
    db.set_revision(7).unwrap();
    assert_eq!(db.revision(), 7);

    // The committed mutation is permanent; the drop reverts nothing.
    session.push();
    drop(session);
    assert_eq!(db.get::<Book>(ObjectId::ZERO).unwrap().a, 2);
}

#[test]
fn late_registered_index_reverts_with_the_outer_session() {
    let dir = tempdir().unwrap();
    let db = book_db(dir.path());

    {
        let _session = db.start_undo_session(true);
        db.add_index::<Author>().unwrap();
        db.create::<Author>(|a| {
            a.name = "Mark Twain".to_owned();
            a.num_books = 13;
        })
        .unwrap();
        assert_eq!(db.index::<Author>().unwrap().len(), 1);
    }

    // The back-filled frame carried the creation, so the drop erased it.
    assert_eq!(db.index::<Author>().unwrap().len(), 0);
    assert!(matches!(
        db.get::<Author>(ObjectId::ZERO).unwrap_err(),
        StrataError::NotFound { .. }
    ));
}

#[test]
fn undo_all_unwinds_every_open_frame() {
    let dir = tempdir().unwrap();
    let db = book_db(dir.path());
    assert_eq!(db.capacity(), REGION_SIZE);
    let book = db.create::<Book>(|b| b.a = 1).unwrap();

    let mut outer = db.start_undo_session(true);
    db.modify::<Book>(book.id(), |b| b.a = 2).unwrap();
    let mut inner = db.start_undo_session(true);
    db.modify::<Book>(book.id(), |b| b.a = 3).unwrap();

    db.undo_all().unwrap();
    assert_eq!(db.get::<Book>(book.id()).unwrap().a, 1);
    assert_eq!(db.revision(), 0);
    db.flush().unwrap();

    // Both frames are already gone; the session drops revert nothing.
    inner.push();
    outer.push();
}

#[test]
fn session_undo_reverts_early() {
    let dir = tempdir().unwrap();
    let db = book_db(dir.path());
    let book = db.create::<Book>(|b| b.a = 1).unwrap();

    let mut session = db.start_undo_session(true);
    db.modify::<Book>(book.id(), |b| b.a = 2).unwrap();
    session.undo().unwrap();
    assert_eq!(db.get::<Book>(book.id()).unwrap().a, 1);

    // Already reverted: dropping the session must not revert again.
    db.modify::<Book>(book.id(), |b| b.a = 5).unwrap();
    drop(session);
    assert_eq!(db.get::<Book>(book.id()).unwrap().a, 5);
}

// ---------------------------------------------------------------------------
// Secondary-index ordering
// ---------------------------------------------------------------------------

#[test]
fn composite_key_orders_and_reorders_on_modify() {
    let dir = tempdir().unwrap();
    let db = Database::open(dir.path(), OpenMode::ReadWrite, REGION_SIZE).unwrap();
    db.add_index::<Author>().unwrap();

    let twain = db
        .create::<Author>(|a| {
            a.name = "Mark Twain".to_owned();
            a.num_books = 13;
        })
        .unwrap();
    db.create::<Author>(|a| {
        a.name = "F. Scott Fitzgerald".to_owned();
        a.num_books = 13;
    })
    .unwrap();

    let authors = db.index::<Author>().unwrap();
    let names: Vec<String> = authors
        .iter_by::<ByNumBooks>()
        .unwrap()
        .map(|a| a.name)
        .collect();
    // Equal num_books: names tie-break ascending.
    assert_eq!(names, vec!["F. Scott Fitzgerald", "Mark Twain"]);

    db.modify::<Author>(twain.id(), |a| a.num_books = 24).unwrap();
    let names: Vec<String> = authors
        .iter_by::<ByNumBooks>()
        .unwrap()
        .map(|a| a.name)
        .collect();
    assert_eq!(names, vec!["Mark Twain", "F. Scott Fitzgerald"]);
}

#[test]
fn secondary_ordering_round_trips_through_a_session() {
    let dir = tempdir().unwrap();
    let db = Database::open(dir.path(), OpenMode::ReadWrite, REGION_SIZE).unwrap();
    db.add_index::<Author>().unwrap();

    for (name, count) in [("Austen", 6), ("Tolstoy", 12), ("Christie", 66)] {
        db.create::<Author>(|a| {
            a.name = name.to_owned();
            a.num_books = count;
        })
        .unwrap();
    }
    let authors = db.index::<Author>().unwrap();
    let before: Vec<Author> = authors.iter_by::<ByNumBooks>().unwrap().collect();

    {
        let _session = db.start_undo_session(true);
        db.modify::<Author>(ObjectId::ZERO, |a| a.num_books = 100)
            .unwrap();
        let first = authors.iter_by::<ByNumBooks>().unwrap().next().unwrap();
        assert_eq!(first.name, "Austen");
    }

    let after: Vec<Author> = authors.iter_by::<ByNumBooks>().unwrap().collect();
    assert_eq!(before, after);
}

// ---------------------------------------------------------------------------
// Read-only mode
// ---------------------------------------------------------------------------

#[test]
fn read_only_open_rules() {
    let missing = std::env::temp_dir().join("stratabase-no-such-dir-2b9c");
    let err = Database::open(&missing, OpenMode::ReadOnly, REGION_SIZE).unwrap_err();
    assert!(err.is_io());

    let dir = tempdir().unwrap();
    // Directory exists but holds no region file yet.
    let err = Database::open(dir.path(), OpenMode::ReadOnly, REGION_SIZE).unwrap_err();
    assert!(err.is_io());

    {
        let db = Database::open(dir.path(), OpenMode::ReadWrite, REGION_SIZE).unwrap();
        assert!(!db.is_read_only());
    }

    let db = Database::open(dir.path(), OpenMode::ReadOnly, REGION_SIZE).unwrap();
    assert!(db.is_read_only());
}

#[test]
fn read_only_database_rejects_mutations() {
    let dir = tempdir().unwrap();
    {
        let db = book_db(dir.path());
        db.create::<Book>(|b| b.a = 1).unwrap();
    }

    let db = Database::open(dir.path(), OpenMode::ReadOnly, REGION_SIZE).unwrap();
    db.add_index::<Book>().unwrap();

    assert!(matches!(
        db.create::<Book>(|b| b.a = 2).unwrap_err(),
        StrataError::ReadOnly
    ));
    assert!(matches!(
        db.modify::<Book>(ObjectId::ZERO, |b| b.a = 2).unwrap_err(),
        StrataError::ReadOnly
    ));
    assert!(matches!(
        db.remove::<Book>(ObjectId::ZERO).unwrap_err(),
        StrataError::ReadOnly
    ));
    assert!(matches!(
        db.set_revision(5).unwrap_err(),
        StrataError::ReadOnly
    ));

    // Sessions on a read-only database are inert sentinels.
    {
        let _session = db.start_undo_session(true);
    }
    assert_eq!(db.get::<Book>(ObjectId::ZERO).unwrap().a, 1);
}
