//! StrataBase: an embeddable, in-process object database for the mutable
//! state of a deterministic state machine.
//!
//! Typed records live in multi-keyed ordered indices backed by a single
//! memory-mapped region file; a stack of nestable undo sessions reverts or
//! commits groups of mutations atomically.
//!
//! ```no_run
//! use stratabase::{
//!     ByteReader, ByteWriter, Database, IndexedRecord, KeyRegistry, ObjectId, OpenMode, Record,
//!     Result, SecondaryKey, TypeTag,
//! };
//!
//! #[derive(Debug, Clone, Default)]
//! struct Account {
//!     id: ObjectId,
//!     name: String,
//!     balance: i64,
//! }
//!
//! impl Record for Account {
//!     const TYPE_TAG: TypeTag = TypeTag::new(0);
//!     const TYPE_NAME: &'static str = "account";
//!     fn id(&self) -> ObjectId {
//!         self.id
//!     }
//!     fn set_id(&mut self, id: ObjectId) {
//!         self.id = id;
//!     }
//!     fn encode(&self, w: &mut ByteWriter) {
//!         w.put_u64(self.id.get());
//!         w.put_str(&self.name);
//!         w.put_i64(self.balance);
//!     }
//!     fn decode(r: &mut ByteReader<'_>) -> Result<Self> {
//!         Ok(Self {
//!             id: ObjectId::new(r.get_u64()?),
//!             name: r.get_str()?.to_owned(),
//!             balance: r.get_i64()?,
//!         })
//!     }
//! }
//!
//! struct ByName;
//! impl SecondaryKey<Account> for ByName {
//!     type Key = String;
//!     const UNIQUE: bool = true;
//!     fn extract(record: &Account) -> String {
//!         record.name.clone()
//!     }
//! }
//!
//! impl IndexedRecord for Account {
//!     fn secondary_keys(registry: &mut KeyRegistry<Self>) {
//!         registry.add::<ByName>();
//!     }
//! }
//!
//! # fn main() -> Result<()> {
//! let db = Database::open("./state", OpenMode::ReadWrite, 8 * 1024 * 1024)?;
//! db.add_index::<Account>()?;
//!
//! let alice = db.create::<Account>(|a| {
//!     a.name = "alice".into();
//!     a.balance = 100;
//! })?;
//!
//! {
//!     let mut session = db.start_undo_session(true);
//!     db.modify::<Account>(alice.id(), |a| a.balance -= 30)?;
//!     session.push(); // keep the transfer
//! }
//! db.undo()?; // ...or revert it later
//! # Ok(())
//! # }
//! ```

pub mod database;
pub mod handle;
pub mod session;

pub use database::Database;
pub use handle::IndexHandle;
pub use session::Session;

pub use strata_error::{Result, StrataError};
pub use strata_index::{IndexedRecord, KeyRegistry, SecondaryKey};
pub use strata_types::{ByteReader, ByteWriter, ObjectId, OpenMode, Record, TypeTag};
