//! The StrataBase arena: one memory-mapped region file holding a header,
//! an index slot table, a first-fit suballocator, and per-type object
//! directories. Everything persisted is offset-addressed so the file can
//! be mapped at any base address in any process.

pub mod directory;
pub mod header;
pub mod region;

pub use directory::{DirEntry, SlotId};
pub use header::{DATA_START, MAX_INDEX_SLOTS, MIN_REGION_SIZE, REGION_FILE_NAME};
pub use region::Region;
