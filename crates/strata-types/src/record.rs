//! The [`Record`] trait implemented by application-defined stored types.

use strata_error::Result;

use crate::codec::{ByteReader, ByteWriter};
use crate::{ObjectId, TypeTag};

/// A record type stored in a StrataBase database.
///
/// Implementations declare a stable [`TypeTag`] (the identity of their
/// index inside the region), expose their primary key, and encode
/// themselves into the region byte codec. Secondary keys are declared
/// separately, at index-registration time.
///
/// The codec representation must be self-contained: every field encodes
/// inline (strings and vectors length-prefixed), never as an address.
pub trait Record: Clone + Send + Sync + 'static {
    /// Stable tag identifying this type's index. Two record types in one
    /// database must never share a tag.
    const TYPE_TAG: TypeTag;

    /// Human-readable type name used in errors and logs.
    const TYPE_NAME: &'static str;

    /// The primary key.
    fn id(&self) -> ObjectId;

    /// Overwrite the primary key. Called exactly once, at creation, before
    /// the record is indexed; mutating the id afterwards is rejected.
    fn set_id(&mut self, id: ObjectId);

    /// Encode all fields, id included, into `w`.
    fn encode(&self, w: &mut ByteWriter);

    /// Decode a record previously written by [`Record::encode`].
    fn decode(r: &mut ByteReader<'_>) -> Result<Self>;
}
