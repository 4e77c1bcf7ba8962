//! MsgPack codec using `rmp-serde`.
//!
//! **Always use `to_vec_named`, never `to_vec`.** Message records are
//! discriminated by field name, so they must be encoded as maps. `to_vec`
//! would encode every record as a positional array and the untagged
//! decoding on the other side could no longer tell `{ ack }` from `{ sig }`.

use bytes::Bytes;

use crate::error::Result;

/// MessagePack codec for message records.
///
/// Uses `rmp_serde::to_vec_named` so structs and records are serialized as
/// maps (with field names) rather than arrays.
pub struct MsgPackCodec;

impl MsgPackCodec {
    /// Encode a value to MsgPack bytes.
    ///
    /// # Errors
    ///
    /// Returns error if the value cannot be serialized.
    #[inline]
    pub fn encode<T: serde::Serialize>(value: &T) -> Result<Bytes> {
        Ok(Bytes::from(rmp_serde::to_vec_named(value)?))
    }

    /// Decode MsgPack bytes to a value.
    ///
    /// # Errors
    ///
    /// Returns error if the bytes cannot be deserialized to type T.
    #[inline]
    pub fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}
