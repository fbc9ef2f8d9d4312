//! Canonical encoding for values crossing node boundaries.
//!
//! Uses postcard for byte-stable encoding. The byte counts reported to the
//! statistics layer are the lengths produced here.

use crate::error::CoreResult;
use serde::{Deserialize, Serialize};

/// Encode a value to canonical bytes
///
/// # Errors
///
/// Returns `CoreError::InvalidEncoding` if the value cannot be serialized
pub fn encode<T: Serialize + ?Sized>(value: &T) -> CoreResult<Vec<u8>> {
    Ok(postcard::to_allocvec(value)?)
}

/// Decode a value from canonical bytes
///
/// # Errors
///
/// Returns `CoreError::InvalidEncoding` if the bytes are not a valid encoding
pub fn decode<'de, T: Deserialize<'de>>(bytes: &'de [u8]) -> CoreResult<T> {
    Ok(postcard::from_bytes(bytes)?)
}

/// Length of the canonical encoding of a value, or 0 if it cannot be encoded
#[must_use]
pub fn encoded_len<T: Serialize + ?Sized>(value: &T) -> u64 {
    postcard::to_allocvec(value)
        .map(|bytes| bytes.len() as u64)
        .unwrap_or(0)
}
