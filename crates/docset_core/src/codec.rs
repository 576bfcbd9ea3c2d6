//! Binary encoding of internal records.
//!
//! History payloads and request mappings are stored as CBOR blobs. The
//! SHA-256 of a row's CBOR encoding serves as its content fingerprint.

use crate::error::{CoreError, CoreResult};
use docset_storage::Row;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};

/// Encodes a value as CBOR.
///
/// # Errors
///
/// Returns [`CoreError::Codec`] if serialization fails.
pub fn encode<T: Serialize>(value: &T) -> CoreResult<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf).map_err(|e| CoreError::codec(e.to_string()))?;
    Ok(buf)
}

/// Decodes a CBOR value.
///
/// # Errors
///
/// Returns [`CoreError::Codec`] if the bytes are malformed.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> CoreResult<T> {
    ciborium::from_reader(bytes).map_err(|e| CoreError::codec(e.to_string()))
}

/// Content fingerprint of a stored row.
///
/// Rows are ordered maps, so equal rows always encode identically.
///
/// # Errors
///
/// Returns [`CoreError::Codec`] if the row cannot be encoded.
pub fn fingerprint(row: &Row) -> CoreResult<[u8; 32]> {
    let bytes = encode(row)?;
    Ok(Sha256::digest(&bytes).into())
}
