//! JSON encoding of stored records.
//!
//! Set-valued fields are `BTreeSet`s and travel as lists; duplicates in a
//! stored list collapse on decode, so only membership is significant.

use serde::{de::DeserializeOwned, Serialize};

use crate::error::{StoreError, StoreResult};

pub fn encode<T: Serialize>(key: &str, value: &T) -> StoreResult<String> {
    serde_json::to_string(value).map_err(|source| StoreError::Corrupt { key: key.to_string(), source })
}

/// Takes raw bytes: a stored value that is not even UTF-8 is corrupt, not
/// a backend failure.
pub fn decode<T: DeserializeOwned>(key: &str, raw: &[u8]) -> StoreResult<T> {
    serde_json::from_slice(raw).map_err(|source| StoreError::Corrupt { key: key.to_string(), source })
}
