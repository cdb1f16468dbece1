//! CBOR serialization helpers for the oxbow wire protocol.
//!
//! Wraps [`ciborium`] so callers get [`WireError`] values instead of the
//! library's generic error types.

use serde::{de::DeserializeOwned, Serialize};

use crate::WireError;

/// Serialize a value to CBOR bytes.
///
/// # Errors
///
/// Returns [`WireError::Serialization`] if the value cannot be serialized.
pub fn to_vec<T: Serialize>(value: &T) -> Result<Vec<u8>, WireError> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf)
        .map_err(|e| WireError::Serialization(format!("CBOR serialization failed: {e}")))?;
    Ok(buf)
}

/// Deserialize a value from CBOR bytes.
///
/// # Errors
///
/// Returns [`WireError::Deserialization`] if the bytes cannot be deserialized
/// into the target type.
pub fn from_slice<T: DeserializeOwned>(data: &[u8]) -> Result<T, WireError> {
    ciborium::from_reader(data)
        .map_err(|e| WireError::Deserialization(format!("CBOR deserialization failed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use oxbow_types::Key;

    #[test]
    fn test_roundtrip_key() {
        let key = Key::compute(b"cbor");
        let bytes = to_vec(&key).expect("serialize");
        let restored: Key = from_slice(&bytes).expect("deserialize");
        assert_eq!(key, restored);
    }

    #[test]
    fn test_invalid_data_returns_error() {
        let result: Result<Key, _> = from_slice(&[0xFF, 0xFF, 0xFF]);
        assert!(result.is_err());
    }

    #[test]
    fn test_cbor_is_compact() {
        let key = Key::compute(b"size");
        let cbor = to_vec(&key).expect("serialize");
        let json = serde_json::to_vec(&key).expect("serialize json");
        assert!(cbor.len() <= json.len());
    }
}
