//! Payload serialization hooks
//!
//! The core treats payloads as opaque strings. These two functions are the
//! only place caller values are turned into those strings and back, so the
//! wire format can be swapped in one spot without touching manager or
//! storage logic.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::CacheResult;

/// Serialize a caller value into the opaque payload stored in a record
pub fn encode<T: Serialize>(value: &T) -> CacheResult<String> {
    Ok(serde_json::to_string(value)?)
}

/// Deserialize a stored payload back into the caller's type
pub fn decode<T: DeserializeOwned>(payload: &str) -> CacheResult<T> {
    Ok(serde_json::from_str(payload)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct User {
        id: u64,
        name: String,
    }

    #[test]
    fn test_round_trip() {
        let user = User {
            id: 7,
            name: "A".to_string(),
        };
        let payload = encode(&user).unwrap();
        let back: User = decode(&payload).unwrap();
        assert_eq!(back, user);
    }

    #[test]
    fn test_decode_error_is_serialization() {
        let err = decode::<User>("{broken").unwrap_err();
        assert!(matches!(err, crate::error::CacheError::Serialization(_)));
    }
}
