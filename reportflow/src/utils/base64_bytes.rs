//! Serde adapter storing byte buffers as standard base64 strings.
//!
//! Use with `#[serde(with = "crate::utils::base64_bytes")]`.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Deserializer, Serializer};

/// Serializes bytes as a base64 string.
pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&STANDARD.encode(bytes))
}

/// Deserializes a base64 string into bytes.
pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
    let encoded = String::deserialize(deserializer)?;
    STANDARD.decode(encoded.as_bytes()).map_err(serde::de::Error::custom)
}

/// Encodes bytes as a base64 string.
#[must_use]
pub fn encode(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Holder {
        #[serde(with = "super")]
        data: Vec<u8>,
    }

    #[test]
    fn test_bytes_serialize_as_base64() {
        let holder = Holder { data: b"hello".to_vec() };
        let json = serde_json::to_string(&holder).unwrap();
        assert_eq!(json, r#"{"data":"aGVsbG8="}"#);
        let back: Holder = serde_json::from_str(&json).unwrap();
        assert_eq!(back, holder);
    }

    #[test]
    fn test_invalid_base64_is_rejected() {
        let result: Result<Holder, _> = serde_json::from_str(r#"{"data":"***"}"#);
        assert!(result.is_err());
    }
}
