//! JSON codec using `serde_json`.
//!
//! Headers and bodies travel as JSON text inside terminated wire strings.
//! An absent body is sent as `null`.
//!
//! # Example
//!
//! ```
//! use peerwire::codec::JsonCodec;
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Serialize, Deserialize, PartialEq, Debug)]
//! struct Message {
//!     id: u32,
//!     content: String,
//! }
//!
//! let msg = Message { id: 42, content: "hello".to_string() };
//! let encoded = JsonCodec::encode(&msg).unwrap();
//! let decoded: Message = JsonCodec::decode(&encoded).unwrap();
//! assert_eq!(decoded, msg);
//! ```

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Result;

/// Text encoding of an absent value.
pub const NULL_PAYLOAD: &str = "null";

/// JSON codec for headers and bodies.
pub struct JsonCodec;

impl JsonCodec {
    /// Encode a value to JSON text.
    ///
    /// # Errors
    ///
    /// Returns error if the value cannot be serialized (e.g. a map with
    /// non-string keys).
    #[inline]
    pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<String> {
        Ok(serde_json::to_string(value)?)
    }

    /// Decode JSON text to a value.
    ///
    /// # Errors
    ///
    /// Returns error if the text is not valid JSON for type `T`.
    #[inline]
    pub fn decode<T: DeserializeOwned>(text: &str) -> Result<T> {
        Ok(serde_json::from_str(text)?)
    }

    /// Decode an optional value, logging and discarding malformed input.
    ///
    /// Empty text and `null` both decode to `None`.
    pub fn decode_lenient<T: DeserializeOwned>(text: &str, what: &str) -> Option<T> {
        if text.is_empty() {
            return None;
        }
        match serde_json::from_str::<Option<T>>(text) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!("Malformed {} payload ({}): {}", what, e, text);
                None
            }
        }
    }

    /// Encode an optional value, logging serialization failures as `null`.
    pub fn encode_lenient<T: Serialize + ?Sized>(value: Option<&T>, what: &str) -> String {
        match value {
            None => NULL_PAYLOAD.to_string(),
            Some(v) => match serde_json::to_string(v) {
                Ok(text) => text,
                Err(e) => {
                    tracing::warn!("Failed to encode {} payload: {}", what, e);
                    NULL_PAYLOAD.to_string()
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::collections::HashMap;

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct TestStruct {
        id: u32,
        name: String,
    }

    #[test]
    fn test_encode_uses_field_names() {
        let encoded = JsonCodec::encode(&TestStruct {
            id: 1,
            name: "x".into(),
        })
        .unwrap();
        assert_eq!(encoded, r#"{"id":1,"name":"x"}"#);
    }

    #[test]
    fn test_decode_error_on_invalid_data() {
        let result: Result<TestStruct> = JsonCodec::decode("not json");
        assert!(result.is_err());
    }

    #[test]
    fn test_decode_lenient_null_and_empty() {
        assert_eq!(JsonCodec::decode_lenient::<TestStruct>("null", "body"), None);
        assert_eq!(JsonCodec::decode_lenient::<TestStruct>("", "body"), None);
    }

    #[test]
    fn test_decode_lenient_malformed_is_none() {
        assert_eq!(
            JsonCodec::decode_lenient::<HashMap<String, String>>("{oops", "headers"),
            None
        );
        assert_eq!(JsonCodec::decode_lenient::<u32>("\"text\"", "body"), None);
    }

    #[test]
    fn test_decode_lenient_value() {
        let headers: HashMap<String, String> =
            JsonCodec::decode_lenient(r#"{"a":"1"}"#, "headers").unwrap();
        assert_eq!(headers["a"], "1");
    }

    #[test]
    fn test_encode_lenient_none_is_null() {
        assert_eq!(JsonCodec::encode_lenient::<u32>(None, "body"), "null");
        assert_eq!(JsonCodec::encode_lenient(Some(&5u32), "body"), "5");
    }
}
