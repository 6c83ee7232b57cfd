use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::protocol::error::{Result, RpcError};

/// Structured value serializer used for frame payloads.
///
/// Values are encoded as JSON. The framing layer treats the encoded bytes as
/// opaque.
///
/// # Example
///
/// ```
/// use gridrpc_common::transport::JsonCodec;
/// use serde_json::{json, Value};
///
/// let encoded = JsonCodec::encode(&json!({"n": 42})).unwrap();
/// let (decoded, consumed): (Value, usize) = JsonCodec::decode(&encoded).unwrap();
///
/// assert_eq!(decoded, json!({"n": 42}));
/// assert_eq!(consumed, encoded.len());
/// ```
pub struct JsonCodec;

impl JsonCodec {
    /// Encode a value to bytes
    pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(value)?)
    }

    /// Decode the first value in `data`, returning it with the number of
    /// bytes it occupied. Trailing whitespace is not counted.
    pub fn decode<T: DeserializeOwned>(data: &[u8]) -> Result<(T, usize)> {
        let mut stream = serde_json::Deserializer::from_slice(data).into_iter::<T>();
        match stream.next() {
            Some(Ok(value)) => Ok((value, stream.byte_offset())),
            Some(Err(e)) => Err(RpcError::Json(e)),
            None => Err(RpcError::MalformedRequest("empty payload".to_string())),
        }
    }

    /// Decode a payload that must hold exactly one value.
    pub fn decode_exact<T: DeserializeOwned>(data: &[u8]) -> Result<T> {
        let (value, consumed) = Self::decode(data)?;
        if data[consumed..].iter().any(|b| !b.is_ascii_whitespace()) {
            return Err(RpcError::MalformedRequest(format!(
                "{} trailing bytes after payload",
                data.len() - consumed
            )));
        }
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    #[test]
    fn test_decode_reports_consumed_bytes() {
        let data = br#"{"a":1}{"b":2}"#;
        let (value, consumed): (Value, usize) = JsonCodec::decode(data).unwrap();

        assert_eq!(value, json!({"a": 1}));
        assert_eq!(consumed, 7);
    }

    #[test]
    fn test_decode_exact_rejects_trailing_data() {
        let result: Result<Value> = JsonCodec::decode_exact(br#"[1] [2]"#);
        assert!(matches!(result, Err(RpcError::MalformedRequest(_))));
    }

    #[test]
    fn test_decode_empty_payload() {
        let result: Result<(Value, usize)> = JsonCodec::decode(b"");
        assert!(result.is_err());
    }

    #[test]
    fn test_complex_values() {
        let value = json!({
            "nested": {
                "array": [1, 2, 3, "four", null],
                "boolean": true,
                "number": 42.5,
                "string": "test"
            },
            "null_value": null
        });

        let encoded = JsonCodec::encode(&value).unwrap();
        let decoded: Value = JsonCodec::decode_exact(&encoded).unwrap();

        assert_eq!(decoded, value);
    }
}
