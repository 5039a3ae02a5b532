//! The `codec` module owns the only wire format `resilient_mq` defines
//! itself: UTF-8 JSON request bodies.
//!
//! Decoding is permissive:
//! - `//` and `/* */` comments are skipped
//! - trailing commas before `]` or `}` are tolerated
//! - object keys match struct fields case-insensitively, at any depth
//!
//! Encoding never escapes non-ASCII characters, so any Unicode text is
//! written as-is.
//!
//! Retried requests carry their attempt counter in the `RetryCount` field of
//! the JSON object. The request type itself does not need to declare it.

mod relaxed;

use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::utils::CodecError;

/// Field name written into every encoded request envelope.
pub const RETRY_COUNT_FIELD: &str = "RetryCount";

/// Decode a payload into `T` using the permissive rules described above.
pub fn decode<T: DeserializeOwned>(payload: &[u8]) -> Result<T, CodecError> {
    let value = decode_value(payload)?;
    from_value(value)
}

/// Decode a request envelope, returning the request and its retry count.
///
/// A missing or non-numeric `RetryCount` is treated as zero.
pub fn decode_request<T: DeserializeOwned>(payload: &[u8]) -> Result<(T, u32), CodecError> {
    let Value::Object(mut object) = decode_value(payload)? else {
        return Err(CodecError::NotAnObject);
    };

    let fields = relaxed::struct_fields::<T>().unwrap_or(&[]);
    let retry_key = object.keys().find(|key| is_retry_count_key(key)).cloned();

    let retry_count = match retry_key {
        Some(key) => {
            let count = object
                .get(&key)
                .and_then(Value::as_u64)
                .map(|count| u32::try_from(count).unwrap_or(u32::MAX))
                .unwrap_or(0);
            // hand the counter to request types that declare it themselves
            if let Some(value) = object.remove(&key) {
                if let Some(field) = fields.iter().find(|field| is_retry_count_key(field)) {
                    object.insert(field.to_string(), value);
                }
            }
            count
        }
        None => 0,
    };

    let request = from_value(Value::Object(object))?;
    Ok((request, retry_count))
}

pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, CodecError> {
    Ok(serde_json::to_vec(value)?)
}

/// Encode a request envelope carrying `retry_count`.
pub fn encode_request<T: Serialize + ?Sized>(
    request: &T,
    retry_count: u32,
) -> Result<Vec<u8>, CodecError> {
    let Value::Object(object) = serde_json::to_value(request)? else {
        return Err(CodecError::NotAnObject);
    };

    let mut envelope: Map<String, Value> = object
        .into_iter()
        .filter(|(key, _)| !is_retry_count_key(key))
        .collect();
    envelope.insert(RETRY_COUNT_FIELD.to_string(), Value::from(retry_count));

    encode(&Value::Object(envelope))
}

/// Parse a payload into a `serde_json::Value`, tolerating comments and
/// trailing commas.
pub fn decode_value(payload: &[u8]) -> Result<Value, CodecError> {
    let text = std::str::from_utf8(payload)?;
    let text = text.trim_start_matches('\u{feff}');
    let cleaned = relaxed::strip(text);
    Ok(serde_json::from_str(&cleaned)?)
}

fn from_value<T: DeserializeOwned>(value: Value) -> Result<T, CodecError> {
    Ok(T::deserialize(relaxed::CaseFolding(value))?)
}

fn is_retry_count_key(key: &str) -> bool {
    key.chars()
        .filter(|c| *c != '_' && *c != '-')
        .map(|c| c.to_ascii_lowercase())
        .eq("retrycount".chars())
}

#[cfg(test)]
mod tests;
