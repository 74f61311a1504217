//! Cache value encoding
//!
//! JSON first; values JSON cannot represent (maps with non-string keys, for
//! instance) fall back to bincode. The leading tag byte records which.

use serde::de::DeserializeOwned;
use serde::Serialize;

use super::backend::CacheError;

const JSON_TAG: u8 = b'J';
const BINARY_TAG: u8 = b'B';

pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, CacheError> {
    match serde_json::to_vec(value) {
        Ok(json) => {
            let mut bytes = Vec::with_capacity(json.len() + 1);
            bytes.push(JSON_TAG);
            bytes.extend_from_slice(&json);
            Ok(bytes)
        }
        Err(json_err) => {
            let binary = bincode::serialize(value).map_err(|e| {
                CacheError::Encode(format!("json: {}; bincode: {}", json_err, e))
            })?;
            let mut bytes = Vec::with_capacity(binary.len() + 1);
            bytes.push(BINARY_TAG);
            bytes.extend_from_slice(&binary);
            Ok(bytes)
        }
    }
}

pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CacheError> {
    match bytes.split_first() {
        Some((&JSON_TAG, body)) => {
            serde_json::from_slice(body).map_err(|e| CacheError::Decode(e.to_string()))
        }
        Some((&BINARY_TAG, body)) => {
            bincode::deserialize(body).map_err(|e| CacheError::Decode(e.to_string()))
        }
        Some((tag, _)) => Err(CacheError::Decode(format!("unknown encoding tag {:#04x}", tag))),
        None => Err(CacheError::Decode("empty value".to_string())),
    }
}
