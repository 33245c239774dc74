//! Cache Entry Types
//!
//! Defines cached values, the persisted entry document and the wire encoding
//! shared by the text-oriented backends.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::Bytes;
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Discriminator field marking an encoded byte blob
const KIND_FIELD: &str = "__kind";
/// Discriminator value for byte blobs
const KIND_BYTES: &str = "bytes";
/// Field carrying the base64 payload
const DATA_FIELD: &str = "data";

// =============================================================================
// Cache Value
// =============================================================================

/// A value held by a cache layer
#[derive(Debug, Clone, PartialEq)]
pub enum CacheValue {
    /// Any JSON-serializable document
    Json(Value),
    /// Raw binary payload (encoded images, thumbnails)
    Bytes(Bytes),
}

impl CacheValue {
    /// Serialize a typed value into a JSON cache value
    pub fn from_serializable<T: Serialize>(value: &T) -> crate::Result<Self> {
        Ok(CacheValue::Json(serde_json::to_value(value)?))
    }

    /// Deserialize a JSON cache value into a typed value
    ///
    /// Byte payloads are rejected since they carry no structure.
    pub fn deserialize<T: DeserializeOwned>(&self) -> crate::Result<T> {
        match self {
            CacheValue::Json(value) => Ok(serde_json::from_value(value.clone())?),
            CacheValue::Bytes(_) => Err(crate::Error::Internal(
                "cannot deserialize a byte payload as a structured value".to_string(),
            )),
        }
    }

    /// Approximate in-memory footprint in bytes
    pub fn size_bytes(&self) -> u64 {
        match self {
            CacheValue::Bytes(bytes) => bytes.len() as u64,
            CacheValue::Json(value) => serde_json::to_vec(value)
                .map(|v| v.len() as u64)
                .unwrap_or(0),
        }
    }

    /// Get the raw bytes if this is a binary payload
    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            CacheValue::Bytes(bytes) => Some(bytes),
            CacheValue::Json(_) => None,
        }
    }

    /// Get the JSON document if this is a structured value
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            CacheValue::Json(value) => Some(value),
            CacheValue::Bytes(_) => None,
        }
    }

    /// Encode into the JSON wire form used by the remote and file layers
    pub fn to_wire(&self) -> Value {
        match self {
            CacheValue::Json(value) => value.clone(),
            CacheValue::Bytes(bytes) => json!({
                KIND_FIELD: KIND_BYTES,
                DATA_FIELD: BASE64.encode(bytes),
            }),
        }
    }

    /// Decode from the JSON wire form
    pub fn from_wire(value: Value) -> Self {
        if let Some(obj) = value.as_object() {
            let tagged = obj.len() == 2
                && obj.get(KIND_FIELD).and_then(Value::as_str) == Some(KIND_BYTES);
            if tagged {
                if let Some(decoded) = obj
                    .get(DATA_FIELD)
                    .and_then(Value::as_str)
                    .and_then(|data| BASE64.decode(data).ok())
                {
                    return CacheValue::Bytes(Bytes::from(decoded));
                }
            }
        }
        CacheValue::Json(value)
    }
}

impl From<Bytes> for CacheValue {
    fn from(bytes: Bytes) -> Self {
        CacheValue::Bytes(bytes)
    }
}

impl From<Vec<u8>> for CacheValue {
    fn from(bytes: Vec<u8>) -> Self {
        CacheValue::Bytes(Bytes::from(bytes))
    }
}

impl From<Value> for CacheValue {
    fn from(value: Value) -> Self {
        CacheValue::Json(value)
    }
}

// =============================================================================
// Cache Entry
// =============================================================================

/// Persisted cache entry: `{"value": ..., "timestamp": <epoch-ms>, "ttl": <seconds>}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Value in wire form
    pub value: Value,
    /// Write time in Unix milliseconds
    pub timestamp: i64,
    /// Time-to-live in seconds (None = never expires)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<u64>,
}

impl CacheEntry {
    /// Create an entry written now
    pub fn new(value: &CacheValue, ttl: Option<u64>) -> Self {
        Self {
            value: value.to_wire(),
            timestamp: now_millis(),
            ttl,
        }
    }

    /// Check whether the entry is expired at `now_ms`
    pub fn is_expired_at(&self, now_ms: i64) -> bool {
        match self.ttl {
            Some(ttl) => now_ms - self.timestamp > (ttl as i64).saturating_mul(1000),
            None => false,
        }
    }

    /// Check whether the entry is expired now
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(now_millis())
    }

    /// Whole seconds left before expiry, if the entry expires
    pub fn remaining_ttl_at(&self, now_ms: i64) -> Option<u64> {
        let ttl = self.ttl?;
        let expires_at = self.timestamp + (ttl as i64).saturating_mul(1000);
        Some(((expires_at - now_ms).max(0) / 1000) as u64)
    }

    /// Decode the stored value
    pub fn cache_value(&self) -> CacheValue {
        CacheValue::from_wire(self.value.clone())
    }
}

/// Current wall-clock time in Unix milliseconds
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bytes_wire_roundtrip_is_exact() {
        let raw = vec![0u8, 255, 10, 13, 0x89, b'P', b'N', b'G'];
        let value = CacheValue::from(raw.clone());

        let wire = value.to_wire();
        assert_eq!(wire["__kind"], "bytes");

        let text = serde_json::to_string(&wire).unwrap();
        let decoded = CacheValue::from_wire(serde_json::from_str(&text).unwrap());
        assert_eq!(decoded.as_bytes().unwrap().as_ref(), raw.as_slice());
    }

    #[test]
    fn test_json_passes_through_untouched() {
        let value = CacheValue::Json(json!({"width": 320, "format": "webp"}));
        assert_eq!(value.to_wire(), json!({"width": 320, "format": "webp"}));

        // An object that merely has a __kind field stays JSON
        let lookalike = json!({"__kind": "bytes", "data": "AA==", "extra": true});
        assert!(CacheValue::from_wire(lookalike).as_json().is_some());
    }

    #[test]
    fn test_entry_expiry() {
        let entry = CacheEntry {
            value: json!("v"),
            timestamp: 10_000,
            ttl: Some(1),
        };
        assert!(!entry.is_expired_at(10_500));
        assert!(!entry.is_expired_at(11_000));
        assert!(entry.is_expired_at(11_001));
        assert_eq!(entry.remaining_ttl_at(10_000), Some(1));
        assert_eq!(entry.remaining_ttl_at(20_000), Some(0));

        let forever = CacheEntry {
            value: json!("v"),
            timestamp: 0,
            ttl: None,
        };
        assert!(!forever.is_expired_at(i64::MAX / 2));
        assert_eq!(forever.remaining_ttl_at(5), None);
    }

    #[test]
    fn test_entry_document_shape() {
        let entry = CacheEntry::new(&CacheValue::Json(json!({"a": 1})), None);
        let doc = serde_json::to_value(&entry).unwrap();
        assert!(doc.get("ttl").is_none());
        assert_eq!(doc["value"], json!({"a": 1}));
        assert!(doc["timestamp"].as_i64().unwrap() > 0);
    }

    #[test]
    fn test_typed_helpers() {
        #[derive(Serialize, Deserialize, PartialEq, Debug)]
        struct Variant {
            width: u32,
        }

        let value = CacheValue::from_serializable(&Variant { width: 64 }).unwrap();
        let back: Variant = value.deserialize().unwrap();
        assert_eq!(back, Variant { width: 64 });

        let bytes = CacheValue::from(vec![1u8, 2]);
        assert!(bytes.deserialize::<Variant>().is_err());
    }
}
