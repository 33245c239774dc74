//! Cache Key Strategy
//!
//! Deterministic construction and parsing of `namespace:identifier[:paramHash]`
//! keys.

use crate::error::{Error, Result};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Separator between key segments
pub const KEY_SEPARATOR: char = ':';

/// Length of the truncated hex fingerprint
pub const HASH_LENGTH: usize = 16;

/// Components of a parsed cache key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedKey {
    pub namespace: String,
    pub identifier: String,
    /// Parameter hash, when the key was built with parameters
    pub params: Option<String>,
}

/// Key construction and parsing
#[derive(Debug, Default, Clone, Copy)]
pub struct CacheKeyStrategy;

impl CacheKeyStrategy {
    /// Build `namespace:identifier`, with a parameter hash appended when
    /// non-empty parameters are supplied
    ///
    /// Parameters are serialized as sorted `key=value` pairs joined by `&`, so
    /// the result does not depend on insertion order.
    pub fn generate_key(
        namespace: &str,
        identifier: &str,
        params: Option<&BTreeMap<String, String>>,
    ) -> String {
        match params.filter(|p| !p.is_empty()) {
            Some(params) => {
                let serialized = Self::serialize_params(params);
                format!(
                    "{}{}{}{}{}",
                    namespace,
                    KEY_SEPARATOR,
                    identifier,
                    KEY_SEPARATOR,
                    Self::generate_hash(&serialized)
                )
            }
            None => format!("{}{}{}", namespace, KEY_SEPARATOR, identifier),
        }
    }

    /// Split a key into its components
    ///
    /// Fewer than two segments is a caller error. Segments past the third are
    /// folded into the parameter hash.
    pub fn parse_key(key: &str) -> Result<ParsedKey> {
        let parts: Vec<&str> = key.splitn(3, KEY_SEPARATOR).collect();
        match parts.as_slice() {
            [namespace, identifier] => Ok(ParsedKey {
                namespace: (*namespace).to_string(),
                identifier: (*identifier).to_string(),
                params: None,
            }),
            [namespace, identifier, params] => Ok(ParsedKey {
                namespace: (*namespace).to_string(),
                identifier: (*identifier).to_string(),
                params: Some((*params).to_string()),
            }),
            _ => Err(Error::InvalidKeyFormat {
                key: key.to_string(),
            }),
        }
    }

    /// SHA-256 of `input`, hex encoded and truncated to 16 characters
    pub fn generate_hash(input: &str) -> String {
        let digest = Sha256::digest(input.as_bytes());
        let mut hex = hex::encode(digest);
        hex.truncate(HASH_LENGTH);
        hex
    }

    fn serialize_params(params: &BTreeMap<String, String>) -> String {
        // BTreeMap iterates in key order
        params
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&")
    }
}
