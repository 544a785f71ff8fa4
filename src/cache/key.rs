//! Deterministic cache keys.

use crate::teamsl::{AdapterKind, AdapterRequest};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use unicode_normalization::UnicodeNormalization;

/// Identity of a cached result: adapter, operation and parameters.
///
/// The canonical form is `adapter:operation?k=v&k=v` with parameters in
/// name order and values NFC-normalized, trimmed and percent-encoded, so
/// equivalent requests always map to the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    adapter: AdapterKind,
    canonical: String,
}

impl CacheKey {
    pub fn new(adapter: AdapterKind, operation: &str, params: &BTreeMap<&str, String>) -> Self {
        let query = params
            .iter()
            .map(|(name, value)| format!("{name}={}", urlencoding::encode(&normalize_text(value))))
            .collect::<Vec<_>>()
            .join("&");
        Self {
            adapter,
            canonical: format!("{adapter}:{operation}?{query}"),
        }
    }

    pub fn for_request(request: &AdapterRequest) -> Self {
        Self::new(request.adapter(), request.operation(), &request.params())
    }

    pub fn adapter(&self) -> AdapterKind {
        self.adapter
    }

    pub fn as_str(&self) -> &str {
        &self.canonical
    }

    /// 64-bit rapidhash of the canonical form, as fixed-width hex.
    pub fn fingerprint(&self) -> String {
        format!("{:016x}", rapidhash::v3::rapidhash_v3(self.canonical.as_bytes()))
    }

    /// File name for the persisted entry; readable prefix, hashed suffix.
    pub fn file_name(&self) -> String {
        let prefix: String = self
            .canonical
            .split('?')
            .next()
            .unwrap_or_default()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
            .collect();
        format!("{prefix}-{}.json", self.fingerprint())
    }
}

/// Trimmed, NFC-normalized form of a free-text parameter such as a club name.
pub fn normalize_text(value: &str) -> String {
    value.trim().nfc().collect()
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical)
    }
}
