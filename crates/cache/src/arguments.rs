use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

use conclave_core::{CoreError, encoding};

use crate::error::CacheError;

/// Canonicalized call arguments: positional values in order, named values
/// sorted by name.
///
/// Arguments are canonicalized at construction, so a call site that passes
/// named arguments in a different order still produces the same
/// [`fingerprint`](Self::fingerprint).
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct Arguments {
    positional: Vec<Value>,
    named: BTreeMap<String, Value>,
}

impl Arguments {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a positional argument.
    ///
    /// # Errors
    ///
    /// Values not representable in the canonical encoding are rejected
    /// before any I/O happens.
    pub fn arg<T: Serialize>(mut self, value: &T) -> Result<Self, CacheError> {
        let value = serde_json::to_value(value)
            .map_err(|e| CacheError::Core(CoreError::Encoding(e.to_string())))?;
        self.positional.push(value);
        Ok(self)
    }

    /// Set a named argument. Insertion order is irrelevant.
    pub fn named<T: Serialize>(
        mut self,
        name: impl Into<String>,
        value: &T,
    ) -> Result<Self, CacheError> {
        let value = serde_json::to_value(value)
            .map_err(|e| CacheError::Core(CoreError::Encoding(e.to_string())))?;
        self.named.insert(name.into(), value);
        Ok(self)
    }

    /// The positional arguments, in call order.
    pub fn positional(&self) -> &[Value] {
        &self.positional
    }

    /// Look up a named argument.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.named.get(name)
    }

    /// Deterministic 128-bit fingerprint of the canonicalized arguments:
    /// SHA-256 of the canonical encoding, truncated, hex-encoded.
    pub fn fingerprint(&self) -> Result<String, CacheError> {
        let canonical = encoding::encode(self)?;
        let digest = Sha256::digest(canonical.as_bytes());
        Ok(hex::encode(&digest[..16]))
    }
}
