//! Canonical cache keys.

use braid_capability::Capability;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use sha2::{Digest, Sha256};

/// SHA-256 over the canonical JSON of a capability call.
///
/// Covers the capability's name, version, kind, and settings plus the
/// normalized input. Object keys are serialized in sorted order, so two
/// inputs that differ only in key order share a fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Fingerprint a call of `capability` with `input`.
    pub fn compute(capability: &dyn Capability, input: &Value) -> Self {
        let canonical = json!({
            "capability": capability.name(),
            "version": capability.version(),
            "kind": capability.kind(),
            "settings": capability.settings(),
            "input": normalize(input),
        });
        Self(sha256_hex(&canonical.to_string()))
    }

    /// The hex digest.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Trim surrounding whitespace from string leaves; the rest of the value is
/// already canonical once serialized.
fn normalize(value: &Value) -> Value {
    match value {
        Value::String(s) => Value::String(s.trim().to_string()),
        Value::Array(items) => Value::Array(items.iter().map(normalize).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), normalize(v)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}
