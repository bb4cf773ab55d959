//! Configuration for the capability cache.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default maximum number of cached completions.
pub const DEFAULT_MAX_ENTRIES: usize = 10_000;

/// Default time-to-live for cached completions (one hour).
pub const DEFAULT_TTL_SECS: u64 = 3600;

/// Configuration for the capability cache.
///
/// ```toml
/// [cache]
/// max_entries = 10000
/// default_ttl_secs = 3600
/// cache_nondeterministic = false
///
/// [cache.capability_ttl_secs]
/// embedder = 86400
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of completions to keep before LRU eviction.
    pub max_entries: usize,

    /// TTL in seconds for capabilities without an override.
    pub default_ttl_secs: u64,

    /// Per-capability TTL overrides in seconds, keyed by capability name.
    pub capability_ttl_secs: HashMap<String, u64>,

    /// Also cache agents and moderators, not just deterministic capabilities.
    pub cache_nondeterministic: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: DEFAULT_MAX_ENTRIES,
            default_ttl_secs: DEFAULT_TTL_SECS,
            capability_ttl_secs: HashMap::new(),
            cache_nondeterministic: false,
        }
    }
}

impl CacheConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of cached completions.
    pub fn with_max_entries(mut self, max: usize) -> Self {
        self.max_entries = max;
        self
    }

    /// Set the TTL used when a capability has no override.
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl_secs = ttl.as_secs();
        self
    }

    /// Override the TTL for one capability.
    pub fn with_capability_ttl(mut self, capability: impl Into<String>, ttl: Duration) -> Self {
        self.capability_ttl_secs
            .insert(capability.into(), ttl.as_secs());
        self
    }

    /// Cache non-deterministic capabilities too.
    pub fn with_nondeterministic(mut self, enabled: bool) -> Self {
        self.cache_nondeterministic = enabled;
        self
    }

    /// The TTL that applies to `capability`.
    pub fn ttl_for(&self, capability: &str) -> Duration {
        let secs = self
            .capability_ttl_secs
            .get(capability)
            .copied()
            .unwrap_or(self.default_ttl_secs);
        Duration::from_secs(secs)
    }
}
