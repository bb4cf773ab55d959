//! Capability cache with TTL expiry, LRU eviction, and single-flight misses.
//!
//! This crate memoizes capability calls keyed by a [`Fingerprint`] of the
//! capability identity, version, settings, and normalized input:
//! - Hits return the stored completion without invoking the capability
//! - Misses invoke the capability once; concurrent identical misses wait on
//!   that single invocation instead of starting their own
//! - Only successful completions are stored, each for its capability's TTL
//!
//! # Example
//!
//! ```rust,ignore
//! use braid_cache::{CacheConfig, CapabilityCache};
//!
//! let config = CacheConfig::default()
//!     .with_max_entries(1000)
//!     .with_capability_ttl("embedder", Duration::from_secs(86_400));
//!
//! let cache = CapabilityCache::new(config);
//! let lookup = cache.get_or_invoke(&embedder, input, &signal).await?;
//! ```

mod cache;
mod config;
mod fingerprint;
mod ttl;

pub use cache::{CacheStats, CacheSource, CachedCompletion, CapabilityCache};
pub use config::CacheConfig;
pub use fingerprint::Fingerprint;
pub use ttl::TtlTracker;
