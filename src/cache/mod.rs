//! Multi-tier runtime cache (§4.5, §3): positive, negative, and on-disk
//! artifact tiers, plus the cache key derivation they all key off of.

pub mod config;
pub mod disk;
pub mod key;
pub mod negative;
pub mod positive;

use once_cell::sync::Lazy;

use crate::loader::artifact::LoadedArtifact;

pub use config::CacheConfig;
pub use key::{hex16, BackendTag, CacheKeyInputs, PlatformTag, CGEN_VERSION};
pub use negative::FailureClass;

/// Positive-cache slot count, overridable for tests; the specification
/// gives "O(64) slots" without pinning an exact number.
pub const DEFAULT_POSITIVE_SLOTS: usize = 64;
pub const DEFAULT_NEGATIVE_SLOTS: usize = 64;

/// Process-wide cache state, analogous to the teacher's module-level
/// `CodeCache` singleton but split into the positive/negative tiers §3
/// requires.
pub struct ProcessCache {
    pub positive: positive::PositiveCache<LoadedArtifact>,
    pub negative: negative::NegativeCache,
}

impl ProcessCache {
    fn new() -> Self {
        Self::with_config(&CacheConfig::default())
    }

    /// Build a cache from explicit configuration rather than the defaults.
    pub fn with_config(config: &CacheConfig) -> Self {
        ProcessCache {
            positive: positive::PositiveCache::new(config.positive_slots),
            negative: negative::NegativeCache::with_cooldowns(
                config.negative_slots,
                config.short_cooldown,
                config.long_cooldown,
            ),
        }
    }
}

/// Process-wide singleton, built from [`CacheConfig::default`]. The global
/// `PROCESS_CACHE` cannot itself take configuration (it's constructed
/// before any caller gets a chance to supply one) — callers that need a
/// configured cache should build their own `ProcessCache::with_config`
/// instance instead of going through this static.
pub static PROCESS_CACHE: Lazy<ProcessCache> = Lazy::new(ProcessCache::new);
