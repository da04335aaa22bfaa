//! Tunable cache knobs: on-disk cache directory override, positive-cache
//! slot count, and negative-cache cooldown durations, mirroring the
//! teacher's `JitConfig`/`PrewarmConfig` split between a plain data struct
//! of user-facing knobs and the constructor that builds the real state
//! from it.

use std::path::PathBuf;
use std::time::Duration;

use crate::cache::negative::{LONG_COOLDOWN, SHORT_COOLDOWN};
use crate::cache::{DEFAULT_NEGATIVE_SLOTS, DEFAULT_POSITIVE_SLOTS};

/// Configuration for a [`super::ProcessCache`].
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Overrides the base directory the on-disk artifact cache nests
    /// `miniexpr-jit/` under. `None` falls back to `$TMPDIR`, then `/tmp`.
    pub cache_dir: Option<PathBuf>,
    /// Positive-cache slot count.
    pub positive_slots: usize,
    /// Negative-cache slot count.
    pub negative_slots: usize,
    /// Cooldown applied while a failed key still has retries left.
    pub short_cooldown: Duration,
    /// Cooldown applied once a failed key's retries are exhausted.
    pub long_cooldown: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            cache_dir: None,
            positive_slots: DEFAULT_POSITIVE_SLOTS,
            negative_slots: DEFAULT_NEGATIVE_SLOTS,
            short_cooldown: SHORT_COOLDOWN,
            long_cooldown: LONG_COOLDOWN,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_the_process_cache_defaults() {
        let config = CacheConfig::default();
        assert_eq!(config.positive_slots, DEFAULT_POSITIVE_SLOTS);
        assert_eq!(config.negative_slots, DEFAULT_NEGATIVE_SLOTS);
        assert_eq!(config.short_cooldown, SHORT_COOLDOWN);
        assert_eq!(config.long_cooldown, LONG_COOLDOWN);
        assert!(config.cache_dir.is_none());
    }
}
