//! In-process negative cache (§4.5, §3): throttles repeated compile/load
//! attempts that are expected to keep failing, with a short cooldown while
//! retries remain and a longer one once they exhaust. Ring-buffer eviction
//! bounds memory the same way the positive cache bounds slots, mirroring
//! the teacher's fixed-capacity `CodeCache` pattern but for failures rather
//! than successes.

use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Failure classes. The specification names six plus "unclassified"; we
/// split its `load` class into the two distinct failure points our own
/// loader already distinguishes (`LoadError::Open` vs `LoadError::Symbol`),
/// which is what brings the count to eight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    CacheDir,
    Path,
    Write,
    Compile,
    Open,
    Symbol,
    Metadata,
    Unclassified,
}

pub(crate) const SHORT_COOLDOWN: Duration = Duration::from_secs(10);
pub(crate) const LONG_COOLDOWN: Duration = Duration::from_secs(120);
const MAX_RETRIES: u32 = 2;

#[derive(Debug, Clone)]
struct Entry {
    key: u64,
    last_failure_time: Instant,
    retry_after: Instant,
    retries_left: u32,
    failure_class: FailureClass,
}

pub struct NegativeCache {
    entries: Mutex<Vec<Entry>>,
    capacity: usize,
    next_evict: Mutex<usize>,
    short_cooldown: Duration,
    long_cooldown: Duration,
}

impl NegativeCache {
    pub fn new(capacity: usize) -> Self {
        Self::with_cooldowns(capacity, SHORT_COOLDOWN, LONG_COOLDOWN)
    }

    /// Like [`NegativeCache::new`], but with caller-supplied cooldown
    /// durations (`CacheConfig::short_cooldown`/`long_cooldown`) instead of
    /// the defaults.
    pub fn with_cooldowns(capacity: usize, short_cooldown: Duration, long_cooldown: Duration) -> Self {
        NegativeCache {
            entries: Mutex::new(Vec::with_capacity(capacity)),
            capacity,
            next_evict: Mutex::new(0),
            short_cooldown,
            long_cooldown,
        }
    }

    fn cooldown(&self, retries_left: u32) -> Duration {
        if retries_left > 0 {
            self.short_cooldown
        } else {
            self.long_cooldown
        }
    }

    /// Look up `key`. Returns the failure class iff a cooldown is still in
    /// effect (`retry_after` is in the future).
    pub fn check(&self, key: u64, now: Instant) -> Option<FailureClass> {
        let entries = self.entries.lock();
        entries
            .iter()
            .find(|e| e.key == key)
            .filter(|e| e.retry_after > now)
            .map(|e| e.failure_class)
    }

    /// Record a failure for `key`, classifying it and setting the next
    /// cooldown. Overwrites any existing entry for the same key in place.
    pub fn record(&self, key: u64, failure_class: FailureClass, now: Instant) {
        let mut entries = self.entries.lock();
        if let Some(existing) = entries.iter_mut().find(|e| e.key == key) {
            existing.retries_left = existing.retries_left.saturating_sub(1);
            existing.last_failure_time = now;
            existing.failure_class = failure_class;
            existing.retry_after = now + self.cooldown(existing.retries_left);
            return;
        }

        // The first recorded failure already consumes one retry, so the
        // *second* failure is the one that exhausts retries to 0 and
        // reaches the long cooldown.
        let retries_left = MAX_RETRIES.saturating_sub(1);
        let entry = Entry {
            key,
            last_failure_time: now,
            retry_after: now + self.cooldown(retries_left),
            retries_left,
            failure_class,
        };

        if entries.len() < self.capacity {
            entries.push(entry);
            return;
        }
        if self.capacity == 0 {
            return;
        }
        let mut cursor = self.next_evict.lock();
        let idx = *cursor % self.capacity;
        entries[idx] = entry;
        *cursor = (idx + 1) % self.capacity;
    }

    /// Clear any negative entry for `key` (§4.5 step 1: a positive-cache
    /// hit clears the corresponding negative entry).
    pub fn clear(&self, key: u64) {
        let mut entries = self.entries.lock();
        entries.retain(|e| e.key != key);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_failure_sets_short_cooldown() {
        let cache = NegativeCache::new(8);
        let now = Instant::now();
        cache.record(1, FailureClass::Compile, now);
        assert_eq!(cache.check(1, now), Some(FailureClass::Compile));
        assert_eq!(
            cache.check(1, now + Duration::from_secs(11)),
            None,
            "short cooldown should have elapsed"
        );
    }

    #[test]
    fn exhausting_retries_uses_long_cooldown() {
        let cache = NegativeCache::new(8);
        let now = Instant::now();
        cache.record(1, FailureClass::Compile, now);
        cache.record(1, FailureClass::Compile, now);
        // retries_left has hit 0 after the second failure; cooldown should
        // now be the long one.
        assert_eq!(
            cache.check(1, now + Duration::from_secs(11)),
            Some(FailureClass::Compile),
            "long cooldown should still be in effect"
        );
        assert_eq!(cache.check(1, now + Duration::from_secs(121)), None);
    }

    #[test]
    fn clear_removes_entry() {
        let cache = NegativeCache::new(8);
        let now = Instant::now();
        cache.record(1, FailureClass::Open, now);
        cache.clear(1);
        assert_eq!(cache.check(1, now), None);
    }

    #[test]
    fn custom_cooldowns_from_with_cooldowns_are_honored() {
        let cache = NegativeCache::with_cooldowns(8, Duration::from_secs(1), Duration::from_secs(5));
        let now = Instant::now();
        cache.record(1, FailureClass::Compile, now);
        assert_eq!(cache.check(1, now + Duration::from_millis(500)), Some(FailureClass::Compile));
        assert_eq!(cache.check(1, now + Duration::from_secs(2)), None, "short cooldown should have elapsed");
    }

    #[test]
    fn ring_buffer_evicts_oldest_when_full() {
        let cache = NegativeCache::new(2);
        let now = Instant::now();
        cache.record(1, FailureClass::Open, now);
        cache.record(2, FailureClass::Open, now);
        cache.record(3, FailureClass::Open, now);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.check(1, now), None, "oldest entry should be evicted");
        assert!(cache.check(3, now).is_some());
    }
}
