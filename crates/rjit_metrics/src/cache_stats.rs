//! Hit/miss accounting for the persistent caches of one client session

use std::sync::atomic::{AtomicU64, Ordering};

use crate::sequencer_stats::{SequencerStats, SequencerStatsSnapshot};

/// Lock-free hit/miss counter for one cache
#[derive(Debug, Default)]
pub struct CacheCounter {
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CacheCounter {
    pub const fn new() -> Self {
        Self {
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a lookup outcome
    pub fn record(&self, hit: bool) {
        if hit {
            self.record_hit();
        } else {
            self.record_miss();
        }
    }

    pub fn snapshot(&self) -> CacheCounterSnapshot {
        CacheCounterSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of a [`CacheCounter`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheCounterSnapshot {
    pub hits: u64,
    pub misses: u64,
}

impl CacheCounterSnapshot {
    pub fn lookups(&self) -> u64 {
        self.hits + self.misses
    }

    /// Get hit ratio as a percentage
    pub fn hit_percent(&self) -> f64 {
        let lookups = self.lookups();
        if lookups == 0 {
            0.0
        } else {
            (self.hits as f64 / lookups as f64) * 100.0
        }
    }
}

/// Statistics kept per client session
#[derive(Debug, Default)]
pub struct SessionStats {
    pub classes: CacheCounter,
    pub methods: CacheCounter,
    pub profiles: CacheCounter,
    bulk_fetches: AtomicU64,
    incremental_fetches: AtomicU64,
    unloaded_classes: AtomicU64,
    cache_clears: AtomicU64,
    pub sequencer: SequencerStats,
}

impl SessionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_bulk_fetch(&self) {
        self.bulk_fetches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_incremental_fetch(&self) {
        self.incremental_fetches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_unloaded(&self, count: usize) {
        self.unloaded_classes
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_cache_clear(&self) {
        self.cache_clears.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> SessionStatsSnapshot {
        SessionStatsSnapshot {
            classes: self.classes.snapshot(),
            methods: self.methods.snapshot(),
            profiles: self.profiles.snapshot(),
            bulk_fetches: self.bulk_fetches.load(Ordering::Relaxed),
            incremental_fetches: self.incremental_fetches.load(Ordering::Relaxed),
            unloaded_classes: self.unloaded_classes.load(Ordering::Relaxed),
            cache_clears: self.cache_clears.load(Ordering::Relaxed),
            sequencer: self.sequencer.snapshot(),
        }
    }
}

/// Plain copy of [`SessionStats`] suitable for reporting
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionStatsSnapshot {
    pub classes: CacheCounterSnapshot,
    pub methods: CacheCounterSnapshot,
    pub profiles: CacheCounterSnapshot,
    pub bulk_fetches: u64,
    pub incremental_fetches: u64,
    pub unloaded_classes: u64,
    pub cache_clears: u64,
    pub sequencer: SequencerStatsSnapshot,
}

impl SessionStatsSnapshot {
    /// Remote round trips spent on class metadata
    pub fn class_round_trips(&self) -> u64 {
        self.bulk_fetches + self.incremental_fetches
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_percent() {
        let counter = CacheCounter::new();
        assert_eq!(counter.snapshot().hit_percent(), 0.0);

        counter.record(true);
        counter.record(true);
        counter.record(true);
        counter.record(false);

        let snapshot = counter.snapshot();
        assert_eq!(snapshot.lookups(), 4);
        assert!((snapshot.hit_percent() - 75.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_session_snapshot() {
        let stats = SessionStats::new();
        stats.record_bulk_fetch();
        stats.record_incremental_fetch();
        stats.record_incremental_fetch();
        stats.record_unloaded(3);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.class_round_trips(), 3);
        assert_eq!(snapshot.unloaded_classes, 3);
        assert_eq!(snapshot.cache_clears, 0);
    }
}
