//! Admission statistics for the per-client request sequencer

use parking_lot::RwLock;
use std::time::Duration;

/// Counters describing how requests of one client were admitted
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SequencerStatsSnapshot {
    /// Requests that found their turn immediately
    pub in_order: u64,

    /// Requests that had to park behind a missing predecessor
    pub parked: u64,

    /// Requests admitted after the expected number had already moved past them
    pub late: u64,

    /// Gaps bridged after a parked request timed out
    pub gaps_bridged: u64,

    /// Total time spent parked
    pub total_parked: Duration,

    /// Longest single park
    pub max_parked: Duration,
}

impl SequencerStatsSnapshot {
    pub fn admitted(&self) -> u64 {
        self.in_order + self.parked + self.late
    }

    /// Get average parked time
    pub fn avg_parked(&self) -> Duration {
        if self.parked == 0 {
            return Duration::ZERO;
        }
        let avg_nanos = self.total_parked.as_nanos() / u128::from(self.parked);
        Duration::from_nanos(avg_nanos.min(u128::from(u64::MAX)) as u64)
    }
}

#[derive(Debug, Default)]
pub struct SequencerStats {
    inner: RwLock<SequencerStatsSnapshot>,
}

impl SequencerStats {
    pub fn record_in_order(&self) {
        self.inner.write().in_order += 1;
    }

    pub fn record_parked(&self, waited: Duration, bridged_gap: bool) {
        let mut stats = self.inner.write();
        stats.parked += 1;
        stats.total_parked += waited;
        if waited > stats.max_parked {
            stats.max_parked = waited;
        }
        if bridged_gap {
            stats.gaps_bridged += 1;
        }
    }

    pub fn record_late(&self) {
        self.inner.write().late += 1;
    }

    pub fn snapshot(&self) -> SequencerStatsSnapshot {
        self.inner.read().clone()
    }
}
