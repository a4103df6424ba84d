// Session cache and sequencing statistics
pub mod cache_stats;
pub mod sequencer_stats;

pub use cache_stats::{CacheCounter, CacheCounterSnapshot, SessionStats, SessionStatsSnapshot};
pub use sequencer_stats::{SequencerStats, SequencerStatsSnapshot};
