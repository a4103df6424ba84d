use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::env_or;

/// Default spacing between two stale-session sweeps (30 minutes)
pub const DEFAULT_SWEEP_INTERVAL_MS: u64 = 30 * 60 * 1000;

/// Default age after which an idle session counts as stale (1000 minutes).
/// Must stay larger than the expected lifetime of a client VM.
pub const DEFAULT_STALE_AGE_MS: u64 = 1000 * 60 * 1000;

/// Default bound on how long an out-of-order request waits for its predecessor
pub const DEFAULT_SEQUENCER_TIMEOUT_MS: u64 = 1000;

/// Action taken when a parked request gives up on its predecessor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GapRecovery {
    /// Only move the expected sequence number past the gap
    Advance,

    /// Move past the gap and drop every persistent cache of the session.
    /// A lost request may have carried class unload notifications, so the
    /// cached metadata can no longer be trusted.
    #[default]
    ClearCaches,
}

impl GapRecovery {
    pub fn name(self) -> &'static str {
        match self {
            GapRecovery::Advance => "advance",
            GapRecovery::ClearCaches => "clear-caches",
        }
    }

    pub fn clears_caches(self) -> bool {
        matches!(self, GapRecovery::ClearCaches)
    }
}

impl fmt::Display for GapRecovery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for GapRecovery {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "advance" => Ok(GapRecovery::Advance),
            "clear-caches" | "clear_caches" | "clear" => Ok(GapRecovery::ClearCaches),
            other => Err(format!("unknown gap recovery policy `{other}`")),
        }
    }
}

/// Configuration for the client session registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Minimum time between two scans for stale sessions (in milliseconds)
    pub sweep_interval_ms: u64,

    /// Idle time after which an unused session is purged (in milliseconds)
    pub stale_age_ms: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            sweep_interval_ms: DEFAULT_SWEEP_INTERVAL_MS,
            stale_age_ms: DEFAULT_STALE_AGE_MS,
        }
    }
}

impl RegistryConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            sweep_interval_ms: env_or("RJIT_SWEEP_INTERVAL_MS", defaults.sweep_interval_ms),
            stale_age_ms: env_or("RJIT_STALE_AGE_MS", defaults.stale_age_ms),
        }
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    pub fn stale_age(&self) -> Duration {
        Duration::from_millis(self.stale_age_ms)
    }
}

/// Configuration for per-client request ordering
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequencerConfig {
    /// How long a parked request waits for its predecessor (in milliseconds)
    pub wait_timeout_ms: u64,

    /// What to do once that wait gives up
    pub gap_recovery: GapRecovery,
}

impl Default for SequencerConfig {
    fn default() -> Self {
        Self {
            wait_timeout_ms: DEFAULT_SEQUENCER_TIMEOUT_MS,
            gap_recovery: GapRecovery::default(),
        }
    }
}

impl SequencerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            wait_timeout_ms: env_or("RJIT_SEQ_TIMEOUT_MS", defaults.wait_timeout_ms),
            gap_recovery: env_or("RJIT_GAP_RECOVERY", defaults.gap_recovery),
        }
    }

    pub fn wait_timeout(&self) -> Duration {
        Duration::from_millis(self.wait_timeout_ms)
    }
}
