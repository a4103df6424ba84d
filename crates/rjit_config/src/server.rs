//! Server configuration
//!
//! Aggregates the registry and sequencer settings together with the size of
//! the compilation worker pool.

use serde::{Deserialize, Serialize};

use crate::env_or;
use crate::session::{RegistryConfig, SequencerConfig};

/// Complete server configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ServerConfig {
    /// Session registry configuration
    pub registry: RegistryConfig,

    /// Request ordering configuration
    pub sequencer: SequencerConfig,

    /// Number of compilation worker threads (0 = auto-detect)
    pub worker_threads: usize,
}

impl ServerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self {
            registry: RegistryConfig::from_env(),
            sequencer: SequencerConfig::from_env(),
            worker_threads: env_or("RJIT_WORKER_THREADS", 0),
        }
    }

    /// Worker count with auto-detection applied
    pub fn effective_worker_threads(&self) -> usize {
        if self.worker_threads > 0 {
            return self.worker_threads;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4)
    }
}
