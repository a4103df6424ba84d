pub mod dispatcher;
pub mod error;
pub mod request;
pub mod worker_pool;

pub use crate::dispatcher::{CompilationContext, CompilationDispatcher};
pub use crate::error::DispatchError;
pub use crate::request::CompilationRequest;
pub use crate::worker_pool::WorkerPool;

pub use rjit_config as config;
pub use rjit_config::ServerConfig;
pub use rjit_metrics::SessionStatsSnapshot;
pub use rjit_session as session;
