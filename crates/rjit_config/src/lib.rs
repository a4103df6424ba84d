pub mod server;
pub mod session;

pub use crate::server::ServerConfig;
pub use crate::session::*;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Read an environment variable and parse it, keeping `fallback` when the
/// variable is unset or malformed.
pub(crate) fn env_or<T: std::str::FromStr>(name: &str, fallback: T) -> T {
    match std::env::var(name) {
        Ok(val) => val.parse().unwrap_or(fallback),
        Err(_) => fallback,
    }
}
