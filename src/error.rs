use rjit_session::FetchError;
use thiserror::Error;

/// Why a compilation request did not produce a result
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// Metadata could not be obtained from the client. The session stays
    /// valid; only this compilation is lost.
    #[error("metadata fetch failed: {0}")]
    Fetch(#[from] FetchError),
    #[error("compilation failed: {0}")]
    Compilation(String),
    #[error("compilation server is shutting down")]
    ShuttingDown,
}

impl DispatchError {
    /// Classify an error returned by the compile callback
    pub(crate) fn from_compilation(err: anyhow::Error) -> Self {
        match err.downcast::<FetchError>() {
            Ok(fetch) => DispatchError::Fetch(fetch),
            Err(other) => DispatchError::Compilation(format!("{other:#}")),
        }
    }
}
