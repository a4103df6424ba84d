use thiserror::Error;

use crate::codec::{ClassInfoField, FieldKind};
use crate::ids::ClassId;

/// Failure of one request/response exchange with a client
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StreamError {
    #[error("connection to client closed")]
    Disconnected,
    #[error("client answered with an unexpected message: {0}")]
    Protocol(String),
    #[error("client could not provide {what}: {reason}")]
    Client { what: String, reason: String },
}

/// A wire value that does not fit the descriptor it is meant for
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("field {field:?} expects a {expected:?} value, got {found:?}")]
    FieldKindMismatch {
        field: ClassInfoField,
        expected: FieldKind,
        found: FieldKind,
    },
    #[error("class {class} reports {expected} methods but carries tracing flags for {found}")]
    MethodTableMismatch {
        class: ClassId,
        expected: usize,
        found: usize,
    },
    #[error("client returned {found} values for {requested} requested fields")]
    FieldCountMismatch { requested: usize, found: usize },
}

/// Failure to obtain metadata for one compilation
///
/// Never invalidates the session; only the compilation that needed the data
/// is aborted.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error(transparent)]
    Stream(#[from] StreamError),
    #[error(transparent)]
    Codec(#[from] CodecError),
}
