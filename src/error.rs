//! Error taxonomy for the storage-service query execution core.
//!
//! Mirrors the wire error-kind table: every fallible boundary in this
//! crate (codecs, the KV-store trait, operator execution, the request
//! driver) returns `crate::error::Result<T>`.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    KeyNotFound,
    InvalidVid { expected: usize, found: usize },
    InvalidFieldValue(String),
    InvalidFilter(String),
    InvalidUpdater(String),
    InvalidData(String),
    FilterOut,
    TagNotFound(String),
    EdgeNotFound(String),
    SpaceNotFound(String),
    IndexNotFound(String),
    TagPropNotFound(String),
    EdgePropNotFound(String),
    MutateTagConflict,
    Conflict(String),
    DataConflict,
    IndexLocked,
    MachineNotFound(String),
    ZoneNotFound(String),
    ZoneNotEnough,
    StorageMemoryExceeded,
    RpcExceedDeadline,
    PartialResult(Vec<(usize, Error)>),
    Unknown(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

/// True for the handful of kinds that abort the whole partition loop
/// rather than just the current input (spec §7 propagation policy).
pub fn is_hard_fault(err: &Error) -> bool {
    matches!(
        err,
        Error::InvalidVid { .. } | Error::StorageMemoryExceeded | Error::RpcExceedDeadline
    )
}
