//! Error taxonomy for the catchain receiver.
//!
//! Protocol violations are dropped with a log line. Fatal errors stop the
//! instance and are handed to the supervisor that owns it.

use thiserror::Error;

use super::entities::{Height, SourceId};

/// Result alias for receiver operations.
pub type CatchainResult<T> = Result<T, CatchainError>;

#[derive(Debug, Error)]
pub enum CatchainError {
    /// Recoverable: the offending block or query is dropped.
    #[error("protocol violation: {0}")]
    Violation(#[from] ProtocolViolation),

    /// Unrecoverable: the instance must not keep operating on its DAG.
    #[error("fatal: {0}")]
    Fatal(#[from] FatalError),
}

impl CatchainError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, CatchainError::Fatal(_))
    }
}

/// Input from the network that fails validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolViolation {
    #[error("incarnation mismatch")]
    IncarnationMismatch,

    #[error("unknown source {0}")]
    UnknownSource(SourceId),

    #[error("unknown peer")]
    UnknownPeer,

    #[error("bad height {height} (max {max})")]
    BadHeight { height: Height, max: Height },

    #[error("prev reference does not match source {source_id} at height {height}")]
    PrevMismatch { source_id: SourceId, height: Height },

    #[error("too many deps: {count} > {max}")]
    TooManyDeps { count: usize, max: usize },

    #[error("invalid dependency on source {0}")]
    InvalidDependency(SourceId),

    #[error("reference places a known block at source {source_id} height {height}")]
    MisplacedReference { source_id: SourceId, height: Height },

    #[error("block too large: {size} > {max} bytes")]
    BlockTooLarge { size: u64, max: u64 },

    #[error("payload hash mismatch")]
    PayloadHashMismatch,

    #[error("malformed signature")]
    MalformedSignature,

    #[error("bad signature from source {0}")]
    BadSignature(SourceId),

    #[error("malformed message: {0}")]
    Malformed(String),

    #[error("height vector length {got}, expected {expected}")]
    HeightVectorLength { got: usize, expected: usize },

    #[error("source {0} is blamed")]
    BlamedSource(SourceId),

    #[error("invalid fork proof: {0}")]
    InvalidForkProof(&'static str),

    #[error("unexpected response")]
    UnexpectedResponse,
}

/// Invariant violations that end the instance.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FatalError {
    #[error("local block references unknown dependency {0}")]
    MissingDependency(String),

    #[error("local block depends on own source block {0}")]
    SelfDependency(String),

    #[error("received own block at height {0} from the network")]
    UnexpectedSelfBlock(Height),

    #[error("signing failed: {0}")]
    SigningFailed(String),

    #[error("store write failed: {0}")]
    StoreWrite(String),

    #[error("store read failed: {0}")]
    StoreRead(String),

    #[error("corrupt store: {0}")]
    CorruptStore(String),

    #[error("serialization failed: {0}")]
    Serialization(String),

    #[error("root block {0} not delivered after boot")]
    UndeliveredRoot(String),
}

/// Errors surfaced by the service handle.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceError {
    #[error("catchain instance stopped")]
    Stopped,

    #[error("query rejected: {0}")]
    QueryRejected(String),
}
