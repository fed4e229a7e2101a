//! Wire shapes exchanged between catchain peers.
//!
//! Encoded with bincode (fixed-width integers, trailing bytes rejected, size
//! limited) so arbitrary application bytes rarely decode as a DAG message.

use bincode::Options;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::domain::{
    BlockHash, CatchainBlock, FatalError, ForkProof, Height, ProtocolViolation,
};

/// Query names passed to the transport.
pub const GET_DIFFERENCE_QUERY: &str = "catchain.getDifference";
pub const GET_BLOCK_QUERY: &str = "catchain.getBlock";

/// Per-source heights. `None` marks a source the sender does not trust.
pub type HeightVector = Vec<Option<Height>>;

/// Point-to-point messages.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CatchainMessage {
    BlockUpdate(CatchainBlock),
}

/// Queries answered by the receiver.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CatchainQuery {
    GetBlock { hash: BlockHash },
    GetDifference { heights: HeightVector },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CatchainResponse {
    BlockResult(CatchainBlock),
    BlockNotFound { hash: BlockHash },
    Difference { heights: HeightVector },
    ForkProof(ForkProof),
}

fn options(limit: u64) -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .reject_trailing_bytes()
        .with_limit(limit)
}

/// Encode a value. Failure means an internal invariant broke.
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, FatalError> {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .serialize(value)
        .map_err(|e| FatalError::Serialization(e.to_string()))
}

/// Decode at most `limit` bytes worth of `T`.
pub fn decode<T: DeserializeOwned>(bytes: &[u8], limit: u64) -> Result<T, ProtocolViolation> {
    options(limit)
        .deserialize(bytes)
        .map_err(|e| ProtocolViolation::Malformed(e.to_string()))
}
