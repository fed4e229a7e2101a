//! Block validation: structure first, then signature.
//!
//! Both checks fail closed. A block that fails either is dropped by the
//! caller; nothing here touches the DAG.

use shared_crypto::{sha256, Ed25519PublicKey, Ed25519Signature};

use super::entities::{BlockHash, BlockHeader, CatchainBlock, ForkProof, Height, IncarnationId};
use super::errors::ProtocolViolation;

/// Maximum chain height for `sources` members.
///
/// `coeff * ceil((sources + max_deps) / max_deps) / 1000`, unbounded when
/// `coeff` is 0.
pub fn max_height(coeff: u64, sources: usize, max_deps: usize) -> Height {
    if coeff == 0 {
        return Height::MAX;
    }
    let max_deps = max_deps.max(1) as u64;
    let rounds = (sources as u64 + max_deps).div_ceil(max_deps);
    coeff.saturating_mul(rounds) / 1000
}

/// Session parameters the structural check runs against.
#[derive(Debug, Clone, Copy)]
pub struct ValidationContext {
    pub incarnation: IncarnationId,
    pub source_count: usize,
    pub max_deps: usize,
    pub max_height: Height,
    pub max_block_size: u64,
}

impl ValidationContext {
    /// Header shape: incarnation, source, height bounds, prev link, deps.
    pub fn validate_structural(&self, header: &BlockHeader) -> Result<(), ProtocolViolation> {
        if header.incarnation != self.incarnation {
            return Err(ProtocolViolation::IncarnationMismatch);
        }
        if header.source as usize >= self.source_count {
            return Err(ProtocolViolation::UnknownSource(header.source));
        }
        if header.height == 0 || header.height > self.max_height {
            return Err(ProtocolViolation::BadHeight {
                height: header.height,
                max: self.max_height,
            });
        }

        let prev = &header.prev;
        let prev_ok = prev.source == header.source
            && prev.height + 1 == header.height
            && (prev.height != 0 || prev.hash == self.incarnation.root_hash());
        if !prev_ok {
            return Err(ProtocolViolation::PrevMismatch {
                source_id: header.source,
                height: header.height,
            });
        }

        if header.deps.len() > self.max_deps {
            return Err(ProtocolViolation::TooManyDeps {
                count: header.deps.len(),
                max: self.max_deps,
            });
        }
        for (i, dep) in header.deps.iter().enumerate() {
            let bad = dep.source == header.source
                || dep.source as usize >= self.source_count
                || dep.height == 0
                || dep.height > self.max_height
                || header.deps[..i].iter().any(|d| d.source == dep.source);
            if bad {
                return Err(ProtocolViolation::InvalidDependency(dep.source));
            }
        }
        Ok(())
    }

    /// Payload binding and size bound of a full block.
    pub fn validate_payload(&self, block: &CatchainBlock) -> Result<(), ProtocolViolation> {
        let size = bincode::serialized_size(block)
            .map_err(|e| ProtocolViolation::Malformed(e.to_string()))?;
        if size > self.max_block_size {
            return Err(ProtocolViolation::BlockTooLarge {
                size,
                max: self.max_block_size,
            });
        }
        if sha256(&block.payload) != block.header.payload_hash {
            return Err(ProtocolViolation::PayloadHashMismatch);
        }
        Ok(())
    }

    /// Both sides valid, same slot, different blocks.
    pub fn validate_fork_proof(
        &self,
        proof: &ForkProof,
        public_key: &Ed25519PublicKey,
    ) -> Result<(), ProtocolViolation> {
        if proof.left.source != proof.right.source || proof.left.height != proof.right.height {
            return Err(ProtocolViolation::InvalidForkProof("sides are different slots"));
        }
        self.validate_structural(&proof.left)?;
        self.validate_structural(&proof.right)?;
        let (left_hash, right_hash) = proof.hashes();
        if left_hash == right_hash {
            return Err(ProtocolViolation::InvalidForkProof("sides are the same block"));
        }
        validate_signature(&proof.left, &left_hash, public_key)?;
        validate_signature(&proof.right, &right_hash, public_key)
    }
}

/// Signature over `hash` by the claimed source's key.
pub fn validate_signature(
    header: &BlockHeader,
    hash: &BlockHash,
    public_key: &Ed25519PublicKey,
) -> Result<(), ProtocolViolation> {
    let signature = Ed25519Signature::from_slice(&header.signature)
        .map_err(|_| ProtocolViolation::MalformedSignature)?;
    public_key
        .verify(hash, &signature)
        .map_err(|_| ProtocolViolation::BadSignature(header.source))
}
