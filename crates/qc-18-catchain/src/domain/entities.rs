//! # Core Domain Entities
//!
//! Blocks, references and identities of a catchain session.
//!
//! A block is identified by the SHA-256 hash of its canonical unsigned
//! encoding: incarnation, source, height, the `prev` reference, the ordered
//! dependency references and the payload hash. The signature is made over
//! that hash and is not part of it.
//!
//! ```text
//!   source 0:  root ── A1 ── A2 ── A3
//!                       ▲           ▲
//!                       │ dep       │ dep
//!   source 1:  root ── B1 ── B2 ────┘
//! ```

use serde::{Deserialize, Serialize};
use shared_crypto::{sha256, Ed25519PublicKey, Ed25519Signature, Hash, Sha256Hasher};

/// Content hash identifying a block.
pub type BlockHash = Hash;

/// SHA-256 fingerprint of a member public key.
pub type KeyHash = Hash;

/// Index of a source in the sorted member list (0..N-1).
pub type SourceId = u32;

/// Position of a block in its source's chain. 0 is the shared root.
pub type Height = u64;

/// Reserved store key holding the root pointer record.
pub const ROOT_POINTER_KEY: BlockHash = [0u8; 32];

/// Domain separator mixed into every block hash.
const BLOCK_HASH_DOMAIN: &[u8] = b"catchain.block.v1";

/// Network address of a member (opaque overlay identifier).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId(pub [u8; 32]);

impl PeerId {
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

/// Identifier of one DAG instance (consensus session).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IncarnationId(pub Hash);

impl IncarnationId {
    /// Derive from the member identities and a session-unique nonce.
    ///
    /// The key hashes are sorted first, so every member derives the same id
    /// regardless of the order it learned the member set in.
    pub fn derive(member_key_hashes: &[KeyHash], session_nonce: &[u8; 32]) -> Self {
        let mut sorted = member_key_hashes.to_vec();
        sorted.sort_unstable();

        let mut hasher = Sha256Hasher::new();
        for key_hash in &sorted {
            hasher.update(key_hash);
        }
        hasher.update(session_nonce);
        Self(hasher.finalize())
    }

    /// Hash of the synthetic root block of this instance.
    pub fn root_hash(&self) -> BlockHash {
        self.0
    }
}

/// A consensus participant as configured for a session.
#[derive(Clone, Debug)]
pub struct CatchainMember {
    pub public_key: Ed25519PublicKey,
    pub address: PeerId,
}

impl CatchainMember {
    pub fn new(public_key: Ed25519PublicKey, address: PeerId) -> Self {
        Self {
            public_key,
            address,
        }
    }

    pub fn key_hash(&self) -> KeyHash {
        self.public_key.key_hash()
    }
}

/// Reference to a block by its position and hash.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockRef {
    pub source: SourceId,
    pub height: Height,
    pub hash: BlockHash,
}

impl BlockRef {
    /// Reference to the shared root as seen from `source`'s chain.
    pub fn root(source: SourceId, incarnation: &IncarnationId) -> Self {
        Self {
            source,
            height: 0,
            hash: incarnation.root_hash(),
        }
    }
}

/// Signed block header.
///
/// The signature is carried as raw bytes on the wire and length-checked
/// during validation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub incarnation: IncarnationId,
    pub source: SourceId,
    pub height: Height,
    pub prev: BlockRef,
    pub deps: Vec<BlockRef>,
    pub payload_hash: Hash,
    pub signature: Vec<u8>,
}

impl BlockHeader {
    /// Build an unsigned header for `payload`.
    pub fn unsigned(
        incarnation: IncarnationId,
        source: SourceId,
        height: Height,
        prev: BlockRef,
        deps: Vec<BlockRef>,
        payload: &[u8],
    ) -> Self {
        Self {
            incarnation,
            source,
            height,
            prev,
            deps,
            payload_hash: sha256(payload),
            signature: Vec::new(),
        }
    }

    /// Hash over the canonical unsigned encoding.
    ///
    /// Fixed-width little-endian fields, so the encoding is total and the
    /// result never depends on serializer settings.
    pub fn compute_hash(&self) -> BlockHash {
        let mut hasher = Sha256Hasher::new();
        hasher.update(BLOCK_HASH_DOMAIN);
        hasher.update(&self.incarnation.0);
        hasher.update(&self.source.to_le_bytes());
        hasher.update(&self.height.to_le_bytes());
        update_ref(&mut hasher, &self.prev);
        hasher.update(&(self.deps.len() as u32).to_le_bytes());
        for dep in &self.deps {
            update_ref(&mut hasher, dep);
        }
        hasher.update(&self.payload_hash);
        hasher.finalize()
    }

    pub fn set_signature(&mut self, signature: &Ed25519Signature) {
        self.signature = signature.as_bytes().to_vec();
    }

    /// Reference to this block, given its computed hash.
    pub fn block_ref(&self, hash: BlockHash) -> BlockRef {
        BlockRef {
            source: self.source,
            height: self.height,
            hash,
        }
    }
}

fn update_ref(hasher: &mut Sha256Hasher, block_ref: &BlockRef) {
    hasher.update(&block_ref.source.to_le_bytes());
    hasher.update(&block_ref.height.to_le_bytes());
    hasher.update(&block_ref.hash);
}

/// A full block: header plus opaque application payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatchainBlock {
    pub header: BlockHeader,
    pub payload: Vec<u8>,
}

impl CatchainBlock {
    pub fn new(header: BlockHeader, payload: Vec<u8>) -> Self {
        Self { header, payload }
    }

    pub fn hash(&self) -> BlockHash {
        self.header.compute_hash()
    }
}

/// Evidence that a source signed two distinct blocks at the same height.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForkProof {
    pub left: BlockHeader,
    pub right: BlockHeader,
}

impl ForkProof {
    pub fn new(left: BlockHeader, right: BlockHeader) -> Self {
        Self { left, right }
    }

    pub fn source(&self) -> SourceId {
        self.left.source
    }

    pub fn height(&self) -> Height {
        self.left.height
    }

    /// Hashes of both conflicting blocks, in proof order.
    pub fn hashes(&self) -> (BlockHash, BlockHash) {
        (self.left.compute_hash(), self.right.compute_hash())
    }
}

/// A block as handed to the consumer on delivery.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeliveredBlock {
    pub source: SourceId,
    pub height: Height,
    pub hash: BlockHash,
    pub prev_hash: BlockHash,
    pub dep_hashes: Vec<BlockHash>,
    pub payload: Vec<u8>,
}
