//! Per-source ledger: chain slots, heights, blame.

use std::collections::BTreeMap;

use shared_crypto::Ed25519PublicKey;

use super::dag::BlockIndex;
use super::entities::{CatchainMember, ForkProof, Height, KeyHash, PeerId, SourceId};

/// Result of claiming a `(source, height)` slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotOutcome {
    /// First block at this height.
    Registered,
    /// A different block already occupies the slot.
    Conflict { existing: BlockIndex },
}

/// One consensus participant as tracked by the receiver.
#[derive(Debug)]
pub struct SourceState {
    id: SourceId,
    public_key: Ed25519PublicKey,
    key_hash: KeyHash,
    address: PeerId,
    blamed: bool,
    /// Furthest height of a registered block of this source.
    received_height: Height,
    /// Furthest contiguous delivered height.
    delivered_height: Height,
    /// First initialized block seen at each height.
    chain: BTreeMap<Height, BlockIndex>,
    fork_proof: Option<ForkProof>,
}

impl SourceState {
    pub fn new(id: SourceId, member: &CatchainMember) -> Self {
        Self {
            id,
            public_key: member.public_key,
            key_hash: member.key_hash(),
            address: member.address,
            blamed: false,
            received_height: 0,
            delivered_height: 0,
            chain: BTreeMap::new(),
            fork_proof: None,
        }
    }

    pub fn id(&self) -> SourceId {
        self.id
    }

    pub fn public_key(&self) -> &Ed25519PublicKey {
        &self.public_key
    }

    pub fn key_hash(&self) -> KeyHash {
        self.key_hash
    }

    pub fn address(&self) -> PeerId {
        self.address
    }

    pub fn is_blamed(&self) -> bool {
        self.blamed
    }

    pub fn received_height(&self) -> Height {
        self.received_height
    }

    pub fn delivered_height(&self) -> Height {
        self.delivered_height
    }

    pub fn fork_proof(&self) -> Option<&ForkProof> {
        self.fork_proof.as_ref()
    }

    pub fn block_at(&self, height: Height) -> Option<BlockIndex> {
        self.chain.get(&height).copied()
    }

    /// Lowest initialized block above the delivered height.
    pub fn first_undelivered(&self) -> Option<BlockIndex> {
        self.chain
            .range(self.delivered_height + 1..)
            .next()
            .map(|(_, index)| *index)
    }

    /// Some height up to `received_height` has no initialized block yet.
    pub fn has_unreceived(&self) -> bool {
        (self.chain.range(1..=self.received_height).count() as u64) < self.received_height
    }

    pub fn has_undelivered(&self) -> bool {
        self.delivered_height < self.received_height
    }

    fn note_received(&mut self, height: Height) {
        self.received_height = self.received_height.max(height);
    }

    /// Claim the slot at `height` for `index`.
    pub fn register(&mut self, height: Height, index: BlockIndex) -> SlotOutcome {
        match self.chain.get(&height) {
            Some(&existing) if existing != index => SlotOutcome::Conflict { existing },
            Some(_) => SlotOutcome::Registered,
            None => {
                self.chain.insert(height, index);
                self.note_received(height);
                SlotOutcome::Registered
            }
        }
    }

    /// Advance the delivered height if `index` is the next slot.
    pub fn note_delivered(&mut self, height: Height, index: BlockIndex) {
        if height == self.delivered_height + 1 && self.block_at(height) == Some(index) {
            self.delivered_height = height;
        }
    }

    /// Mark blamed with `proof`. Returns false if already blamed.
    pub fn blame(&mut self, proof: ForkProof) -> bool {
        if self.blamed {
            return false;
        }
        self.blamed = true;
        self.fork_proof = Some(proof);
        true
    }
}
