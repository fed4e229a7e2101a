//! Local block production pipeline.
//!
//! ```text
//! Idle ──sign──→ Signing ──sig──→ PersistingId ──ack──→ PersistingHeader ──ack──→ Delivering ──→ Idle
//! ```
//!
//! `PersistingId` writes the signed block under its hash. `PersistingHeader`
//! then moves the root pointer to it. A crash between the two leaves the
//! pointer on the previous block, which is still complete on disk.

use std::collections::VecDeque;

use super::entities::{BlockHash, CatchainBlock};

/// A local block request waiting for the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingBlock {
    pub payload: Vec<u8>,
    pub deps: Vec<BlockHash>,
}

#[derive(Debug, Default)]
pub enum ProductionState {
    #[default]
    Idle,
    Signing { block: CatchainBlock, hash: BlockHash },
    PersistingId { block: CatchainBlock, hash: BlockHash },
    PersistingHeader { block: CatchainBlock, hash: BlockHash },
    Delivering { hash: BlockHash },
}

/// FIFO queue plus the single in-flight production.
#[derive(Debug, Default)]
pub struct LocalProduction {
    state: ProductionState,
    queue: VecDeque<PendingBlock>,
}

impl LocalProduction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_idle(&self) -> bool {
        matches!(self.state, ProductionState::Idle)
    }

    pub fn enqueue(&mut self, pending: PendingBlock) {
        self.queue.push_back(pending);
    }

    pub fn next_pending(&mut self) -> Option<PendingBlock> {
        self.queue.pop_front()
    }

    /// Put a request back at the head, e.g. while its deps are in flight.
    pub fn requeue_front(&mut self, pending: PendingBlock) {
        self.queue.push_front(pending);
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Replace the state, returning the previous one.
    pub fn transition(&mut self, next: ProductionState) -> ProductionState {
        std::mem::replace(&mut self.state, next)
    }
}
