//! Own-chain block production.

use shared_crypto::Ed25519Signature;
use tracing::{debug, error, info, warn};

use super::CatchainReceiver;
use crate::domain::{
    BlockHash, BlockHeader, BlockRef, CatchainBlock, CatchainResult, FatalError, PendingBlock,
    ProductionState, ROOT_POINTER_KEY,
};
use crate::events::wire::encode;
use crate::events::{Action, WritePurpose};

impl CatchainReceiver {
    pub(super) fn on_add_block(
        &mut self,
        payload: Vec<u8>,
        deps: Vec<BlockHash>,
        out: &mut Vec<Action>,
    ) -> CatchainResult<()> {
        self.production.enqueue(PendingBlock { payload, deps });
        self.try_produce(out)
    }

    /// Start the next queued block if the pipeline is idle.
    ///
    /// In unsafe resync mode own blocks wait for start, since the own chain
    /// tip may still be recovered from the network. A block also waits
    /// until every dependency is delivered: only then is the dependency's
    /// whole closure on disk, which the root pointer must be able to reload.
    pub(super) fn try_produce(&mut self, out: &mut Vec<Action>) -> CatchainResult<()> {
        let recovering = self.config.allow_unsafe_self_blocks_resync && !self.started;
        if !self.is_booted() || recovering || !self.production.is_idle() {
            return Ok(());
        }
        while let Some(pending) = self.production.next_pending() {
            let mut dep_refs = Vec::with_capacity(pending.deps.len());
            let mut undelivered = None;
            for dep_hash in &pending.deps {
                let record = self
                    .dag
                    .get_by_hash(dep_hash)
                    .filter(|r| r.initialized && !r.invalid)
                    .ok_or_else(|| FatalError::MissingDependency(hex::encode(dep_hash)))?;
                if record.source == Some(self.local_id) {
                    return Err(FatalError::SelfDependency(hex::encode(dep_hash)).into());
                }
                if !record.delivered {
                    undelivered = Some(*dep_hash);
                    break;
                }
                if let Some(dep_ref) = record.block_ref() {
                    dep_refs.push(dep_ref);
                }
            }
            if let Some(dep_hash) = undelivered {
                debug!(
                    dep = %hex::encode(&dep_hash[..8]),
                    "[qc-18] own block waits for dependency to be durable"
                );
                self.production.requeue_front(pending);
                return Ok(());
            }

            let tip = self.dag.get(self.local_tip);
            let prev = BlockRef {
                source: self.local_id,
                height: tip.height,
                hash: tip.hash,
            };
            let height = tip.height + 1;
            if height > self.validation.max_height {
                error!(
                    height,
                    max = self.validation.max_height,
                    "[qc-18] own chain at max height, block dropped"
                );
                continue;
            }

            let header = BlockHeader::unsigned(
                self.incarnation,
                self.local_id,
                height,
                prev,
                dep_refs,
                &pending.payload,
            );
            let block = CatchainBlock::new(header, pending.payload);
            if let Err(violation) = self.validation.validate_payload(&block) {
                error!(%violation, "[qc-18] own block rejected");
                continue;
            }

            let hash = block.hash();
            debug!(height, hash = %hex::encode(&hash[..8]), "[qc-18] signing own block");
            self.production
                .transition(ProductionState::Signing { block, hash });
            out.push(Action::Sign {
                identity: self.local_key_hash(),
                hash,
            });
            return Ok(());
        }
        Ok(())
    }

    pub(super) fn on_signature_ready(
        &mut self,
        hash: BlockHash,
        result: Result<Ed25519Signature, String>,
        out: &mut Vec<Action>,
    ) -> CatchainResult<()> {
        let signature = result.map_err(FatalError::SigningFailed)?;
        match self.production.transition(ProductionState::Idle) {
            ProductionState::Signing {
                mut block,
                hash: expected,
            } if expected == hash => {
                block.header.set_signature(&signature);
                let value = encode(&block)?;
                self.production
                    .transition(ProductionState::PersistingId { block, hash });
                out.push(Action::StoreWrite {
                    key: hash,
                    value,
                    purpose: WritePurpose::LocalBlock,
                });
            }
            other => {
                warn!("[qc-18] stale signature ignored");
                self.production.transition(other);
            }
        }
        Ok(())
    }

    /// Block bytes are durable: move the root pointer.
    pub(super) fn on_local_block_written(
        &mut self,
        key: BlockHash,
        out: &mut Vec<Action>,
    ) -> CatchainResult<()> {
        match self.production.transition(ProductionState::Idle) {
            ProductionState::PersistingId { block, hash } if hash == key => {
                self.production
                    .transition(ProductionState::PersistingHeader { block, hash });
                out.push(Action::StoreWrite {
                    key: ROOT_POINTER_KEY,
                    value: hash.to_vec(),
                    purpose: WritePurpose::LocalRootPointer,
                });
            }
            other => {
                warn!("[qc-18] unexpected own block write ack");
                self.production.transition(other);
            }
        }
        Ok(())
    }

    /// Root pointer is durable: the block becomes visible.
    pub(super) fn on_local_root_written(&mut self, out: &mut Vec<Action>) -> CatchainResult<()> {
        let (block, hash) = match self.production.transition(ProductionState::Idle) {
            ProductionState::PersistingHeader { block, hash } => (block, hash),
            other => {
                warn!("[qc-18] unexpected root pointer ack");
                self.production.transition(other);
                return Ok(());
            }
        };
        self.production
            .transition(ProductionState::Delivering { hash });

        let height = block.header.height;
        let index = self.insert_block(block, hash, out)?;
        self.dag.mark_written(index);
        self.local_tip = index;
        self.db_root = Some(hash);
        info!(height, hash = %hex::encode(&hash[..8]), "[qc-18] own block committed");
        self.run_scheduler(out)?;

        self.production.transition(ProductionState::Idle);
        self.try_produce(out)
    }
}
