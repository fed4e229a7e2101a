//! Block ingestion, fork detection and blame.

use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use super::{absorb, CatchainReceiver};
use crate::domain::{
    validate_signature, BlockHash, BlockIndex, CatchainBlock, CatchainResult, FatalError,
    ForkProof, InsertOutcome, PendingBlock, PeerId, ProtocolViolation, SlotOutcome, SourceId,
    TimerKind,
};
use crate::events::wire::{decode, encode, CatchainMessage};
use crate::events::{Action, WritePurpose};

impl CatchainReceiver {
    pub(super) fn on_message(
        &mut self,
        from: PeerId,
        data: Vec<u8>,
        now: Instant,
        out: &mut Vec<Action>,
    ) -> CatchainResult<()> {
        if !self.is_booted() {
            trace!("[qc-18] message before boot, ignored");
            return Ok(());
        }
        let Some(peer) = self.source_of_peer(&from) else {
            debug!("[qc-18] message from unknown peer dropped");
            return Ok(());
        };
        let limit = self.wire_limit();
        let result = decode::<CatchainMessage>(&data, limit)
            .map_err(Into::into)
            .and_then(|message| match message {
                CatchainMessage::BlockUpdate(block) => self.receive_block(peer, block, now, out),
            });
        absorb(result, "block update")
    }

    pub(super) fn wire_limit(&self) -> u64 {
        // Room for framing around the largest allowed block.
        self.config.max_serialized_block_size.saturating_add(4096)
    }

    /// Validate and insert a block received from `peer`.
    ///
    /// Already-initialized blocks are a no-op. Blocks from a blamed source
    /// are accepted only if some other block already depends on them.
    pub(super) fn receive_block(
        &mut self,
        peer: SourceId,
        block: CatchainBlock,
        now: Instant,
        out: &mut Vec<Action>,
    ) -> CatchainResult<()> {
        let hash = block.hash();
        if self.dag.is_initialized(&hash) {
            self.knowledge[peer as usize].insert(hash);
            return Ok(());
        }

        let header = &block.header;
        self.validation.validate_structural(header)?;
        self.validation.validate_payload(&block)?;
        if let Some(misplaced) = self.dag.contradicted_ref(header) {
            return Err(ProtocolViolation::MisplacedReference {
                source_id: misplaced.source,
                height: misplaced.height,
            }
            .into());
        }

        let source = &self.sources[header.source as usize];
        if source.is_blamed() && self.dag.lookup(&hash).is_none() {
            return Err(ProtocolViolation::BlamedSource(header.source).into());
        }
        validate_signature(header, &hash, source.public_key())?;

        if header.source == self.local_id {
            if !self.config.allow_unsafe_self_blocks_resync || self.started {
                return Err(FatalError::UnexpectedSelfBlock(header.height).into());
            }
            warn!(
                height = header.height,
                "[qc-18] recovering own block from the network"
            );
            self.timers.schedule(
                TimerKind::InitialSyncDeadline,
                now + self.config.initial_sync_window(),
            );
        }

        self.knowledge[peer as usize].insert(hash);
        let value = encode(&block)?;
        self.insert_block(block, hash, out)?;
        out.push(Action::StoreWrite {
            key: hash,
            purpose: WritePurpose::RemoteBlock,
            value,
        });
        Ok(())
    }

    /// Insert a validated block, claim its slot and detect forks.
    ///
    /// Heights are only learned from the block's own header; positions
    /// claimed by references are unverified until the referenced block
    /// arrives.
    pub(super) fn insert_block(
        &mut self,
        block: CatchainBlock,
        hash: BlockHash,
        out: &mut Vec<Action>,
    ) -> CatchainResult<BlockIndex> {
        let header = block.header.clone();
        let insertion = self.dag.create_or_get(block, hash);
        if insertion.outcome == InsertOutcome::AlreadyInitialized {
            return Ok(insertion.index);
        }
        for dependant in &insertion.invalidated {
            let record = self.dag.get(*dependant);
            warn!(
                source = ?record.source,
                height = record.height,
                "[qc-18] block referenced a known block at the wrong position, never delivered"
            );
        }

        let source = &mut self.sources[header.source as usize];
        if let SlotOutcome::Conflict { existing } = source.register(header.height, insertion.index)
        {
            let existing_header = self
                .dag
                .get(existing)
                .block
                .as_ref()
                .map(|b| b.header.clone());
            if let Some(existing_header) = existing_header {
                self.on_fork_detected(ForkProof::new(existing_header, header), out);
            }
        }
        Ok(insertion.index)
    }

    /// Blame the proof's source once and queue the evidence.
    pub(super) fn on_fork_detected(&mut self, proof: ForkProof, out: &mut Vec<Action>) {
        let source_id = proof.source();
        let height = proof.height();
        let source = &mut self.sources[source_id as usize];
        if !source.blame(proof.clone()) {
            return;
        }
        warn!(
            source = source_id,
            height, "[qc-18] fork detected, source blamed"
        );
        // One outstanding proof per source; the source is blamed only once.
        let slot = &mut self.pending_fork_proofs[source_id as usize];
        if slot.is_none() {
            *slot = Some(proof);
        }
        self.neighbours.retain(|n| *n != source_id);
        out.push(Action::NotifyBlame { source: source_id });
    }

    /// Fork proof received from a peer in answer to getDifference.
    pub(super) fn accept_fork_proof(
        &mut self,
        proof: ForkProof,
        out: &mut Vec<Action>,
    ) -> CatchainResult<()> {
        let source_id = proof.source();
        let source = self
            .sources
            .get(source_id as usize)
            .ok_or(ProtocolViolation::UnknownSource(source_id))?;
        if source.is_blamed() {
            return Ok(());
        }
        self.validation
            .validate_fork_proof(&proof, source.public_key())?;
        self.on_fork_detected(proof, out);
        Ok(())
    }

    /// After the listener saw the blame, publish the proof as an own block.
    pub(super) fn on_blame_processed(
        &mut self,
        source: SourceId,
        out: &mut Vec<Action>,
    ) -> CatchainResult<()> {
        let Some(proof) = self
            .pending_fork_proofs
            .get_mut(source as usize)
            .and_then(Option::take)
        else {
            return Ok(());
        };
        info!(source, "[qc-18] blame processed, publishing fork proof");
        let payload = encode(&proof)?;
        self.production.enqueue(PendingBlock {
            payload,
            deps: Vec::new(),
        });
        self.try_produce(out)
    }

    pub(super) fn on_remote_written(
        &mut self,
        key: BlockHash,
        out: &mut Vec<Action>,
    ) -> CatchainResult<()> {
        if let Some(index) = self.dag.lookup(&key) {
            self.dag.mark_written(index);
            self.run_scheduler(out)?;
        }
        self.try_produce(out)
    }
}
