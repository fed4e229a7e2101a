//! Boot-time reconstruction of the DAG from the store.
//!
//! The root pointer names the last own block. Loading it pulls in its
//! `prev` and `deps`, and so on, until the whole closure is resident.
//! `pending_loads` counts reads in flight; boot completes exactly once, when
//! it drops to zero.

use tokio::time::Instant;
use tracing::{debug, info};

use super::{BootPhase, CatchainReceiver};
use crate::domain::{
    validate_signature, BlockHash, CatchainBlock, CatchainResult, FatalError, TimerKind,
    ROOT_POINTER_KEY,
};
use crate::events::wire::decode;
use crate::events::{Action, WritePurpose};

impl CatchainReceiver {
    pub(super) fn on_boot(&mut self, out: &mut Vec<Action>) {
        if self.phase != BootPhase::Created {
            return;
        }
        self.phase = BootPhase::LoadingRoot;
        out.push(Action::StoreRead {
            key: ROOT_POINTER_KEY,
        });
    }

    pub(super) fn on_store_loaded(
        &mut self,
        key: BlockHash,
        result: Result<Option<Vec<u8>>, String>,
        now: Instant,
        out: &mut Vec<Action>,
    ) -> CatchainResult<()> {
        let value = result.map_err(FatalError::StoreRead)?;
        match self.phase {
            BootPhase::LoadingRoot if key == ROOT_POINTER_KEY => match value {
                None => {
                    debug!("[qc-18] no root pointer, starting empty");
                    self.finish_boot(now, out)
                }
                Some(bytes) => {
                    let root: BlockHash = bytes.as_slice().try_into().map_err(|_| {
                        FatalError::CorruptStore(format!("root pointer of {} bytes", bytes.len()))
                    })?;
                    self.db_root = Some(root);
                    self.phase = BootPhase::LoadingBlocks;
                    self.request_load(root, out);
                    Ok(())
                }
            },
            BootPhase::LoadingBlocks => {
                self.pending_loads = self.pending_loads.saturating_sub(1);
                let bytes = value.ok_or_else(|| {
                    FatalError::CorruptStore(format!("missing block {}", hex::encode(key)))
                })?;
                self.load_block(key, &bytes, out)?;
                if self.pending_loads == 0 {
                    self.finish_boot(now, out)?;
                }
                Ok(())
            }
            _ => {
                debug!("[qc-18] unexpected store read ignored");
                Ok(())
            }
        }
    }

    fn request_load(&mut self, hash: BlockHash, out: &mut Vec<Action>) {
        if self.requested_loads.insert(hash) {
            self.pending_loads += 1;
            out.push(Action::StoreRead { key: hash });
        }
    }

    fn load_block(
        &mut self,
        key: BlockHash,
        bytes: &[u8],
        out: &mut Vec<Action>,
    ) -> CatchainResult<()> {
        let corrupt = |what: String| FatalError::CorruptStore(format!("{}: {what}", hex::encode(key)));

        let block: CatchainBlock =
            decode(bytes, self.wire_limit()).map_err(|e| corrupt(e.to_string()))?;
        let hash = block.hash();
        if hash != key {
            return Err(corrupt("hash mismatch".into()).into());
        }
        if self.dag.is_initialized(&hash) {
            return Ok(());
        }
        self.validation
            .validate_structural(&block.header)
            .and_then(|_| self.validation.validate_payload(&block))
            .and_then(|_| {
                let source = &self.sources[block.header.source as usize];
                validate_signature(&block.header, &hash, source.public_key())
            })
            .map_err(|e| corrupt(e.to_string()))?;

        let refs: Vec<_> = std::iter::once(block.header.prev)
            .chain(block.header.deps.iter().copied())
            .filter(|r| r.height > 0)
            .collect();
        let index = self.insert_block(block, hash, out)?;
        self.dag.mark_written(index);

        for block_ref in refs {
            if !self.dag.is_initialized(&block_ref.hash) {
                self.request_load(block_ref.hash, out);
            }
        }
        Ok(())
    }

    /// Deliver the loaded closure, then open for traffic and arm timers.
    fn finish_boot(&mut self, now: Instant, out: &mut Vec<Action>) -> CatchainResult<()> {
        self.run_scheduler(out)?;

        if let Some(root) = self.db_root {
            let index = self
                .dag
                .lookup(&root)
                .filter(|i| self.dag.get(*i).delivered)
                .ok_or_else(|| FatalError::UndeliveredRoot(hex::encode(root)))?;
            self.local_tip = index;
        }

        self.phase = BootPhase::Ready;
        info!(
            blocks = self.dag.initialized_count(),
            local_height = self.local_tip_height(),
            "[qc-18] boot complete"
        );

        self.rotate_neighbours();
        self.schedule_rotate(now);
        self.schedule_sync(now);
        self.timers.schedule(
            TimerKind::InitialSyncDeadline,
            now + self.config.initial_sync_window(),
        );
        self.try_produce(out)
    }

    pub(super) fn on_store_written(
        &mut self,
        key: BlockHash,
        purpose: WritePurpose,
        result: Result<(), String>,
        out: &mut Vec<Action>,
    ) -> CatchainResult<()> {
        result.map_err(FatalError::StoreWrite)?;
        match purpose {
            WritePurpose::RemoteBlock => self.on_remote_written(key, out),
            WritePurpose::LocalBlock => self.on_local_block_written(key, out),
            WritePurpose::LocalRootPointer => self.on_local_root_written(out),
            WritePurpose::ResyncRootPointer => self.on_resync_root_written(),
        }
    }
}
