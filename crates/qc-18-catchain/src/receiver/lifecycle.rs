//! Timers, neighbour rotation and start-up gating.

use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::CatchainReceiver;
use crate::domain::{
    choose_neighbours, CatchainResult, FatalError, SourceId, TimerKind, ROOT_POINTER_KEY,
};
use crate::events::{Action, WritePurpose};

impl CatchainReceiver {
    pub(super) fn on_tick(&mut self, now: Instant, out: &mut Vec<Action>) -> CatchainResult<()> {
        for timer in self.timers.take_due(now) {
            match timer {
                TimerKind::RotateNeighbours => {
                    self.rotate_neighbours();
                    self.schedule_rotate(now);
                }
                TimerKind::Sync => {
                    self.synchronize(out)?;
                    self.schedule_sync(now);
                }
                TimerKind::InitialSyncDeadline => self.check_started(now, out)?,
            }
        }
        Ok(())
    }

    fn random_period(&mut self, min_ms: u64, max_ms: u64) -> Duration {
        Duration::from_millis(self.rng.gen_range(min_ms..=max_ms))
    }

    pub(super) fn schedule_rotate(&mut self, now: Instant) {
        let period = self.random_period(
            self.config.neighbours_rotate_min_ms,
            self.config.neighbours_rotate_max_ms,
        );
        self.timers.schedule(TimerKind::RotateNeighbours, now + period);
    }

    pub(super) fn schedule_sync(&mut self, now: Instant) {
        let period = self.random_period(
            self.config.sync_period_min_ms,
            self.config.sync_period_max_ms,
        );
        self.timers.schedule(TimerKind::Sync, now + period);
    }

    /// Resample the gossip fan-out from non-blamed remote sources.
    pub(super) fn rotate_neighbours(&mut self) {
        let candidates: Vec<SourceId> = self
            .sources
            .iter()
            .filter(|s| s.id() != self.local_id && !s.is_blamed())
            .map(|s| s.id())
            .collect();
        self.neighbours = choose_neighbours(&candidates, self.config.max_neighbours, &mut self.rng);
        debug!(neighbours = ?self.neighbours, "[qc-18] neighbours rotated");
    }

    fn check_started(&mut self, now: Instant, out: &mut Vec<Action>) -> CatchainResult<()> {
        if self.started {
            return Ok(());
        }
        if self.config.allow_unsafe_self_blocks_resync && !self.unsafe_start_up_check(now, out)? {
            return Ok(());
        }
        self.started = true;
        info!(
            blocks = self.dag.initialized_count(),
            "[qc-18] initial sync complete, started"
        );
        out.push(Action::NotifyStarted);
        self.try_produce(out)
    }

    /// Reconcile the root pointer with own blocks recovered from the network.
    ///
    /// Returns true once the local chain tip matches the delivered own chain.
    fn unsafe_start_up_check(
        &mut self,
        now: Instant,
        out: &mut Vec<Action>,
    ) -> CatchainResult<bool> {
        let local = &self.sources[self.local_id as usize];
        if local.has_unreceived() || local.has_undelivered() {
            let recheck = Duration::from_millis(self.config.unsafe_recheck_ms);
            self.run_scheduler(out)?;
            self.timers
                .schedule(TimerKind::InitialSyncDeadline, now + recheck);
            return Ok(false);
        }

        let local = &self.sources[self.local_id as usize];
        let delivered = local.delivered_height();
        if delivered == 0 || self.local_tip_height() == delivered {
            return Ok(true);
        }

        let retry = Duration::from_millis(self.config.unsafe_root_retry_ms);
        self.timers
            .schedule(TimerKind::InitialSyncDeadline, now + retry);
        if self.resync_tip.is_some() {
            return Ok(false);
        }

        let index = local.block_at(delivered).ok_or_else(|| {
            FatalError::CorruptStore(format!("own block at height {delivered} missing"))
        })?;
        let hash = self.dag.get(index).hash;
        warn!(
            height = delivered,
            "[qc-18] moving root pointer to own block recovered from the network"
        );
        self.resync_tip = Some(index);
        out.push(Action::StoreWrite {
            key: ROOT_POINTER_KEY,
            value: hash.to_vec(),
            purpose: WritePurpose::ResyncRootPointer,
        });
        Ok(false)
    }

    pub(super) fn on_resync_root_written(&mut self) -> CatchainResult<()> {
        if let Some(index) = self.resync_tip.take() {
            self.local_tip = index;
            self.db_root = Some(self.dag.get(index).hash);
            info!(
                height = self.local_tip_height(),
                "[qc-18] root pointer reconciled"
            );
        }
        Ok(())
    }
}
