//! # Catchain Receiver
//!
//! Deterministic, single-threaded core of one catchain instance.
//!
//! ```text
//!                ┌──────────────────────── CatchainReceiver ────────────────────────┐
//!   Event ──────→│ ingest ──→ BlockDag ──→ run queue ──→ Deliver / gossip           │──→ Vec<Action>
//!                │   ↑           ↑                                                   │
//!                │ queries     production (Idle→Signing→PersistingId→…→Idle)         │
//!                │ sync        recovery (root pointer → closure load)                │
//!                │ lifecycle   timers: rotate / sync / initial-sync deadline         │
//!                └───────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The receiver never performs I/O and never reads a clock: every
//! collaborator call is returned as an [`Action`], every completion comes
//! back as an [`Event`], and `now` is passed in. Randomness comes from a
//! seeded RNG, so a run is reproducible from its event sequence.
//!
//! ## Errors
//!
//! [`CatchainReceiver::handle`] returns `Err` only for fatal errors. Protocol
//! violations are logged and dropped inside the handler.

mod ingest;
mod lifecycle;
mod production;
mod queries;
mod recovery;
mod sync;


use std::collections::{HashMap, HashSet};

use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::domain::{
    max_height, BlockDag, BlockHash, BlockIndex, BlockRecord, CatchainConfig, CatchainError,
    CatchainMember, CatchainResult, ConfigError, ForkProof, IncarnationId, KeyHash,
    LocalProduction, PeerId, PeerKnowledge, SourceId, SourceState, TimerTable,
    ValidationContext,
};
use crate::events::wire::{encode, CatchainMessage, HeightVector};
use crate::events::{Action, Event};

/// Boot progress. Network input is ignored until `Ready`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootPhase {
    Created,
    LoadingRoot,
    LoadingBlocks,
    Ready,
}

pub struct CatchainReceiver {
    config: CatchainConfig,
    validation: ValidationContext,
    incarnation: IncarnationId,
    local_id: SourceId,
    sources: Vec<SourceState>,
    source_by_peer: HashMap<PeerId, SourceId>,
    dag: BlockDag,
    knowledge: Vec<PeerKnowledge>,
    neighbours: Vec<SourceId>,
    production: LocalProduction,
    pending_fork_proofs: Vec<Option<ForkProof>>,
    timers: TimerTable,
    rng: StdRng,
    phase: BootPhase,
    pending_loads: usize,
    requested_loads: HashSet<BlockHash>,
    db_root: Option<BlockHash>,
    /// Last own block durably behind the root pointer.
    local_tip: BlockIndex,
    started: bool,
    /// Own block the root pointer is being moved to during reconciliation.
    resync_tip: Option<BlockIndex>,
}

impl CatchainReceiver {
    /// Create a receiver for `members`, acting as the member `local_key`.
    ///
    /// Members are sorted by key hash; a member's source id is its position
    /// in that order, so every participant assigns the same ids.
    pub fn new(
        config: CatchainConfig,
        incarnation: IncarnationId,
        mut members: Vec<CatchainMember>,
        local_key: KeyHash,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        if members.is_empty() {
            return Err(ConfigError::NoMembers);
        }
        members.sort_by_key(|m| m.key_hash());
        if members
            .windows(2)
            .any(|pair| pair[0].key_hash() == pair[1].key_hash())
        {
            return Err(ConfigError::DuplicateMember);
        }
        let local_id = members
            .iter()
            .position(|m| m.key_hash() == local_key)
            .ok_or(ConfigError::UnknownLocalMember)? as SourceId;

        let sources: Vec<SourceState> = members
            .iter()
            .enumerate()
            .map(|(id, member)| SourceState::new(id as SourceId, member))
            .collect();
        let source_by_peer = sources.iter().map(|s| (s.address(), s.id())).collect();
        let validation = ValidationContext {
            incarnation,
            source_count: sources.len(),
            max_deps: config.max_deps,
            max_height: max_height(config.max_block_height_coeff, sources.len(), config.max_deps),
            max_block_size: config.max_serialized_block_size,
        };
        let rng = match config.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Ok(Self {
            knowledge: (0..sources.len())
                .map(|_| PeerKnowledge::new(config.peer_filter_capacity))
                .collect(),
            pending_fork_proofs: vec![None; sources.len()],
            config,
            validation,
            incarnation,
            local_id,
            sources,
            source_by_peer,
            dag: BlockDag::new(incarnation.root_hash()),
            neighbours: Vec::new(),
            production: LocalProduction::new(),
            timers: TimerTable::new(),
            rng,
            phase: BootPhase::Created,
            pending_loads: 0,
            requested_loads: HashSet::new(),
            db_root: None,
            local_tip: BlockIndex::ROOT,
            started: false,
            resync_tip: None,
        })
    }

    /// Process one event at time `now`.
    pub fn handle(&mut self, event: Event, now: Instant) -> CatchainResult<Vec<Action>> {
        let mut out = Vec::new();
        match event {
            Event::Boot => self.on_boot(&mut out),
            Event::Tick => self.on_tick(now, &mut out)?,
            Event::AddBlock { payload, deps } => self.on_add_block(payload, deps, &mut out)?,
            Event::MessageReceived { from, data } => self.on_message(from, data, now, &mut out)?,
            Event::BroadcastReceived { from, data } => self.on_broadcast(from, data, &mut out),
            Event::QueryReceived {
                from,
                data,
                query_id,
            } => self.on_query(from, data, query_id, &mut out)?,
            Event::QueryCompleted {
                peer,
                context,
                result,
            } => self.on_query_completed(peer, context, result, now, &mut out)?,
            Event::SignatureReady { hash, result } => {
                self.on_signature_ready(hash, result, &mut out)?
            }
            Event::StoreWritten {
                key,
                purpose,
                result,
            } => self.on_store_written(key, purpose, result, &mut out)?,
            Event::StoreLoaded { key, result } => self.on_store_loaded(key, result, now, &mut out)?,
            Event::BlameProcessed { source } => self.on_blame_processed(source, &mut out)?,
        }
        Ok(out)
    }

    /// Earliest pending timer deadline.
    pub fn next_awake_time(&self) -> Option<Instant> {
        self.timers.next_deadline()
    }

    pub fn local_id(&self) -> SourceId {
        self.local_id
    }

    pub fn local_key_hash(&self) -> KeyHash {
        self.sources[self.local_id as usize].key_hash()
    }

    pub fn incarnation(&self) -> IncarnationId {
        self.incarnation
    }

    pub fn config(&self) -> &CatchainConfig {
        &self.config
    }

    pub fn is_booted(&self) -> bool {
        self.phase == BootPhase::Ready
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    pub fn source(&self, id: SourceId) -> Option<&SourceState> {
        self.sources.get(id as usize)
    }

    pub fn source_id_of_key(&self, key_hash: &KeyHash) -> Option<SourceId> {
        self.sources
            .iter()
            .find(|s| &s.key_hash() == key_hash)
            .map(|s| s.id())
    }

    pub fn member_addresses(&self) -> Vec<PeerId> {
        self.sources.iter().map(|s| s.address()).collect()
    }

    pub fn block(&self, hash: &BlockHash) -> Option<&BlockRecord> {
        self.dag.get_by_hash(hash)
    }

    pub fn dag(&self) -> &BlockDag {
        &self.dag
    }

    pub fn neighbours(&self) -> &[SourceId] {
        &self.neighbours
    }

    pub fn fork_proof(&self, id: SourceId) -> Option<&ForkProof> {
        self.source(id).and_then(|s| s.fork_proof())
    }

    /// Height of the last own block behind the root pointer.
    pub fn local_tip_height(&self) -> u64 {
        self.dag.get(self.local_tip).height
    }

    /// Delivered height per source; `None` for blamed sources.
    pub fn height_vector(&self) -> HeightVector {
        self.sources
            .iter()
            .map(|s| (!s.is_blamed()).then(|| s.delivered_height()))
            .collect()
    }

    fn source_of_peer(&self, peer: &PeerId) -> Option<SourceId> {
        self.source_by_peer.get(peer).copied()
    }

    /// Deliver everything that became ready, in queue order.
    fn run_scheduler(&mut self, out: &mut Vec<Action>) -> CatchainResult<()> {
        for index in self.dag.run() {
            let Some(view) = self.dag.delivered_view(index) else {
                continue;
            };
            if let Some(source) = self.sources.get_mut(view.source as usize) {
                source.note_delivered(view.height, index);
            }
            debug!(
                source = view.source,
                height = view.height,
                hash = %hex::encode(&view.hash[..8]),
                "[qc-18] block delivered"
            );
            out.push(Action::Deliver(view));
            if self.is_booted() {
                self.gossip(index, out)?;
            }
        }
        Ok(())
    }

    /// Forward a delivered block to neighbours not known to have it.
    fn gossip(&self, index: BlockIndex, out: &mut Vec<Action>) -> CatchainResult<()> {
        let record = self.dag.get(index);
        let Some(block) = record.block.as_ref() else {
            return Ok(());
        };
        let hash = record.hash;
        let mut targets = Vec::new();
        for &neighbour in &self.neighbours {
            if !self.knowledge[neighbour as usize].contains(&hash) {
                targets.push(self.sources[neighbour as usize].address());
            }
        }
        if targets.is_empty() {
            return Ok(());
        }
        let data = encode(&CatchainMessage::BlockUpdate(block.clone()))?;
        out.push(Action::Multicast { to: targets, data });
        Ok(())
    }
}

/// Log and swallow protocol violations; pass fatal errors through.
fn absorb(result: CatchainResult<()>, what: &str) -> CatchainResult<()> {
    match result {
        Err(CatchainError::Violation(violation)) => {
            warn!(%violation, "[qc-18] dropped {what}");
            Ok(())
        }
        other => other,
    }
}
