//! Deterministic multi-node simulator.
//!
//! Runs several [`CatchainReceiver`]s on a virtual clock and routes their
//! actions synchronously: messages, queries, store and signer calls all
//! complete in FIFO order without a runtime. Enable with the `test-utils`
//! feature flag.
//!
//! Nodes are created in key-hash order, so node `i` is source `i` on every
//! node.
//!
//! # Example
//!
//! ```rust
//! use qc_18_catchain::test_utils::SimCluster;
//! use qc_18_catchain::CatchainConfig;
//!
//! let mut cluster = SimCluster::new(3, CatchainConfig::default());
//! cluster.boot_all();
//! cluster.add_block(0, b"hello".to_vec(), vec![]);
//! cluster.advance_ms(2_000);
//! assert!(cluster.node(2).delivered_payloads().contains(&b"hello".to_vec()));
//! ```

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use shared_crypto::{Ed25519KeyPair, Hash};
use tokio::time::Instant;

use crate::domain::{
    BlockHash, BlockHeader, BlockRef, CatchainBlock, CatchainConfig, CatchainError,
    CatchainMember, DeliveredBlock, Height, IncarnationId, KeyHash, PeerId, SourceId,
};
use crate::events::wire::{encode, CatchainMessage, CatchainQuery};
use crate::events::{Action, Event, QueryContext, QueryId};
use crate::receiver::CatchainReceiver;

const SESSION_NONCE: [u8; 32] = [0x5e; 32];

/// One simulated participant and everything its collaborators observed.
pub struct SimNode {
    pub receiver: CatchainReceiver,
    pub keypair: Ed25519KeyPair,
    pub address: PeerId,
    pub store: HashMap<Hash, Vec<u8>>,
    pub delivered: Vec<DeliveredBlock>,
    pub blamed: Vec<SourceId>,
    pub broadcasts: Vec<(KeyHash, Vec<u8>)>,
    pub custom_queries: Vec<(KeyHash, Vec<u8>)>,
    pub started: bool,
    pub fatal: Option<CatchainError>,
    pub online: bool,
    /// Store writes issued, by key.
    pub writes: Vec<Hash>,
    /// Store reads issued since the last (re)start, by key.
    pub reads: Vec<Hash>,
}

impl SimNode {
    pub fn delivered_payloads(&self) -> Vec<Vec<u8>> {
        self.delivered.iter().map(|b| b.payload.clone()).collect()
    }

    pub fn delivered_hashes(&self) -> Vec<BlockHash> {
        self.delivered.iter().map(|b| b.hash).collect()
    }

    pub fn delivered_from(&self, source: SourceId) -> Vec<Height> {
        self.delivered
            .iter()
            .filter(|b| b.source == source)
            .map(|b| b.height)
            .collect()
    }

    /// Position of `hash` in this node's delivery order.
    pub fn delivery_position(&self, hash: &BlockHash) -> Option<usize> {
        self.delivered.iter().position(|b| &b.hash == hash)
    }
}

struct PendingQuery {
    requester: usize,
    responder: PeerId,
    context: QueryContext,
}

/// Cluster of simulated nodes sharing a virtual clock.
pub struct SimCluster {
    nodes: Vec<SimNode>,
    members: Vec<CatchainMember>,
    incarnation: IncarnationId,
    config: CatchainConfig,
    now: Instant,
    queue: VecDeque<(usize, Event)>,
    next_query_id: u64,
    pending_queries: HashMap<(usize, QueryId), PendingQuery>,
    /// Links that drop all traffic, as (from, to).
    cut_links: Vec<(usize, usize)>,
}

impl SimCluster {
    /// `size` nodes with keys derived from fixed seeds.
    pub fn new(size: usize, config: CatchainConfig) -> Self {
        let mut keypairs: Vec<Ed25519KeyPair> = (0..size)
            .map(|i| Ed25519KeyPair::from_seed([i as u8 + 1; 32]))
            .collect();
        keypairs.sort_by_key(|kp| kp.public_key().key_hash());

        let members: Vec<CatchainMember> = keypairs
            .iter()
            .map(|kp| {
                let public_key = kp.public_key();
                CatchainMember::new(public_key, PeerId::new(*public_key.as_bytes()))
            })
            .collect();
        let key_hashes: Vec<KeyHash> = members.iter().map(|m| m.key_hash()).collect();
        let incarnation = IncarnationId::derive(&key_hashes, &SESSION_NONCE);

        let mut cluster = Self {
            nodes: Vec::with_capacity(size),
            members,
            incarnation,
            config,
            now: Instant::now(),
            queue: VecDeque::new(),
            next_query_id: 0,
            pending_queries: HashMap::new(),
            cut_links: Vec::new(),
        };
        for (i, keypair) in keypairs.into_iter().enumerate() {
            let receiver = cluster.build_receiver(i, &keypair);
            cluster.nodes.push(SimNode {
                receiver,
                address: cluster.members[i].address,
                keypair,
                store: HashMap::new(),
                delivered: Vec::new(),
                blamed: Vec::new(),
                broadcasts: Vec::new(),
                custom_queries: Vec::new(),
                started: false,
                fatal: None,
                online: true,
                writes: Vec::new(),
                reads: Vec::new(),
            });
        }
        cluster
    }

    fn build_receiver(&self, index: usize, keypair: &Ed25519KeyPair) -> CatchainReceiver {
        let mut config = self.config.clone();
        config.rng_seed = Some(self.config.rng_seed.unwrap_or(7) + index as u64);
        CatchainReceiver::new(
            config,
            self.incarnation,
            self.members.clone(),
            keypair.public_key().key_hash(),
        )
        .expect("simulated receiver config")
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, index: usize) -> &SimNode {
        &self.nodes[index]
    }

    pub fn node_mut(&mut self, index: usize) -> &mut SimNode {
        &mut self.nodes[index]
    }

    pub fn nodes(&self) -> &[SimNode] {
        &self.nodes
    }

    pub fn incarnation(&self) -> IncarnationId {
        self.incarnation
    }

    pub fn now(&self) -> Instant {
        self.now
    }

    pub fn boot_all(&mut self) {
        for i in 0..self.nodes.len() {
            self.dispatch(i, Event::Boot);
        }
        self.run_until_idle();
    }

    pub fn boot(&mut self, index: usize) {
        self.dispatch(index, Event::Boot);
        self.run_until_idle();
    }

    pub fn add_block(&mut self, index: usize, payload: Vec<u8>, deps: Vec<BlockHash>) {
        self.dispatch(index, Event::AddBlock { payload, deps });
        self.run_until_idle();
    }

    /// Hash of the last own block `index` committed.
    pub fn tip_hash(&self, index: usize) -> BlockHash {
        let receiver = &self.nodes[index].receiver;
        let source = receiver.local_id();
        receiver
            .source(source)
            .and_then(|s| s.block_at(s.delivered_height()))
            .map(|i| receiver.dag().get(i).hash)
            .unwrap_or_else(|| self.incarnation.root_hash())
    }

    pub fn set_online(&mut self, index: usize, online: bool) {
        self.nodes[index].online = online;
    }

    /// Drop all traffic from `from` to `to`.
    pub fn cut_link(&mut self, from: usize, to: usize) {
        self.cut_links.push((from, to));
    }

    pub fn heal_links(&mut self) {
        self.cut_links.clear();
    }

    /// Rebuild node `index` from its store, as after a crash.
    pub fn restart(&mut self, index: usize) {
        let receiver = {
            let node = &self.nodes[index];
            self.build_receiver(index, &node.keypair)
        };
        let node = &mut self.nodes[index];
        node.receiver = receiver;
        node.delivered.clear();
        node.reads.clear();
        node.blamed.clear();
        node.started = false;
        node.fatal = None;
        node.online = true;
        self.queue.retain(|(i, _)| *i != index);
        self.pending_queries.retain(|(i, _), q| *i != index && q.requester != index);
        self.boot(index);
    }

    /// Restart with an empty store, as after losing the disk.
    pub fn restart_wiped(&mut self, index: usize, config: CatchainConfig) {
        self.nodes[index].store.clear();
        let saved = std::mem::replace(&mut self.config, config);
        self.restart(index);
        self.config = saved;
    }

    /// Advance the virtual clock, firing due timers in deadline order.
    pub fn advance(&mut self, duration: Duration) {
        let target = self.now + duration;
        loop {
            let next = self
                .nodes
                .iter()
                .filter(|n| n.online && n.fatal.is_none())
                .filter_map(|n| n.receiver.next_awake_time())
                .min();
            match next {
                Some(at) if at <= target => {
                    self.now = self.now.max(at);
                    for i in 0..self.nodes.len() {
                        let due = self.nodes[i]
                            .receiver
                            .next_awake_time()
                            .is_some_and(|at| at <= self.now);
                        if due {
                            self.dispatch(i, Event::Tick);
                        }
                    }
                    self.run_until_idle();
                }
                _ => break,
            }
        }
        self.now = target;
    }

    pub fn advance_ms(&mut self, millis: u64) {
        self.advance(Duration::from_millis(millis));
    }

    /// Sign a block as member `index` without going through its receiver.
    pub fn forge_block(
        &self,
        index: usize,
        height: Height,
        prev: BlockHash,
        deps: Vec<BlockRef>,
        payload: &[u8],
    ) -> CatchainBlock {
        let source = index as SourceId;
        let prev = BlockRef {
            source,
            height: height - 1,
            hash: prev,
        };
        let header = BlockHeader::unsigned(self.incarnation, source, height, prev, deps, payload);
        let mut block = CatchainBlock::new(header, payload.to_vec());
        let signature = self.nodes[index].keypair.sign(&block.hash());
        block.header.set_signature(&signature);
        block
    }

    /// Deliver a raw block update to `to` as if sent by `from`.
    pub fn inject_block(&mut self, from: usize, to: usize, block: &CatchainBlock) {
        let data = encode(&CatchainMessage::BlockUpdate(block.clone())).expect("encode block");
        self.inject_message(from, to, data);
    }

    pub fn inject_message(&mut self, from: usize, to: usize, data: Vec<u8>) {
        let from = self.nodes[from].address;
        self.dispatch(to, Event::MessageReceived { from, data });
        self.run_until_idle();
    }

    /// Have `from` query `to` directly; the reply goes back to `from`.
    pub fn inject_query(&mut self, from: usize, to: usize, query: &CatchainQuery) {
        let data = encode(query).expect("encode query");
        let context = match query {
            CatchainQuery::GetBlock { hash } => QueryContext::GetBlock { hash: *hash },
            CatchainQuery::GetDifference { .. } => QueryContext::GetDifference,
        };
        self.route_query(from, to, data, context);
        self.run_until_idle();
    }

    pub fn run_until_idle(&mut self) {
        while let Some((index, event)) = self.queue.pop_front() {
            self.process(index, event);
        }
    }

    fn dispatch(&mut self, index: usize, event: Event) {
        self.queue.push_back((index, event));
    }

    fn process(&mut self, index: usize, event: Event) {
        let node = &mut self.nodes[index];
        if !node.online || node.fatal.is_some() {
            return;
        }
        match node.receiver.handle(event, self.now) {
            Ok(actions) => {
                for action in actions {
                    self.execute(index, action);
                }
            }
            Err(error) => node.fatal = Some(error),
        }
    }

    fn index_of(&self, address: &PeerId) -> Option<usize> {
        self.nodes.iter().position(|n| &n.address == address)
    }

    fn reachable(&self, from: usize, to: usize) -> bool {
        self.nodes[to].online && !self.cut_links.contains(&(from, to))
    }

    fn route_query(&mut self, from: usize, to: usize, data: Vec<u8>, context: QueryContext) {
        let responder = self.nodes[to].address;
        if !self.reachable(from, to) {
            self.dispatch(
                from,
                Event::QueryCompleted {
                    peer: responder,
                    context,
                    result: Err("unreachable".into()),
                },
            );
            return;
        }
        self.next_query_id += 1;
        let query_id = QueryId(self.next_query_id);
        self.pending_queries.insert(
            (to, query_id),
            PendingQuery {
                requester: from,
                responder,
                context,
            },
        );
        let address = self.nodes[from].address;
        self.dispatch(
            to,
            Event::QueryReceived {
                from: address,
                data,
                query_id,
            },
        );
    }

    fn complete_query(&mut self, responder: usize, query_id: QueryId, result: Result<Vec<u8>, String>) {
        if let Some(pending) = self.pending_queries.remove(&(responder, query_id)) {
            self.dispatch(
                pending.requester,
                Event::QueryCompleted {
                    peer: pending.responder,
                    context: pending.context,
                    result,
                },
            );
        }
    }

    fn send(&mut self, from: usize, to: &PeerId, data: Vec<u8>) {
        let Some(to) = self.index_of(to) else {
            return;
        };
        if self.reachable(from, to) {
            let address = self.nodes[from].address;
            self.dispatch(to, Event::MessageReceived { from: address, data });
        }
    }

    fn execute(&mut self, index: usize, action: Action) {
        match action {
            Action::SendMessage { to, data } => self.send(index, &to, data),
            Action::Multicast { to, data } => {
                for peer in to {
                    self.send(index, &peer, data.clone());
                }
            }
            Action::SendQuery {
                to, data, context, ..
            } => {
                if let Some(to) = self.index_of(&to) {
                    self.route_query(index, to, data, context);
                }
            }
            Action::Reply { query_id, result } => self.complete_query(index, query_id, result),
            Action::Sign { hash, .. } => {
                let signature = self.nodes[index].keypair.sign(&hash);
                self.dispatch(
                    index,
                    Event::SignatureReady {
                        hash,
                        result: Ok(signature),
                    },
                );
            }
            Action::StoreWrite {
                key,
                value,
                purpose,
            } => {
                let node = &mut self.nodes[index];
                node.store.insert(key, value);
                node.writes.push(key);
                self.dispatch(
                    index,
                    Event::StoreWritten {
                        key,
                        purpose,
                        result: Ok(()),
                    },
                );
            }
            Action::StoreRead { key } => {
                self.nodes[index].reads.push(key);
                let value = self.nodes[index].store.get(&key).cloned();
                self.dispatch(index, Event::StoreLoaded { key, result: Ok(value) });
            }
            Action::Deliver(block) => self.nodes[index].delivered.push(block),
            Action::NotifyStarted => self.nodes[index].started = true,
            Action::NotifyBlame { source } => {
                self.nodes[index].blamed.push(source);
                self.dispatch(index, Event::BlameProcessed { source });
            }
            Action::NotifyBroadcast { source, data } => {
                self.nodes[index].broadcasts.push((source, data));
            }
            Action::CustomQuery {
                source,
                data,
                query_id,
            } => {
                self.nodes[index].custom_queries.push((source, data));
                self.complete_query(index, query_id, Err("unsupported query".into()));
            }
        }
    }
}
