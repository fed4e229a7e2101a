//! # Block Arena
//!
//! Content-addressed, append-only DAG of blocks.
//!
//! Records live in a `Vec` and are addressed by [`BlockIndex`]; records are
//! never removed, so an index stays valid for the lifetime of the DAG. A
//! block referenced before its header is known exists as a *stub*
//! (`initialized == false`) and is filled in place once the header arrives.
//!
//! ## Delivery
//!
//! Each initialized record counts its undelivered predecessors (`prev` plus
//! `deps`). When the count reaches zero and the record is written, it is
//! pushed onto a FIFO run queue. [`BlockDag::run`] drains that queue
//! iteratively, so deep or wide DAGs never grow the call stack.
//!
//! ## Reference positions
//!
//! The hash of a block binds its own `(source, height)` but not the
//! position a referencing block claims for it. When a stub is filled, every
//! dependant whose reference disagrees with the real header is marked
//! invalid and is never delivered.

use std::collections::{HashMap, HashSet, VecDeque};

use super::entities::{
    BlockHash, BlockHeader, BlockRef, CatchainBlock, DeliveredBlock, Height, SourceId,
};

/// Arena position of a block record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockIndex(usize);

impl BlockIndex {
    pub const ROOT: BlockIndex = BlockIndex(0);
}

/// One DAG node: a stub, an initialized block, or the root.
#[derive(Debug)]
pub struct BlockRecord {
    pub hash: BlockHash,
    /// `None` only for the root.
    pub source: Option<SourceId>,
    pub height: Height,
    pub block: Option<CatchainBlock>,
    pub prev: Option<BlockIndex>,
    pub deps: Vec<BlockIndex>,
    pub initialized: bool,
    pub written: bool,
    pub delivered: bool,
    /// References a block at a position its header contradicts.
    pub invalid: bool,
    pending_deps: usize,
    dependants: Vec<BlockIndex>,
    queued: bool,
}

impl BlockRecord {
    fn stub(block_ref: &BlockRef) -> Self {
        Self {
            hash: block_ref.hash,
            source: Some(block_ref.source),
            height: block_ref.height,
            block: None,
            prev: None,
            deps: Vec::new(),
            initialized: false,
            written: false,
            delivered: false,
            invalid: false,
            pending_deps: 0,
            dependants: Vec::new(),
            queued: false,
        }
    }

    fn root(hash: BlockHash) -> Self {
        Self {
            hash,
            source: None,
            height: 0,
            block: None,
            prev: None,
            deps: Vec::new(),
            initialized: true,
            written: true,
            delivered: true,
            invalid: false,
            pending_deps: 0,
            dependants: Vec::new(),
            queued: false,
        }
    }

    pub fn is_root(&self) -> bool {
        self.source.is_none()
    }

    fn is_ready(&self) -> bool {
        self.initialized
            && self.written
            && !self.delivered
            && !self.invalid
            && self.pending_deps == 0
    }

    pub fn block_ref(&self) -> Option<BlockRef> {
        self.source.map(|source| BlockRef {
            source,
            height: self.height,
            hash: self.hash,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// The block was already initialized; nothing changed.
    AlreadyInitialized,
    /// A stub created earlier was filled in place.
    InitializedStub,
    /// A new record was appended.
    Inserted,
}

#[derive(Debug, Clone)]
pub struct Insertion {
    pub index: BlockIndex,
    pub outcome: InsertOutcome,
    /// Dependants of the filled stub that claimed a different position.
    pub invalidated: Vec<BlockIndex>,
}

/// The block DAG of one catchain instance.
#[derive(Debug)]
pub struct BlockDag {
    records: Vec<BlockRecord>,
    by_hash: HashMap<BlockHash, BlockIndex>,
    run_queue: VecDeque<BlockIndex>,
}

impl BlockDag {
    /// New DAG holding only the root record.
    pub fn new(root_hash: BlockHash) -> Self {
        Self {
            records: vec![BlockRecord::root(root_hash)],
            by_hash: HashMap::new(),
            run_queue: VecDeque::new(),
        }
    }

    pub fn get(&self, index: BlockIndex) -> &BlockRecord {
        &self.records[index.0]
    }

    /// Index of a non-root block. The root hash is never looked up here.
    pub fn lookup(&self, hash: &BlockHash) -> Option<BlockIndex> {
        self.by_hash.get(hash).copied()
    }

    pub fn get_by_hash(&self, hash: &BlockHash) -> Option<&BlockRecord> {
        self.lookup(hash).map(|index| self.get(index))
    }

    pub fn is_initialized(&self, hash: &BlockHash) -> bool {
        self.get_by_hash(hash).map_or(false, |r| r.initialized)
    }

    /// Number of non-root records, stubs included.
    pub fn len(&self) -> usize {
        self.records.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn initialized_count(&self) -> usize {
        self.records[1..].iter().filter(|r| r.initialized).count()
    }

    /// First reference in `header` that contradicts an initialized block.
    pub fn contradicted_ref(&self, header: &BlockHeader) -> Option<BlockRef> {
        std::iter::once(&header.prev)
            .chain(header.deps.iter())
            .filter(|r| r.height > 0)
            .find(|r| {
                self.get_by_hash(&r.hash).is_some_and(|record| {
                    record.initialized
                        && (record.source != Some(r.source) || record.height != r.height)
                })
            })
            .copied()
    }

    /// Resolve a reference, creating a stub if the hash is unknown.
    /// Height 0 always resolves to the root.
    fn resolve(&mut self, block_ref: &BlockRef) -> BlockIndex {
        if block_ref.height == 0 {
            return BlockIndex::ROOT;
        }
        if let Some(index) = self.lookup(&block_ref.hash) {
            return index;
        }
        let index = BlockIndex(self.records.len());
        self.records.push(BlockRecord::stub(block_ref));
        self.by_hash.insert(block_ref.hash, index);
        index
    }

    /// Idempotent insert keyed by `hash`.
    ///
    /// `hash` must be the computed hash of `block.header`. A stub takes
    /// source and height from the header; dependants that referenced it at
    /// another position are marked invalid and returned.
    pub fn create_or_get(&mut self, block: CatchainBlock, hash: BlockHash) -> Insertion {
        let existing = self.lookup(&hash);
        if let Some(index) = existing {
            if self.records[index.0].initialized {
                return Insertion {
                    index,
                    outcome: InsertOutcome::AlreadyInitialized,
                    invalidated: Vec::new(),
                };
            }
        }
        let invalidated = existing
            .map(|index| self.invalidate_misreferences(index, &block.header))
            .unwrap_or_default();

        let prev = self.resolve(&block.header.prev);
        let deps: Vec<BlockIndex> = block.header.deps.iter().map(|d| self.resolve(d)).collect();

        let (index, outcome) = match existing {
            Some(index) => (index, InsertOutcome::InitializedStub),
            None => {
                let index = BlockIndex(self.records.len());
                self.records.push(BlockRecord::stub(&block.header.block_ref(hash)));
                self.by_hash.insert(hash, index);
                (index, InsertOutcome::Inserted)
            }
        };

        let mut pending = 0;
        for &pred in std::iter::once(&prev).chain(deps.iter()) {
            if !self.records[pred.0].delivered {
                pending += 1;
                self.records[pred.0].dependants.push(index);
            }
        }

        let record = &mut self.records[index.0];
        record.source = Some(block.header.source);
        record.height = block.header.height;
        record.prev = Some(prev);
        record.deps = deps;
        record.pending_deps = pending;
        record.block = Some(block);
        record.initialized = true;
        self.schedule(index);

        Insertion {
            index,
            outcome,
            invalidated,
        }
    }

    /// Mark dependants of stub `index` whose reference to it disagrees with
    /// `header`.
    fn invalidate_misreferences(
        &mut self,
        index: BlockIndex,
        header: &BlockHeader,
    ) -> Vec<BlockIndex> {
        let hash = self.records[index.0].hash;
        let mut invalidated = Vec::new();
        for &dependant in &self.records[index.0].dependants {
            let record = &self.records[dependant.0];
            let Some(block) = record.block.as_ref() else {
                continue;
            };
            let misreferenced = std::iter::once(&block.header.prev)
                .chain(block.header.deps.iter())
                .any(|r| {
                    r.hash == hash && (r.source != header.source || r.height != header.height)
                });
            if misreferenced && !record.invalid {
                invalidated.push(dependant);
            }
        }
        for &dependant in &invalidated {
            self.records[dependant.0].invalid = true;
        }
        invalidated
    }

    /// Mark a block durably stored.
    pub fn mark_written(&mut self, index: BlockIndex) {
        self.records[index.0].written = true;
        self.schedule(index);
    }

    fn schedule(&mut self, index: BlockIndex) {
        let record = &mut self.records[index.0];
        if record.is_ready() && !record.queued {
            record.queued = true;
            self.run_queue.push_back(index);
        }
    }

    /// Drain the run queue, returning newly delivered blocks in order.
    pub fn run(&mut self) -> Vec<BlockIndex> {
        let mut delivered = Vec::new();
        while let Some(index) = self.run_queue.pop_front() {
            self.records[index.0].queued = false;
            if !self.records[index.0].is_ready() {
                continue;
            }
            self.records[index.0].delivered = true;
            delivered.push(index);

            let dependants = std::mem::take(&mut self.records[index.0].dependants);
            for dependant in dependants {
                let record = &mut self.records[dependant.0];
                record.pending_deps = record.pending_deps.saturating_sub(1);
                self.schedule(dependant);
            }
        }
        delivered
    }

    /// Consumer view of a delivered block.
    pub fn delivered_view(&self, index: BlockIndex) -> Option<DeliveredBlock> {
        let record = self.get(index);
        let block = record.block.as_ref()?;
        let prev_hash = self.get(record.prev?).hash;
        Some(DeliveredBlock {
            source: record.source?,
            height: record.height,
            hash: record.hash,
            prev_hash,
            dep_hashes: record.deps.iter().map(|d| self.get(*d).hash).collect(),
            payload: block.payload.clone(),
        })
    }

    /// Hashes of missing blocks blocking delivery of `start`.
    ///
    /// Breadth-first over undelivered predecessors; initialized ones are
    /// traversed, stubs are collected. Stops after `limit` hashes.
    pub fn missing_dependencies(&self, start: BlockIndex, limit: usize) -> Vec<BlockHash> {
        let mut missing = Vec::new();
        if limit == 0 {
            return missing;
        }
        let start_record = self.get(start);
        if start_record.delivered {
            return missing;
        }
        if !start_record.initialized {
            missing.push(start_record.hash);
            return missing;
        }

        let mut visited = HashSet::from([start]);
        let mut queue = VecDeque::from([start]);
        while let Some(index) = queue.pop_front() {
            let record = self.get(index);
            for &pred in record.prev.iter().chain(record.deps.iter()) {
                if !visited.insert(pred) {
                    continue;
                }
                let pred_record = self.get(pred);
                if pred_record.delivered {
                    continue;
                }
                if pred_record.initialized {
                    queue.push_back(pred);
                } else {
                    missing.push(pred_record.hash);
                    if missing.len() >= limit {
                        return missing;
                    }
                }
            }
        }
        missing
    }
}
