//! Anti-entropy helpers: response quota and per-peer duplicate filter.

use std::collections::{HashSet, VecDeque};

use super::entities::{BlockHash, Height};

/// Largest per-source cap `x` with `sum(min(gap_i, x)) <= max_send`.
///
/// Returns the largest gap when everything fits.
pub fn compute_send_quota(gaps: &[Height], max_send: usize) -> Height {
    let max_send = max_send as u64;
    let total = |cap: Height| -> u64 {
        gaps.iter()
            .fold(0u64, |acc, gap| acc.saturating_add((*gap).min(cap)))
    };

    let max_gap = gaps.iter().copied().max().unwrap_or(0);
    if total(max_gap) <= max_send {
        return max_gap;
    }

    // total(lo) fits, total(hi) does not.
    let (mut lo, mut hi) = (0, max_gap);
    while hi - lo > 1 {
        let mid = lo + (hi - lo) / 2;
        if total(mid) <= max_send {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    lo
}

/// Bounded set of block hashes a peer is known to have.
///
/// Oldest entries are evicted first once `capacity` is reached.
#[derive(Debug)]
pub struct PeerKnowledge {
    known: HashSet<BlockHash>,
    order: VecDeque<BlockHash>,
    capacity: usize,
}

impl PeerKnowledge {
    pub fn new(capacity: usize) -> Self {
        Self {
            known: HashSet::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn contains(&self, hash: &BlockHash) -> bool {
        self.known.contains(hash)
    }

    /// Record `hash`; returns false if it was already known.
    pub fn insert(&mut self, hash: BlockHash) -> bool {
        if !self.known.insert(hash) {
            return false;
        }
        self.order.push_back(hash);
        if self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.known.remove(&oldest);
            }
        }
        true
    }

    /// Forget everything, e.g. after the peer lost its store.
    pub fn clear(&mut self) {
        self.known.clear();
        self.order.clear();
    }

    pub fn len(&self) -> usize {
        self.known.len()
    }

    pub fn is_empty(&self) -> bool {
        self.known.is_empty()
    }
}
