//! Multi-node integration scenarios.
//!
//! Deterministic scenarios run on `SimCluster` (virtual clock, synchronous
//! routing). `service_loopback` runs real actors on a tokio runtime.

pub mod causal_delivery;
pub mod convergence;
pub mod fork_detection;
pub mod restart_recovery;
pub mod service_loopback;
pub mod sync_quota;

use qc_18_catchain::test_utils::SimCluster;
use qc_18_catchain::{BlockHash, CatchainConfig, SourceId};

// ===== SHARED FIXTURES =====

pub(crate) fn sim_config() -> CatchainConfig {
    CatchainConfig {
        rng_seed: Some(3),
        ..CatchainConfig::default()
    }
}

pub(crate) fn booted_cluster(size: usize, config: CatchainConfig) -> SimCluster {
    let mut cluster = SimCluster::new(size, config);
    cluster.boot_all();
    cluster
}

/// Latest delivered block of every other source, as seen by `node`.
pub(crate) fn frontier(cluster: &SimCluster, node: usize, max: usize) -> Vec<BlockHash> {
    let receiver = &cluster.node(node).receiver;
    (0..receiver.source_count() as SourceId)
        .filter(|s| *s != receiver.local_id())
        .filter_map(|s| {
            let source = receiver.source(s)?;
            if source.is_blamed() {
                return None;
            }
            source.block_at(source.delivered_height())
        })
        .map(|index| receiver.dag().get(index).hash)
        .take(max)
        .collect()
}

/// Every delivered block appears after its predecessors, exactly once.
pub(crate) fn assert_causal_order(cluster: &SimCluster, node: usize) {
    let sim = cluster.node(node);
    let root = cluster.incarnation().root_hash();
    let mut seen = std::collections::HashSet::from([root]);
    for block in &sim.delivered {
        assert!(
            seen.contains(&block.prev_hash),
            "node {node}: block {}:{} delivered before its prev",
            block.source,
            block.height
        );
        for dep in &block.dep_hashes {
            assert!(seen.contains(dep), "node {node}: dependency delivered late");
        }
        assert!(seen.insert(block.hash), "node {node}: block delivered twice");
    }
}
