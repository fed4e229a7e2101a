//! # Catchain Benchmarks
//!
//! | Area | Operation | Expectation |
//! |------|-----------|-------------|
//! | DAG | Deliver a chain that arrived newest first | Linear in chain length |
//! | Sync | Send quota over many lagging sources | Logarithmic in max gap |
//! | Blocks | Header hash | Independent of payload size |
//! | Simulator | Gossip round across a cluster | Bounded by fan-out |

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::Rng;
use std::time::Duration;

use qc_18_catchain::domain::{compute_send_quota, BlockDag, BlockHeader, BlockRef};
use qc_18_catchain::test_utils::SimCluster;
use qc_18_catchain::{BlockHash, CatchainBlock, CatchainConfig, IncarnationId};

const INCARNATION: IncarnationId = IncarnationId([0x42; 32]);

/// Chain of `length` blocks of source 0, oldest first.
fn chain(length: u64) -> Vec<(CatchainBlock, BlockHash)> {
    let mut blocks = Vec::with_capacity(length as usize);
    let mut prev = BlockRef::root(0, &INCARNATION);
    for height in 1..=length {
        let payload = height.to_le_bytes();
        let header = BlockHeader::unsigned(INCARNATION, 0, height, prev, vec![], &payload);
        let hash = header.compute_hash();
        prev = header.block_ref(hash);
        blocks.push((CatchainBlock::new(header, payload.to_vec()), hash));
    }
    blocks
}

// ============================================================================
// DAG delivery
// ============================================================================

fn bench_dag_delivery(c: &mut Criterion) {
    let mut group = c.benchmark_group("dag-delivery");

    for length in [100u64, 1_000, 10_000] {
        let blocks = chain(length);
        group.throughput(Throughput::Elements(length));
        group.bench_with_input(
            BenchmarkId::new("reverse_arrival", length),
            &blocks,
            |b, blocks| {
                b.iter(|| {
                    let mut dag = BlockDag::new(INCARNATION.root_hash());
                    let mut delivered = 0usize;
                    for (block, hash) in blocks.iter().rev() {
                        let insertion = dag.create_or_get(block.clone(), *hash);
                        dag.mark_written(insertion.index);
                        delivered += dag.run().len();
                    }
                    black_box(delivered)
                })
            },
        );
    }

    group.finish();
}

// ============================================================================
// Sync quota
// ============================================================================

fn bench_send_quota(c: &mut Criterion) {
    let mut group = c.benchmark_group("sync-quota");
    let mut rng = rand::thread_rng();

    for sources in [10usize, 100, 1_000] {
        let gaps: Vec<u64> = (0..sources).map(|_| rng.gen_range(0..10_000)).collect();
        group.bench_with_input(BenchmarkId::new("compute", sources), &gaps, |b, gaps| {
            b.iter(|| black_box(compute_send_quota(gaps, 100)))
        });
    }

    group.finish();
}

// ============================================================================
// Block hashing
// ============================================================================

fn bench_block_hash(c: &mut Criterion) {
    let mut group = c.benchmark_group("block-hash");
    let deps: Vec<BlockRef> = (1..5)
        .map(|source| BlockRef {
            source,
            height: 7,
            hash: [source as u8; 32],
        })
        .collect();

    for size in [64usize, 4_096, 65_536] {
        let payload = vec![0xab; size];
        let header = BlockHeader::unsigned(
            INCARNATION,
            0,
            8,
            BlockRef::root(0, &INCARNATION),
            deps.clone(),
            &payload,
        );
        group.bench_with_input(BenchmarkId::new("compute_hash", size), &header, |b, header| {
            b.iter(|| black_box(header.compute_hash()))
        });
    }

    group.finish();
}

// ============================================================================
// Simulated gossip
// ============================================================================

fn bench_cluster_round(c: &mut Criterion) {
    let mut group = c.benchmark_group("sim-cluster");
    group.measurement_time(Duration::from_secs(10));
    group.sample_size(20);

    for size in [4usize, 16] {
        group.bench_function(BenchmarkId::new("block_to_all", size), |b| {
            b.iter_with_setup(
                || {
                    let config = CatchainConfig {
                        rng_seed: Some(1),
                        ..CatchainConfig::default()
                    };
                    let mut cluster = SimCluster::new(size, config);
                    cluster.boot_all();
                    cluster
                },
                |mut cluster| {
                    cluster.add_block(0, b"bench".to_vec(), vec![]);
                    black_box(cluster.node(size - 1).delivered.len())
                },
            )
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_dag_delivery,
    bench_send_quota,
    bench_block_hash,
    bench_cluster_round
);
criterion_main!(benches);
