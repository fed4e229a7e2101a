//! getDifference push bounds.
//!
//! A responder never pushes more than `max_blocks_to_send` blocks per
//! answer, and spreads them over the lagging sources oldest first.

#[cfg(test)]
mod tests {
    use qc_18_catchain::test_utils::SimCluster;
    use qc_18_catchain::{CatchainConfig, CatchainQuery};

    use crate::integration::{booted_cluster, sim_config};

    const LAGGARD: usize = 3;

    /// Nodes 0..=2 produce `per_node` blocks each while the laggard is away.
    fn lagging_cluster(config: CatchainConfig, per_node: u8) -> SimCluster {
        let mut cluster = booted_cluster(4, config);
        cluster.set_online(LAGGARD, false);
        for round in 0..per_node {
            for node in 0..LAGGARD {
                cluster.add_block(node, vec![node as u8, round], vec![]);
            }
        }
        cluster.set_online(LAGGARD, true);
        cluster
    }

    #[test]
    fn test_quota_is_split_across_lagging_sources() {
        let config = CatchainConfig {
            max_blocks_to_send: 4,
            ..sim_config()
        };
        let mut cluster = lagging_cluster(config, 5);
        assert_eq!(
            cluster.node(0).receiver.height_vector(),
            vec![Some(5), Some(5), Some(5), Some(0)]
        );

        // Source 0 is distrusted by the asker, source 1 is partly known.
        cluster.inject_query(
            LAGGARD,
            0,
            &CatchainQuery::GetDifference {
                heights: vec![None, Some(2), Some(0), Some(0)],
            },
        );

        let node = cluster.node(LAGGARD);
        assert_eq!(node.writes.len(), 4);
        assert!(node.delivered_from(0).is_empty());
        assert_eq!(node.delivered_from(2), vec![1, 2]);

        // Source 1 heights 3 and 4 arrived but wait for 1 and 2.
        let source = node.receiver.source(1).unwrap();
        assert!(source.block_at(3).is_some());
        assert!(source.block_at(4).is_some());
        assert!(node.delivered_from(1).is_empty());
        assert_eq!(source.received_height(), 4);
    }

    #[test]
    fn test_single_answer_covers_small_gap() {
        let mut cluster = lagging_cluster(sim_config(), 5);
        let heights = cluster.node(LAGGARD).receiver.height_vector();
        cluster.inject_query(LAGGARD, 0, &CatchainQuery::GetDifference { heights });

        let node = cluster.node(LAGGARD);
        for source in 0..3 {
            assert_eq!(node.delivered_from(source), vec![1, 2, 3, 4, 5]);
        }
        assert_eq!(node.writes.len(), 15);
    }

    #[test]
    fn test_periodic_sync_converges_under_small_quota() {
        let config = CatchainConfig {
            max_blocks_to_send: 2,
            ..sim_config()
        };
        let mut cluster = lagging_cluster(config, 6);
        cluster.advance_ms(5_000);

        let node = cluster.node(LAGGARD);
        for source in 0..3 {
            assert_eq!(node.delivered_from(source), (1..=6).collect::<Vec<u64>>());
        }
    }
}
