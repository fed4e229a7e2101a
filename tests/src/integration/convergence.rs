//! Partitions and healing: every honest node ends with the same DAG.

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use qc_18_catchain::test_utils::SimCluster;
    use qc_18_catchain::BlockHash;

    use crate::integration::{assert_causal_order, booted_cluster, frontier, sim_config};

    fn partition(cluster: &mut SimCluster, left: &[usize], right: &[usize]) {
        for &a in left {
            for &b in right {
                cluster.cut_link(a, b);
                cluster.cut_link(b, a);
            }
        }
    }

    fn delivered_set(cluster: &SimCluster, node: usize) -> BTreeSet<BlockHash> {
        cluster.node(node).delivered_hashes().into_iter().collect()
    }

    fn assert_converged(cluster: &SimCluster, expected: usize) {
        let reference = delivered_set(cluster, 0);
        assert_eq!(reference.len(), expected);
        for i in 0..cluster.len() {
            let node = cluster.node(i);
            assert!(node.fatal.is_none(), "node {i}: {:?}", node.fatal);
            assert_eq!(delivered_set(cluster, i), reference, "node {i} diverged");
            assert_eq!(node.delivered.len(), expected, "node {i} duplicated");
            assert_causal_order(cluster, i);
        }
    }

    #[test]
    fn test_partitioned_halves_merge_after_healing() {
        let mut cluster = booted_cluster(5, sim_config());
        partition(&mut cluster, &[0, 1], &[2, 3, 4]);

        for round in 0..3u8 {
            for node in 0..cluster.len() {
                let deps = frontier(&cluster, node, 4);
                cluster.add_block(node, vec![node as u8, round], deps);
            }
            cluster.advance_ms(300);
        }
        assert_eq!(cluster.node(0).delivered.len(), 6);
        assert_eq!(cluster.node(4).delivered.len(), 9);

        cluster.heal_links();
        cluster.advance_ms(5_000);
        assert_converged(&cluster, 15);
    }

    #[test]
    fn test_node_offline_during_activity_catches_up() {
        let mut cluster = booted_cluster(5, sim_config());
        cluster.set_online(4, false);

        for round in 0..4u8 {
            for node in 0..4 {
                let deps = frontier(&cluster, node, 2);
                cluster.add_block(node, vec![node as u8, round], deps);
            }
        }
        cluster.set_online(4, true);
        cluster.advance_ms(5_000);
        assert_converged(&cluster, 16);
    }
}
