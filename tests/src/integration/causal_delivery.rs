//! Causal delivery across sources.
//!
//! A block is handed to the consumer only after its whole closure, and
//! every node delivers each block exactly once.

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use crate::integration::{assert_causal_order, booted_cluster, frontier, sim_config};

    #[test]
    fn test_out_of_order_arrival_is_delivered_in_causal_order() {
        let mut cluster = booted_cluster(4, sim_config());
        // Sources 0 and 1 are forged by hand; keep their own receivers out.
        cluster.set_online(0, false);
        cluster.set_online(1, false);

        let root = cluster.incarnation().root_hash();
        let a1 = cluster.forge_block(0, 1, root, vec![], b"a1");
        let a2 = cluster.forge_block(0, 2, a1.hash(), vec![], b"a2");
        let b1 = cluster.forge_block(1, 1, root, vec![a2.header.block_ref(a2.hash())], b"b1");

        cluster.inject_block(1, 3, &b1);
        cluster.inject_block(0, 3, &a2);
        assert!(cluster.node(3).delivered.is_empty());

        cluster.inject_block(0, 3, &a1);
        let node = cluster.node(3);
        assert_eq!(
            node.delivered_hashes(),
            vec![a1.hash(), a2.hash(), b1.hash()]
        );
        assert_causal_order(&cluster, 3);
    }

    #[test]
    fn test_relayed_blocks_keep_causal_order() {
        let mut cluster = booted_cluster(3, sim_config());
        cluster.add_block(0, b"base".to_vec(), vec![]);
        let base = cluster.tip_hash(0);
        cluster.add_block(1, b"reply".to_vec(), vec![base]);
        let reply = cluster.tip_hash(1);
        cluster.add_block(2, b"ack".to_vec(), vec![reply]);

        for i in 0..cluster.len() {
            assert_eq!(cluster.node(i).delivered.len(), 3, "node {i}");
            assert_causal_order(&cluster, i);
        }
    }

    #[test]
    fn test_random_workload_delivers_everything_causally() {
        const BLOCKS: usize = 40;

        let mut cluster = booted_cluster(4, sim_config());
        let mut rng = StdRng::seed_from_u64(0xca7c);
        for round in 0..BLOCKS {
            let node = rng.gen_range(0..cluster.len());
            let max = rng.gen_range(0..=3);
            let deps = frontier(&cluster, node, max);
            cluster.add_block(node, format!("block-{round}").into_bytes(), deps);
            if rng.gen_bool(0.3) {
                cluster.advance_ms(150);
            }
        }
        cluster.advance_ms(3_000);

        for i in 0..cluster.len() {
            let node = cluster.node(i);
            assert!(node.fatal.is_none(), "node {i}: {:?}", node.fatal);
            assert_eq!(node.delivered.len(), BLOCKS, "node {i}");
            assert_causal_order(&cluster, i);
        }
    }
}
