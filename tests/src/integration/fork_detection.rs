//! Equivocation: detection, blame and spreading the evidence.

#[cfg(test)]
mod tests {
    use qc_18_catchain::test_utils::SimCluster;
    use qc_18_catchain::{CatchainBlock, ForkProof};

    use crate::integration::{booted_cluster, sim_config};

    const FORGER: usize = 1;

    /// Chain of the forger up to height 2, plus two different height-3 blocks.
    fn forked_chain(cluster: &SimCluster) -> (Vec<CatchainBlock>, CatchainBlock, CatchainBlock) {
        let root = cluster.incarnation().root_hash();
        let h1 = cluster.forge_block(FORGER, 1, root, vec![], b"h1");
        let h2 = cluster.forge_block(FORGER, 2, h1.hash(), vec![], b"h2");
        let left = cluster.forge_block(FORGER, 3, h2.hash(), vec![], b"left");
        let right = cluster.forge_block(FORGER, 3, h2.hash(), vec![], b"right");
        (vec![h1, h2], left, right)
    }

    fn sorted_pair(proof: &ForkProof) -> [[u8; 32]; 2] {
        let (a, b) = proof.hashes();
        let mut pair = [a, b];
        pair.sort();
        pair
    }

    #[test]
    fn test_conflicting_heights_blame_the_forger() {
        let mut cluster = booted_cluster(4, sim_config());
        cluster.set_online(FORGER, false);
        // Keep node 3 out of the gossip so it has to learn about the fork later.
        cluster.cut_link(0, 3);
        cluster.cut_link(2, 3);

        let (chain, left, right) = forked_chain(&cluster);
        for block in &chain {
            cluster.inject_block(FORGER, 0, block);
        }
        cluster.inject_block(FORGER, 0, &left);
        cluster.inject_block(FORGER, 2, &right);

        let mut expected = [left.hash(), right.hash()];
        expected.sort();
        for i in [0, 2] {
            let node = cluster.node(i);
            assert_eq!(node.blamed, vec![FORGER as u32], "node {i}");
            let proof = node.receiver.fork_proof(FORGER as u32).expect("fork proof");
            assert_eq!(proof.height(), 3);
            assert_eq!(sorted_pair(proof), expected);
            assert!(!node.receiver.neighbours().contains(&(FORGER as u32)));
            assert_eq!(node.receiver.height_vector()[FORGER], None);
        }
        assert!(cluster.node(3).blamed.is_empty());
    }

    #[test]
    fn test_blamed_source_cannot_extend_its_chain() {
        let mut cluster = booted_cluster(3, sim_config());
        cluster.set_online(FORGER, false);

        let (chain, left, right) = forked_chain(&cluster);
        for block in chain.iter().chain([&left, &right]) {
            cluster.inject_block(FORGER, 0, block);
        }
        assert_eq!(cluster.node(0).blamed, vec![FORGER as u32]);

        let h4 = cluster.forge_block(FORGER, 4, left.hash(), vec![], b"h4");
        cluster.inject_block(FORGER, 0, &h4);
        assert!(cluster.node(0).receiver.block(&h4.hash()).is_none());
        assert!(!cluster.node(0).delivered_hashes().contains(&h4.hash()));
        assert!(cluster.node(0).fatal.is_none());
    }

    #[test]
    fn test_fork_proof_reaches_isolated_node_through_sync() {
        let mut cluster = booted_cluster(4, sim_config());
        cluster.set_online(FORGER, false);
        cluster.cut_link(0, 3);
        cluster.cut_link(2, 3);

        let (chain, left, right) = forked_chain(&cluster);
        for block in &chain {
            cluster.inject_block(FORGER, 0, block);
        }
        cluster.inject_block(FORGER, 0, &left);
        cluster.inject_block(FORGER, 2, &right);
        assert!(cluster.node(3).blamed.is_empty());

        cluster.heal_links();
        cluster.advance_ms(2_000);

        let node = cluster.node(3);
        assert_eq!(node.blamed, vec![FORGER as u32]);
        assert!(node.receiver.source(FORGER as u32).unwrap().is_blamed());
        for i in [0, 2, 3] {
            assert!(cluster.node(i).fatal.is_none(), "node {i}");
        }
    }

    #[test]
    fn test_blaming_node_publishes_the_proof_as_a_block() {
        let mut cluster = booted_cluster(3, sim_config());
        cluster.set_online(FORGER, false);

        let (chain, left, right) = forked_chain(&cluster);
        for block in chain.iter().chain([&left, &right]) {
            cluster.inject_block(FORGER, 0, block);
        }

        let proof = cluster
            .node(0)
            .receiver
            .fork_proof(FORGER as u32)
            .cloned()
            .expect("fork proof");
        let published = cluster.node(0).delivered_from(0);
        assert_eq!(published, vec![1]);

        // Node 2 gets the proof block by gossip and delivers it as well.
        let on_peer: Vec<_> = cluster
            .node(2)
            .delivered
            .iter()
            .filter(|b| b.source == 0)
            .map(|b| b.payload.clone())
            .collect();
        assert_eq!(on_peer.len(), 1);
        let decoded: ForkProof =
            qc_18_catchain::events::wire::decode(&on_peer[0], u64::MAX).expect("proof payload");
        assert_eq!(decoded, proof);
    }
}
