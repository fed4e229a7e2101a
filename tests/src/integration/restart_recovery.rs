//! Crash recovery from the local store, and unsafe self-resync after
//! losing it.

#[cfg(test)]
mod tests {
    use qc_18_catchain::domain::{BlockRef, ROOT_POINTER_KEY};
    use qc_18_catchain::CatchainConfig;

    use crate::integration::{assert_causal_order, booted_cluster, sim_config};

    fn unsafe_config() -> CatchainConfig {
        CatchainConfig {
            allow_unsafe_self_blocks_resync: true,
            unsafe_initial_sync_ms: 3_000,
            unsafe_recheck_ms: 1_000,
            unsafe_root_retry_ms: 500,
            ..sim_config()
        }
    }

    #[test]
    fn test_restart_reloads_exactly_the_stored_closure() {
        let mut cluster = booted_cluster(3, sim_config());
        cluster.set_online(1, false);
        cluster.set_online(2, false);
        for i in 0..10u8 {
            cluster.add_block(0, vec![i], vec![]);
        }
        let tip = cluster.tip_hash(0);

        cluster.restart(0);

        let node = cluster.node(0);
        assert!(node.receiver.is_booted());
        assert_eq!(node.reads.len(), 11);
        assert_eq!(node.reads[0], ROOT_POINTER_KEY);
        assert_eq!(node.delivered_from(0), (1..=10).collect::<Vec<u64>>());
        assert_eq!(node.receiver.local_tip_height(), 10);
        assert_eq!(cluster.tip_hash(0), tip);
        assert_causal_order(&cluster, 0);

        cluster.add_block(0, b"after restart".to_vec(), vec![]);
        let node = cluster.node(0);
        assert_eq!(node.receiver.local_tip_height(), 11);
        assert_eq!(node.delivered.last().map(|b| b.height), Some(11));
    }

    #[test]
    fn test_restart_replays_remote_dependencies() {
        let mut cluster = booted_cluster(3, sim_config());
        cluster.add_block(1, b"remote".to_vec(), vec![]);
        let remote = cluster.tip_hash(1);
        cluster.add_block(0, b"local".to_vec(), vec![remote]);

        cluster.restart(0);

        let node = cluster.node(0);
        assert!(node.reads.contains(&remote));
        assert_eq!(node.delivered_from(1), vec![1]);
        assert_eq!(node.delivered_from(0), vec![1]);
        assert_causal_order(&cluster, 0);
    }

    #[test]
    fn test_blocks_received_after_restart_continue_the_dag() {
        let mut cluster = booted_cluster(3, sim_config());
        cluster.add_block(0, b"a".to_vec(), vec![]);
        cluster.add_block(1, b"b".to_vec(), vec![]);
        cluster.restart(2);

        cluster.add_block(1, b"c".to_vec(), vec![]);
        cluster.advance_ms(1_000);

        let node = cluster.node(2);
        assert_eq!(node.delivered_from(1), vec![1, 2]);
        assert_eq!(node.delivered_from(0), vec![1]);
        assert!(node.fatal.is_none());
    }

    #[test]
    fn test_unsafe_resync_recovers_own_chain_from_peers() {
        let mut cluster = booted_cluster(3, sim_config());
        for i in 0..3u8 {
            cluster.add_block(0, vec![i], vec![]);
        }
        assert_eq!(cluster.node(1).delivered_from(0), vec![1, 2, 3]);

        cluster.restart_wiped(0, unsafe_config());
        assert_eq!(cluster.node(0).receiver.local_tip_height(), 0);

        // Blocks queued before start wait for the recovered tip.
        cluster.add_block(0, b"next".to_vec(), vec![]);
        assert!(cluster.node(0).delivered_from(0).is_empty());

        cluster.advance_ms(20_000);

        let node = cluster.node(0);
        assert!(node.fatal.is_none(), "{:?}", node.fatal);
        assert!(node.started);
        assert!(node.blamed.is_empty());
        assert_eq!(node.receiver.local_tip_height(), 4);
        assert_eq!(node.delivered_from(0), vec![1, 2, 3, 4]);
        assert!(node.store.contains_key(&ROOT_POINTER_KEY));

        for peer in 1..3 {
            assert_eq!(cluster.node(peer).delivered_from(0), vec![1, 2, 3, 4]);
            assert!(cluster.node(peer).blamed.is_empty());
        }
    }

    #[test]
    fn test_wiped_node_in_safe_mode_fails_on_own_block() {
        let mut cluster = booted_cluster(2, sim_config());
        cluster.add_block(0, b"mine".to_vec(), vec![]);

        cluster.restart_wiped(0, sim_config());
        cluster.advance_ms(2_000);

        assert!(matches!(
            cluster.node(0).fatal,
            Some(qc_18_catchain::CatchainError::Fatal(
                qc_18_catchain::FatalError::UnexpectedSelfBlock(1)
            ))
        ));
    }

    #[test]
    fn test_forged_reference_to_own_chain_does_not_hold_back_start() {
        let mut cluster = booted_cluster(3, unsafe_config());
        let root = cluster.incarnation().root_hash();
        let phantom = BlockRef {
            source: 0,
            height: 50,
            hash: [0x77; 32],
        };
        let forged = cluster.forge_block(1, 1, root, vec![phantom], b"forged");

        cluster.inject_block(1, 0, &forged);
        cluster.advance_ms(10_000);

        let node = cluster.node(0);
        assert!(node.fatal.is_none());
        assert!(node.started);
        assert_eq!(node.receiver.source(0).unwrap().received_height(), 0);
        assert!(node.delivery_position(&forged.hash()).is_none());
    }
}
