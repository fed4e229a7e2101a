//! Real actors on a tokio runtime, wired through the loopback overlay.

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use parking_lot::Mutex;
    use qc_18_catchain::adapters::{InMemoryBlockStore, KeyPairSigner, LoopbackHub};
    use qc_18_catchain::events::wire::{decode, encode};
    use qc_18_catchain::{
        destroy_store_with_retry, BlockStore, CatchainApi, CatchainConfig, CatchainDependencies,
        CatchainError, CatchainHandle, CatchainListener, CatchainMember, CatchainQuery,
        CatchainReceiver, CatchainResponse, CatchainResult, CatchainService, DeliveredBlock,
        FatalError, IncarnationId, KeyHash, PeerId, QueryReply, ServiceError, SourceId,
    };
    use shared_crypto::Ed25519KeyPair;
    use tokio::task::JoinHandle;

    // ===== TEST FIXTURES =====

    #[derive(Default)]
    struct RecordingListener {
        delivered: Mutex<Vec<DeliveredBlock>>,
        broadcasts: Mutex<Vec<(KeyHash, Vec<u8>)>>,
        blamed: Mutex<Vec<SourceId>>,
        started: Mutex<bool>,
    }

    impl RecordingListener {
        fn payloads(&self) -> Vec<Vec<u8>> {
            self.delivered.lock().iter().map(|b| b.payload.clone()).collect()
        }

        fn heights_from(&self, source: SourceId) -> Vec<u64> {
            self.delivered
                .lock()
                .iter()
                .filter(|b| b.source == source)
                .map(|b| b.height)
                .collect()
        }
    }

    impl CatchainListener for RecordingListener {
        fn on_new_block(&self, block: &DeliveredBlock) {
            self.delivered.lock().push(block.clone());
        }

        fn on_broadcast(&self, source: KeyHash, data: Vec<u8>) {
            self.broadcasts.lock().push((source, data));
        }

        fn on_custom_query(&self, _source: KeyHash, data: Vec<u8>, reply: QueryReply) {
            reply.send(Ok(data.into_iter().rev().collect()));
        }

        fn on_started(&self) {
            *self.started.lock() = true;
        }

        fn on_blame(&self, source: SourceId) {
            self.blamed.lock().push(source);
        }
    }

    struct Instance {
        handle: CatchainHandle,
        task: JoinHandle<CatchainResult<()>>,
        listener: Arc<RecordingListener>,
        store: InMemoryBlockStore,
        address: PeerId,
        key_hash: KeyHash,
    }

    struct Session {
        hub: Arc<LoopbackHub>,
        seeds: Vec<[u8; 32]>,
        members: Vec<CatchainMember>,
        incarnation: IncarnationId,
    }

    fn service_config(index: usize) -> CatchainConfig {
        CatchainConfig {
            sync_period_min_ms: 20,
            sync_period_max_ms: 40,
            initial_sync_ms: 100,
            get_difference_timeout_ms: 500,
            get_block_timeout_ms: 500,
            destroy_backoff_ms: 5,
            rng_seed: Some(17 + index as u64),
            ..CatchainConfig::default()
        }
    }

    impl Session {
        fn new(size: usize) -> Self {
            let mut seeds: Vec<[u8; 32]> = (0..size).map(|i| [0x40 + i as u8; 32]).collect();
            seeds.sort_by_key(|seed| Ed25519KeyPair::from_seed(*seed).public_key().key_hash());
            let members: Vec<CatchainMember> = seeds
                .iter()
                .map(|seed| {
                    let public_key = Ed25519KeyPair::from_seed(*seed).public_key();
                    CatchainMember::new(public_key, PeerId::new(*public_key.as_bytes()))
                })
                .collect();
            let key_hashes: Vec<KeyHash> = members.iter().map(|m| m.key_hash()).collect();
            Self {
                hub: LoopbackHub::new(),
                seeds,
                members,
                incarnation: IncarnationId::derive(&key_hashes, &[0x77; 32]),
            }
        }

        fn spawn(&self, index: usize, store: InMemoryBlockStore) -> Instance {
            let member = &self.members[index];
            let receiver = CatchainReceiver::new(
                service_config(index),
                self.incarnation,
                self.members.clone(),
                member.key_hash(),
            )
            .expect("receiver");
            let listener = Arc::new(RecordingListener::default());
            let deps = CatchainDependencies {
                network: Arc::new(self.hub.network(member.address)),
                signer: Arc::new(KeyPairSigner::new([Ed25519KeyPair::from_seed(
                    self.seeds[index],
                )])),
                store: Arc::new(store.clone()),
                listener: Arc::clone(&listener) as Arc<dyn CatchainListener>,
            };
            let (handle, task) = CatchainService::spawn(receiver, deps);
            self.hub.register(member.address, Arc::new(handle.clone()));
            Instance {
                handle,
                task,
                listener,
                store,
                address: member.address,
                key_hash: member.key_hash(),
            }
        }

        fn spawn_all(&self) -> Vec<Instance> {
            (0..self.members.len())
                .map(|i| self.spawn(i, InMemoryBlockStore::new()))
                .collect()
        }
    }

    async fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while !condition() {
            assert!(
                tokio::time::Instant::now() < deadline,
                "timed out waiting for {what}"
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    async fn wait_started(instances: &[Instance]) {
        for instance in instances {
            wait_until("start", || *instance.listener.started.lock()).await;
        }
    }

    // ===== DELIVERY =====

    #[tokio::test]
    async fn test_block_reaches_every_instance() {
        let session = Session::new(3);
        let instances = session.spawn_all();
        wait_started(&instances).await;

        instances[0]
            .handle
            .add_block(b"proposal".to_vec(), vec![])
            .unwrap();
        for instance in &instances {
            wait_until("delivery", || {
                instance.listener.payloads().contains(&b"proposal".to_vec())
            })
            .await;
        }
        assert!(instances[0].store.len() >= 2);
    }

    #[tokio::test]
    async fn test_dependent_blocks_keep_order_across_instances() {
        let session = Session::new(3);
        let instances = session.spawn_all();
        wait_started(&instances).await;

        instances[0].handle.add_block(b"first".to_vec(), vec![]).unwrap();
        wait_until("first at 1", || instances[1].listener.heights_from(0) == vec![1]).await;
        let first = instances[1].listener.delivered.lock()[0].hash;

        instances[1]
            .handle
            .add_block(b"second".to_vec(), vec![first])
            .unwrap();
        wait_until("second at 2", || instances[2].listener.payloads().len() == 2).await;
        assert_eq!(
            instances[2].listener.payloads(),
            vec![b"first".to_vec(), b"second".to_vec()]
        );
    }

    // ===== QUERIES =====

    #[tokio::test]
    async fn test_custom_query_is_answered_by_listener() {
        let session = Session::new(2);
        let instances = session.spawn_all();
        wait_started(&instances).await;

        let answer = instances[0]
            .handle
            .receive_query(instances[1].address, b"ping".to_vec())
            .await
            .unwrap();
        assert_eq!(answer, b"gnip".to_vec());
    }

    #[tokio::test]
    async fn test_get_block_through_handle() {
        let session = Session::new(2);
        let instances = session.spawn_all();
        wait_started(&instances).await;

        instances[0].handle.add_block(b"served".to_vec(), vec![]).unwrap();
        wait_until("local delivery", || instances[0].listener.payloads().len() == 1).await;
        let hash = instances[0].listener.delivered.lock()[0].hash;

        let query = encode(&CatchainQuery::GetBlock { hash }).unwrap();
        let bytes = instances[0]
            .handle
            .receive_query(instances[1].address, query)
            .await
            .unwrap();
        match decode::<CatchainResponse>(&bytes, u64::MAX).unwrap() {
            CatchainResponse::BlockResult(block) => assert_eq!(block.payload, b"served".to_vec()),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_query_from_stranger_is_rejected() {
        let session = Session::new(2);
        let instances = session.spawn_all();
        wait_started(&instances).await;

        let result = instances[0]
            .handle
            .receive_query(PeerId::new([0xee; 32]), b"ping".to_vec())
            .await;
        assert!(matches!(result, Err(ServiceError::QueryRejected(_))));
    }

    #[tokio::test]
    async fn test_broadcast_reaches_listener_with_sender_key() {
        let session = Session::new(2);
        let instances = session.spawn_all();
        wait_started(&instances).await;

        instances[0]
            .handle
            .receive_broadcast(instances[1].address, b"hello".to_vec());
        wait_until("broadcast", || !instances[0].listener.broadcasts.lock().is_empty()).await;
        assert_eq!(
            instances[0].listener.broadcasts.lock()[0],
            (instances[1].key_hash, b"hello".to_vec())
        );
    }

    // ===== LIFECYCLE =====

    #[tokio::test]
    async fn test_overlay_group_lives_as_long_as_instance() {
        let session = Session::new(2);
        let instances = session.spawn_all();
        wait_started(&instances).await;
        assert!(session
            .hub
            .groups_of(&instances[0].address)
            .contains(&session.incarnation.0));

        let Instance { handle, task, address, .. } = instances.into_iter().next().unwrap();
        handle.destroy(false);
        assert!(task.await.unwrap().is_ok());
        assert!(session.hub.groups_of(&address).is_empty());
        assert!(handle.is_closed());
        assert!(matches!(
            handle.add_block(vec![], vec![]),
            Err(ServiceError::Stopped)
        ));
    }

    #[tokio::test]
    async fn test_destroy_with_purge_retries_until_store_is_gone() {
        let session = Session::new(2);
        let mut instances = session.spawn_all();
        wait_started(&instances).await;

        instances[0].handle.add_block(b"doomed".to_vec(), vec![]).unwrap();
        wait_until("write", || instances[0].listener.payloads().len() == 1).await;
        let instance = instances.remove(0);
        assert!(!instance.store.is_empty());

        instance.store.fail_next_destroys(2);
        instance.handle.destroy(true);
        assert!(instance.task.await.unwrap().is_ok());

        wait_until("purge", || instance.store.is_empty()).await;
        assert_eq!(instance.store.destroy_calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_destroy_gives_up_after_configured_attempts() {
        let store = InMemoryBlockStore::new();
        store.fail_next_destroys(10);
        let shared: Arc<dyn BlockStore> = Arc::new(store.clone());

        let deleted = destroy_store_with_retry(shared, 3, Duration::from_millis(100)).await;
        assert!(!deleted);
        assert_eq!(store.destroy_calls(), 3);
    }

    #[tokio::test]
    async fn test_restart_replays_chain_from_store() {
        let session = Session::new(2);
        let mut instances = session.spawn_all();
        wait_started(&instances).await;

        for payload in [b"one", b"two", b"six"] {
            instances[0].handle.add_block(payload.to_vec(), vec![]).unwrap();
        }
        wait_until("local chain", || instances[0].listener.heights_from(0).len() == 3).await;

        let old = instances.remove(0);
        old.handle.destroy(false);
        assert!(old.task.await.unwrap().is_ok());

        let restarted = session.spawn(0, old.store.clone());
        wait_until("replay", || restarted.listener.heights_from(0) == vec![1, 2, 3]).await;
        assert_eq!(
            restarted.listener.payloads(),
            vec![b"one".to_vec(), b"two".to_vec(), b"six".to_vec()]
        );

        restarted.handle.add_block(b"seven".to_vec(), vec![]).unwrap();
        wait_until("next height", || {
            restarted.listener.heights_from(0) == vec![1, 2, 3, 4]
        })
        .await;
        wait_until("peer sees it", || {
            instances[0].listener.heights_from(0).contains(&4)
        })
        .await;
    }

    #[tokio::test]
    async fn test_fatal_error_stops_the_task() {
        let session = Session::new(2);
        let instances = session.spawn_all();
        wait_started(&instances).await;

        instances[0]
            .handle
            .add_block(b"orphan".to_vec(), vec![[0x99; 32]])
            .unwrap();
        let Instance { task, handle, .. } = instances.into_iter().next().unwrap();
        let result = task.await.unwrap();
        assert!(matches!(
            result,
            Err(CatchainError::Fatal(FatalError::MissingDependency(_)))
        ));
        assert!(handle.is_closed());
    }
}
