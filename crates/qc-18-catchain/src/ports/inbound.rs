//! Driving ports (inbound API) and the consumer callback contract.

use async_trait::async_trait;
use tokio::sync::oneshot;

use crate::domain::{BlockHash, DeliveredBlock, KeyHash, PeerId, ServiceError, SourceId};

/// Consumer of delivered blocks. Called in order on the instance's task.
pub trait CatchainListener: Send + Sync {
    /// Exactly once per delivered block, in topological order.
    fn on_new_block(&self, block: &DeliveredBlock);

    /// Opaque overlay broadcast from a member.
    fn on_broadcast(&self, source: KeyHash, data: Vec<u8>);

    /// Query that is not a DAG query. Answer through `reply`.
    fn on_custom_query(&self, source: KeyHash, data: Vec<u8>, reply: QueryReply);

    /// Initial sync finished. Fired once.
    fn on_started(&self);

    /// `source` was caught equivocating.
    fn on_blame(&self, _source: SourceId) {}
}

/// One-shot reply slot for an inbound query.
#[derive(Debug)]
pub struct QueryReply {
    sender: oneshot::Sender<Result<Vec<u8>, String>>,
}

impl QueryReply {
    pub fn new(sender: oneshot::Sender<Result<Vec<u8>, String>>) -> Self {
        Self { sender }
    }

    /// Send the answer. The asker may have given up; that is not an error.
    pub fn send(self, result: Result<Vec<u8>, String>) {
        let _ = self.sender.send(result);
    }
}

/// Entry points of a running catchain instance.
#[async_trait]
pub trait CatchainApi: Send + Sync {
    /// Queue a new own block depending on `deps`.
    fn add_block(&self, payload: Vec<u8>, deps: Vec<BlockHash>) -> Result<(), ServiceError>;

    fn receive_message(&self, from: PeerId, data: Vec<u8>);

    fn receive_broadcast(&self, from: PeerId, data: Vec<u8>);

    async fn receive_query(&self, from: PeerId, data: Vec<u8>) -> Result<Vec<u8>, ServiceError>;

    /// Stop the instance, optionally deleting its store.
    fn destroy(&self, purge_store: bool);
}
