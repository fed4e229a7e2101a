//! # Catchain Service
//!
//! Actor that owns one [`CatchainReceiver`] and executes its actions
//! against the outbound ports.
//!
//! ```text
//!   CatchainHandle ──commands──→ ┌──────────────┐ ──spawn──→ network / signer / store
//!                                │ service loop │
//!   port completions ──events──→ └──────────────┘ ──inline──→ CatchainListener
//! ```
//!
//! All receiver mutation happens on the service task. Port calls run on
//! spawned tasks and post their completion back as an [`Event`]; listener
//! callbacks run inline so delivery order is preserved.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep, sleep_until, Instant};
use tracing::{debug, error, info, instrument, warn};

use crate::domain::{BlockHash, CatchainResult, PeerId, ServiceError};
use crate::events::{Action, Event, QueryId};
use crate::ports::inbound::{CatchainApi, CatchainListener, QueryReply};
use crate::ports::outbound::{BlockSigner, BlockStore, CatchainNetwork};
use crate::receiver::CatchainReceiver;

/// Collaborators of one catchain instance.
#[derive(Clone)]
pub struct CatchainDependencies {
    pub network: Arc<dyn CatchainNetwork>,
    pub signer: Arc<dyn BlockSigner>,
    pub store: Arc<dyn BlockStore>,
    pub listener: Arc<dyn CatchainListener>,
}

type QueryResult = Result<Vec<u8>, String>;

enum Command {
    Event(Event),
    Query {
        from: PeerId,
        data: Vec<u8>,
        reply: oneshot::Sender<QueryResult>,
    },
    Destroy {
        purge_store: bool,
    },
}

/// Cloneable entry point into a running instance.
#[derive(Clone)]
pub struct CatchainHandle {
    commands: mpsc::UnboundedSender<Command>,
}

impl CatchainHandle {
    /// True once the service task has exited.
    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    fn post(&self, command: Command) -> Result<(), ServiceError> {
        self.commands
            .send(command)
            .map_err(|_| ServiceError::Stopped)
    }
}

#[async_trait]
impl CatchainApi for CatchainHandle {
    fn add_block(&self, payload: Vec<u8>, deps: Vec<BlockHash>) -> Result<(), ServiceError> {
        self.post(Command::Event(Event::AddBlock { payload, deps }))
    }

    fn receive_message(&self, from: PeerId, data: Vec<u8>) {
        let _ = self.post(Command::Event(Event::MessageReceived { from, data }));
    }

    fn receive_broadcast(&self, from: PeerId, data: Vec<u8>) {
        let _ = self.post(Command::Event(Event::BroadcastReceived { from, data }));
    }

    async fn receive_query(&self, from: PeerId, data: Vec<u8>) -> Result<Vec<u8>, ServiceError> {
        let (reply, answer) = oneshot::channel();
        self.post(Command::Query { from, data, reply })?;
        match answer.await {
            Ok(Ok(bytes)) => Ok(bytes),
            Ok(Err(reason)) => Err(ServiceError::QueryRejected(reason)),
            Err(_) => Err(ServiceError::Stopped),
        }
    }

    fn destroy(&self, purge_store: bool) {
        let _ = self.post(Command::Destroy { purge_store });
    }
}

/// The actor. Create with [`CatchainService::spawn`].
pub struct CatchainService {
    receiver: CatchainReceiver,
    deps: CatchainDependencies,
    commands: mpsc::UnboundedReceiver<Command>,
    completions_tx: mpsc::UnboundedSender<Event>,
    completions: mpsc::UnboundedReceiver<Event>,
    pending_queries: HashMap<QueryId, oneshot::Sender<QueryResult>>,
    next_query_id: u64,
}

impl CatchainService {
    /// Start the instance on the current runtime and boot it.
    ///
    /// The task ends with `Ok` after `destroy`, or with the fatal error
    /// that stopped the receiver.
    pub fn spawn(
        receiver: CatchainReceiver,
        deps: CatchainDependencies,
    ) -> (CatchainHandle, JoinHandle<CatchainResult<()>>) {
        let (commands_tx, commands) = mpsc::unbounded_channel();
        let (completions_tx, completions) = mpsc::unbounded_channel();
        let service = Self {
            receiver,
            deps,
            commands,
            completions_tx,
            completions,
            pending_queries: HashMap::new(),
            next_query_id: 0,
        };
        let task = tokio::spawn(service.run());
        (
            CatchainHandle {
                commands: commands_tx,
            },
            task,
        )
    }

    #[instrument(skip_all, fields(source = self.receiver.local_id()))]
    async fn run(mut self) -> CatchainResult<()> {
        let group_id = self.receiver.incarnation().0;
        if let Err(e) = self
            .deps
            .network
            .create_private_group(self.receiver.member_addresses(), group_id)
            .await
        {
            warn!(error = %e, "[qc-18] failed to create overlay group");
        }

        info!(
            sources = self.receiver.source_count(),
            "[qc-18] catchain instance starting"
        );
        self.step(Event::Boot)?;

        loop {
            let wake = self.receiver.next_awake_time();
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Event(event)) => self.step(event)?,
                    Some(Command::Query { from, data, reply }) => {
                        self.next_query_id += 1;
                        let query_id = QueryId(self.next_query_id);
                        self.pending_queries.insert(query_id, reply);
                        self.step(Event::QueryReceived { from, data, query_id })?;
                    }
                    Some(Command::Destroy { purge_store }) => {
                        self.shutdown(purge_store).await;
                        return Ok(());
                    }
                    None => {
                        self.shutdown(false).await;
                        return Ok(());
                    }
                },
                Some(event) = self.completions.recv() => self.step(event)?,
                _ = sleep_until_deadline(wake) => self.step(Event::Tick)?,
            }
        }
    }

    /// Feed one event to the receiver and execute what it asks for.
    fn step(&mut self, event: Event) -> CatchainResult<()> {
        let actions = self
            .receiver
            .handle(event, Instant::now())
            .inspect_err(|e| error!(error = %e, "[qc-18] fatal error, stopping instance"))?;
        for action in actions {
            self.execute(action);
        }
        Ok(())
    }

    fn execute(&mut self, action: Action) {
        match action {
            Action::SendMessage { to, data } => {
                let network = Arc::clone(&self.deps.network);
                tokio::spawn(async move {
                    if let Err(e) = network.send_message(to, data).await {
                        debug!(error = %e, "[qc-18] message send failed");
                    }
                });
            }
            Action::Multicast { to, data } => {
                let network = Arc::clone(&self.deps.network);
                tokio::spawn(async move {
                    if let Err(e) = network.send_broadcast_to_set(to, data).await {
                        debug!(error = %e, "[qc-18] multicast failed");
                    }
                });
            }
            Action::SendQuery {
                to,
                name,
                data,
                timeout,
                context,
            } => {
                let network = Arc::clone(&self.deps.network);
                let completions = self.completions_tx.clone();
                tokio::spawn(async move {
                    let result =
                        match tokio::time::timeout(timeout, network.send_query(to, name, data, timeout))
                            .await
                        {
                            Ok(Ok(bytes)) => Ok(bytes),
                            Ok(Err(e)) => Err(e.to_string()),
                            Err(_) => Err("query timed out".to_string()),
                        };
                    let _ = completions.send(Event::QueryCompleted {
                        peer: to,
                        context,
                        result,
                    });
                });
            }
            Action::Reply { query_id, result } => match self.pending_queries.remove(&query_id) {
                Some(reply) => {
                    let _ = reply.send(result);
                }
                None => debug!(?query_id, "[qc-18] reply for unknown query"),
            },
            Action::Sign { identity, hash } => {
                let signer = Arc::clone(&self.deps.signer);
                let completions = self.completions_tx.clone();
                tokio::spawn(async move {
                    let result = signer
                        .sign(identity, hash.to_vec())
                        .await
                        .map_err(|e| e.to_string());
                    let _ = completions.send(Event::SignatureReady { hash, result });
                });
            }
            Action::StoreWrite {
                key,
                value,
                purpose,
            } => {
                let store = Arc::clone(&self.deps.store);
                let completions = self.completions_tx.clone();
                tokio::spawn(async move {
                    let result = store.set(key, value).await.map_err(|e| e.to_string());
                    let _ = completions.send(Event::StoreWritten {
                        key,
                        purpose,
                        result,
                    });
                });
            }
            Action::StoreRead { key } => {
                let store = Arc::clone(&self.deps.store);
                let completions = self.completions_tx.clone();
                tokio::spawn(async move {
                    let result = store.get(key).await.map_err(|e| e.to_string());
                    let _ = completions.send(Event::StoreLoaded { key, result });
                });
            }
            Action::Deliver(block) => self.deps.listener.on_new_block(&block),
            Action::NotifyStarted => self.deps.listener.on_started(),
            Action::NotifyBlame { source } => {
                self.deps.listener.on_blame(source);
                let _ = self.completions_tx.send(Event::BlameProcessed { source });
            }
            Action::NotifyBroadcast { source, data } => {
                self.deps.listener.on_broadcast(source, data)
            }
            Action::CustomQuery {
                source,
                data,
                query_id,
            } => match self.pending_queries.remove(&query_id) {
                Some(sender) => {
                    self.deps
                        .listener
                        .on_custom_query(source, data, QueryReply::new(sender));
                }
                None => debug!(?query_id, "[qc-18] custom query without reply slot"),
            },
        }
    }

    async fn shutdown(&mut self, purge_store: bool) {
        info!(purge_store, "[qc-18] catchain instance stopping");
        self.pending_queries.clear();
        let group_id = self.receiver.incarnation().0;
        if let Err(e) = self.deps.network.delete_private_group(group_id).await {
            warn!(error = %e, "[qc-18] failed to delete overlay group");
        }
        if purge_store {
            let store = Arc::clone(&self.deps.store);
            let config = self.receiver.config();
            let (attempts, backoff) = (config.destroy_attempts, config.destroy_backoff());
            tokio::spawn(destroy_store_with_retry(store, attempts, backoff));
        }
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(at) => sleep_until(at).await,
        None => std::future::pending().await,
    }
}

/// Delete the whole store, retrying transient failures with doubling backoff.
///
/// Returns whether the store was deleted.
pub async fn destroy_store_with_retry(
    store: Arc<dyn BlockStore>,
    attempts: u32,
    backoff: Duration,
) -> bool {
    let mut delay = backoff;
    for attempt in 1..=attempts {
        match store.destroy_all().await {
            Ok(()) => {
                info!(attempt, "[qc-18] block store destroyed");
                return true;
            }
            Err(e) => {
                warn!(attempt, error = %e, "[qc-18] block store destroy failed");
                if attempt < attempts {
                    sleep(delay).await;
                    delay = delay.saturating_mul(2);
                }
            }
        }
    }
    error!(attempts, "[qc-18] giving up on block store destroy");
    false
}
