//! In-process overlay connecting several instances in one runtime.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use shared_crypto::Hash;

use crate::domain::PeerId;
use crate::ports::inbound::CatchainApi;
use crate::ports::outbound::{CatchainNetwork, NetworkError};

/// Routing table shared by every [`LoopbackNetwork`].
#[derive(Default)]
pub struct LoopbackHub {
    routes: RwLock<HashMap<PeerId, Arc<dyn CatchainApi>>>,
    offline: RwLock<HashSet<PeerId>>,
    groups: RwLock<HashMap<PeerId, HashSet<Hash>>>,
}

impl LoopbackHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn register(&self, peer: PeerId, api: Arc<dyn CatchainApi>) {
        self.routes.write().insert(peer, api);
    }

    /// Drop all traffic to and from `peer` until reconnected.
    pub fn disconnect(&self, peer: PeerId) {
        self.offline.write().insert(peer);
    }

    pub fn reconnect(&self, peer: PeerId) {
        self.offline.write().remove(&peer);
    }

    /// Overlay groups `peer` currently has open.
    pub fn groups_of(&self, peer: &PeerId) -> HashSet<Hash> {
        self.groups.read().get(peer).cloned().unwrap_or_default()
    }

    /// Endpoint for `local`.
    pub fn network(self: &Arc<Self>, local: PeerId) -> LoopbackNetwork {
        LoopbackNetwork {
            hub: Arc::clone(self),
            local,
        }
    }

    fn route(&self, from: &PeerId, to: &PeerId) -> Result<Arc<dyn CatchainApi>, NetworkError> {
        let offline = self.offline.read();
        if offline.contains(from) || offline.contains(to) {
            return Err(NetworkError::Unreachable);
        }
        self.routes
            .read()
            .get(to)
            .cloned()
            .ok_or(NetworkError::Unreachable)
    }
}

/// One member's view of the [`LoopbackHub`].
#[derive(Clone)]
pub struct LoopbackNetwork {
    hub: Arc<LoopbackHub>,
    local: PeerId,
}

#[async_trait]
impl CatchainNetwork for LoopbackNetwork {
    async fn send_message(&self, to: PeerId, data: Vec<u8>) -> Result<(), NetworkError> {
        self.hub.route(&self.local, &to)?.receive_message(self.local, data);
        Ok(())
    }

    async fn send_query(
        &self,
        to: PeerId,
        _name: &str,
        data: Vec<u8>,
        timeout: Duration,
    ) -> Result<Vec<u8>, NetworkError> {
        let api = self.hub.route(&self.local, &to)?;
        match tokio::time::timeout(timeout, api.receive_query(self.local, data)).await {
            Ok(Ok(bytes)) => Ok(bytes),
            Ok(Err(e)) => Err(NetworkError::Remote(e.to_string())),
            Err(_) => Err(NetworkError::Timeout),
        }
    }

    async fn send_broadcast_to_set(
        &self,
        to: Vec<PeerId>,
        data: Vec<u8>,
    ) -> Result<(), NetworkError> {
        for peer in to {
            if let Ok(api) = self.hub.route(&self.local, &peer) {
                api.receive_message(self.local, data.clone());
            }
        }
        Ok(())
    }

    async fn create_private_group(
        &self,
        _members: Vec<PeerId>,
        group_id: Hash,
    ) -> Result<(), NetworkError> {
        self.hub
            .groups
            .write()
            .entry(self.local)
            .or_default()
            .insert(group_id);
        Ok(())
    }

    async fn delete_private_group(&self, group_id: Hash) -> Result<(), NetworkError> {
        if let Some(groups) = self.hub.groups.write().get_mut(&self.local) {
            groups.remove(&group_id);
        }
        Ok(())
    }
}
