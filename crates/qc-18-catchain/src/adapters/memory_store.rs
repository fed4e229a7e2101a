//! In-memory block store for tests and ephemeral sessions.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use shared_crypto::Hash;

use crate::ports::outbound::{BlockStore, StoreError};

#[derive(Default)]
struct Inner {
    entries: RwLock<HashMap<Hash, Vec<u8>>>,
    /// Remaining `destroy_all` calls that report busy.
    busy_destroys: AtomicU32,
    destroy_calls: AtomicU32,
}

/// `HashMap` behind a lock. Clones share the same map, which lets a test
/// keep a handle to the store across a simulated restart.
#[derive(Clone, Default)]
pub struct InMemoryBlockStore {
    inner: Arc<Inner>,
}

impl InMemoryBlockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` destroy attempts fail as busy.
    pub fn fail_next_destroys(&self, count: u32) {
        self.inner.busy_destroys.store(count, Ordering::SeqCst);
    }

    pub fn destroy_calls(&self) -> u32 {
        self.inner.destroy_calls.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.inner.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.read().is_empty()
    }

    pub fn contains(&self, key: &Hash) -> bool {
        self.inner.entries.read().contains_key(key)
    }
}

#[async_trait]
impl BlockStore for InMemoryBlockStore {
    async fn get(&self, key: Hash) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.inner.entries.read().get(&key).cloned())
    }

    async fn set(&self, key: Hash, value: Vec<u8>) -> Result<(), StoreError> {
        self.inner.entries.write().insert(key, value);
        Ok(())
    }

    async fn destroy_all(&self) -> Result<(), StoreError> {
        self.inner.destroy_calls.fetch_add(1, Ordering::SeqCst);
        let busy = self
            .inner
            .busy_destroys
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if busy {
            return Err(StoreError::Busy {
                message: "store locked".to_string(),
            });
        }
        self.inner.entries.write().clear();
        Ok(())
    }
}
