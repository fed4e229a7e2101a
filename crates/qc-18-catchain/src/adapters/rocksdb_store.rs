//! # RocksDB Block Store
//!
//! Durable [`BlockStore`] for one catchain instance: one database directory
//! per incarnation, keys are block hashes plus the zero-key root pointer.
//!
//! ## Durability
//!
//! Writes are fsynced by default. The receiver moves the root pointer only
//! after the block it names is acknowledged, so a crash between the two
//! writes leaves an unreferenced block, never a dangling pointer.
//!
//! RocksDB calls block, so every operation runs on the blocking pool.

use async_trait::async_trait;
use parking_lot::RwLock;
use rocksdb::{Options, WriteOptions, DB};
use std::sync::Arc;

use shared_crypto::Hash;

use crate::ports::outbound::{BlockStore, StoreError};

/// RocksDB configuration for a block store
#[derive(Debug, Clone)]
pub struct RocksDbConfig {
    /// Path to the database directory
    pub path: String,
    /// Block cache size in bytes (default: 64MB)
    pub block_cache_size: usize,
    /// Write buffer size in bytes (default: 16MB)
    pub write_buffer_size: usize,
    /// Enable fsync after each write (default: true for durability)
    pub sync_writes: bool,
}

impl Default for RocksDbConfig {
    fn default() -> Self {
        Self {
            path: "./data/catchain".to_string(),
            block_cache_size: 64 * 1024 * 1024,  // 64MB
            write_buffer_size: 16 * 1024 * 1024, // 16MB
            sync_writes: true,
        }
    }
}

impl RocksDbConfig {
    /// Create config for testing (smaller buffers, no sync)
    pub fn for_testing(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            block_cache_size: 8 * 1024 * 1024,  // 8MB
            write_buffer_size: 4 * 1024 * 1024, // 4MB
            sync_writes: false,
        }
    }

    fn options(&self) -> Options {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_write_buffer_size(self.write_buffer_size);
        opts.set_compression_type(rocksdb::DBCompressionType::Snappy);

        let mut block_opts = rocksdb::BlockBasedOptions::default();
        block_opts.set_bloom_filter(10.0, false);
        block_opts.set_block_cache(&rocksdb::Cache::new_lru_cache(self.block_cache_size));
        opts.set_block_based_table_factory(&block_opts);
        opts
    }
}

struct Inner {
    /// `None` once destroyed.
    db: RwLock<Option<DB>>,
    config: RocksDbConfig,
}

/// RocksDB-backed block store
#[derive(Clone)]
pub struct RocksDbBlockStore {
    inner: Arc<Inner>,
}

impl RocksDbBlockStore {
    /// Open or create the database at `config.path`
    pub fn open(config: RocksDbConfig) -> Result<Self, StoreError> {
        let db = DB::open(&config.options(), &config.path).map_err(|e| StoreError::IOError {
            message: format!("Failed to open RocksDB: {}", e),
        })?;
        Ok(Self {
            inner: Arc::new(Inner {
                db: RwLock::new(Some(db)),
                config,
            }),
        })
    }

    async fn blocking<T, F>(&self, op: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Inner) -> Result<T, StoreError> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || op(&inner))
            .await
            .map_err(|e| StoreError::IOError {
                message: format!("RocksDB task failed: {}", e),
            })?
    }
}

fn destroyed() -> StoreError {
    StoreError::IOError {
        message: "RocksDB store destroyed".to_string(),
    }
}

#[async_trait]
impl BlockStore for RocksDbBlockStore {
    async fn get(&self, key: Hash) -> Result<Option<Vec<u8>>, StoreError> {
        self.blocking(move |inner| {
            let guard = inner.db.read();
            let db = guard.as_ref().ok_or_else(destroyed)?;
            db.get(key).map_err(|e| StoreError::IOError {
                message: format!("RocksDB get failed: {}", e),
            })
        })
        .await
    }

    async fn set(&self, key: Hash, value: Vec<u8>) -> Result<(), StoreError> {
        self.blocking(move |inner| {
            let guard = inner.db.read();
            let db = guard.as_ref().ok_or_else(destroyed)?;
            let mut write_opts = WriteOptions::default();
            write_opts.set_sync(inner.config.sync_writes);
            db.put_opt(key, value, &write_opts)
                .map_err(|e| StoreError::IOError {
                    message: format!("RocksDB put failed: {}", e),
                })
        })
        .await
    }

    async fn destroy_all(&self) -> Result<(), StoreError> {
        self.blocking(|inner| {
            // Close first; RocksDB holds a lock on the directory while open.
            drop(inner.db.write().take());
            DB::destroy(&Options::default(), &inner.config.path).map_err(|e| StoreError::Busy {
                message: format!("RocksDB destroy failed: {}", e),
            })
        })
        .await
    }
}
