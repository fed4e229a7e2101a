//! Adapters for the outbound ports.

pub mod loopback;
pub mod memory_store;
#[cfg(feature = "rocksdb")]
pub mod rocksdb_store;
pub mod signer;

pub use loopback::{LoopbackHub, LoopbackNetwork};
pub use memory_store::InMemoryBlockStore;
#[cfg(feature = "rocksdb")]
pub use rocksdb_store::{RocksDbBlockStore, RocksDbConfig};
pub use signer::KeyPairSigner;
