//! # Catchain Subsystem (qc-18)
//!
//! Block-DAG receiver and synchronization engine underlying a BFT
//! consensus round between a fixed set of members ("sources").
//!
//! Each source extends its own hash chain; every block may also reference
//! blocks of other sources, which makes the whole a DAG. The receiver
//! validates and stores blocks, delivers them to the consumer in causal
//! order, proves equivocation, and pulls missing blocks from peers.
//!
//! ## Architecture
//!
//! ```text
//!  ┌────────────── CatchainService (tokio task) ──────────────┐
//!  │                                                          │
//!  │   Event ──→ CatchainReceiver::handle ──→ Vec<Action>     │
//!  │               (deterministic core)                       │
//!  └──────┬──────────────┬──────────────┬──────────────┬──────┘
//!         │              │              │              │
//!   CatchainNetwork  BlockSigner    BlockStore   CatchainListener
//! ```
//!
//! - **Domain Layer:** arena DAG, per-source ledger, validation, quotas
//! - **Receiver:** sans-IO state machine, one instance per session
//! - **Ports Layer:** async traits for network, signer, store, listener
//! - **Service Layer:** actor wiring the receiver to the ports
//! - **Adapters Layer:** in-memory and RocksDB stores, local signer,
//!   in-process loopback overlay
//!
//! ## Security
//!
//! - Every block is signed by its source; the hash covers header fields
//!   and the payload hash, never the signature.
//! - Two signed blocks at one height of one source are a fork proof; the
//!   source is blamed and its later blocks are refused.
//! - A block is persisted before anything depends on it being durable: own
//!   blocks are written before the root pointer moves to them.
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use qc_18_catchain::*;
//!
//! let receiver = CatchainReceiver::new(config, incarnation, members, my_key_hash)?;
//! let deps = CatchainDependencies { network, signer, store, listener };
//! let (handle, task) = CatchainService::spawn(receiver, deps);
//! handle.add_block(b"proposal".to_vec(), vec![])?;
//! ```

pub mod adapters;
pub mod domain;
pub mod events;
pub mod ports;
pub mod receiver;
pub mod service;
pub mod telemetry;

/// Deterministic multi-node simulator.
/// Requires feature: `test-utils`
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use domain::{
    BlockHash, BlockHeader, BlockRef, CatchainBlock, CatchainConfig, CatchainError,
    CatchainMember, CatchainResult, ConfigError, DeliveredBlock, FatalError, ForkProof, Height,
    IncarnationId, KeyHash, PeerId, ProtocolViolation, ServiceError, SourceId,
};
pub use events::wire::{CatchainMessage, CatchainQuery, CatchainResponse};
pub use events::{Action, Event};
pub use ports::inbound::{CatchainApi, CatchainListener, QueryReply};
pub use ports::outbound::{
    BlockSigner, BlockStore, CatchainNetwork, NetworkError, SignerError, StoreError,
};
pub use receiver::CatchainReceiver;
pub use service::{destroy_store_with_retry, CatchainDependencies, CatchainHandle, CatchainService};
pub use telemetry::{init_tracing, LogConfig, TelemetryError};
