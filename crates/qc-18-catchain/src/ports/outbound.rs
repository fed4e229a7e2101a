//! Driven ports (outbound dependencies).
//!
//! All three collaborators are asynchronous. The service turns each call
//! into a completion event for the receiver; nothing blocks the receiver.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

use shared_crypto::{Ed25519Signature, Hash};

use crate::domain::{KeyHash, PeerId};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NetworkError {
    #[error("peer unreachable")]
    Unreachable,

    #[error("query timed out")]
    Timeout,

    #[error("remote error: {0}")]
    Remote(String),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SignerError {
    #[error("no key for identity {0}")]
    UnknownIdentity(String),

    #[error("signer unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("I/O error: {message}")]
    IOError { message: String },

    #[error("store busy: {message}")]
    Busy { message: String },
}

/// Overlay transport addressed by opaque peer ids.
#[async_trait]
pub trait CatchainNetwork: Send + Sync {
    /// Fire-and-forget point-to-point message.
    async fn send_message(&self, to: PeerId, data: Vec<u8>) -> Result<(), NetworkError>;

    /// Request/response. The transport enforces `timeout` as well.
    async fn send_query(
        &self,
        to: PeerId,
        name: &str,
        data: Vec<u8>,
        timeout: Duration,
    ) -> Result<Vec<u8>, NetworkError>;

    /// Same message to every peer in `to`.
    async fn send_broadcast_to_set(&self, to: Vec<PeerId>, data: Vec<u8>)
        -> Result<(), NetworkError>;

    async fn create_private_group(
        &self,
        members: Vec<PeerId>,
        group_id: Hash,
    ) -> Result<(), NetworkError>;

    async fn delete_private_group(&self, group_id: Hash) -> Result<(), NetworkError>;
}

/// Key-management service signing on behalf of a member identity.
#[async_trait]
pub trait BlockSigner: Send + Sync {
    async fn sign(&self, identity: KeyHash, data: Vec<u8>) -> Result<Ed25519Signature, SignerError>;
}

/// Durable byte map keyed by 32-byte hashes.
///
/// The zero key holds the root pointer. Writes to one key are issued only
/// after the previous write to it has completed.
#[async_trait]
pub trait BlockStore: Send + Sync {
    async fn get(&self, key: Hash) -> Result<Option<Vec<u8>>, StoreError>;

    async fn set(&self, key: Hash, value: Vec<u8>) -> Result<(), StoreError>;

    /// Remove the whole store. May fail transiently; callers retry.
    async fn destroy_all(&self) -> Result<(), StoreError>;
}
