//! Local key-pair signer.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use shared_crypto::{Ed25519KeyPair, Ed25519Signature};

use crate::domain::KeyHash;
use crate::ports::outbound::{BlockSigner, SignerError};

/// Signs with in-process Ed25519 keys, looked up by key hash.
#[derive(Clone, Default)]
pub struct KeyPairSigner {
    keys: Arc<HashMap<KeyHash, Ed25519KeyPair>>,
}

impl KeyPairSigner {
    pub fn new(keys: impl IntoIterator<Item = Ed25519KeyPair>) -> Self {
        let keys = keys
            .into_iter()
            .map(|kp| (kp.public_key().key_hash(), kp))
            .collect();
        Self {
            keys: Arc::new(keys),
        }
    }
}

#[async_trait]
impl BlockSigner for KeyPairSigner {
    async fn sign(&self, identity: KeyHash, data: Vec<u8>) -> Result<Ed25519Signature, SignerError> {
        let keypair = self
            .keys
            .get(&identity)
            .ok_or_else(|| SignerError::UnknownIdentity(hex::encode(&identity[..8])))?;
        Ok(keypair.sign(&data))
    }
}
