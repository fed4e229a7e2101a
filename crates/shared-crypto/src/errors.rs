//! Crypto error types.

use thiserror::Error;

/// Failures of key parsing and signature checks.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// The signature does not match the key and message.
    #[error("signature does not verify")]
    SignatureVerificationFailed,

    /// A wire signature with the wrong byte length.
    #[error("signature must be 64 bytes, got {0}")]
    InvalidSignatureFormat(usize),

    /// The key bytes are not a valid curve point.
    #[error("public key is not a valid Ed25519 point")]
    InvalidPublicKey,
}
