//! Error types for frame cryptography

use thiserror::Error;

/// Errors from frame key operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    /// Raw key material has a length no supported AES-GCM variant accepts
    #[error("invalid key length: expected 16 or 32 bytes, got {actual}")]
    InvalidKeyLength {
        /// Length of the rejected key material
        actual: usize,
    },

    /// Every nonce of this sequence has already been issued
    #[error("nonce sequence exhausted after {issued} frames")]
    NonceExhausted {
        /// Number of nonces handed out before exhaustion
        issued: u64,
    },

    /// The AEAD refused to seal the buffer
    #[error("encryption failed")]
    EncryptionFailed,

    /// Authentication tag did not verify (wrong key, tampering, bad nonce)
    #[error("authentication failed")]
    AuthenticationFailed,
}

impl CryptoError {
    /// Returns true if the error came from verifying an authentication tag.
    ///
    /// Only these failures are worth retrying with a ratcheted key.
    pub fn is_authentication_failure(&self) -> bool {
        matches!(self, Self::AuthenticationFailed)
    }
}
