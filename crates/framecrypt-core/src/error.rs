//! Error types for the frame cryptor engine.
//!
//! Two families live in [`FrameCryptorError`]: programmer errors (invalid
//! arguments, disposed objects, unknown identifiers) that a caller can fix,
//! and media conditions (missing keys, failed seals or opens, an exhausted
//! ratchet window) that arise from what peers send and are expected at
//! runtime.
//!
//! The per-frame transform never returns these. It reports through
//! [`FrameOutcome`](crate::FrameOutcome) and state events instead, so a bad
//! frame never tears down the media pipeline.

use framecrypt_crypto::CryptoError;
use thiserror::Error;

use crate::key_ring::KeyScope;

/// Errors returned by key provider, factory and registry operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameCryptorError {
    /// Key index outside the key ring
    #[error("invalid key index {key_index}: key ring has {key_ring_size} slots")]
    InvalidKeyIndex {
        /// Rejected index
        key_index: u32,
        /// Configured ring size
        key_ring_size: usize,
    },

    /// Key material is not 16 or 32 bytes
    #[error("invalid key length: expected 16 or 32 bytes, got {actual}")]
    InvalidKeyLength {
        /// Length of the rejected key
        actual: usize,
    },

    /// No key installed at the requested slot
    #[error("no key at index {key_index} in {scope}")]
    MissingKey {
        /// Ring the lookup resolved to
        scope: KeyScope,
        /// Empty slot
        key_index: u32,
    },

    /// Sealing a frame failed
    #[error("encryption failed: {0}")]
    EncryptionFailure(CryptoError),

    /// Opening a frame failed
    #[error("decryption failed: {0}")]
    DecryptionFailure(CryptoError),

    /// Operation on a key provider after `dispose`
    #[error("key provider has been disposed")]
    ProviderDisposed,

    /// Operation on a frame cryptor after `dispose`
    #[error("frame cryptor has been disposed")]
    CryptorDisposed,

    /// Options or host configuration rejected during validation
    #[error("invalid configuration: {reason}")]
    InvalidConfiguration {
        /// What was wrong
        reason: String,
    },

    /// Explicit ratchet requested past the configured window
    #[error("ratchet window exhausted: step {step} reached window size {window_size}")]
    RatchetWindowExhausted {
        /// Ratchet step of the current key
        step: u32,
        /// Configured window
        window_size: u32,
    },

    /// Base64 input failed to decode
    #[error("invalid base64 in {field}")]
    InvalidBase64 {
        /// Name of the offending input
        field: &'static str,
    },

    /// No key provider registered under this id
    #[error("unknown key provider: {0}")]
    UnknownKeyProvider(String),

    /// No frame cryptor registered under this id
    #[error("unknown frame cryptor: {0}")]
    UnknownFrameCryptor(String),
}

impl FrameCryptorError {
    /// Returns true if the caller passed something it should not have.
    ///
    /// Programmer errors are deterministic: retrying the same call fails the
    /// same way. Media conditions (`MissingKey`, seal/open failures, an
    /// exhausted window) depend on what keys and frames have arrived.
    pub fn is_programmer_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidKeyIndex { .. }
                | Self::InvalidKeyLength { .. }
                | Self::ProviderDisposed
                | Self::CryptorDisposed
                | Self::InvalidConfiguration { .. }
                | Self::InvalidBase64 { .. }
                | Self::UnknownKeyProvider(_)
                | Self::UnknownFrameCryptor(_)
        )
    }

    pub(crate) fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfiguration { reason: reason.into() }
    }
}

impl From<CryptoError> for FrameCryptorError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::InvalidKeyLength { actual } => Self::InvalidKeyLength { actual },
            CryptoError::AuthenticationFailed => Self::DecryptionFailure(err),
            CryptoError::NonceExhausted { .. } | CryptoError::EncryptionFailed => {
                Self::EncryptionFailure(err)
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn programmer_errors_are_classified() {
        assert!(FrameCryptorError::ProviderDisposed.is_programmer_error());
        assert!(
            FrameCryptorError::InvalidKeyIndex { key_index: 20, key_ring_size: 16 }
                .is_programmer_error()
        );
        assert!(FrameCryptorError::UnknownFrameCryptor("x".into()).is_programmer_error());
        assert!(FrameCryptorError::invalid_config("bad").is_programmer_error());
    }

    #[test]
    fn media_conditions_are_not_programmer_errors() {
        let missing = FrameCryptorError::MissingKey { scope: KeyScope::Shared, key_index: 0 };
        assert!(!missing.is_programmer_error());
        assert!(
            !FrameCryptorError::RatchetWindowExhausted { step: 16, window_size: 16 }
                .is_programmer_error()
        );
        assert!(
            !FrameCryptorError::DecryptionFailure(CryptoError::AuthenticationFailed)
                .is_programmer_error()
        );
    }

    #[test]
    fn crypto_errors_map_to_engine_errors() {
        assert_eq!(
            FrameCryptorError::from(CryptoError::InvalidKeyLength { actual: 7 }),
            FrameCryptorError::InvalidKeyLength { actual: 7 }
        );
        assert_eq!(
            FrameCryptorError::from(CryptoError::NonceExhausted { issued: 3 }),
            FrameCryptorError::EncryptionFailure(CryptoError::NonceExhausted { issued: 3 })
        );
        assert_eq!(
            FrameCryptorError::from(CryptoError::AuthenticationFailed),
            FrameCryptorError::DecryptionFailure(CryptoError::AuthenticationFailed)
        );
    }

    #[test]
    fn missing_key_message_names_the_ring() {
        let err = FrameCryptorError::MissingKey {
            scope: KeyScope::Participant("alice".into()),
            key_index: 3,
        };
        assert_eq!(err.to_string(), "no key at index 3 in key ring of participant alice");
    }
}
