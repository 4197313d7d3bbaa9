//! Frame sealing with AES-GCM
//!
//! A [`FrameKey`] owns the raw key bytes (zeroized on drop) and a ready cipher
//! instance, so the per-frame path never re-runs the AES key schedule. Sealing
//! and opening work in place on a caller-owned buffer: the caller sizes the
//! buffer once and no further allocation happens per frame.

use std::fmt;

use aes_gcm::{
    Aes128Gcm, Aes256Gcm, Nonce,
    aead::{AeadInPlace, KeyInit},
};
use zeroize::Zeroizing;

use crate::{error::CryptoError, nonce::NONCE_SIZE, ratchet::ratchet_key};

/// Size of the GCM authentication tag appended to every sealed frame.
pub const GCM_TAG_SIZE: usize = 16;

/// Accepted raw key lengths: AES-128-GCM and AES-256-GCM.
pub const KEY_SIZES: [usize; 2] = [16, 32];

enum Cipher {
    Aes128(Aes128Gcm),
    Aes256(Aes256Gcm),
}

/// An AES-GCM key used to seal and open media frames.
///
/// The variant is chosen by the raw key length: 16 bytes selects
/// AES-128-GCM, 32 bytes selects AES-256-GCM.
pub struct FrameKey {
    raw: Zeroizing<Vec<u8>>,
    cipher: Cipher,
}

impl FrameKey {
    /// Build a frame key from raw key bytes.
    ///
    /// # Errors
    ///
    /// - `InvalidKeyLength` if `raw` is neither 16 nor 32 bytes long
    pub fn new(raw: &[u8]) -> Result<Self, CryptoError> {
        let invalid = || CryptoError::InvalidKeyLength { actual: raw.len() };
        let cipher = match raw.len() {
            16 => Cipher::Aes128(Aes128Gcm::new_from_slice(raw).map_err(|_| invalid())?),
            32 => Cipher::Aes256(Aes256Gcm::new_from_slice(raw).map_err(|_| invalid())?),
            _ => return Err(invalid()),
        };

        Ok(Self { raw: Zeroizing::new(raw.to_vec()), cipher })
    }

    /// Raw key bytes, exactly as installed or derived.
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    /// Length of the raw key in bytes (16 or 32).
    pub fn key_len(&self) -> usize {
        self.raw.len()
    }

    /// Seal `buffer` in place.
    ///
    /// On entry `buffer` holds exactly the plaintext; on success it holds the
    /// ciphertext followed by the [`GCM_TAG_SIZE`]-byte tag. Reserve the tag
    /// capacity up front to keep the call allocation-free.
    pub fn seal_in_place(
        &self,
        nonce: &[u8; NONCE_SIZE],
        aad: &[u8],
        buffer: &mut Vec<u8>,
    ) -> Result<(), CryptoError> {
        let nonce = Nonce::from_slice(nonce);
        let sealed = match &self.cipher {
            Cipher::Aes128(cipher) => cipher.encrypt_in_place(nonce, aad, buffer),
            Cipher::Aes256(cipher) => cipher.encrypt_in_place(nonce, aad, buffer),
        };

        sealed.map_err(|_| CryptoError::EncryptionFailed)
    }

    /// Open `buffer` in place.
    ///
    /// On entry `buffer` holds ciphertext followed by the tag; on success it
    /// holds the plaintext.
    ///
    /// # Errors
    ///
    /// - `AuthenticationFailed` if the tag does not verify. The buffer
    ///   contents are unspecified afterwards and must be discarded.
    pub fn open_in_place(
        &self,
        nonce: &[u8; NONCE_SIZE],
        aad: &[u8],
        buffer: &mut Vec<u8>,
    ) -> Result<(), CryptoError> {
        if buffer.len() < GCM_TAG_SIZE {
            return Err(CryptoError::AuthenticationFailed);
        }

        let nonce = Nonce::from_slice(nonce);
        let opened = match &self.cipher {
            Cipher::Aes128(cipher) => cipher.decrypt_in_place(nonce, aad, buffer),
            Cipher::Aes256(cipher) => cipher.decrypt_in_place(nonce, aad, buffer),
        };

        opened.map_err(|_| CryptoError::AuthenticationFailed)
    }

    /// Derive the key for ratchet `step` from this key.
    ///
    /// See [`ratchet_key`] for the derivation.
    pub fn ratchet(&self, salt: &[u8], step: u32) -> Result<Self, CryptoError> {
        let next = ratchet_key(&self.raw, salt, step)?;
        Self::new(&next)
    }
}

impl fmt::Debug for FrameKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameKey").field("key_len", &self.raw.len()).finish_non_exhaustive()
    }
}
