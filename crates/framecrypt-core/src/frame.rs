//! Encrypted frame layout.
//!
//! A sealed frame is the AEAD output followed by a fixed trailer, optionally
//! followed by the provider's SIF trailer:
//!
//! ```text
//! [ ciphertext ‖ GCM tag (16) ][ IV (12) ][ IV length (1) ][ key index (1) ][ SIF? ]
//! ```
//!
//! The trailer sits at the end so a receiver can read it without knowing the
//! plaintext length. The key index is also the AEAD associated data: moving a
//! frame to another slot breaks authentication.

use framecrypt_crypto::{CryptoError, GCM_TAG_SIZE, NONCE_SIZE};
use thiserror::Error;

use crate::key_ring::KeyMaterial;

/// Bytes after the IV: IV length and key index.
pub const TRAILER_SIZE: usize = 2;

/// Bytes a sealed frame adds to its plaintext (SIF trailer excluded).
pub const FRAME_OVERHEAD: usize = GCM_TAG_SIZE + NONCE_SIZE + TRAILER_SIZE;

/// Smallest frame that can carry a non-empty payload.
pub const MIN_SEALED_FRAME_SIZE: usize = FRAME_OVERHEAD + 1;

/// Structural problems with a received frame.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrailerError {
    /// Frame shorter than the trailer plus a minimal payload
    #[error("frame too short: {len} bytes, need at least 31")]
    TooShort {
        /// Received length
        len: usize,
    },

    /// IV length byte names a length this engine never writes
    #[error("unsupported IV length {iv_len}, expected 12")]
    UnsupportedIvLength {
        /// Received IV length
        iv_len: u8,
    },
}

/// Borrowed view of a received encrypted frame.
///
/// Parsing checks structure only. The ciphertext is not authenticated until
/// it is opened with the right key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SealedFrame<'a> {
    ciphertext: &'a [u8],
    iv: [u8; NONCE_SIZE],
    key_index: u8,
}

impl<'a> SealedFrame<'a> {
    /// Split `frame` (SIF trailer already removed) into ciphertext and
    /// trailer fields.
    ///
    /// # Errors
    ///
    /// - `TooShort` if the frame cannot hold the trailer and one payload byte
    /// - `UnsupportedIvLength` if the IV length byte is not 12
    pub fn parse(frame: &'a [u8]) -> Result<Self, TrailerError> {
        if frame.len() < MIN_SEALED_FRAME_SIZE {
            return Err(TrailerError::TooShort { len: frame.len() });
        }

        let (rest, trailer) = frame.split_at(frame.len() - TRAILER_SIZE);
        let iv_len = trailer[0];
        let key_index = trailer[1];

        if usize::from(iv_len) != NONCE_SIZE {
            return Err(TrailerError::UnsupportedIvLength { iv_len });
        }

        let (ciphertext, iv_bytes) = rest.split_at(rest.len() - NONCE_SIZE);
        let mut iv = [0u8; NONCE_SIZE];
        iv.copy_from_slice(iv_bytes);

        Ok(Self { ciphertext, iv, key_index })
    }

    /// Ciphertext including the GCM tag.
    pub fn ciphertext(&self) -> &'a [u8] {
        self.ciphertext
    }

    /// IV the frame was sealed with.
    pub fn iv(&self) -> &[u8; NONCE_SIZE] {
        &self.iv
    }

    /// Key index the sender used.
    pub fn key_index(&self) -> u8 {
        self.key_index
    }
}

/// Seal `plaintext` with `material`, appending the trailer and `sif`.
///
/// Allocates the output once at its final size.
///
/// # Errors
///
/// - `NonceExhausted` if the slot issued its last nonce
/// - `EncryptionFailed` if the cipher refused the buffer
pub(crate) fn seal(
    material: &KeyMaterial,
    plaintext: &[u8],
    sif: Option<&[u8]>,
) -> Result<Vec<u8>, CryptoError> {
    let sif = sif.unwrap_or_default();
    let iv = material.next_nonce()?;
    let key_index = material.key_index();

    let mut frame = Vec::with_capacity(plaintext.len() + FRAME_OVERHEAD + sif.len());
    frame.extend_from_slice(plaintext);
    material.key().seal_in_place(&iv, &[key_index], &mut frame)?;

    frame.extend_from_slice(&iv);
    frame.push(NONCE_SIZE as u8);
    frame.push(key_index);
    frame.extend_from_slice(sif);

    debug_assert_eq!(frame.len(), plaintext.len() + FRAME_OVERHEAD + sif.len());
    Ok(frame)
}

/// Open `sealed` with `material`.
///
/// # Errors
///
/// - `AuthenticationFailed` if the key, IV, key index or ciphertext do not
///   match what was sealed
pub(crate) fn open(
    material: &KeyMaterial,
    sealed: &SealedFrame<'_>,
) -> Result<Vec<u8>, CryptoError> {
    let mut buffer = sealed.ciphertext.to_vec();
    material.key().open_in_place(&sealed.iv, &[sealed.key_index], &mut buffer)?;
    Ok(buffer)
}

/// Remove `sif` from the end of `frame` if present.
pub(crate) fn strip_sif<'a>(frame: &'a [u8], sif: Option<&[u8]>) -> &'a [u8] {
    match sif {
        Some(sif) if !sif.is_empty() && frame.len() > sif.len() && frame.ends_with(sif) => {
            &frame[..frame.len() - sif.len()]
        },
        _ => frame,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use framecrypt_crypto::FrameKey;

    use super::*;
    use crate::key_ring::slot_nonces;

    fn material(key_index: u8) -> KeyMaterial {
        let nonces = Arc::new(slot_nonces(key_index, [1, 2, 3]));
        KeyMaterial::new(FrameKey::new(&[0x11; 16]).unwrap(), 0, nonces)
    }

    #[test]
    fn sealed_frame_layout() {
        let material = material(4);
        let frame = seal(&material, b"hello", None).unwrap();

        assert_eq!(frame.len(), 5 + FRAME_OVERHEAD);
        assert_eq!(frame[frame.len() - 1], 4, "key index is the last byte");
        assert_eq!(frame[frame.len() - 2], 12, "IV length precedes the key index");

        let iv = &frame[frame.len() - TRAILER_SIZE - NONCE_SIZE..frame.len() - TRAILER_SIZE];
        assert_eq!(&iv[..4], &[4, 1, 2, 3], "IV prefix is key index and entropy");
        assert_eq!(&iv[4..], &0u64.to_be_bytes());
    }

    #[test]
    fn seal_then_open() {
        let material = material(0);
        let frame = seal(&material, b"video frame", None).unwrap();

        let sealed = SealedFrame::parse(&frame).unwrap();
        assert_eq!(sealed.key_index(), 0);
        assert_eq!(sealed.ciphertext().len(), 11 + GCM_TAG_SIZE);
        assert_eq!(open(&material, &sealed).unwrap(), b"video frame");
    }

    #[test]
    fn consecutive_frames_use_fresh_ivs() {
        let material = material(0);
        let first = seal(&material, b"a", None).unwrap();
        let second = seal(&material, b"a", None).unwrap();

        assert_ne!(
            SealedFrame::parse(&first).unwrap().iv(),
            SealedFrame::parse(&second).unwrap().iv()
        );
        assert_ne!(first, second);
    }

    #[test]
    fn sif_trailer_is_appended_and_stripped() {
        let material = material(1);
        let frame = seal(&material, b"payload", Some(&b"SIF"[..])).unwrap();
        assert!(frame.ends_with(b"SIF"));

        let body = strip_sif(&frame, Some(&b"SIF"[..]));
        assert_eq!(body.len(), frame.len() - 3);

        let sealed = SealedFrame::parse(body).unwrap();
        assert_eq!(open(&material, &sealed).unwrap(), b"payload");
    }

    #[test]
    fn strip_sif_leaves_other_frames_alone() {
        assert_eq!(strip_sif(b"abcdef", Some(&b"xyz"[..])), b"abcdef");
        assert_eq!(strip_sif(b"abc", Some(&b"abc"[..])), b"abc");
        assert_eq!(strip_sif(b"abcdef", Some(&b""[..])), b"abcdef");
        assert_eq!(strip_sif(b"abcdef", None), b"abcdef");
    }

    #[test]
    fn parse_rejects_short_frames() {
        let frame = vec![0u8; MIN_SEALED_FRAME_SIZE - 1];
        assert_eq!(
            SealedFrame::parse(&frame),
            Err(TrailerError::TooShort { len: MIN_SEALED_FRAME_SIZE - 1 })
        );
        assert!(SealedFrame::parse(&[]).is_err());
    }

    #[test]
    fn parse_rejects_foreign_iv_length() {
        let mut frame = vec![0u8; 64];
        let len = frame.len();
        frame[len - 2] = 16;

        assert_eq!(
            SealedFrame::parse(&frame),
            Err(TrailerError::UnsupportedIvLength { iv_len: 16 })
        );
    }

    #[test]
    fn moved_key_index_fails_authentication() {
        let material = material(2);
        let mut frame = seal(&material, b"payload", None).unwrap();
        let len = frame.len();
        frame[len - 1] = 3;

        let sealed = SealedFrame::parse(&frame).unwrap();
        assert_eq!(open(&material, &sealed), Err(CryptoError::AuthenticationFailed));
    }
}
