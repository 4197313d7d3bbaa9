//! Key ratchet using HKDF
//!
//! # Security Properties
//!
//! - One-way: the previous key cannot be recovered from a ratcheted key
//! - Determinism: same (key, salt, step) always produces the same output
//! - Step binding: the step number is mixed into the derivation, so two
//!   ratchets of the same key at different steps never collide

use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::{error::CryptoError, frame_key::KEY_SIZES};

/// Label used for ratchet derivation
const RATCHET_LABEL: &[u8] = b"framecrypt ratchet";

/// Derive the key for ratchet `step` from `current`.
///
/// ```text
/// next = HKDF-SHA256(salt = salt, ikm = current,
///                    info = "framecrypt ratchet" ‖ step (BE u32),
///                    len = current.len())
/// ```
///
/// The output has the same length as `current`, so a ratcheted key selects
/// the same AES-GCM variant as its predecessor.
///
/// # Errors
///
/// - `InvalidKeyLength` if `current` is not a supported key length
pub fn ratchet_key(
    current: &[u8],
    salt: &[u8],
    step: u32,
) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    if !KEY_SIZES.contains(&current.len()) {
        return Err(CryptoError::InvalidKeyLength { actual: current.len() });
    }

    let hkdf = Hkdf::<Sha256>::new(Some(salt), current);

    // Capacity: 18 (label) + 4 (step) = 22
    let mut info = Vec::with_capacity(RATCHET_LABEL.len() + 4);
    info.extend_from_slice(RATCHET_LABEL);
    info.extend_from_slice(&step.to_be_bytes());

    let mut next = Zeroizing::new(vec![0u8; current.len()]);
    let Ok(()) = hkdf.expand(&info, &mut next) else {
        unreachable!("16 and 32 bytes are valid HKDF-SHA256 output lengths");
    };

    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> [u8; 16] {
        let mut key = [0u8; 16];
        for (i, byte) in key.iter_mut().enumerate() {
            *byte = i as u8;
        }
        key
    }

    #[test]
    fn ratchet_is_deterministic() {
        let first = ratchet_key(&test_key(), b"salt", 1).unwrap();
        let second = ratchet_key(&test_key(), b"salt", 1).unwrap();
        assert_eq!(*first, *second, "same inputs must produce same output");
    }

    #[test]
    fn ratchet_changes_the_key() {
        let next = ratchet_key(&test_key(), b"salt", 1).unwrap();
        assert_ne!(next.as_slice(), test_key().as_slice());
    }

    #[test]
    fn different_steps_produce_different_keys() {
        let step_1 = ratchet_key(&test_key(), b"salt", 1).unwrap();
        let step_2 = ratchet_key(&test_key(), b"salt", 2).unwrap();
        assert_ne!(*step_1, *step_2, "different steps must produce different keys");
    }

    #[test]
    fn different_salts_produce_different_keys() {
        let salt_a = ratchet_key(&test_key(), b"salt-a", 1).unwrap();
        let salt_b = ratchet_key(&test_key(), b"salt-b", 1).unwrap();
        assert_ne!(*salt_a, *salt_b, "different salts must produce different keys");
    }

    #[test]
    fn output_length_follows_input() {
        assert_eq!(ratchet_key(&[1u8; 16], b"", 0).unwrap().len(), 16);
        assert_eq!(ratchet_key(&[1u8; 32], b"", 0).unwrap().len(), 32);
    }

    #[test]
    fn rejects_unsupported_key_length() {
        let result = ratchet_key(&[0u8; 20], b"salt", 1);
        assert_eq!(result.err(), Some(CryptoError::InvalidKeyLength { actual: 20 }));
    }

    #[test]
    fn works_with_empty_salt() {
        let next = ratchet_key(&test_key(), &[], 1).unwrap();
        assert_eq!(next.len(), 16);
    }

    #[test]
    fn step_boundary_values() {
        let _ = ratchet_key(&test_key(), b"salt", 0).unwrap();
        let _ = ratchet_key(&test_key(), b"salt", u32::MAX).unwrap();
    }
}
