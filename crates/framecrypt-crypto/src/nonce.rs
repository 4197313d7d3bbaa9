//! Per-key nonce sequences
//!
//! AES-GCM loses confidentiality and authenticity the moment a nonce repeats
//! under the same key. Every installed key therefore owns exactly one
//! [`NonceSequence`], and every sealed frame draws a fresh value from it.
//!
//! # Structure
//!
//! ```text
//! bytes 0-3:  prefix  (key index ‖ 3 random bytes, fixed per sequence)
//! bytes 4-11: counter (big-endian, atomically incremented)
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::CryptoError;

/// Size of an AES-GCM nonce (IV).
pub const NONCE_SIZE: usize = 12;

/// Size of the fixed nonce prefix.
pub const NONCE_PREFIX_SIZE: usize = 4;

/// Monotonic nonce source bound to a single key.
///
/// Safe to share across threads: concurrent callers never observe the same
/// counter value.
#[derive(Debug)]
pub struct NonceSequence {
    prefix: [u8; NONCE_PREFIX_SIZE],
    counter: AtomicU64,
}

impl NonceSequence {
    /// Create a sequence starting at counter 0.
    pub fn new(prefix: [u8; NONCE_PREFIX_SIZE]) -> Self {
        Self::resume(prefix, 0)
    }

    /// Create a sequence whose next nonce uses `counter`.
    pub fn resume(prefix: [u8; NONCE_PREFIX_SIZE], counter: u64) -> Self {
        Self { prefix, counter: AtomicU64::new(counter) }
    }

    /// Fixed prefix shared by every nonce of this sequence.
    pub fn prefix(&self) -> [u8; NONCE_PREFIX_SIZE] {
        self.prefix
    }

    /// Counter value the next call to [`advance`](Self::advance) will use.
    pub fn position(&self) -> u64 {
        self.counter.load(Ordering::Acquire)
    }

    /// Issue the next nonce.
    ///
    /// # Errors
    ///
    /// - `NonceExhausted` once the counter reaches `u64::MAX`. The sequence
    ///   never wraps; the key must be replaced.
    pub fn advance(&self) -> Result<[u8; NONCE_SIZE], CryptoError> {
        let counter = self
            .counter
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| current.checked_add(1))
            .map_err(|issued| CryptoError::NonceExhausted { issued })?;

        let mut nonce = [0u8; NONCE_SIZE];
        nonce[..NONCE_PREFIX_SIZE].copy_from_slice(&self.prefix);
        nonce[NONCE_PREFIX_SIZE..].copy_from_slice(&counter.to_be_bytes());
        Ok(nonce)
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::HashSet, sync::Arc, thread};

    use super::*;

    #[test]
    fn nonce_structure() {
        let sequence = NonceSequence::resume([0x01, 0x02, 0x03, 0x04], 0x0506_0708_090A_0B0C);
        let nonce = sequence.advance().unwrap();

        assert_eq!(nonce, [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0A, 0x0B, 0x0C]);
    }

    #[test]
    fn advance_increments_counter() {
        let sequence = NonceSequence::new([0; NONCE_PREFIX_SIZE]);
        assert_eq!(sequence.position(), 0);

        let first = sequence.advance().unwrap();
        let second = sequence.advance().unwrap();

        assert_eq!(sequence.position(), 2);
        assert_ne!(first, second);
        assert_eq!(&second[NONCE_PREFIX_SIZE..], &1u64.to_be_bytes());
    }

    #[test]
    fn exhausted_sequence_refuses_to_wrap() {
        let sequence = NonceSequence::resume([9; NONCE_PREFIX_SIZE], u64::MAX - 1);

        assert!(sequence.advance().is_ok());
        assert_eq!(sequence.advance(), Err(CryptoError::NonceExhausted { issued: u64::MAX }));
        assert_eq!(sequence.advance(), Err(CryptoError::NonceExhausted { issued: u64::MAX }));
    }

    #[test]
    fn concurrent_callers_never_share_a_nonce() {
        let sequence = Arc::new(NonceSequence::new([0xAA; NONCE_PREFIX_SIZE]));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let sequence = Arc::clone(&sequence);
                thread::spawn(move || {
                    (0..2_000).map(|_| sequence.advance().unwrap()).collect::<Vec<_>>()
                })
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for nonce in handle.join().unwrap() {
                assert!(seen.insert(nonce), "nonce issued twice");
            }
        }
        assert_eq!(seen.len(), 16_000);
    }
}
