//! Production Environment implementation using the OS RNG.
//!
//! `SystemEnv` is the production implementation of the Environment trait.
//! Randomness comes from getrandom: truly random, not reproducible.

use crate::env::Environment;

/// Production environment using cryptographic RNG.
///
/// # Security
///
/// The RNG uses getrandom which provides OS-level cryptographic randomness
/// (e.g., /dev/urandom on Linux, `BCryptGenRandom` on Windows). Suitable for
/// nonce prefixes and identifiers.
///
/// # Panics
///
/// Panics if the OS RNG fails. A cryptor without functioning cryptographic
/// randomness cannot guarantee nonce separation between key installs.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemEnv;

impl SystemEnv {
    /// Create a new system environment.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Environment for SystemEnv {
    #[allow(clippy::expect_used)]
    fn random_bytes(&self, buffer: &mut [u8]) {
        getrandom::fill(buffer)
            .expect("invariant: OS RNG failure is unrecoverable - nonces cannot be separated");
    }
}
