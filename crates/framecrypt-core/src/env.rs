//! Environment abstraction for deterministic testing.
//!
//! Decouples the engine from system randomness. Nonce prefixes and cryptor /
//! provider identifiers are drawn from the environment, so tests can run with
//! a seeded RNG and production uses the OS RNG.

/// Abstract environment providing randomness.
///
/// # Safety
///
/// Implementations MUST guarantee:
///
/// - `random_bytes()` uses cryptographically secure entropy in production
/// - Methods are infallible except in exceptional circumstances (e.g., OS
///   entropy exhaustion)
pub trait Environment: Clone + Send + Sync + 'static {
    /// Fills the provided buffer with random bytes.
    ///
    /// # Invariants
    ///
    /// - Given the same RNG seed, this produces the same sequence of bytes
    /// - Uses cryptographically secure RNG
    fn random_bytes(&self, buffer: &mut [u8]);
}

/// Generate a version-4 UUID string from environment randomness.
pub(crate) fn random_id<E: Environment>(env: &E) -> String {
    let mut bytes = [0u8; 16];
    env.random_bytes(&mut bytes);
    uuid::Builder::from_random_bytes(bytes).into_uuid().to_string()
}
