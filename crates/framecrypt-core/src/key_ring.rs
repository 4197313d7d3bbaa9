//! Key material snapshots and fixed-size key rings.
//!
//! A [`KeyRing`] holds one slot per key index. Each slot carries an immutable
//! [`KeyMaterial`] snapshot behind an `Arc`: readers clone the `Arc` under a
//! short read lock and run the cipher outside it, writers swap in a new
//! snapshot. A transform that started before a key was replaced finishes with
//! the snapshot it loaded.
//!
//! # Invariants
//!
//! - A ring never changes size after construction.
//! - Snapshots draw nonces from the sequence of the slot they were built
//!   for. The sequence outlives every snapshot, so replacing or re-installing
//!   a key never restarts the counter.

use std::{fmt, sync::Arc};

use framecrypt_crypto::{FrameKey, NONCE_PREFIX_SIZE, NONCE_SIZE, NonceSequence};
use parking_lot::RwLock;

use crate::error::FrameCryptorError;

/// The ring a key operation resolved to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum KeyScope {
    /// The provider-wide shared ring
    Shared,
    /// A participant's own ring
    Participant(String),
}

impl fmt::Display for KeyScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Shared => f.write_str("shared key ring"),
            Self::Participant(id) => write!(f, "key ring of participant {id}"),
        }
    }
}

/// An installed or ratcheted key.
///
/// Immutable once built. Dropping the last reference zeroizes the raw bytes.
pub struct KeyMaterial {
    key: FrameKey,
    key_index: u8,
    ratchet_step: u32,
    nonces: Arc<NonceSequence>,
}

impl KeyMaterial {
    /// Build a snapshot drawing nonces from `nonces`.
    ///
    /// The snapshot belongs to the slot named by the first prefix byte.
    pub(crate) fn new(key: FrameKey, ratchet_step: u32, nonces: Arc<NonceSequence>) -> Self {
        let key_index = nonces.prefix()[0];
        Self { key, key_index, ratchet_step, nonces }
    }

    /// Raw key bytes.
    pub fn raw(&self) -> &[u8] {
        self.key.raw()
    }

    /// Slot this key was installed at.
    pub fn key_index(&self) -> u8 {
        self.key_index
    }

    /// Ratchet steps since the key was installed.
    pub fn ratchet_step(&self) -> u32 {
        self.ratchet_step
    }

    /// Nonces issued for this slot so far, by this and earlier snapshots.
    pub fn nonces_issued(&self) -> u64 {
        self.nonces.position()
    }

    pub(crate) fn key(&self) -> &FrameKey {
        &self.key
    }

    pub(crate) fn next_nonce(&self) -> Result<[u8; NONCE_SIZE], framecrypt_crypto::CryptoError> {
        self.nonces.advance()
    }
}

/// Nonce sequence for slot `key_index`.
///
/// The prefix is the key index followed by `entropy`, so slots never share a
/// nonce space.
pub(crate) fn slot_nonces(key_index: u8, entropy: [u8; NONCE_PREFIX_SIZE - 1]) -> NonceSequence {
    let mut prefix = [0u8; NONCE_PREFIX_SIZE];
    prefix[0] = key_index;
    prefix[1..].copy_from_slice(&entropy);
    NonceSequence::new(prefix)
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("key_index", &self.key_index)
            .field("ratchet_step", &self.ratchet_step)
            .field("key_len", &self.key.key_len())
            .field("nonces_issued", &self.nonces_issued())
            .finish_non_exhaustive()
    }
}

type Slot = RwLock<Option<Arc<KeyMaterial>>>;

/// Replacement snapshot plus the caller's result, from [`KeyRing::update`].
pub(crate) type SlotUpdate<T> = Result<(Arc<KeyMaterial>, T), FrameCryptorError>;

/// Fixed-capacity storage of key snapshots, one slot per key index.
pub struct KeyRing {
    slots: Box<[Slot]>,
}

impl KeyRing {
    /// Create a ring of `size` empty slots.
    pub fn new(size: usize) -> Self {
        Self { slots: (0..size).map(|_| RwLock::new(None)).collect() }
    }

    /// Number of slots.
    pub fn size(&self) -> usize {
        self.slots.len()
    }

    /// Snapshot at `index`, if the slot exists and holds a key.
    pub fn get(&self, index: usize) -> Option<Arc<KeyMaterial>> {
        self.slots.get(index)?.read().clone()
    }

    /// Number of slots holding a key.
    pub fn occupied(&self) -> usize {
        self.slots.iter().filter(|slot| slot.read().is_some()).count()
    }

    /// Install `material` at `index`, returning the snapshot it replaced.
    pub(crate) fn set(&self, index: usize, material: Arc<KeyMaterial>) -> Option<Arc<KeyMaterial>> {
        self.slots.get(index).and_then(|slot| slot.write().replace(material))
    }

    /// Replace the snapshot at `index` only if it is still `expected`.
    ///
    /// Returns false if another writer got there first; the caller's
    /// replacement is discarded in that case.
    pub(crate) fn replace_if_current(
        &self,
        index: usize,
        expected: &Arc<KeyMaterial>,
        replacement: Arc<KeyMaterial>,
    ) -> bool {
        let Some(slot) = self.slots.get(index) else {
            return false;
        };

        let mut guard = slot.write();
        match guard.as_ref() {
            Some(current) if Arc::ptr_eq(current, expected) => {
                *guard = Some(replacement);
                true
            },
            _ => false,
        }
    }

    /// Rewrite the slot at `index` under its write lock.
    ///
    /// `update` sees the current snapshot and returns the replacement. The
    /// lock is held for the whole call, so concurrent updates of one slot
    /// serialize and none of them is lost.
    pub(crate) fn update<T>(
        &self,
        index: usize,
        update: impl FnOnce(Option<&Arc<KeyMaterial>>) -> SlotUpdate<T>,
    ) -> Result<T, FrameCryptorError> {
        let slot = self.slots.get(index).ok_or(FrameCryptorError::InvalidKeyIndex {
            key_index: index as u32,
            key_ring_size: self.slots.len(),
        })?;

        let mut guard = slot.write();
        let (replacement, result) = update(guard.as_ref())?;
        *guard = Some(replacement);
        Ok(result)
    }

    /// Empty every slot.
    pub(crate) fn clear(&self) {
        for slot in &self.slots {
            *slot.write() = None;
        }
    }
}

impl fmt::Debug for KeyRing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyRing")
            .field("size", &self.size())
            .field("occupied", &self.occupied())
            .finish()
    }
}
