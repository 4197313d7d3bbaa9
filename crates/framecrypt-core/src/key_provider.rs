//! Key provider: key rings, ratcheting and key export.
//!
//! A provider owns one [`KeyRing`] per participant plus a shared ring, and
//! every frame cryptor created from it looks its keys up here. Key lookups
//! resolve as follows:
//!
//! - shared-key mode: always the shared ring
//! - per-participant mode: the participant's ring if one exists, otherwise
//!   the shared ring, so a shared key serves participants without their own
//!
//! # Watchers
//!
//! The provider keeps weak references to its cryptors. Installing a key
//! resets the failure counter and lock of every cryptor whose lookups resolve
//! to the written ring. Ratcheting a slot notifies the cryptors currently
//! using that slot. Observer callbacks run after all provider locks are
//! released, so an observer may call back into the provider.
//!
//! # Nonces
//!
//! Each key index has one nonce sequence for the lifetime of the provider,
//! shared by the same slot of every ring. Installing, re-installing or
//! ratcheting a key never restarts a counter, so no IV is issued twice by a
//! provider whatever keys it holds.
//!
//! # Disposal
//!
//! `dispose` is idempotent. It drops every ring, which zeroizes key material
//! once in-flight transforms release their snapshots, and makes every later
//! operation fail with `ProviderDisposed`.

use std::{
    collections::HashMap,
    fmt,
    marker::PhantomData,
    ptr,
    sync::{
        Arc, Weak,
        atomic::{AtomicBool, Ordering},
    },
};

use framecrypt_crypto::{FrameKey, NONCE_PREFIX_SIZE, NonceSequence};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};
use zeroize::Zeroizing;

use crate::{
    env::Environment,
    error::FrameCryptorError,
    frame_cryptor::CryptorCore,
    key_ring::{KeyMaterial, KeyRing, KeyScope, slot_nonces},
    options::{KeyInput, KeyProviderOptions},
    state::FrameCryptorState,
    system_env::SystemEnv,
};

/// Owner of the key rings a group of frame cryptors encrypts with.
pub struct KeyProvider<E: Environment = SystemEnv> {
    // Only consulted at construction, for the nonce prefixes.
    env: PhantomData<fn() -> E>,
    options: KeyProviderOptions,
    nonces: Box<[Arc<NonceSequence>]>,
    shared_ring: Arc<KeyRing>,
    participant_rings: RwLock<HashMap<String, Arc<KeyRing>>>,
    sif_trailer: RwLock<Option<Arc<[u8]>>>,
    watchers: Mutex<Vec<Weak<CryptorCore>>>,
    disposed: AtomicBool,
}

impl<E: Environment> KeyProvider<E> {
    /// Create a provider with validated options.
    ///
    /// # Errors
    ///
    /// - `InvalidConfiguration` if `options` fail validation
    pub fn new(options: KeyProviderOptions, env: E) -> Result<Self, FrameCryptorError> {
        options.validate()?;

        info!(
            shared_key = options.shared_key,
            key_ring_size = options.key_ring_size,
            ratchet_window_size = options.ratchet_window_size,
            failure_tolerance = ?options.failure_tolerance,
            "key provider created"
        );

        let nonces = (0..options.key_ring_size)
            .map(|index| {
                let mut entropy = [0u8; NONCE_PREFIX_SIZE - 1];
                env.random_bytes(&mut entropy);
                Arc::new(slot_nonces(index as u8, entropy))
            })
            .collect();

        Ok(Self {
            env: PhantomData,
            nonces,
            shared_ring: Arc::new(KeyRing::new(options.key_ring_size)),
            options,
            participant_rings: RwLock::new(HashMap::new()),
            sif_trailer: RwLock::new(None),
            watchers: Mutex::new(Vec::new()),
            disposed: AtomicBool::new(false),
        })
    }

    /// Create a provider whose nonce sequences resume at `counter`.
    #[cfg(test)]
    pub(crate) fn with_nonce_counter(
        options: KeyProviderOptions,
        env: E,
        counter: u64,
    ) -> Result<Self, FrameCryptorError> {
        let mut provider = Self::new(options, env)?;
        provider.nonces = provider
            .nonces
            .iter()
            .map(|nonces| Arc::new(NonceSequence::resume(nonces.prefix(), counter)))
            .collect();
        Ok(provider)
    }

    /// Options the provider was created with.
    pub fn options(&self) -> &KeyProviderOptions {
        &self.options
    }

    /// Slots per key ring.
    pub fn key_ring_size(&self) -> usize {
        self.options.key_ring_size
    }

    /// Returns true once `dispose` has been called.
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Install `key` at `key_index` of the shared ring.
    ///
    /// # Errors
    ///
    /// - `ProviderDisposed`, `InvalidKeyIndex`, `InvalidBase64`,
    ///   `InvalidKeyLength`
    pub fn set_shared_key(
        &self,
        key: impl Into<KeyInput>,
        key_index: u32,
    ) -> Result<(), FrameCryptorError> {
        self.ensure_active()?;
        self.install(&self.shared_ring, key.into(), key_index)?;

        debug!(key_index, "shared key installed");
        self.reset_watchers_of(&self.shared_ring);
        Ok(())
    }

    /// Install `key` at `key_index` for `participant_id`.
    ///
    /// In shared-key mode this writes the shared ring.
    ///
    /// # Errors
    ///
    /// - `ProviderDisposed`, `InvalidKeyIndex`, `InvalidBase64`,
    ///   `InvalidKeyLength`
    pub fn set_key(
        &self,
        participant_id: &str,
        key: impl Into<KeyInput>,
        key_index: u32,
    ) -> Result<(), FrameCryptorError> {
        self.ensure_active()?;
        let key = key.into();

        let ring = if self.options.shared_key {
            Arc::clone(&self.shared_ring)
        } else {
            self.check_index(key_index)?;
            let mut rings = self.participant_rings.write();
            let ring = rings
                .entry(participant_id.to_owned())
                .or_insert_with(|| Arc::new(KeyRing::new(self.options.key_ring_size)));
            Arc::clone(ring)
        };

        self.install(&ring, key, key_index)?;

        // Lost a race with dispose: the ring may have been re-created after
        // the provider dropped its rings.
        if self.is_disposed() {
            ring.clear();
            return Err(FrameCryptorError::ProviderDisposed);
        }

        debug!(participant_id, key_index, "participant key installed");
        self.reset_watchers_of(&ring);
        Ok(())
    }

    /// Advance the shared key at `key_index` one ratchet step.
    ///
    /// Returns the new raw key.
    ///
    /// # Errors
    ///
    /// - `ProviderDisposed`, `InvalidKeyIndex`
    /// - `MissingKey` if the slot is empty
    /// - `RatchetWindowExhausted` once the key is `ratchet_window_size` steps
    ///   past its installed value
    pub fn ratchet_shared_key(
        &self,
        key_index: u32,
    ) -> Result<Zeroizing<Vec<u8>>, FrameCryptorError> {
        self.ensure_active()?;
        let ring = Arc::clone(&self.shared_ring);
        self.ratchet_in(&ring, key_index, || KeyScope::Shared)
    }

    /// Advance the key `participant_id` resolves to at `key_index` one
    /// ratchet step.
    ///
    /// Returns the new raw key.
    ///
    /// # Errors
    ///
    /// Same as [`ratchet_shared_key`](Self::ratchet_shared_key).
    pub fn ratchet_key(
        &self,
        participant_id: &str,
        key_index: u32,
    ) -> Result<Zeroizing<Vec<u8>>, FrameCryptorError> {
        self.ensure_active()?;
        let ring = self.ring_for(participant_id);
        self.ratchet_in(&ring, key_index, || self.scope_for(participant_id))
    }

    /// Current raw shared key at `key_index`.
    ///
    /// # Errors
    ///
    /// - `ProviderDisposed`, `InvalidKeyIndex`, `MissingKey`
    pub fn export_shared_key(
        &self,
        key_index: u32,
    ) -> Result<Zeroizing<Vec<u8>>, FrameCryptorError> {
        self.ensure_active()?;
        let index = self.check_index(key_index)?;

        self.shared_ring
            .get(index)
            .map(|material| Zeroizing::new(material.raw().to_vec()))
            .ok_or(FrameCryptorError::MissingKey { scope: KeyScope::Shared, key_index })
    }

    /// Current raw key `participant_id` resolves to at `key_index`.
    ///
    /// # Errors
    ///
    /// - `ProviderDisposed`, `InvalidKeyIndex`, `MissingKey`
    pub fn export_key(
        &self,
        participant_id: &str,
        key_index: u32,
    ) -> Result<Zeroizing<Vec<u8>>, FrameCryptorError> {
        self.ensure_active()?;
        let index = self.check_index(key_index)?;

        match self.ring_for(participant_id).get(index) {
            Some(material) => Ok(Zeroizing::new(material.raw().to_vec())),
            None => Err(FrameCryptorError::MissingKey {
                scope: self.scope_for(participant_id),
                key_index,
            }),
        }
    }

    /// Set the trailer appended to every encrypted frame. An empty trailer
    /// clears it.
    ///
    /// # Errors
    ///
    /// - `ProviderDisposed`
    pub fn set_sif_trailer(&self, trailer: &[u8]) -> Result<(), FrameCryptorError> {
        self.ensure_active()?;

        let trailer = (!trailer.is_empty()).then(|| Arc::<[u8]>::from(trailer));
        debug!(len = trailer.as_ref().map_or(0, |t| t.len()), "SIF trailer updated");
        *self.sif_trailer.write() = trailer;
        Ok(())
    }

    /// Current SIF trailer.
    pub fn sif_trailer(&self) -> Option<Arc<[u8]>> {
        self.sif_trailer.read().clone()
    }

    /// Number of participants with their own key ring.
    pub fn participant_count(&self) -> usize {
        self.participant_rings.read().len()
    }

    /// Number of live frame cryptors attached to this provider.
    pub fn watcher_count(&self) -> usize {
        self.watchers.lock().iter().filter(|watcher| watcher.strong_count() > 0).count()
    }

    /// Drop all key material and detach every cryptor.
    ///
    /// Idempotent.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }

        // Hold the watcher lock so no cryptor registers mid-disposal.
        let mut watchers = self.watchers.lock();
        self.participant_rings.write().clear();
        self.shared_ring.clear();
        *self.sif_trailer.write() = None;
        watchers.clear();
        drop(watchers);

        info!("key provider disposed");
    }

    /// Snapshot `participant_id` encrypts or decrypts with at `key_index`.
    pub(crate) fn lookup(
        &self,
        participant_id: &str,
        key_index: u32,
    ) -> Result<Option<Arc<KeyMaterial>>, FrameCryptorError> {
        self.ensure_active()?;
        let material = self.ring_for(participant_id).get(key_index as usize);

        // An empty slot may be a ring cleared by a concurrent dispose.
        if material.is_none() {
            self.ensure_active()?;
        }
        Ok(material)
    }

    /// Try successive ratchet steps of `current` until `attempt` succeeds.
    ///
    /// Derives at most `ratchet_window_size - step` keys. The first key
    /// `attempt` accepts replaces `current` in its slot, unless another
    /// writer replaced the slot in the meantime; the attempt's result is
    /// returned either way.
    pub(crate) fn ratchet_forward<T>(
        &self,
        participant_id: &str,
        current: &Arc<KeyMaterial>,
        mut attempt: impl FnMut(&KeyMaterial) -> Option<T>,
    ) -> Option<T> {
        let window_size = self.options.ratchet_window_size;
        if current.ratchet_step() >= window_size {
            return None;
        }

        let mut previous: Option<KeyMaterial> = None;
        for step in current.ratchet_step() + 1..=window_size {
            let base = previous.as_ref().map_or_else(|| current.key(), KeyMaterial::key);
            let key = base.ratchet(&self.options.ratchet_salt, step).ok()?;
            let candidate = self.new_material(key, current.key_index(), step);

            if let Some(result) = attempt(&candidate) {
                let installed = self.ring_for(participant_id).replace_if_current(
                    usize::from(current.key_index()),
                    current,
                    Arc::new(candidate),
                );
                debug!(
                    participant_id,
                    key_index = current.key_index(),
                    ratchet_step = step,
                    installed,
                    "receiver ratcheted key forward"
                );
                return Some(result);
            }

            previous = Some(candidate);
        }

        None
    }

    pub(crate) fn register(&self, cryptor: &Arc<CryptorCore>) -> Result<(), FrameCryptorError> {
        let mut watchers = self.watchers.lock();
        self.ensure_active()?;

        watchers.retain(|watcher| watcher.strong_count() > 0);
        watchers.push(Arc::downgrade(cryptor));
        Ok(())
    }

    pub(crate) fn unregister(&self, cryptor: &CryptorCore) {
        self.watchers
            .lock()
            .retain(|watcher| watcher.strong_count() > 0 && !ptr::eq(watcher.as_ptr(), cryptor));
    }

    fn ensure_active(&self) -> Result<(), FrameCryptorError> {
        if self.is_disposed() {
            return Err(FrameCryptorError::ProviderDisposed);
        }
        Ok(())
    }

    fn check_index(&self, key_index: u32) -> Result<usize, FrameCryptorError> {
        let index = key_index as usize;
        if index >= self.options.key_ring_size {
            return Err(FrameCryptorError::InvalidKeyIndex {
                key_index,
                key_ring_size: self.options.key_ring_size,
            });
        }
        Ok(index)
    }

    fn ring_for(&self, participant_id: &str) -> Arc<KeyRing> {
        if self.options.shared_key {
            return Arc::clone(&self.shared_ring);
        }

        match self.participant_rings.read().get(participant_id) {
            Some(ring) => Arc::clone(ring),
            None => Arc::clone(&self.shared_ring),
        }
    }

    fn scope_for(&self, participant_id: &str) -> KeyScope {
        if self.options.shared_key || !self.participant_rings.read().contains_key(participant_id) {
            KeyScope::Shared
        } else {
            KeyScope::Participant(participant_id.to_owned())
        }
    }

    fn new_material(&self, key: FrameKey, key_index: u8, ratchet_step: u32) -> KeyMaterial {
        let nonces = Arc::clone(&self.nonces[usize::from(key_index)]);
        KeyMaterial::new(key, ratchet_step, nonces)
    }

    fn install(
        &self,
        ring: &KeyRing,
        key: KeyInput,
        key_index: u32,
    ) -> Result<(), FrameCryptorError> {
        let index = self.check_index(key_index)?;
        let raw = key.into_bytes()?;
        let key = FrameKey::new(&raw)?;

        ring.set(index, Arc::new(self.new_material(key, index as u8, 0)));
        Ok(())
    }

    fn ratchet_in(
        &self,
        ring: &Arc<KeyRing>,
        key_index: u32,
        scope: impl FnOnce() -> KeyScope,
    ) -> Result<Zeroizing<Vec<u8>>, FrameCryptorError> {
        let index = self.check_index(key_index)?;
        let window_size = self.options.ratchet_window_size;

        let ratcheted = ring.update(index, |current| {
            let Some(current) = current else {
                return Err(FrameCryptorError::MissingKey { scope: scope(), key_index });
            };

            let step = current.ratchet_step();
            if step >= window_size {
                return Err(FrameCryptorError::RatchetWindowExhausted { step, window_size });
            }

            let key = current.key().ratchet(&self.options.ratchet_salt, step + 1)?;
            let material = Arc::new(self.new_material(key, current.key_index(), step + 1));
            let raw = Zeroizing::new(material.raw().to_vec());
            Ok((material, (raw, step + 1)))
        });

        match ratcheted {
            Ok((raw, ratchet_step)) => {
                debug!(key_index, ratchet_step, "key ratcheted");
                self.notify_watchers_of(ring, key_index, FrameCryptorState::KeyRatcheted);
                Ok(raw)
            },
            Err(err @ FrameCryptorError::MissingKey { .. }) => {
                self.notify_watchers_of(ring, key_index, FrameCryptorState::MissingKey);
                Err(err)
            },
            Err(err) => Err(err),
        }
    }

    /// Live cryptors whose lookups resolve to `ring`.
    ///
    /// Collected before any callback runs, so no provider lock is held while
    /// observers execute.
    fn watchers_of(&self, ring: &Arc<KeyRing>) -> Vec<Arc<CryptorCore>> {
        let live: Vec<Arc<CryptorCore>> = {
            let mut watchers = self.watchers.lock();
            watchers.retain(|watcher| watcher.strong_count() > 0);
            watchers.iter().filter_map(Weak::upgrade).collect()
        };

        live.into_iter()
            .filter(|cryptor| Arc::ptr_eq(&self.ring_for(cryptor.participant_id()), ring))
            .collect()
    }

    fn reset_watchers_of(&self, ring: &Arc<KeyRing>) {
        for cryptor in self.watchers_of(ring) {
            cryptor.reset_failures();
        }
    }

    fn notify_watchers_of(&self, ring: &Arc<KeyRing>, key_index: u32, state: FrameCryptorState) {
        for cryptor in self.watchers_of(ring) {
            if cryptor.key_index() == key_index {
                cryptor.notify(state);
            }
        }
    }
}

impl<E: Environment> fmt::Debug for KeyProvider<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyProvider")
            .field("options", &self.options)
            .field("participants", &self.participant_count())
            .field("disposed", &self.is_disposed())
            .finish_non_exhaustive()
    }
}
