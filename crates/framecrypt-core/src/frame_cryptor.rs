//! Per-endpoint frame transform.
//!
//! A [`FrameCryptor`] is bound to one media sender or receiver and one
//! [`KeyProvider`]. Senders seal outgoing frames with the key at the current
//! key index; receivers open incoming frames with the key the frame's trailer
//! names, ratcheting forward when a sender has already moved on.
//!
//! # Per-frame checks, in order
//!
//! 1. disposed: drop
//! 2. empty frame: pass through
//! 3. frame ends with the provider's magic bytes: pass through
//! 4. disabled: drop or pass through, per the provider's discard policy
//! 5. locked after exceeding the failure tolerance: drop
//! 6. encrypt or decrypt
//!
//! # Failure tolerance
//!
//! Missing keys and seal/open failures count as consecutive failures until a
//! frame succeeds. With a tolerance of `t`, failure `t + 1` moves the cryptor
//! to `InternalError` and locks it: every later frame is dropped without
//! further events until the cryptor is re-enabled or a key is installed for
//! the ring it reads.
//!
//! # Events
//!
//! Failure states and `KeyRatcheted` are reported every time they happen.
//! `Ok` is reported only when entered from another state.

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU8, AtomicU32, Ordering},
    },
};

use tracing::{debug, trace, warn};

use crate::{
    binding::{Algorithm, EndpointBinding, MediaDirection},
    env::Environment,
    error::FrameCryptorError,
    frame::{self, SealedFrame},
    key_provider::KeyProvider,
    key_ring::KeyMaterial,
    observer::FrameCryptorObserver,
    state::{FrameCryptorState, StateChangeEvent},
    system_env::SystemEnv,
};

/// What the pipeline should do with a frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Forward these bytes instead of the input
    Transformed(Vec<u8>),
    /// Forward the input unmodified
    PassThrough,
    /// Forward nothing
    Drop,
}

impl FrameOutcome {
    /// Bytes to forward for `input`, or `None` if the frame is dropped.
    pub fn into_frame(self, input: &[u8]) -> Option<Vec<u8>> {
        match self {
            Self::Transformed(frame) => Some(frame),
            Self::PassThrough => Some(input.to_vec()),
            Self::Drop => None,
        }
    }

    /// Returns true if the frame is dropped.
    pub fn is_drop(&self) -> bool {
        matches!(self, Self::Drop)
    }
}

/// State shared between a cryptor handle and its provider's watcher list.
pub(crate) struct CryptorCore {
    id: Arc<str>,
    participant_id: Arc<str>,
    binding: EndpointBinding,
    algorithm: Algorithm,
    failure_tolerance: Option<u32>,
    observer: Arc<dyn FrameCryptorObserver>,
    enabled: AtomicBool,
    key_index: AtomicU32,
    state: AtomicU8,
    failures: AtomicU32,
    locked: AtomicBool,
    disposed: AtomicBool,
}

impl CryptorCore {
    pub(crate) fn participant_id(&self) -> &str {
        &self.participant_id
    }

    pub(crate) fn key_index(&self) -> u32 {
        self.key_index.load(Ordering::Acquire)
    }

    pub(crate) fn reset_failures(&self) {
        self.failures.store(0, Ordering::Release);
        self.locked.store(false, Ordering::Release);
    }

    /// Report a state the provider observed on this cryptor's behalf.
    ///
    /// Does not count as a frame failure.
    pub(crate) fn notify(&self, state: FrameCryptorState) {
        if self.disposed.load(Ordering::Acquire) {
            return;
        }
        self.state.store(state.to_u8(), Ordering::Release);
        self.publish(state);
    }

    fn state(&self) -> FrameCryptorState {
        FrameCryptorState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn publish(&self, state: FrameCryptorState) {
        debug!(
            frame_cryptor_id = %self.id,
            participant_id = %self.participant_id,
            direction = %self.binding.direction,
            %state,
            "frame cryptor state changed"
        );
        self.observer.on_state_change(StateChangeEvent {
            frame_cryptor_id: Arc::clone(&self.id),
            participant_id: Arc::clone(&self.participant_id),
            state,
        });
    }

    fn record_success(&self) {
        self.failures.store(0, Ordering::Release);
        let previous = self.state.swap(FrameCryptorState::Ok.to_u8(), Ordering::AcqRel);
        if previous != FrameCryptorState::Ok.to_u8() {
            self.publish(FrameCryptorState::Ok);
        }
    }

    fn record_ratchet(&self) {
        self.failures.store(0, Ordering::Release);
        self.state.store(FrameCryptorState::KeyRatcheted.to_u8(), Ordering::Release);
        self.publish(FrameCryptorState::KeyRatcheted);
    }

    /// Count a failure. Returns true if it pushed the cryptor past its
    /// tolerance.
    fn record_failure(&self, state: FrameCryptorState) -> bool {
        debug_assert!(state.is_failure(), "{state} is not a failure state");
        let failures = self
            .failures
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| Some(n.saturating_add(1)))
            .unwrap_or_else(|n| n)
            .saturating_add(1);

        match self.failure_tolerance {
            Some(tolerance) if failures > tolerance => {
                self.lock(failures);
                true
            },
            _ => {
                self.state.store(state.to_u8(), Ordering::Release);
                self.publish(state);
                false
            },
        }
    }

    /// Enter `InternalError` once; concurrent callers after the first see the
    /// lock already taken and stay silent.
    fn lock(&self, failures: u32) {
        if self.locked.swap(true, Ordering::AcqRel) {
            return;
        }

        warn!(
            frame_cryptor_id = %self.id,
            participant_id = %self.participant_id,
            failures,
            "frame cryptor exceeded failure tolerance, dropping frames until reset"
        );
        self.state.store(FrameCryptorState::InternalError.to_u8(), Ordering::Release);
        self.publish(FrameCryptorState::InternalError);
    }
}

/// Encrypts or decrypts the frames of one media endpoint.
///
/// Cloning yields another handle to the same cryptor.
pub struct FrameCryptor<E: Environment = SystemEnv> {
    core: Arc<CryptorCore>,
    key_provider: Arc<KeyProvider<E>>,
}

impl<E: Environment> FrameCryptor<E> {
    /// Create a cryptor and attach it to `key_provider`.
    ///
    /// Starts disabled at key index 0 in state `New`.
    pub(crate) fn new(
        id: String,
        binding: EndpointBinding,
        participant_id: &str,
        algorithm: Algorithm,
        key_provider: Arc<KeyProvider<E>>,
        observer: Arc<dyn FrameCryptorObserver>,
    ) -> Result<Self, FrameCryptorError> {
        let core = Arc::new(CryptorCore {
            id: Arc::from(id),
            participant_id: Arc::from(participant_id),
            binding,
            algorithm,
            failure_tolerance: key_provider.options().failure_tolerance,
            observer,
            enabled: AtomicBool::new(false),
            key_index: AtomicU32::new(0),
            state: AtomicU8::new(FrameCryptorState::New.to_u8()),
            failures: AtomicU32::new(0),
            locked: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
        });
        key_provider.register(&core)?;

        debug!(
            frame_cryptor_id = %core.id,
            participant_id,
            direction = %core.binding.direction,
            endpoint_id = %core.binding.endpoint_id,
            "frame cryptor created"
        );

        Ok(Self { core, key_provider })
    }

    /// Identifier assigned at creation.
    pub fn id(&self) -> &str {
        &self.core.id
    }

    /// Participant whose keys this cryptor uses.
    pub fn participant_id(&self) -> &str {
        &self.core.participant_id
    }

    /// Endpoint the cryptor is attached to.
    pub fn binding(&self) -> &EndpointBinding {
        &self.core.binding
    }

    /// Encrypting or decrypting.
    pub fn direction(&self) -> MediaDirection {
        self.core.binding.direction
    }

    /// Frame cipher.
    pub fn algorithm(&self) -> Algorithm {
        self.core.algorithm
    }

    /// Provider the cryptor reads keys from.
    pub fn key_provider(&self) -> &Arc<KeyProvider<E>> {
        &self.key_provider
    }

    /// Most recently entered state.
    pub fn state(&self) -> FrameCryptorState {
        self.core.state()
    }

    /// Failures since the last successful frame.
    pub fn consecutive_failures(&self) -> u32 {
        self.core.failures.load(Ordering::Acquire)
    }

    /// Returns true while the cryptor drops frames after exceeding its
    /// failure tolerance.
    pub fn is_locked(&self) -> bool {
        self.core.locked.load(Ordering::Acquire)
    }

    /// Returns true if frames are being transformed.
    pub fn enabled(&self) -> bool {
        self.core.enabled.load(Ordering::Acquire)
    }

    /// Turn transforms on or off. Enabling clears the failure counter and
    /// the lock.
    ///
    /// # Errors
    ///
    /// - `CryptorDisposed`
    pub fn set_enabled(&self, enabled: bool) -> Result<(), FrameCryptorError> {
        self.ensure_active()?;

        if enabled {
            self.core.reset_failures();
        }
        self.core.enabled.store(enabled, Ordering::Release);

        debug!(frame_cryptor_id = %self.core.id, enabled, "frame cryptor enabled flag set");
        Ok(())
    }

    /// Key index used for outgoing frames.
    pub fn key_index(&self) -> u32 {
        self.core.key_index()
    }

    /// Select the key index for frames processed from now on.
    ///
    /// # Errors
    ///
    /// - `CryptorDisposed`
    /// - `InvalidKeyIndex` if `key_index` is outside the provider's ring
    pub fn set_key_index(&self, key_index: u32) -> Result<(), FrameCryptorError> {
        self.ensure_active()?;

        let key_ring_size = self.key_provider.key_ring_size();
        if key_index as usize >= key_ring_size {
            return Err(FrameCryptorError::InvalidKeyIndex { key_index, key_ring_size });
        }

        self.core.key_index.store(key_index, Ordering::Release);
        debug!(frame_cryptor_id = %self.core.id, key_index, "frame cryptor key index set");
        Ok(())
    }

    /// Returns true once `dispose` has been called.
    pub fn is_disposed(&self) -> bool {
        self.core.disposed.load(Ordering::Acquire)
    }

    /// Detach from the provider and stop transforming. Idempotent; the
    /// provider stays usable.
    pub fn dispose(&self) {
        if self.core.disposed.swap(true, Ordering::AcqRel) {
            return;
        }

        self.core.enabled.store(false, Ordering::Release);
        self.key_provider.unregister(&self.core);
        debug!(frame_cryptor_id = %self.core.id, "frame cryptor disposed");
    }

    /// Transform one encoded frame.
    ///
    /// Never fails: problems surface as [`FrameOutcome::Drop`] or
    /// [`FrameOutcome::PassThrough`] plus a state event. Unauthenticated
    /// bytes are never forwarded as plaintext.
    pub fn transform(&self, frame: &[u8]) -> FrameOutcome {
        if self.is_disposed() {
            return FrameOutcome::Drop;
        }
        if frame.is_empty() {
            return FrameOutcome::PassThrough;
        }
        if self.key_provider.options().is_uncrypted_frame(frame) {
            trace!(frame_cryptor_id = %self.core.id, "magic bytes, frame bypasses cryptor");
            return FrameOutcome::PassThrough;
        }
        if !self.enabled() {
            return self.not_ready();
        }
        if self.is_locked() {
            return FrameOutcome::Drop;
        }

        match self.core.binding.direction {
            MediaDirection::Sender => self.encrypt(frame),
            MediaDirection::Receiver => self.decrypt(frame),
        }
    }

    fn ensure_active(&self) -> Result<(), FrameCryptorError> {
        if self.is_disposed() {
            return Err(FrameCryptorError::CryptorDisposed);
        }
        Ok(())
    }

    fn not_ready(&self) -> FrameOutcome {
        if self.key_provider.options().discard_frame_when_cryptor_not_ready {
            FrameOutcome::Drop
        } else {
            FrameOutcome::PassThrough
        }
    }

    fn encrypt(&self, frame: &[u8]) -> FrameOutcome {
        let Some(material) = self.material(self.core.key_index()) else {
            return self.on_key_unavailable();
        };

        let sif = self.key_provider.sif_trailer();
        match frame::seal(&material, frame, sif.as_deref()) {
            Ok(sealed) => {
                self.core.record_success();
                FrameOutcome::Transformed(sealed)
            },
            Err(err) => {
                warn!(
                    frame_cryptor_id = %self.core.id,
                    key_index = material.key_index(),
                    error = %err,
                    "frame encryption failed"
                );
                self.on_failure(FrameCryptorState::EncryptionFailed)
            },
        }
    }

    fn decrypt(&self, frame: &[u8]) -> FrameOutcome {
        let sif = self.key_provider.sif_trailer();
        let body = frame::strip_sif(frame, sif.as_deref());

        let sealed = match SealedFrame::parse(body) {
            Ok(sealed) => sealed,
            Err(err) => {
                debug!(frame_cryptor_id = %self.core.id, error = %err, "malformed encrypted frame");
                return self.on_failure(FrameCryptorState::DecryptionFailed);
            },
        };

        let key_index = u32::from(sealed.key_index());
        if key_index as usize >= self.key_provider.key_ring_size() {
            debug!(
                frame_cryptor_id = %self.core.id,
                key_index,
                "frame names key index outside ring"
            );
            return self.on_failure(FrameCryptorState::DecryptionFailed);
        }

        let Some(material) = self.material(key_index) else {
            return self.on_key_unavailable();
        };

        match frame::open(&material, &sealed) {
            Ok(plaintext) => {
                self.core.record_success();
                FrameOutcome::Transformed(plaintext)
            },
            Err(err) if err.is_authentication_failure() => {
                self.recover_with_ratchet(&material, &sealed)
            },
            Err(_) => self.on_failure(FrameCryptorState::DecryptionFailed),
        }
    }

    /// Sender moved to a ratcheted key we have not derived yet: walk the
    /// ratchet window from our key and keep the first one that opens.
    fn recover_with_ratchet(
        &self,
        material: &Arc<KeyMaterial>,
        sealed: &SealedFrame<'_>,
    ) -> FrameOutcome {
        let recovered = self.key_provider.ratchet_forward(
            &self.core.participant_id,
            material,
            |candidate| frame::open(candidate, sealed).ok(),
        );

        match recovered {
            Some(plaintext) => {
                self.core.record_ratchet();
                FrameOutcome::Transformed(plaintext)
            },
            None => self.on_failure(FrameCryptorState::DecryptionFailed),
        }
    }

    /// Key snapshot for `key_index`, or `None` when missing or when the
    /// provider is gone (the latter already reported).
    fn material(&self, key_index: u32) -> Option<Arc<KeyMaterial>> {
        match self.key_provider.lookup(&self.core.participant_id, key_index) {
            Ok(material) => material,
            Err(_) => {
                self.core.lock(self.consecutive_failures());
                None
            },
        }
    }

    fn on_key_unavailable(&self) -> FrameOutcome {
        if self.is_locked() {
            return FrameOutcome::Drop;
        }
        if self.core.record_failure(FrameCryptorState::MissingKey) {
            return FrameOutcome::Drop;
        }
        self.not_ready()
    }

    fn on_failure(&self, state: FrameCryptorState) -> FrameOutcome {
        self.core.record_failure(state);
        FrameOutcome::Drop
    }
}

impl<E: Environment> Clone for FrameCryptor<E> {
    fn clone(&self) -> Self {
        Self { core: Arc::clone(&self.core), key_provider: Arc::clone(&self.key_provider) }
    }
}

impl<E: Environment> fmt::Debug for FrameCryptor<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameCryptor")
            .field("id", &self.core.id)
            .field("participant_id", &self.core.participant_id)
            .field("binding", &self.core.binding)
            .field("enabled", &self.enabled())
            .field("key_index", &self.key_index())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
