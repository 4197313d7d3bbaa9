//! Construction of key providers and frame cryptors.

use std::sync::Arc;

use crate::{
    binding::{Algorithm, EndpointBinding},
    env::{Environment, random_id},
    error::FrameCryptorError,
    frame_cryptor::FrameCryptor,
    key_provider::KeyProvider,
    observer::FrameCryptorObserver,
    options::KeyProviderOptions,
    system_env::SystemEnv,
};

/// Builds providers and cryptors that share one environment.
#[derive(Debug, Clone, Default)]
pub struct FrameCryptorFactory<E: Environment = SystemEnv> {
    env: E,
}

impl FrameCryptorFactory<SystemEnv> {
    /// Factory drawing randomness from the OS.
    pub fn new() -> Self {
        Self::with_env(SystemEnv::new())
    }
}

impl<E: Environment> FrameCryptorFactory<E> {
    /// Factory drawing randomness from `env`.
    pub fn with_env(env: E) -> Self {
        Self { env }
    }

    /// Environment handed to everything this factory builds.
    pub fn env(&self) -> &E {
        &self.env
    }

    /// Create a key provider.
    ///
    /// # Errors
    ///
    /// - `InvalidConfiguration` if `options` fail validation
    pub fn create_key_provider(
        &self,
        options: KeyProviderOptions,
    ) -> Result<Arc<KeyProvider<E>>, FrameCryptorError> {
        KeyProvider::new(options, self.env.clone()).map(Arc::new)
    }

    /// Create a cryptor for `binding` reading `participant_id`'s keys from
    /// `key_provider`.
    ///
    /// # Errors
    ///
    /// - `ProviderDisposed` if `key_provider` has been disposed
    pub fn create_frame_cryptor(
        &self,
        binding: EndpointBinding,
        participant_id: &str,
        algorithm: Algorithm,
        key_provider: &Arc<KeyProvider<E>>,
        observer: Arc<dyn FrameCryptorObserver>,
    ) -> Result<FrameCryptor<E>, FrameCryptorError> {
        FrameCryptor::new(
            random_id(&self.env),
            binding,
            participant_id,
            algorithm,
            Arc::clone(key_provider),
            observer,
        )
    }

    /// Create a cryptor that encrypts the frames of media sender
    /// `sender_id`.
    pub fn create_frame_cryptor_for_sender(
        &self,
        sender_id: &str,
        participant_id: &str,
        algorithm: Algorithm,
        key_provider: &Arc<KeyProvider<E>>,
        observer: Arc<dyn FrameCryptorObserver>,
    ) -> Result<FrameCryptor<E>, FrameCryptorError> {
        self.create_frame_cryptor(
            EndpointBinding::sender(sender_id),
            participant_id,
            algorithm,
            key_provider,
            observer,
        )
    }

    /// Create a cryptor that decrypts the frames of media receiver
    /// `receiver_id`.
    pub fn create_frame_cryptor_for_receiver(
        &self,
        receiver_id: &str,
        participant_id: &str,
        algorithm: Algorithm,
        key_provider: &Arc<KeyProvider<E>>,
        observer: Arc<dyn FrameCryptorObserver>,
    ) -> Result<FrameCryptor<E>, FrameCryptorError> {
        self.create_frame_cryptor(
            EndpointBinding::receiver(receiver_id),
            participant_id,
            algorithm,
            key_provider,
            observer,
        )
    }
}
