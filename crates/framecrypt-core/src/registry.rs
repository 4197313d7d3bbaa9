//! String-keyed ownership of providers and cryptors.
//!
//! Host bindings address objects by id. The registry owns every provider and
//! cryptor it creates and maps the host-level operations onto typed calls.
//! All cryptors share the registry's observer; events carry the cryptor id.

use std::{collections::HashMap, sync::Arc};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use zeroize::Zeroizing;

use crate::{
    binding::{Algorithm, EndpointBinding, MediaDirection},
    env::{Environment, random_id},
    error::FrameCryptorError,
    factory::FrameCryptorFactory,
    frame_cryptor::FrameCryptor,
    key_provider::KeyProvider,
    observer::FrameCryptorObserver,
    options::{KeyInput, KeyProviderConfig, KeyProviderOptions},
    system_env::SystemEnv,
};

/// Typed request to create a frame cryptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameCryptorParams {
    /// Provider the cryptor reads keys from
    pub key_provider_id: String,
    /// Participant whose keys are used
    pub participant_id: String,
    /// Media endpoint and direction
    pub binding: EndpointBinding,
    /// Frame cipher
    pub algorithm: Algorithm,
}

/// Frame cryptor request in the host's JSON shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameCryptorConfig {
    /// Provider the cryptor reads keys from
    pub key_provider_id: String,
    /// Participant whose keys are used
    pub participant_id: String,
    /// `"sender"` or `"receiver"`
    #[serde(rename = "type")]
    pub direction: String,
    /// Algorithm number; `0` is AES-GCM
    #[serde(default)]
    pub algorithm: i32,
    /// Sender endpoint, used when `type` is `"sender"`
    #[serde(default)]
    pub rtp_sender_id: Option<String>,
    /// Receiver endpoint, used when `type` is `"receiver"`
    #[serde(default)]
    pub rtp_receiver_id: Option<String>,
}

impl TryFrom<FrameCryptorConfig> for FrameCryptorParams {
    type Error = FrameCryptorError;

    fn try_from(config: FrameCryptorConfig) -> Result<Self, Self::Error> {
        let direction: MediaDirection = config.direction.parse()?;
        let endpoint_id = match direction {
            MediaDirection::Sender => config.rtp_sender_id,
            MediaDirection::Receiver => config.rtp_receiver_id,
        }
        .ok_or_else(|| {
            FrameCryptorError::invalid_config(format!(
                "{direction} frame cryptor needs an endpoint id"
            ))
        })?;

        Ok(Self {
            key_provider_id: config.key_provider_id,
            participant_id: config.participant_id,
            binding: EndpointBinding { direction, endpoint_id },
            algorithm: Algorithm::try_from(config.algorithm)?,
        })
    }
}

/// Owner of every provider and cryptor a host created, addressed by id.
pub struct Registry<E: Environment = SystemEnv> {
    factory: FrameCryptorFactory<E>,
    observer: Arc<dyn FrameCryptorObserver>,
    key_providers: RwLock<HashMap<String, Arc<KeyProvider<E>>>>,
    frame_cryptors: RwLock<HashMap<String, FrameCryptor<E>>>,
}

impl<E: Environment> Registry<E> {
    /// Registry building through `factory` and reporting to `observer`.
    pub fn new(factory: FrameCryptorFactory<E>, observer: Arc<dyn FrameCryptorObserver>) -> Self {
        Self {
            factory,
            observer,
            key_providers: RwLock::new(HashMap::new()),
            frame_cryptors: RwLock::new(HashMap::new()),
        }
    }

    /// Create a provider and return its id.
    ///
    /// # Errors
    ///
    /// - `InvalidConfiguration` if `options` fail validation
    pub fn create_key_provider(
        &self,
        options: KeyProviderOptions,
    ) -> Result<String, FrameCryptorError> {
        let provider = self.factory.create_key_provider(options)?;
        let id = random_id(self.factory.env());

        info!(key_provider_id = %id, "key provider registered");
        self.key_providers.write().insert(id.clone(), provider);
        Ok(id)
    }

    /// Create a provider from host configuration and return its id.
    ///
    /// # Errors
    ///
    /// - `InvalidConfiguration` or `InvalidBase64` if `config` is rejected
    pub fn create_key_provider_from_config(
        &self,
        config: KeyProviderConfig,
    ) -> Result<String, FrameCryptorError> {
        self.create_key_provider(KeyProviderOptions::try_from(config)?)
    }

    /// Provider registered under `id`.
    pub fn key_provider(&self, id: &str) -> Result<Arc<KeyProvider<E>>, FrameCryptorError> {
        self.key_providers
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| FrameCryptorError::UnknownKeyProvider(id.to_owned()))
    }

    /// See [`KeyProvider::set_shared_key`].
    pub fn key_provider_set_shared_key(
        &self,
        id: &str,
        key: impl Into<KeyInput>,
        key_index: u32,
    ) -> Result<(), FrameCryptorError> {
        self.key_provider(id)?.set_shared_key(key, key_index)
    }

    /// See [`KeyProvider::ratchet_shared_key`].
    pub fn key_provider_ratchet_shared_key(
        &self,
        id: &str,
        key_index: u32,
    ) -> Result<Zeroizing<Vec<u8>>, FrameCryptorError> {
        self.key_provider(id)?.ratchet_shared_key(key_index)
    }

    /// See [`KeyProvider::export_shared_key`].
    pub fn key_provider_export_shared_key(
        &self,
        id: &str,
        key_index: u32,
    ) -> Result<Zeroizing<Vec<u8>>, FrameCryptorError> {
        self.key_provider(id)?.export_shared_key(key_index)
    }

    /// See [`KeyProvider::set_key`].
    pub fn key_provider_set_key(
        &self,
        id: &str,
        participant_id: &str,
        key: impl Into<KeyInput>,
        key_index: u32,
    ) -> Result<(), FrameCryptorError> {
        self.key_provider(id)?.set_key(participant_id, key, key_index)
    }

    /// See [`KeyProvider::ratchet_key`].
    pub fn key_provider_ratchet_key(
        &self,
        id: &str,
        participant_id: &str,
        key_index: u32,
    ) -> Result<Zeroizing<Vec<u8>>, FrameCryptorError> {
        self.key_provider(id)?.ratchet_key(participant_id, key_index)
    }

    /// See [`KeyProvider::export_key`].
    pub fn key_provider_export_key(
        &self,
        id: &str,
        participant_id: &str,
        key_index: u32,
    ) -> Result<Zeroizing<Vec<u8>>, FrameCryptorError> {
        self.key_provider(id)?.export_key(participant_id, key_index)
    }

    /// See [`KeyProvider::set_sif_trailer`].
    pub fn key_provider_set_sif_trailer(
        &self,
        id: &str,
        trailer: &[u8],
    ) -> Result<(), FrameCryptorError> {
        self.key_provider(id)?.set_sif_trailer(trailer)
    }

    /// Dispose a provider and forget its id.
    ///
    /// Cryptors created from it stay registered and drop every frame.
    pub fn key_provider_dispose(&self, id: &str) -> Result<(), FrameCryptorError> {
        let provider = self
            .key_providers
            .write()
            .remove(id)
            .ok_or_else(|| FrameCryptorError::UnknownKeyProvider(id.to_owned()))?;

        provider.dispose();
        info!(key_provider_id = %id, "key provider unregistered");
        Ok(())
    }

    /// Create a cryptor and return its id.
    ///
    /// # Errors
    ///
    /// - `UnknownKeyProvider` if `params.key_provider_id` is not registered
    pub fn create_frame_cryptor(
        &self,
        params: FrameCryptorParams,
    ) -> Result<String, FrameCryptorError> {
        let provider = self.key_provider(&params.key_provider_id)?;
        let cryptor = self.factory.create_frame_cryptor(
            params.binding,
            &params.participant_id,
            params.algorithm,
            &provider,
            Arc::clone(&self.observer),
        )?;

        let id = cryptor.id().to_owned();
        debug!(
            frame_cryptor_id = %id,
            key_provider_id = %params.key_provider_id,
            "frame cryptor registered"
        );
        self.frame_cryptors.write().insert(id.clone(), cryptor);
        Ok(id)
    }

    /// Create a cryptor from a host request and return its id.
    ///
    /// # Errors
    ///
    /// - `InvalidConfiguration` for an unknown direction, a missing endpoint
    ///   id or an unsupported algorithm
    /// - `UnknownKeyProvider` if the provider is not registered
    pub fn create_frame_cryptor_from_config(
        &self,
        config: FrameCryptorConfig,
    ) -> Result<String, FrameCryptorError> {
        self.create_frame_cryptor(FrameCryptorParams::try_from(config)?)
    }

    /// Handle to the cryptor registered under `id`.
    pub fn frame_cryptor(&self, id: &str) -> Result<FrameCryptor<E>, FrameCryptorError> {
        self.frame_cryptors
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| FrameCryptorError::UnknownFrameCryptor(id.to_owned()))
    }

    /// See [`FrameCryptor::set_key_index`].
    pub fn frame_cryptor_set_key_index(
        &self,
        id: &str,
        key_index: u32,
    ) -> Result<(), FrameCryptorError> {
        self.frame_cryptor(id)?.set_key_index(key_index)
    }

    /// See [`FrameCryptor::key_index`].
    pub fn frame_cryptor_key_index(&self, id: &str) -> Result<u32, FrameCryptorError> {
        Ok(self.frame_cryptor(id)?.key_index())
    }

    /// See [`FrameCryptor::set_enabled`]. Returns the flag now in effect.
    pub fn frame_cryptor_set_enabled(
        &self,
        id: &str,
        enabled: bool,
    ) -> Result<bool, FrameCryptorError> {
        let cryptor = self.frame_cryptor(id)?;
        cryptor.set_enabled(enabled)?;
        Ok(cryptor.enabled())
    }

    /// See [`FrameCryptor::enabled`].
    pub fn frame_cryptor_enabled(&self, id: &str) -> Result<bool, FrameCryptorError> {
        Ok(self.frame_cryptor(id)?.enabled())
    }

    /// Dispose a cryptor and forget its id.
    pub fn frame_cryptor_dispose(&self, id: &str) -> Result<(), FrameCryptorError> {
        let cryptor = self
            .frame_cryptors
            .write()
            .remove(id)
            .ok_or_else(|| FrameCryptorError::UnknownFrameCryptor(id.to_owned()))?;

        cryptor.dispose();
        debug!(frame_cryptor_id = %id, "frame cryptor unregistered");
        Ok(())
    }

    /// Number of registered providers.
    pub fn key_provider_count(&self) -> usize {
        self.key_providers.read().len()
    }

    /// Number of registered cryptors.
    pub fn frame_cryptor_count(&self) -> usize {
        self.frame_cryptors.read().len()
    }
}

impl Registry<SystemEnv> {
    /// Registry using OS randomness.
    pub fn with_observer(observer: Arc<dyn FrameCryptorObserver>) -> Self {
        Self::new(FrameCryptorFactory::new(), observer)
    }
}
