//! Framecrypt Core
//!
//! End-to-end encryption of real-time media frames. A [`KeyProvider`] holds
//! rotating key rings per participant (or one shared ring); a
//! [`FrameCryptor`] bound to one media sender or receiver seals or opens
//! every encoded frame with those keys and reports its health to a
//! [`FrameCryptorObserver`].
//!
//! # Architecture
//!
//! ```text
//! FrameCryptorFactory ──creates──► KeyProvider ◄──looks up keys── FrameCryptor
//!                     ──creates──────────────────────────────────►    │
//!                                                                     ▼
//!                                 encoded frame ──► transform ──► FrameOutcome
//!                                                        │
//!                                                        └──► StateChangeEvent ──► observer
//! ```
//!
//! [`Registry`] wraps the same operations behind string ids for host
//! bindings.
//!
//! # Concurrency
//!
//! Every type is `Send + Sync`. Many cryptors may transform frames in
//! parallel while keys are installed, ratcheted or exported. Key slots hold
//! immutable snapshots: a transform keeps the snapshot it loaded even if the
//! slot is replaced or the provider disposed mid-frame.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//!
//! use framecrypt_core::{
//!     Algorithm, FrameCryptorFactory, FrameOutcome, KeyProviderOptions, NoopObserver,
//! };
//!
//! let factory = FrameCryptorFactory::new();
//! let provider = factory.create_key_provider(KeyProviderOptions::default())?;
//! provider.set_key("alice", &[7u8; 16], 0)?;
//!
//! let sender = factory.create_frame_cryptor_for_sender(
//!     "audio-sender",
//!     "alice",
//!     Algorithm::AesGcm,
//!     &provider,
//!     Arc::new(NoopObserver),
//! )?;
//! let receiver = factory.create_frame_cryptor_for_receiver(
//!     "audio-receiver",
//!     "alice",
//!     Algorithm::AesGcm,
//!     &provider,
//!     Arc::new(NoopObserver),
//! )?;
//! sender.set_enabled(true)?;
//! receiver.set_enabled(true)?;
//!
//! let FrameOutcome::Transformed(sealed) = sender.transform(b"opus packet") else {
//!     unreachable!("an enabled sender with a key seals the frame");
//! };
//! assert_eq!(receiver.transform(&sealed), FrameOutcome::Transformed(b"opus packet".to_vec()));
//! # Ok::<(), framecrypt_core::FrameCryptorError>(())
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod binding;
pub mod env;
mod error;
mod factory;
pub mod frame;
mod frame_cryptor;
mod key_provider;
mod key_ring;
mod observer;
mod options;
mod registry;
mod state;
mod system_env;

#[cfg(test)]
mod test_support;

pub use binding::{Algorithm, EndpointBinding, MediaDirection};
pub use env::Environment;
pub use error::FrameCryptorError;
pub use factory::FrameCryptorFactory;
pub use frame::{FRAME_OVERHEAD, SealedFrame, TrailerError};
pub use frame_cryptor::{FrameCryptor, FrameOutcome};
pub use key_provider::KeyProvider;
pub use key_ring::{KeyMaterial, KeyRing, KeyScope};
pub use observer::{FrameCryptorObserver, NoopObserver};
pub use options::{
    DEFAULT_KEY_RING_SIZE, DEFAULT_RATCHET_SALT, DEFAULT_RATCHET_WINDOW_SIZE, KeyInput,
    KeyProviderConfig, KeyProviderOptions, MAX_KEY_RING_SIZE,
};
pub use registry::{FrameCryptorConfig, FrameCryptorParams, Registry};
pub use state::{FrameCryptorState, StateChangeEvent};
pub use system_env::SystemEnv;
