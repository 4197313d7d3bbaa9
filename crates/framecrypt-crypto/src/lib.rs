//! Framecrypt Cryptographic Primitives
//!
//! Cryptographic building blocks for media frame encryption. Pure functions
//! with deterministic outputs. Callers provide random bytes (the nonce prefix)
//! so behavior stays reproducible under test.
//!
//! # Key Lifecycle
//!
//! A participant's raw key is installed into a key ring slot. Frames are
//! sealed directly under that key; each installed key carries its own nonce
//! sequence. Ratcheting replaces the key with a one-way derivation of itself.
//!
//! ```text
//! Raw Key (16 or 32 bytes, step 0)
//!        │
//!        ├──► AES-GCM ──► sealed frames (nonce = prefix ‖ counter)
//!        │
//!        ▼
//! HKDF(salt, key, step + 1) → Ratcheted Key (step 1) → ...
//! ```
//!
//! # Security
//!
//! Nonce uniqueness:
//! - A [`NonceSequence`] hands out each counter value at most once
//! - Counter exhaustion is an error, never a wrap-around
//!
//! Ratchet:
//! - HKDF-SHA256 is one-way: a ratcheted key does not reveal its predecessor
//! - Derivation is a pure function of (previous key, salt, step)
//!
//! Authenticity:
//! - AES-GCM rejects any frame whose tag, nonce or associated data was altered
//! - Key material is zeroized when dropped

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod error;
mod frame_key;
mod nonce;
mod ratchet;

pub use error::CryptoError;
pub use frame_key::{FrameKey, GCM_TAG_SIZE, KEY_SIZES};
pub use nonce::{NONCE_PREFIX_SIZE, NONCE_SIZE, NonceSequence};
pub use ratchet::ratchet_key;
