//! Fuzz target for host key provider configuration
//!
//! Arbitrary JSON through `KeyProviderConfig` into validated options.
//!
//! # Invariants
//!
//! - Never panics on malformed JSON, base64 or out-of-range numbers
//! - Accepted options always describe a usable ring (1..=256 slots)
//! - Every accepted configuration builds a key provider

#![no_main]

use framecrypt_core::{
    FrameCryptorFactory, KeyProviderConfig, KeyProviderOptions, MAX_KEY_RING_SIZE,
};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(config) = serde_json::from_slice::<KeyProviderConfig>(data) else {
        return;
    };
    let Ok(options) = KeyProviderOptions::try_from(config) else {
        return;
    };

    assert!((1..=MAX_KEY_RING_SIZE).contains(&options.key_ring_size));
    assert!(FrameCryptorFactory::new().create_key_provider(options).is_ok());
});
