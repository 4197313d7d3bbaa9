//! Fuzz target for SealedFrame::parse
//!
//! Arbitrary bytes as an encrypted frame trailer. Looks for:
//! - Panics on short or malformed trailers
//! - Slices that do not cover the input exactly
//!
//! The parser should NEVER panic. Invalid inputs return an error.

#![no_main]

use framecrypt_core::{FRAME_OVERHEAD, SealedFrame};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(sealed) = SealedFrame::parse(data) else {
        return;
    };

    // Accepted frames decompose into ciphertext, IV and the two trailer bytes.
    assert!(data.len() > FRAME_OVERHEAD);
    assert_eq!(sealed.ciphertext().len() + sealed.iv().len() + 2, data.len());
    assert_eq!(data[data.len() - 1], sealed.key_index());
});
