//! Fuzz target for the sender → receiver frame pipeline
//!
//! Interleaves key management with frames on a sender/receiver pair that
//! share one participant but use separate providers.
//!
//! # Strategy
//!
//! - Key churn: installs, ratchets and index switches on either side
//! - Tampering: bit flips anywhere in a sealed frame, including the trailer
//! - Raw bytes: arbitrary input straight into the receiver
//! - Lifecycle: toggling enabled, disposing mid-stream
//!
//! # Invariants
//!
//! - Receiver output is always a frame the sender sealed
//! - Tampered frames are never opened
//! - Sealed frames carry the sender's key index
//! - Disposed cryptors drop every frame
//! - Nothing panics

#![no_main]

use std::{collections::HashMap, sync::Arc};

use arbitrary::Arbitrary;
use framecrypt_core::{
    Algorithm, FrameCryptorFactory, FrameOutcome, KeyProviderOptions, NoopObserver, SealedFrame,
};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Clone, Arbitrary)]
struct Scenario {
    ratchet_window_size: u8,
    failure_tolerance: Option<u8>,
    discard_when_not_ready: bool,
    ops: Vec<Op>,
}

#[derive(Debug, Clone, Arbitrary)]
enum Op {
    SetKey { receiver: bool, key: [u8; 16], key_index: u8 },
    Ratchet { receiver: bool, key_index: u8 },
    SetKeyIndex { key_index: u8 },
    SetEnabled { receiver: bool, enabled: bool },
    Send { frame: Vec<u8>, flip: Option<(u16, u8)> },
    Raw { bytes: Vec<u8> },
    Dispose { receiver: bool },
}

const KEY_RING_SIZE: u8 = 4;

fuzz_target!(|scenario: Scenario| {
    let options = KeyProviderOptions {
        ratchet_window_size: u32::from(scenario.ratchet_window_size % 8),
        failure_tolerance: scenario.failure_tolerance.map(u32::from),
        key_ring_size: usize::from(KEY_RING_SIZE),
        discard_frame_when_cryptor_not_ready: scenario.discard_when_not_ready,
        ..Default::default()
    };

    let factory = FrameCryptorFactory::new();
    let Ok(sender_keys) = factory.create_key_provider(options.clone()) else {
        return;
    };
    let Ok(receiver_keys) = factory.create_key_provider(options) else {
        return;
    };
    let Ok(sender) = factory.create_frame_cryptor_for_sender(
        "tx",
        "alice",
        Algorithm::AesGcm,
        &sender_keys,
        Arc::new(NoopObserver),
    ) else {
        return;
    };
    let Ok(receiver) = factory.create_frame_cryptor_for_receiver(
        "rx",
        "alice",
        Algorithm::AesGcm,
        &receiver_keys,
        Arc::new(NoopObserver),
    ) else {
        return;
    };

    // Sealed frame → plaintext, for everything the sender produced.
    let mut sealed_by_sender: HashMap<Vec<u8>, Vec<u8>> = HashMap::new();

    for op in scenario.ops.into_iter().take(256) {
        match op {
            Op::SetKey { receiver: to_receiver, key, key_index } => {
                let provider = if to_receiver { &receiver_keys } else { &sender_keys };
                let _ = provider.set_key("alice", &key, u32::from(key_index % KEY_RING_SIZE));
            },
            Op::Ratchet { receiver: on_receiver, key_index } => {
                let provider = if on_receiver { &receiver_keys } else { &sender_keys };
                let _ = provider.ratchet_key("alice", u32::from(key_index % KEY_RING_SIZE));
            },
            Op::SetKeyIndex { key_index } => {
                let _ = sender.set_key_index(u32::from(key_index % KEY_RING_SIZE));
            },
            Op::SetEnabled { receiver: on_receiver, enabled } => {
                let cryptor = if on_receiver { &receiver } else { &sender };
                let _ = cryptor.set_enabled(enabled);
            },
            Op::Send { frame, flip } => {
                let FrameOutcome::Transformed(mut sealed) = sender.transform(&frame) else {
                    continue;
                };
                let parsed = SealedFrame::parse(&sealed).map(|parsed| parsed.key_index());
                assert_eq!(parsed, Ok(sender.key_index() as u8));
                sealed_by_sender.insert(sealed.clone(), frame.clone());

                if let Some((position, mask)) = flip.filter(|(_, mask)| *mask != 0) {
                    let position = usize::from(position) % sealed.len();
                    sealed[position] ^= mask;
                    if let FrameOutcome::Transformed(opened) = receiver.transform(&sealed) {
                        // Only a flip that recreates another sealed frame
                        // may open.
                        assert_eq!(sealed_by_sender.get(&sealed), Some(&opened));
                    }
                    continue;
                }

                if let FrameOutcome::Transformed(opened) = receiver.transform(&sealed) {
                    assert_eq!(opened, frame);
                }
            },
            Op::Raw { bytes } => {
                if let FrameOutcome::Transformed(opened) = receiver.transform(&bytes) {
                    assert_eq!(sealed_by_sender.get(&bytes), Some(&opened));
                }
            },
            Op::Dispose { receiver: on_receiver } => {
                let cryptor = if on_receiver { &receiver } else { &sender };
                cryptor.dispose();
                assert!(cryptor.transform(b"after dispose").is_drop());
            },
        }
    }
});
