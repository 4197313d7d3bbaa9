//! Frame cryptor behavior tests
//!
//! End-to-end scenarios across the public API: failure escalation, ready
//! policies, magic bytes, key rotation, receiver ratchet recovery and
//! disposal.

use std::{collections::HashSet, sync::Arc};

use framecrypt_core::{
    Algorithm, FrameCryptor, FrameCryptorFactory, FrameCryptorState, FrameOutcome, KeyProvider,
    KeyProviderOptions, StateChangeEvent, SystemEnv,
};
use tokio::sync::mpsc::{UnboundedReceiver, unbounded_channel};

const KEY: [u8; 16] = [0x21; 16];

/// Sender and receiver on separate providers, as on two peers.
struct Call {
    sender_keys: Arc<KeyProvider>,
    receiver_keys: Arc<KeyProvider>,
    sender: FrameCryptor,
    receiver: FrameCryptor,
    events: UnboundedReceiver<StateChangeEvent>,
}

impl Call {
    fn new(sender_options: KeyProviderOptions, receiver_options: KeyProviderOptions) -> Self {
        let factory = FrameCryptorFactory::new();
        let (tx, events) = unbounded_channel();
        let observer = Arc::new(tx);

        let sender_keys = factory.create_key_provider(sender_options).unwrap();
        let receiver_keys = factory.create_key_provider(receiver_options).unwrap();

        let sender = factory
            .create_frame_cryptor_for_sender(
                "audio-tx",
                "alice",
                Algorithm::AesGcm,
                &sender_keys,
                observer.clone(),
            )
            .unwrap();
        let receiver = factory
            .create_frame_cryptor_for_receiver(
                "audio-rx",
                "alice",
                Algorithm::AesGcm,
                &receiver_keys,
                observer,
            )
            .unwrap();

        Self { sender_keys, receiver_keys, sender, receiver, events }
    }

    fn keyed(options: KeyProviderOptions) -> Self {
        let call = Self::new(options.clone(), options);
        call.sender_keys.set_key("alice", &KEY, 0).unwrap();
        call.receiver_keys.set_key("alice", &KEY, 0).unwrap();
        call.sender.set_enabled(true).unwrap();
        call.receiver.set_enabled(true).unwrap();
        call
    }

    fn seal(&self, frame: &[u8]) -> Vec<u8> {
        match self.sender.transform(frame) {
            FrameOutcome::Transformed(sealed) => sealed,
            other => panic!("expected sealed frame, got {other:?}"),
        }
    }

    fn receiver_states(&mut self) -> Vec<FrameCryptorState> {
        let receiver_id = self.receiver.id().to_owned();
        self.states_of(&receiver_id)
    }

    fn sender_states(&mut self) -> Vec<FrameCryptorState> {
        let sender_id = self.sender.id().to_owned();
        self.states_of(&sender_id)
    }

    /// Drain queued events, keeping those of `cryptor_id`.
    fn states_of(&mut self, cryptor_id: &str) -> Vec<FrameCryptorState> {
        let mut states = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            if &*event.frame_cryptor_id == cryptor_id {
                states.push(event.state);
            }
        }
        states
    }
}

/// IV bytes of a sealed frame without SIF trailer.
fn iv_of(sealed: &[u8]) -> [u8; 12] {
    let end = sealed.len() - 2;
    sealed[end - 12..end].try_into().unwrap()
}

#[test]
fn tolerance_three_escalates_on_fourth_failure() {
    let options = KeyProviderOptions {
        failure_tolerance: Some(3),
        ratchet_window_size: 0,
        ..Default::default()
    };
    let mut call = Call::keyed(options);
    call.receiver_keys.set_key("alice", &[0x99u8; 16], 0).unwrap();

    let sealed = call.seal(b"frame");
    for _ in 0..4 {
        assert_eq!(call.receiver.transform(&sealed), FrameOutcome::Drop);
    }

    assert_eq!(
        call.receiver_states(),
        vec![
            FrameCryptorState::DecryptionFailed,
            FrameCryptorState::DecryptionFailed,
            FrameCryptorState::DecryptionFailed,
            FrameCryptorState::InternalError,
        ]
    );
    assert!(call.receiver.is_locked());

    // Locked: dropped without further events
    assert_eq!(call.receiver.transform(&sealed), FrameOutcome::Drop);
    assert!(call.receiver_states().is_empty());
}

#[test]
fn missing_key_escalates_then_installed_key_recovers() {
    let options = KeyProviderOptions { failure_tolerance: Some(3), ..Default::default() };
    let mut call = Call::new(options.clone(), options);
    call.sender.set_enabled(true).unwrap();

    for _ in 0..3 {
        assert_eq!(call.sender.transform(b"frame"), FrameOutcome::PassThrough);
    }
    assert_eq!(call.sender.transform(b"frame"), FrameOutcome::Drop);
    assert!(call.sender.is_locked());

    call.sender_keys.set_key("alice", &KEY, 0).unwrap();
    assert!(!call.sender.is_locked());
    assert!(matches!(call.sender.transform(b"frame"), FrameOutcome::Transformed(_)));

    assert_eq!(
        call.sender_states(),
        vec![
            FrameCryptorState::MissingKey,
            FrameCryptorState::MissingKey,
            FrameCryptorState::MissingKey,
            FrameCryptorState::InternalError,
            FrameCryptorState::Ok,
        ]
    );
    assert_eq!(call.sender.state(), FrameCryptorState::Ok);
}

#[test]
fn reinstalling_a_key_never_repeats_an_iv() {
    let call = Call::keyed(KeyProviderOptions::default());

    let mut ivs = HashSet::new();
    for frame in 0..10_000 {
        call.sender_keys.set_key("alice", &KEY, 0).unwrap();
        let sealed = call.seal(b"frame");
        assert!(ivs.insert(iv_of(&sealed)), "IV repeated at frame {frame}");
    }

    // Sealed after 10k installs, still opens on the peer.
    let sealed = call.seal(b"latest");
    assert_eq!(call.receiver.transform(&sealed), FrameOutcome::Transformed(b"latest".to_vec()));
}

#[test]
fn unlimited_tolerance_never_escalates() {
    let options = KeyProviderOptions { ratchet_window_size: 0, ..Default::default() };
    let mut call = Call::keyed(options);
    call.receiver_keys.set_key("alice", &[0x99u8; 16], 0).unwrap();

    let sealed = call.seal(b"frame");
    for _ in 0..50 {
        assert_eq!(call.receiver.transform(&sealed), FrameOutcome::Drop);
    }

    let states = call.receiver_states();
    assert_eq!(states.len(), 50);
    assert!(states.iter().all(|state| *state == FrameCryptorState::DecryptionFailed));
    assert!(!call.receiver.is_locked());
}

#[test]
fn success_resets_the_failure_counter() {
    let options = KeyProviderOptions {
        failure_tolerance: Some(2),
        ratchet_window_size: 0,
        ..Default::default()
    };
    let call = Call::keyed(options);

    let good = call.seal(b"good");
    let mut bad = call.seal(b"bad");
    bad[0] ^= 1;

    for _ in 0..10 {
        assert_eq!(call.receiver.transform(&bad), FrameOutcome::Drop);
        assert_eq!(call.receiver.transform(&bad), FrameOutcome::Drop);
        assert!(matches!(call.receiver.transform(&good), FrameOutcome::Transformed(_)));
    }
    assert!(!call.receiver.is_locked());
    assert_eq!(call.receiver.consecutive_failures(), 0);
}

#[test]
fn key_rotation_across_indices() {
    let call = Call::keyed(KeyProviderOptions::default());
    let next_key = [0x42u8; 32];
    call.sender_keys.set_key("alice", &next_key, 1).unwrap();
    call.receiver_keys.set_key("alice", &next_key, 1).unwrap();

    let before = call.seal(b"before rotation");
    call.sender.set_key_index(1).unwrap();
    let after = call.seal(b"after rotation");

    // Late frames under the old index still open.
    assert_eq!(
        call.receiver.transform(&after),
        FrameOutcome::Transformed(b"after rotation".to_vec())
    );
    assert_eq!(
        call.receiver.transform(&before),
        FrameOutcome::Transformed(b"before rotation".to_vec())
    );
}

#[test]
fn receiver_ratchets_forward_after_sender_ratchet() {
    let mut call = Call::keyed(KeyProviderOptions::default());

    let new_key = call.sender_keys.ratchet_key("alice", 0).unwrap();
    let sealed = call.seal(b"ratcheted frame");

    assert_eq!(
        call.receiver.transform(&sealed),
        FrameOutcome::Transformed(b"ratcheted frame".to_vec())
    );
    assert_eq!(call.receiver_states(), vec![FrameCryptorState::KeyRatcheted]);
    assert_eq!(call.receiver_keys.export_key("alice", 0).unwrap(), new_key);

    // The ratcheted key is now installed: plain success, no second ratchet.
    let next = call.seal(b"next");
    assert_eq!(call.receiver.transform(&next), FrameOutcome::Transformed(b"next".to_vec()));
    assert_eq!(call.receiver_states(), vec![FrameCryptorState::Ok]);
}

#[test]
fn receiver_catches_up_several_steps() {
    let call = Call::keyed(KeyProviderOptions::default());
    for _ in 0..5 {
        call.sender_keys.ratchet_key("alice", 0).unwrap();
    }

    let sealed = call.seal(b"five steps ahead");
    assert_eq!(
        call.receiver.transform(&sealed),
        FrameOutcome::Transformed(b"five steps ahead".to_vec())
    );
    assert_eq!(
        call.receiver_keys.export_key("alice", 0).unwrap(),
        call.sender_keys.export_key("alice", 0).unwrap()
    );
}

#[test]
fn sender_beyond_window_fails_to_decrypt() {
    let sender_options = KeyProviderOptions { ratchet_window_size: 8, ..Default::default() };
    let receiver_options = KeyProviderOptions { ratchet_window_size: 2, ..Default::default() };
    let mut call = Call::new(sender_options, receiver_options);
    call.sender_keys.set_key("alice", &KEY, 0).unwrap();
    call.receiver_keys.set_key("alice", &KEY, 0).unwrap();
    call.sender.set_enabled(true).unwrap();
    call.receiver.set_enabled(true).unwrap();

    for _ in 0..3 {
        call.sender_keys.ratchet_key("alice", 0).unwrap();
    }

    let sealed = call.seal(b"too far ahead");
    assert_eq!(call.receiver.transform(&sealed), FrameOutcome::Drop);
    assert_eq!(call.receiver_states(), vec![FrameCryptorState::DecryptionFailed]);
    assert_eq!(call.receiver_keys.export_key("alice", 0).unwrap().as_slice(), &KEY);
}

/// Well-formed trailer naming key index 3, which no test installs.
fn frame_for_empty_slot() -> Vec<u8> {
    let mut frame = vec![1u8; 64];
    frame[62] = 12;
    frame[63] = 3;
    frame
}

#[test]
fn missing_key_follows_discard_policy() {
    let mut forward = Call::new(KeyProviderOptions::default(), KeyProviderOptions::default());
    forward.receiver.set_enabled(true).unwrap();
    assert_eq!(forward.receiver.transform(&frame_for_empty_slot()), FrameOutcome::PassThrough);
    assert_eq!(forward.receiver_states(), vec![FrameCryptorState::MissingKey]);

    let discard =
        KeyProviderOptions { discard_frame_when_cryptor_not_ready: true, ..Default::default() };
    let mut dropping = Call::new(discard.clone(), discard);
    dropping.receiver.set_enabled(true).unwrap();
    assert_eq!(dropping.receiver.transform(&frame_for_empty_slot()), FrameOutcome::Drop);
    assert_eq!(dropping.receiver_states(), vec![FrameCryptorState::MissingKey]);
}

#[test]
fn magic_bytes_bypass_both_directions() {
    let options = KeyProviderOptions {
        uncrypted_magic_bytes: Some(b"LK-ROCKS".to_vec()),
        ..Default::default()
    };
    let call = Call::keyed(options);

    let frame = b"server injected frame LK-ROCKS";
    assert_eq!(call.sender.transform(frame), FrameOutcome::PassThrough);
    assert_eq!(call.receiver.transform(frame), FrameOutcome::PassThrough);

    // Ordinary frames are still encrypted.
    assert!(matches!(call.sender.transform(b"media"), FrameOutcome::Transformed(_)));
}

#[test]
fn shared_key_mode_serves_every_participant() {
    let factory = FrameCryptorFactory::new();
    let provider = factory
        .create_key_provider(KeyProviderOptions { shared_key: true, ..Default::default() })
        .unwrap();
    provider.set_shared_key(&KEY, 0).unwrap();

    let observer = Arc::new(|_event: StateChangeEvent| {});
    let alice = factory
        .create_frame_cryptor_for_sender(
            "a",
            "alice",
            Algorithm::AesGcm,
            &provider,
            observer.clone(),
        )
        .unwrap();
    let bob = factory
        .create_frame_cryptor_for_receiver("b", "bob", Algorithm::AesGcm, &provider, observer)
        .unwrap();
    alice.set_enabled(true).unwrap();
    bob.set_enabled(true).unwrap();

    let FrameOutcome::Transformed(sealed) = alice.transform(b"hello bob") else {
        panic!("alice did not seal");
    };
    assert_eq!(bob.transform(&sealed), FrameOutcome::Transformed(b"hello bob".to_vec()));
}

#[test]
fn provider_disposal_stops_cryptors() {
    let mut call = Call::keyed(KeyProviderOptions::default());
    let sealed = call.seal(b"frame");

    call.receiver_keys.dispose();

    assert_eq!(call.receiver.transform(&sealed), FrameOutcome::Drop);
    assert_eq!(call.receiver.transform(&sealed), FrameOutcome::Drop);
    assert_eq!(call.receiver_states(), vec![FrameCryptorState::InternalError]);
    assert_eq!(call.receiver_keys.watcher_count(), 0);
}

#[test]
fn cryptor_disposal_keeps_provider_alive() {
    let call = Call::keyed(KeyProviderOptions::default());

    call.sender.dispose();
    assert_eq!(call.sender.transform(b"frame"), FrameOutcome::Drop);
    assert!(!call.sender_keys.is_disposed());
    assert_eq!(call.sender_keys.export_key("alice", 0).unwrap().as_slice(), &KEY);
}

#[test]
fn system_env_providers_are_independent() {
    let factory: FrameCryptorFactory<SystemEnv> = FrameCryptorFactory::default();
    let provider = factory.create_key_provider(KeyProviderOptions::default()).unwrap();
    provider.set_key("alice", &KEY, 0).unwrap();

    let other = factory.create_key_provider(KeyProviderOptions::default()).unwrap();
    assert!(other.export_key("alice", 0).is_err());
}
