//! Deterministic environment and recording observer for unit tests.

use std::sync::Arc;

use parking_lot::Mutex;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;

use crate::{
    env::Environment,
    observer::FrameCryptorObserver,
    state::{FrameCryptorState, StateChangeEvent},
};

// Seeded ChaCha so ids and nonce prefixes repeat across runs
#[derive(Debug, Clone)]
pub(crate) struct TestEnv {
    rng: Arc<Mutex<ChaCha20Rng>>,
}

impl TestEnv {
    pub(crate) fn new(seed: u64) -> Self {
        Self { rng: Arc::new(Mutex::new(ChaCha20Rng::seed_from_u64(seed))) }
    }
}

impl Environment for TestEnv {
    fn random_bytes(&self, buffer: &mut [u8]) {
        self.rng.lock().fill_bytes(buffer);
    }
}

#[derive(Debug, Clone, Default)]
pub(crate) struct RecordingObserver {
    events: Arc<Mutex<Vec<StateChangeEvent>>>,
}

impl RecordingObserver {
    pub(crate) fn states_of(&self, frame_cryptor_id: &str) -> Vec<FrameCryptorState> {
        self.events
            .lock()
            .iter()
            .filter(|event| &*event.frame_cryptor_id == frame_cryptor_id)
            .map(|event| event.state)
            .collect()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}

impl FrameCryptorObserver for RecordingObserver {
    fn on_state_change(&self, event: StateChangeEvent) {
        self.events.lock().push(event);
    }
}
