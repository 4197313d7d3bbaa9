//! Loopback scenario: one sending peer, one receiving peer, a lossy wire.
//!
//! Each peer owns a [`Registry`] with one key provider and one cryptor, the
//! way a host binding would. Keys travel out of band: the sender installs a
//! rotated key on the receiver before switching to it. Sender ratchets are
//! never announced; the receiver has to follow them from the frames alone.

use std::{collections::BTreeMap, sync::Arc};

use framecrypt_core::{
    Environment, FrameCryptorConfig, FrameCryptorError, FrameCryptorObserver, FrameCryptorState,
    FrameOutcome, KeyProviderConfig, KeyProviderOptions, MediaDirection, Registry,
    StateChangeEvent, SystemEnv,
};
use serde::{Deserialize, Serialize};
use tokio::{
    sync::mpsc::{self, Receiver, Sender, UnboundedReceiver},
    time::{Duration, sleep},
};
use tracing::{debug, info, warn};

use crate::error::SimError;

/// Frames in flight between the peers.
pub const CHANNEL_CAPACITY: usize = 8;

/// Scenario parameters, loadable from JSON.
///
/// Missing fields take their defaults, so `{}` runs the default scenario.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct ScenarioConfig {
    /// Participant whose media is simulated
    pub participant_id: String,
    /// Frames the sender produces
    pub frames: u64,
    /// Plaintext bytes per frame
    pub frame_size: usize,
    /// Key length in bytes, 16 or 32
    pub key_size: usize,
    /// Install a fresh key at the next index every N frames
    pub rotate_every: Option<u64>,
    /// Ratchet the sender's current key every N frames
    pub ratchet_every: Option<u64>,
    /// Corrupt every Nth frame on the wire
    pub tamper_every: Option<u64>,
    /// Pause between frames
    pub frame_interval_ms: u64,
    /// Key provider configuration for both peers
    pub key_provider: KeyProviderConfig,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            participant_id: "alice".to_owned(),
            frames: 500,
            frame_size: 160,
            key_size: 16,
            rotate_every: Some(120),
            ratchet_every: Some(25),
            tamper_every: Some(40),
            frame_interval_ms: 0,
            key_provider: KeyProviderConfig::default(),
        }
    }
}

impl ScenarioConfig {
    /// Parse a scenario from JSON.
    pub fn from_json(json: &str) -> Result<Self, SimError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Check the scenario and resolve its provider options.
    ///
    /// # Errors
    ///
    /// - `Engine` if the key provider configuration is rejected
    /// - `InvalidScenario` for empty frames, zero intervals, or rotations
    ///   fast enough to overwrite keys of frames still in flight
    pub fn validate(&self) -> Result<KeyProviderOptions, SimError> {
        let options = KeyProviderOptions::try_from(self.key_provider.clone())?;

        if self.frame_size == 0 {
            return Err(SimError::InvalidScenario("frame size must be at least 1".to_owned()));
        }
        for (name, interval) in [
            ("rotateEvery", self.rotate_every),
            ("ratchetEvery", self.ratchet_every),
            ("tamperEvery", self.tamper_every),
        ] {
            if interval == Some(0) {
                return Err(SimError::InvalidScenario(format!("{name} must be at least 1")));
            }
        }

        // A key index is reused after `key_ring_size` rotations; every frame
        // under the old key must have been received by then.
        if let Some(rotate_every) = self.rotate_every {
            let frames_per_cycle = rotate_every.saturating_mul(options.key_ring_size as u64);
            if frames_per_cycle <= CHANNEL_CAPACITY as u64 + 1 {
                return Err(SimError::InvalidScenario(format!(
                    "rotating every {rotate_every} frames over {} slots overwrites keys in flight",
                    options.key_ring_size
                )));
            }
        }

        Ok(options)
    }
}

/// What happened to the frames of one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScenarioReport {
    /// Frames sealed and put on the wire
    pub frames_sent: u64,
    /// Untampered frames the receiver recovered exactly
    pub frames_decrypted: u64,
    /// Untampered frames the receiver dropped
    pub frames_dropped: u64,
    /// Untampered frames forwarded without decryption
    pub frames_passed_through: u64,
    /// Corrupted frames the receiver refused
    pub tampered_rejected: u64,
    /// Fresh keys installed
    pub key_rotations: u32,
    /// Sender-side ratchets
    pub sender_ratchets: u32,
    /// Times the receiver followed a ratchet on its own
    pub receiver_ratchets: u64,
    /// State events per cryptor direction and state
    pub state_events: BTreeMap<String, u64>,
}

impl ScenarioReport {
    /// Every untampered frame decrypted and every tampered one refused.
    pub fn is_clean(&self) -> bool {
        self.frames_dropped == 0
            && self.frames_passed_through == 0
            && self.frames_decrypted + self.tampered_rejected == self.frames_sent
    }
}

/// Frame as it crosses the simulated network.
#[derive(Debug)]
struct WireFrame {
    sequence: u64,
    plaintext: Vec<u8>,
    payload: Vec<u8>,
    tampered: bool,
}

/// One side of the call, addressed through a registry by string ids.
struct Peer {
    registry: Registry,
    key_provider_id: String,
    frame_cryptor_id: String,
    participant_id: String,
    shared_key: bool,
}

impl Peer {
    fn new(
        config: &ScenarioConfig,
        direction: MediaDirection,
        observer: Arc<dyn FrameCryptorObserver>,
    ) -> Result<Self, SimError> {
        let registry = Registry::with_observer(observer);
        let key_provider_id =
            registry.create_key_provider_from_config(config.key_provider.clone())?;

        let endpoint_id = format!("sim-{direction}");
        let (rtp_sender_id, rtp_receiver_id) = match direction {
            MediaDirection::Sender => (Some(endpoint_id), None),
            MediaDirection::Receiver => (None, Some(endpoint_id)),
        };
        let frame_cryptor_id = registry.create_frame_cryptor_from_config(FrameCryptorConfig {
            key_provider_id: key_provider_id.clone(),
            participant_id: config.participant_id.clone(),
            direction: direction.to_string(),
            algorithm: 0,
            rtp_sender_id,
            rtp_receiver_id,
        })?;

        Ok(Self {
            registry,
            key_provider_id,
            frame_cryptor_id,
            participant_id: config.participant_id.clone(),
            shared_key: config.key_provider.shared_key,
        })
    }

    fn install_key(&self, key: &[u8], key_index: u32) -> Result<(), FrameCryptorError> {
        if self.shared_key {
            self.registry.key_provider_set_shared_key(&self.key_provider_id, key, key_index)
        } else {
            self.registry
                .key_provider_set_key(&self.key_provider_id, &self.participant_id, key, key_index)
        }
    }

    fn ratchet_key(&self, key_index: u32) -> Result<(), FrameCryptorError> {
        if self.shared_key {
            self.registry.key_provider_ratchet_shared_key(&self.key_provider_id, key_index)?;
        } else {
            self.registry
                .key_provider_ratchet_key(&self.key_provider_id, &self.participant_id, key_index)?;
        }
        Ok(())
    }

    fn transform(&self, frame: &[u8]) -> Result<FrameOutcome, FrameCryptorError> {
        Ok(self.registry.frame_cryptor(&self.frame_cryptor_id)?.transform(frame))
    }

    fn dispose(&self) -> Result<(), FrameCryptorError> {
        self.registry.frame_cryptor_dispose(&self.frame_cryptor_id)?;
        self.registry.key_provider_dispose(&self.key_provider_id)
    }
}

#[derive(Debug, Default)]
struct SenderStats {
    frames_sent: u64,
    key_rotations: u32,
    sender_ratchets: u32,
}

#[derive(Debug, Default)]
struct ReceiverStats {
    frames_decrypted: u64,
    frames_dropped: u64,
    frames_passed_through: u64,
    tampered_rejected: u64,
}

/// Run a scenario to completion.
///
/// # Errors
///
/// - `InvalidScenario` or `Engine` if the scenario cannot be set up
/// - `PlaintextMismatch` or `ForgeryAccepted` if the receiver forwards a
///   frame it must not
/// - `SenderStalled` if the sender stops sealing frames
pub async fn run_scenario(config: ScenarioConfig) -> Result<ScenarioReport, SimError> {
    let options = config.validate()?;

    let (events_tx, mut events) = mpsc::unbounded_channel();
    let observer: Arc<dyn FrameCryptorObserver> = Arc::new(events_tx);
    let sender = Peer::new(&config, MediaDirection::Sender, Arc::clone(&observer))?;
    let receiver = Peer::new(&config, MediaDirection::Receiver, observer)?;

    let mut initial_key = vec![0u8; config.key_size];
    SystemEnv::new().random_bytes(&mut initial_key);
    receiver.install_key(&initial_key, 0)?;
    sender.install_key(&initial_key, 0)?;
    for peer in [&sender, &receiver] {
        peer.registry.frame_cryptor_set_enabled(&peer.frame_cryptor_id, true)?;
    }

    info!(
        frames = config.frames,
        frame_size = config.frame_size,
        shared_key = options.shared_key,
        ratchet_window_size = options.ratchet_window_size,
        "scenario starting"
    );

    let (wire_tx, wire_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (sent, received) = tokio::join!(
        run_sender(&config, &options, &sender, &receiver, wire_tx),
        run_receiver(&receiver, wire_rx),
    );
    let sent = sent?;
    let received = received?;

    let mut report = ScenarioReport {
        frames_sent: sent.frames_sent,
        frames_decrypted: received.frames_decrypted,
        frames_dropped: received.frames_dropped,
        frames_passed_through: received.frames_passed_through,
        tampered_rejected: received.tampered_rejected,
        key_rotations: sent.key_rotations,
        sender_ratchets: sent.sender_ratchets,
        ..ScenarioReport::default()
    };
    tally_events(&mut report, &mut events, &sender.frame_cryptor_id);

    sender.dispose()?;
    receiver.dispose()?;

    info!(
        frames_sent = report.frames_sent,
        frames_decrypted = report.frames_decrypted,
        tampered_rejected = report.tampered_rejected,
        receiver_ratchets = report.receiver_ratchets,
        clean = report.is_clean(),
        "scenario finished"
    );
    Ok(report)
}

async fn run_sender(
    config: &ScenarioConfig,
    options: &KeyProviderOptions,
    sender: &Peer,
    receiver: &Peer,
    wire: Sender<WireFrame>,
) -> Result<SenderStats, SimError> {
    let env = SystemEnv::new();
    let mut stats = SenderStats::default();
    let mut key_index = 0u32;

    for sequence in 0..config.frames {
        if sequence > 0 {
            if is_due(config.rotate_every, sequence) {
                key_index = rotate(config, options, sender, receiver, &env, key_index)?;
                stats.key_rotations += 1;
            } else if is_due(config.ratchet_every, sequence) {
                match sender.ratchet_key(key_index) {
                    Ok(()) => {
                        debug!(sequence, key_index, "sender ratcheted");
                        stats.sender_ratchets += 1;
                    },
                    Err(FrameCryptorError::RatchetWindowExhausted { step, window_size }) => {
                        warn!(step, window_size, "ratchet window exhausted, rotating instead");
                        key_index = rotate(config, options, sender, receiver, &env, key_index)?;
                        stats.key_rotations += 1;
                    },
                    Err(err) => return Err(err.into()),
                }
            }
        }

        let plaintext = media_frame(sequence, config.frame_size);
        let FrameOutcome::Transformed(mut payload) = sender.transform(&plaintext)? else {
            return Err(SimError::SenderStalled { sequence });
        };

        let tampered = is_due(config.tamper_every, sequence + 1);
        if tampered {
            payload[0] ^= 0x80;
        }

        wire.send(WireFrame { sequence, plaintext, payload, tampered })
            .await
            .map_err(|_| SimError::ChannelClosed { sequence })?;
        stats.frames_sent += 1;

        if config.frame_interval_ms > 0 {
            sleep(Duration::from_millis(config.frame_interval_ms)).await;
        }
    }

    Ok(stats)
}

/// Install a fresh key at the next index on both peers, receiver first, and
/// switch the sender to it.
fn rotate(
    config: &ScenarioConfig,
    options: &KeyProviderOptions,
    sender: &Peer,
    receiver: &Peer,
    env: &SystemEnv,
    key_index: u32,
) -> Result<u32, SimError> {
    let next_index = (key_index + 1) % options.key_ring_size as u32;
    let mut key = vec![0u8; config.key_size];
    env.random_bytes(&mut key);

    receiver.install_key(&key, next_index)?;
    sender.install_key(&key, next_index)?;
    sender.registry.frame_cryptor_set_key_index(&sender.frame_cryptor_id, next_index)?;

    debug!(key_index = next_index, "key rotated");
    Ok(next_index)
}

async fn run_receiver(
    receiver: &Peer,
    mut wire: Receiver<WireFrame>,
) -> Result<ReceiverStats, SimError> {
    let mut stats = ReceiverStats::default();

    while let Some(frame) = wire.recv().await {
        let sequence = frame.sequence;
        match (receiver.transform(&frame.payload)?, frame.tampered) {
            (FrameOutcome::Transformed(_), true) => {
                return Err(SimError::ForgeryAccepted { sequence });
            },
            (FrameOutcome::Transformed(plaintext), false) => {
                if plaintext != frame.plaintext {
                    return Err(SimError::PlaintextMismatch { sequence });
                }
                stats.frames_decrypted += 1;
            },
            (_, true) => stats.tampered_rejected += 1,
            (FrameOutcome::Drop, false) => {
                warn!(sequence, "receiver dropped frame");
                stats.frames_dropped += 1;
            },
            (FrameOutcome::PassThrough, false) => {
                warn!(sequence, "receiver passed frame through");
                stats.frames_passed_through += 1;
            },
        }
    }

    Ok(stats)
}

fn tally_events(
    report: &mut ScenarioReport,
    events: &mut UnboundedReceiver<StateChangeEvent>,
    sender_id: &str,
) {
    while let Ok(event) = events.try_recv() {
        let side = if &*event.frame_cryptor_id == sender_id { "sender" } else { "receiver" };
        if side == "receiver" && event.state == FrameCryptorState::KeyRatcheted {
            report.receiver_ratchets += 1;
        }
        *report.state_events.entry(format!("{side}.{}", event.state)).or_default() += 1;
    }
}

fn is_due(every: Option<u64>, sequence: u64) -> bool {
    every.is_some_and(|every| sequence % every == 0)
}

/// Deterministic frame body so the receiver can be checked byte for byte.
fn media_frame(sequence: u64, size: usize) -> Vec<u8> {
    (0..size).map(|offset| (sequence as usize).wrapping_add(offset) as u8).collect()
}
