//! Frame cryptor states and the events that report them.

use std::{convert::Infallible, fmt, str::FromStr, sync::Arc};

/// Observable state of a frame cryptor.
///
/// Hosts exchange states as strings (`"ok"`, `"missingKey"`, ...). Parsing
/// never fails: a string this engine does not know maps to
/// [`Unknown`](Self::Unknown), which the engine itself never enters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FrameCryptorState {
    /// Created, no frame processed yet
    #[default]
    New,
    /// Last frame transformed successfully
    Ok,
    /// Sealing a frame failed
    EncryptionFailed,
    /// Opening a frame failed, including after the ratchet window was tried
    DecryptionFailed,
    /// No key installed for the needed index
    MissingKey,
    /// The key was advanced by a ratchet
    KeyRatcheted,
    /// Failure tolerance exceeded; frames are dropped until reset
    InternalError,
    /// Unrecognised state string from a host
    Unknown,
}

impl FrameCryptorState {
    const ALL: [Self; 8] = [
        Self::New,
        Self::Ok,
        Self::EncryptionFailed,
        Self::DecryptionFailed,
        Self::MissingKey,
        Self::KeyRatcheted,
        Self::InternalError,
        Self::Unknown,
    ];

    /// Host string for this state.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Ok => "ok",
            Self::EncryptionFailed => "encryptionFailed",
            Self::DecryptionFailed => "decryptionFailed",
            Self::MissingKey => "missingKey",
            Self::KeyRatcheted => "keyRatcheted",
            Self::InternalError => "internalError",
            Self::Unknown => "unknown",
        }
    }

    /// Returns true for states that count against the failure tolerance.
    pub fn is_failure(self) -> bool {
        matches!(
            self,
            Self::EncryptionFailed | Self::DecryptionFailed | Self::MissingKey | Self::InternalError
        )
    }

    pub(crate) fn to_u8(self) -> u8 {
        self as u8
    }

    pub(crate) fn from_u8(value: u8) -> Self {
        Self::ALL.get(usize::from(value)).copied().unwrap_or(Self::Unknown)
    }
}

impl fmt::Display for FrameCryptorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for FrameCryptorState {
    fn from(value: &str) -> Self {
        match value {
            "new" => Self::New,
            "ok" => Self::Ok,
            "encryptionFailed" => Self::EncryptionFailed,
            "decryptionFailed" => Self::DecryptionFailed,
            "missingKey" => Self::MissingKey,
            "keyRatcheted" => Self::KeyRatcheted,
            "internalError" => Self::InternalError,
            _ => Self::Unknown,
        }
    }
}

impl FromStr for FrameCryptorState {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from(s))
    }
}

/// A state transition reported to an observer.
///
/// Identifiers are shared `Arc<str>`, so emitting an event never copies them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateChangeEvent {
    /// Cryptor that changed state
    pub frame_cryptor_id: Arc<str>,
    /// Participant the cryptor is bound to
    pub participant_id: Arc<str>,
    /// State entered
    pub state: FrameCryptorState,
}
