//! Simulator errors.

use framecrypt_core::FrameCryptorError;
use thiserror::Error;

/// Ways a scenario can fail to run or reveal a broken pipeline.
///
/// Dropped frames are not errors: they are counted in the report. Errors are
/// reserved for misconfiguration and for outcomes the engine must never
/// produce.
#[derive(Debug, Error)]
pub enum SimError {
    /// Scenario parameters cannot describe a meaningful run.
    #[error("invalid scenario: {0}")]
    InvalidScenario(String),

    /// Engine rejected a setup or key management call.
    #[error("frame cryptor engine: {0}")]
    Engine(#[from] FrameCryptorError),

    /// Scenario file is not valid JSON for [`ScenarioConfig`](crate::ScenarioConfig).
    #[error("scenario file: {0}")]
    Json(#[from] serde_json::Error),

    /// Enabled sender with a key declined to seal a frame.
    #[error("sender did not seal frame {sequence}")]
    SenderStalled {
        /// Frame sequence number
        sequence: u64,
    },

    /// Receiver produced plaintext other than what was sent.
    #[error("frame {sequence} decrypted to the wrong plaintext")]
    PlaintextMismatch {
        /// Frame sequence number
        sequence: u64,
    },

    /// Receiver forwarded a frame that was modified in transit.
    #[error("tampered frame {sequence} was accepted")]
    ForgeryAccepted {
        /// Frame sequence number
        sequence: u64,
    },

    /// Receiver side of the loopback went away mid-run.
    #[error("frame channel closed at frame {sequence}")]
    ChannelClosed {
        /// Frame sequence number
        sequence: u64,
    },
}
