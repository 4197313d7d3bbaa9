//! What a frame cryptor is attached to.

use std::{fmt, str::FromStr};

use crate::error::FrameCryptorError;

/// Direction of the media a cryptor handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaDirection {
    /// Outgoing frames: encrypt
    Sender,
    /// Incoming frames: decrypt
    Receiver,
}

impl MediaDirection {
    /// Host string for this direction.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sender => "sender",
            Self::Receiver => "receiver",
        }
    }
}

impl fmt::Display for MediaDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MediaDirection {
    type Err = FrameCryptorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sender" => Ok(Self::Sender),
            "receiver" => Ok(Self::Receiver),
            other => Err(FrameCryptorError::invalid_config(format!(
                "unknown media direction {other:?}, expected \"sender\" or \"receiver\""
            ))),
        }
    }
}

/// Frame encryption algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Algorithm {
    /// AES-GCM with a 128 or 256-bit key, chosen by key length
    #[default]
    AesGcm,
}

impl TryFrom<i32> for Algorithm {
    type Error = FrameCryptorError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::AesGcm),
            other => Err(FrameCryptorError::invalid_config(format!(
                "unsupported algorithm {other}"
            ))),
        }
    }
}

/// The media endpoint a cryptor transforms frames for.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EndpointBinding {
    /// Whether frames are outgoing or incoming
    pub direction: MediaDirection,
    /// Host identifier of the RTP sender or receiver
    pub endpoint_id: String,
}

impl EndpointBinding {
    /// Bind to an outgoing media sender.
    pub fn sender(endpoint_id: impl Into<String>) -> Self {
        Self { direction: MediaDirection::Sender, endpoint_id: endpoint_id.into() }
    }

    /// Bind to an incoming media receiver.
    pub fn receiver(endpoint_id: impl Into<String>) -> Self {
        Self { direction: MediaDirection::Receiver, endpoint_id: endpoint_id.into() }
    }
}
