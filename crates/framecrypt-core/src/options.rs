//! Key provider configuration.
//!
//! [`KeyProviderOptions`] is the typed form every provider is built from.
//! [`KeyProviderConfig`] is the camelCase shape a host binding hands over
//! (integers that may be negative, base64 strings for binary fields) and is
//! converted with `TryFrom`, which is where host sentinels such as a failure
//! tolerance of `-1` are interpreted.

use base64::{Engine as _, engine::general_purpose::STANDARD};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::error::FrameCryptorError;

/// Salt used for ratchet derivation when none is configured.
pub const DEFAULT_RATCHET_SALT: &str = "LKFrameEncryptionKey";

/// Number of ratchet steps a key may advance from its installed value.
pub const DEFAULT_RATCHET_WINDOW_SIZE: u32 = 16;

/// Slots per key ring when none is configured.
pub const DEFAULT_KEY_RING_SIZE: usize = 16;

/// Largest key ring: the key index travels in a single trailer byte.
pub const MAX_KEY_RING_SIZE: usize = 256;

/// Host value meaning "never escalate failures".
pub const UNLIMITED_FAILURE_TOLERANCE: i32 = -1;

/// Immutable options of a key provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyProviderOptions {
    /// Serve every participant from a single shared key ring
    pub shared_key: bool,
    /// Salt fed to every ratchet derivation
    pub ratchet_salt: Vec<u8>,
    /// Ratchet steps allowed past the installed key
    pub ratchet_window_size: u32,
    /// Frames ending with these bytes bypass the cryptor in both directions
    pub uncrypted_magic_bytes: Option<Vec<u8>>,
    /// Consecutive failures tolerated before `InternalError`; `None` never
    /// escalates
    pub failure_tolerance: Option<u32>,
    /// Slots per key ring (1..=256)
    pub key_ring_size: usize,
    /// Drop frames instead of passing them through while a cryptor is
    /// disabled or has no key
    pub discard_frame_when_cryptor_not_ready: bool,
}

impl Default for KeyProviderOptions {
    fn default() -> Self {
        Self {
            shared_key: false,
            ratchet_salt: DEFAULT_RATCHET_SALT.as_bytes().to_vec(),
            ratchet_window_size: DEFAULT_RATCHET_WINDOW_SIZE,
            uncrypted_magic_bytes: None,
            failure_tolerance: None,
            key_ring_size: DEFAULT_KEY_RING_SIZE,
            discard_frame_when_cryptor_not_ready: false,
        }
    }
}

impl KeyProviderOptions {
    /// Check the options a provider cannot work with.
    ///
    /// # Errors
    ///
    /// - `InvalidConfiguration` if `key_ring_size` is outside `1..=256`
    pub fn validate(&self) -> Result<(), FrameCryptorError> {
        if !(1..=MAX_KEY_RING_SIZE).contains(&self.key_ring_size) {
            return Err(FrameCryptorError::invalid_config(format!(
                "key ring size must be between 1 and {MAX_KEY_RING_SIZE}, got {}",
                self.key_ring_size
            )));
        }

        Ok(())
    }

    /// Returns true if `frame` ends with the configured magic bytes.
    ///
    /// An empty magic sequence never matches.
    pub fn is_uncrypted_frame(&self, frame: &[u8]) -> bool {
        match self.uncrypted_magic_bytes.as_deref() {
            Some(magic) if !magic.is_empty() => frame.ends_with(magic),
            _ => false,
        }
    }
}

/// Key provider configuration as supplied by a host binding.
///
/// Field names and defaults follow the host's JSON shape. Missing fields take
/// their defaults, so `{}` is a valid configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct KeyProviderConfig {
    /// Serve every participant from a single shared key ring
    pub shared_key: bool,
    /// Ratchet salt, UTF-8 text unless `ratchet_salt_is_base64`
    pub ratchet_salt: String,
    /// Interpret `ratchet_salt` as base64
    pub ratchet_salt_is_base64: bool,
    /// Ratchet window; must not be negative
    pub ratchet_window_size: i32,
    /// Base64-encoded magic bytes
    pub uncrypted_magic_bytes: Option<String>,
    /// `-1` for unlimited, otherwise a non-negative tolerance
    pub failure_tolerance: i32,
    /// Slots per key ring
    pub key_ring_size: i32,
    /// Drop frames while a cryptor is not ready
    pub discard_frame_when_cryptor_not_ready: bool,
}

impl Default for KeyProviderConfig {
    fn default() -> Self {
        Self {
            shared_key: false,
            ratchet_salt: DEFAULT_RATCHET_SALT.to_owned(),
            ratchet_salt_is_base64: false,
            ratchet_window_size: DEFAULT_RATCHET_WINDOW_SIZE as i32,
            uncrypted_magic_bytes: None,
            failure_tolerance: UNLIMITED_FAILURE_TOLERANCE,
            key_ring_size: DEFAULT_KEY_RING_SIZE as i32,
            discard_frame_when_cryptor_not_ready: false,
        }
    }
}

impl TryFrom<KeyProviderConfig> for KeyProviderOptions {
    type Error = FrameCryptorError;

    fn try_from(config: KeyProviderConfig) -> Result<Self, Self::Error> {
        let ratchet_salt = if config.ratchet_salt_is_base64 {
            decode_base64(&config.ratchet_salt, "ratchetSalt")?.to_vec()
        } else {
            config.ratchet_salt.into_bytes()
        };

        let ratchet_window_size = u32::try_from(config.ratchet_window_size).map_err(|_| {
            FrameCryptorError::invalid_config(format!(
                "ratchet window size must not be negative, got {}",
                config.ratchet_window_size
            ))
        })?;

        let uncrypted_magic_bytes = match config.uncrypted_magic_bytes.as_deref() {
            Some(encoded) => {
                let magic = decode_base64(encoded, "uncryptedMagicBytes")?.to_vec();
                (!magic.is_empty()).then_some(magic)
            },
            None => None,
        };

        let failure_tolerance = match config.failure_tolerance {
            UNLIMITED_FAILURE_TOLERANCE => None,
            tolerance => Some(u32::try_from(tolerance).map_err(|_| {
                FrameCryptorError::invalid_config(format!(
                    "failure tolerance must be -1 or non-negative, got {tolerance}"
                ))
            })?),
        };

        let key_ring_size = usize::try_from(config.key_ring_size).map_err(|_| {
            FrameCryptorError::invalid_config(format!(
                "key ring size must not be negative, got {}",
                config.key_ring_size
            ))
        })?;

        let options = Self {
            shared_key: config.shared_key,
            ratchet_salt,
            ratchet_window_size,
            uncrypted_magic_bytes,
            failure_tolerance,
            key_ring_size,
            discard_frame_when_cryptor_not_ready: config.discard_frame_when_cryptor_not_ready,
        };
        options.validate()?;
        Ok(options)
    }
}

/// Key material as supplied by a caller.
///
/// Hosts that cannot pass binary data hand keys over as base64; both forms
/// install identical key material.
#[derive(Clone, PartialEq, Eq)]
pub enum KeyInput {
    /// Raw key bytes
    Raw(Zeroizing<Vec<u8>>),
    /// Base64-encoded key bytes
    Base64(Zeroizing<String>),
}

impl KeyInput {
    /// Wrap raw key bytes.
    pub fn raw(bytes: impl Into<Vec<u8>>) -> Self {
        Self::Raw(Zeroizing::new(bytes.into()))
    }

    /// Wrap a base64-encoded key.
    pub fn base64(encoded: impl Into<String>) -> Self {
        Self::Base64(Zeroizing::new(encoded.into()))
    }

    /// Decode into raw key bytes.
    ///
    /// # Errors
    ///
    /// - `InvalidBase64` if a base64 input does not decode
    pub fn into_bytes(self) -> Result<Zeroizing<Vec<u8>>, FrameCryptorError> {
        match self {
            Self::Raw(bytes) => Ok(bytes),
            Self::Base64(encoded) => decode_base64(&encoded, "key"),
        }
    }
}

impl std::fmt::Debug for KeyInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Raw(bytes) => f.debug_struct("Raw").field("len", &bytes.len()).finish(),
            Self::Base64(_) => f.write_str("Base64(..)"),
        }
    }
}

impl From<Vec<u8>> for KeyInput {
    fn from(bytes: Vec<u8>) -> Self {
        Self::raw(bytes)
    }
}

impl From<&[u8]> for KeyInput {
    fn from(bytes: &[u8]) -> Self {
        Self::raw(bytes)
    }
}

impl<const N: usize> From<&[u8; N]> for KeyInput {
    fn from(bytes: &[u8; N]) -> Self {
        Self::raw(bytes.as_slice())
    }
}

/// Decode base64, ignoring embedded whitespace and line breaks.
fn decode_base64(
    encoded: &str,
    field: &'static str,
) -> Result<Zeroizing<Vec<u8>>, FrameCryptorError> {
    let compact: Zeroizing<String> =
        Zeroizing::new(encoded.chars().filter(|c| !c.is_ascii_whitespace()).collect());

    STANDARD
        .decode(compact.as_bytes())
        .map(Zeroizing::new)
        .map_err(|_| FrameCryptorError::InvalidBase64 { field })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_host_defaults() {
        let options = KeyProviderOptions::default();

        assert!(!options.shared_key);
        assert_eq!(options.ratchet_salt, b"LKFrameEncryptionKey");
        assert_eq!(options.ratchet_window_size, 16);
        assert_eq!(options.uncrypted_magic_bytes, None);
        assert_eq!(options.failure_tolerance, None);
        assert_eq!(options.key_ring_size, 16);
        assert!(!options.discard_frame_when_cryptor_not_ready);
        assert!(options.validate().is_ok());
    }

    #[test]
    fn empty_config_converts_to_default_options() {
        let config: KeyProviderConfig = serde_json::from_str("{}").unwrap();
        let options = KeyProviderOptions::try_from(config).unwrap();

        assert_eq!(options, KeyProviderOptions::default());
    }

    #[test]
    fn validate_rejects_ring_size_out_of_range() {
        for key_ring_size in [0, 257, 1024] {
            let options = KeyProviderOptions { key_ring_size, ..Default::default() };
            assert!(matches!(
                options.validate(),
                Err(FrameCryptorError::InvalidConfiguration { .. })
            ));
        }

        for key_ring_size in [1, 16, 256] {
            let options = KeyProviderOptions { key_ring_size, ..Default::default() };
            assert!(options.validate().is_ok());
        }
    }

    #[test]
    fn host_config_decodes_camel_case_fields() {
        let json = r#"{
            "sharedKey": true,
            "ratchetSalt": "c2FsdA==",
            "ratchetSaltIsBase64": true,
            "ratchetWindowSize": 8,
            "uncryptedMagicBytes": "TUFHSUM=",
            "failureTolerance": 3,
            "keyRingSize": 4,
            "discardFrameWhenCryptorNotReady": true
        }"#;
        let config: KeyProviderConfig = serde_json::from_str(json).unwrap();
        let options = KeyProviderOptions::try_from(config).unwrap();

        assert!(options.shared_key);
        assert_eq!(options.ratchet_salt, b"salt");
        assert_eq!(options.ratchet_window_size, 8);
        assert_eq!(options.uncrypted_magic_bytes.as_deref(), Some(&b"MAGIC"[..]));
        assert_eq!(options.failure_tolerance, Some(3));
        assert_eq!(options.key_ring_size, 4);
        assert!(options.discard_frame_when_cryptor_not_ready);
    }

    #[test]
    fn plain_salt_is_used_as_utf8() {
        let config = KeyProviderConfig { ratchet_salt: "room-1".into(), ..Default::default() };
        let options = KeyProviderOptions::try_from(config).unwrap();
        assert_eq!(options.ratchet_salt, b"room-1");
    }

    #[test]
    fn negative_tolerance_other_than_unlimited_is_rejected() {
        let config = KeyProviderConfig { failure_tolerance: -2, ..Default::default() };
        assert!(matches!(
            KeyProviderOptions::try_from(config),
            Err(FrameCryptorError::InvalidConfiguration { .. })
        ));
    }

    #[test]
    fn negative_window_and_ring_are_rejected() {
        let window = KeyProviderConfig { ratchet_window_size: -1, ..Default::default() };
        assert!(KeyProviderOptions::try_from(window).is_err());

        let ring = KeyProviderConfig { key_ring_size: -16, ..Default::default() };
        assert!(KeyProviderOptions::try_from(ring).is_err());
    }

    #[test]
    fn bad_base64_names_the_field() {
        let config = KeyProviderConfig {
            uncrypted_magic_bytes: Some("not base64!".into()),
            ..Default::default()
        };
        assert_eq!(
            KeyProviderOptions::try_from(config),
            Err(FrameCryptorError::InvalidBase64 { field: "uncryptedMagicBytes" })
        );
    }

    #[test]
    fn empty_magic_bytes_mean_none() {
        let config = KeyProviderConfig {
            uncrypted_magic_bytes: Some(String::new()),
            ..Default::default()
        };
        let options = KeyProviderOptions::try_from(config).unwrap();
        assert_eq!(options.uncrypted_magic_bytes, None);
        assert!(!options.is_uncrypted_frame(b"anything"));
    }

    #[test]
    fn magic_bytes_match_only_at_frame_end() {
        let options = KeyProviderOptions {
            uncrypted_magic_bytes: Some(b"LK-ROCKS".to_vec()),
            ..Default::default()
        };

        assert!(options.is_uncrypted_frame(b"payloadLK-ROCKS"));
        assert!(options.is_uncrypted_frame(b"LK-ROCKS"));
        assert!(!options.is_uncrypted_frame(b"LK-ROCKSpayload"));
        assert!(!options.is_uncrypted_frame(b"ROCKS"));
    }

    #[test]
    fn base64_and_raw_inputs_agree() {
        let raw = KeyInput::raw(vec![0x42; 16]).into_bytes().unwrap();
        let encoded = KeyInput::base64("QkJCQkJCQkJCQkJCQkJCQg==").into_bytes().unwrap();
        assert_eq!(raw, encoded);
    }

    #[test]
    fn base64_input_tolerates_line_breaks() {
        let decoded = KeyInput::base64("QkJCQkJCQkJC\nQkJCQkJCQg==\n").into_bytes().unwrap();
        assert_eq!(decoded.as_slice(), &[0x42; 16]);
    }

    #[test]
    fn key_input_debug_hides_material() {
        let rendered = format!("{:?}", KeyInput::raw(vec![0xAB; 16]));
        assert_eq!(rendered, "Raw { len: 16 }");
    }
}
