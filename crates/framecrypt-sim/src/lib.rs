//! Framecrypt loopback simulator.
//!
//! Drives a sending and a receiving frame cryptor over an in-process wire,
//! the way two peers of a call would use the engine: keys are rotated out of
//! band, the sender ratchets silently and the wire corrupts frames. The
//! resulting [`ScenarioReport`] counts what the receiver recovered, refused
//! and lost.
//!
//! Used by the `framecrypt-sim` binary and as an end-to-end harness in tests.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod scenario;

pub use error::SimError;
pub use scenario::{CHANNEL_CAPACITY, ScenarioConfig, ScenarioReport, run_scenario};
