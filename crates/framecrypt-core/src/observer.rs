//! State change observers.
//!
//! A frame cryptor reports every transition to the observer it was created
//! with. Observers run on the thread that processed the frame, so they must
//! return quickly: hand the event to a channel or record it, never block.

use tokio::sync::mpsc::UnboundedSender;

use crate::state::StateChangeEvent;

/// Receiver of frame cryptor state changes.
pub trait FrameCryptorObserver: Send + Sync {
    /// Called once per emitted transition.
    fn on_state_change(&self, event: StateChangeEvent);
}

impl<F> FrameCryptorObserver for F
where
    F: Fn(StateChangeEvent) + Send + Sync,
{
    fn on_state_change(&self, event: StateChangeEvent) {
        self(event);
    }
}

/// Forwards events into an async consumer. Events sent after the receiver is
/// gone are discarded.
impl FrameCryptorObserver for UnboundedSender<StateChangeEvent> {
    fn on_state_change(&self, event: StateChangeEvent) {
        if self.send(event).is_err() {
            tracing::trace!("state change receiver dropped");
        }
    }
}

/// Observer that ignores every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl FrameCryptorObserver for NoopObserver {
    fn on_state_change(&self, _event: StateChangeEvent) {}
}
