//! Payment event sinks.
//!
//! The coordinator pushes every [`PaymentEvent`] through one emitter. The
//! daemon uses [`ChannelEmitter`] to stream them out; tests use it to
//! assert on event order.

use tokio::sync::mpsc;
use tracing::debug;

use kiosk_core::PaymentEvent;

// =============================================================================
// Event Emitter Trait
// =============================================================================

/// Trait for delivering payment events to the kiosk UI layer.
pub trait PaymentEventEmitter: Send + Sync {
    /// Emits one event. Must not block.
    fn emit(&self, event: &PaymentEvent);
}

/// No-op event emitter for testing.
pub struct NoOpEmitter;

impl PaymentEventEmitter for NoOpEmitter {
    fn emit(&self, _event: &PaymentEvent) {}
}

// =============================================================================
// Channel Emitter
// =============================================================================

/// Forwards events into an unbounded channel.
pub struct ChannelEmitter {
    tx: mpsc::UnboundedSender<PaymentEvent>,
}

impl ChannelEmitter {
    /// Creates the emitter and the receiving end of its feed.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<PaymentEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl PaymentEventEmitter for ChannelEmitter {
    fn emit(&self, event: &PaymentEvent) {
        if self.tx.send(event.clone()).is_err() {
            debug!(event = event.name(), "Event feed closed, dropping event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiosk_core::{DeviceKind, Money};

    #[test]
    fn test_channel_emitter_preserves_order() {
        let (emitter, mut rx) = ChannelEmitter::new();
        emitter.emit(&PaymentEvent::DeviceReady {
            device: DeviceKind::BillValidator,
        });
        emitter.emit(&PaymentEvent::ChangeDispensed {
            amount: Money::from_cents(50),
        });

        assert_eq!(rx.try_recv().unwrap().name(), "DEVICE_READY");
        assert_eq!(rx.try_recv().unwrap().name(), "CHANGE_DISPENSED");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_channel_emitter_survives_dropped_receiver() {
        let (emitter, rx) = ChannelEmitter::new();
        drop(rx);
        emitter.emit(&PaymentEvent::DeviceReady {
            device: DeviceKind::CoinHandler,
        });
    }
}
