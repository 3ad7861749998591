//! Communication channels for the orchestrator

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::protocol::{Event, Op};

/// Orchestrator-side end of a [`HiveChannel`]
pub struct ChannelPair {
    /// Receiver for operations
    pub op_rx: mpsc::UnboundedReceiver<Op>,
    /// Sink for events
    pub events: EventSink,
}

/// Fire-and-forget progress sink shared by every worker.
///
/// Emitting never blocks and never fails: if the receiving side is gone
/// the event is dropped.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<Event>,
}

impl EventSink {
    pub fn new(tx: mpsc::UnboundedSender<Event>) -> Self {
        Self { tx }
    }

    /// Sink plus the receiver that observes it
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Sink whose events go nowhere
    pub fn noop() -> Self {
        let (tx, _rx) = mpsc::unbounded_channel();
        Self { tx }
    }

    pub fn emit(&self, event: Event) {
        let _ = self.tx.send(event);
    }
}

/// Client-side channel for driving a running orchestrator
#[derive(Clone)]
pub struct HiveChannel {
    op_tx: mpsc::UnboundedSender<Op>,
    event_rx: Arc<parking_lot::Mutex<mpsc::UnboundedReceiver<Event>>>,
}

impl HiveChannel {
    /// Create a new channel pair
    ///
    /// Returns the client channel and the orchestrator channel pair
    pub fn new() -> (Self, ChannelPair) {
        let (op_tx, op_rx) = mpsc::unbounded_channel();
        let (events, event_rx) = EventSink::channel();

        let channel = Self {
            op_tx,
            event_rx: Arc::new(parking_lot::Mutex::new(event_rx)),
        };

        (channel, ChannelPair { op_rx, events })
    }

    /// Send an operation to the orchestrator
    pub fn send(&self, op: Op) -> Result<(), ChannelError> {
        self.op_tx.send(op).map_err(|_| ChannelError::Closed)
    }

    /// Try to receive an event (non-blocking)
    pub fn try_recv(&self) -> Option<Event> {
        self.event_rx.lock().try_recv().ok()
    }

    /// Drain every event currently buffered
    pub fn drain(&self) -> Vec<Event> {
        let mut rx = self.event_rx.lock();
        std::iter::from_fn(|| rx.try_recv().ok()).collect()
    }

    /// Check if the orchestrator has stopped listening
    pub fn is_closed(&self) -> bool {
        self.op_tx.is_closed()
    }
}

/// Channel errors
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Channel is closed")]
    Closed,
}
