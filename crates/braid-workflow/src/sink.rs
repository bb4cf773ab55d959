//! Destinations for execution records.
//!
//! Workflows emit a `Created` event when a run starts and an `Updated` event
//! when it finishes. Storing or broadcasting them is up to the sink.

use std::sync::Arc;

use braid_types::ExecutionEvent;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::trace;

/// Receives execution records as runs progress.
///
/// `emit` is called inline on the run's task and must not block.
pub trait ExecutionSink: Send + Sync {
    fn emit(&self, event: ExecutionEvent);
}

/// A sink shared between workflows.
pub type SharedSink = Arc<dyn ExecutionSink>;

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl ExecutionSink for NoopSink {
    fn emit(&self, _event: ExecutionEvent) {}
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<ExecutionEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Events received so far, in emission order.
    pub fn events(&self) -> Vec<ExecutionEvent> {
        self.events.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}

impl ExecutionSink for MemorySink {
    fn emit(&self, event: ExecutionEvent) {
        self.events.lock().push(event);
    }
}

/// Forwards events to a tokio broadcast channel.
///
/// Events sent while nobody is subscribed are dropped.
#[derive(Debug, Clone)]
pub struct BroadcastSink {
    tx: broadcast::Sender<ExecutionEvent>,
}

impl BroadcastSink {
    /// Create a sink whose channel buffers `capacity` events per receiver.
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.tx.subscribe()
    }
}

impl ExecutionSink for BroadcastSink {
    fn emit(&self, event: ExecutionEvent) {
        if self.tx.send(event).is_err() {
            trace!("No execution event subscribers");
        }
    }
}
