//! Async channel bridge between the monitor thread and the Tokio runtime
//!
//! The monitor reads hotplug notifications on a dedicated blocking thread and
//! hands them to the async orchestrator through a bounded channel. Items are
//! `Result`s so that mid-stream failures travel the same path as events.

use async_channel::{Receiver, Sender, bounded};
use std::sync::Arc;
use tokio::sync::watch;

/// Capacity of the event bridge
pub const EVENT_BRIDGE_CAPACITY: usize = 256;

/// Producer half, owned by the monitor thread (blocking)
#[derive(Debug)]
pub struct EventSender<T> {
    tx: Sender<crate::Result<T>>,
}

impl<T> EventSender<T> {
    /// Send an event to the Tokio runtime (blocking)
    ///
    /// Fails once the receiving side has been dropped or closed.
    pub fn send_blocking(&self, item: crate::Result<T>) -> crate::Result<()> {
        self.tx
            .send_blocking(item)
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Send an event from async code
    pub async fn send(&self, item: crate::Result<T>) -> crate::Result<()> {
        self.tx
            .send(item)
            .await
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Whether the consumer has gone away
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Consumer half, owned by the orchestrator (async)
#[derive(Debug)]
pub struct EventReceiver<T> {
    rx: Receiver<crate::Result<T>>,
}

impl<T> EventReceiver<T> {
    /// Receive the next item, or `None` once every sender is gone
    pub async fn recv(&self) -> Option<crate::Result<T>> {
        self.rx.recv().await.ok()
    }

    /// Close the channel so the producer stops on its next send
    pub fn close(&self) -> bool {
        self.rx.close()
    }
}

/// Create the channel bridge between the monitor thread and Tokio
///
/// Returns (EventSender for the monitor thread, EventReceiver for Tokio)
pub fn create_event_bridge<T>() -> (EventSender<T>, EventReceiver<T>) {
    let (tx, rx) = bounded(EVENT_BRIDGE_CAPACITY);
    (EventSender { tx }, EventReceiver { rx })
}

/// Cooperative shutdown signal
///
/// Cloned into every party that has to stop; triggering it once is observed
/// by all clones, both from blocking threads and async tasks.
#[derive(Debug, Clone)]
pub struct Shutdown {
    tx: Arc<watch::Sender<bool>>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Request shutdown
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    /// Non-blocking check, used by the monitor thread between receives
    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    /// Wait until shutdown has been requested
    pub async fn triggered(&self) {
        let mut rx = self.tx.subscribe();
        let _ = rx.wait_for(|stop| *stop).await;
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}
