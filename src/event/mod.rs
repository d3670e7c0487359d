//! Event system for observing the link.
//!
//! Sending a command never returns its outcome to the caller. Delivery
//! results, telemetry updates and raw hub responses are published here
//! instead, for any number of subscribers.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

/// Event types that can be dispatched.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Link started.
    Connected,
    /// Link stopped.
    Disconnected,
    /// The hub acknowledged a command.
    Delivered {
        transaction_id: u16,
        attempts: u32,
        label: String,
    },
    /// A command could not be delivered.
    DeliveryFailed { label: String, reason: String },
    /// The hub reported that this client is not registered.
    NotRegistered,
    /// New telemetry stored for a TRV.
    TrvUpdated { serial: String },
    /// Non-telemetry datagram received by the state collector.
    Response(String),
}

impl Event {
    /// Returns the label of the command this event concerns.
    #[must_use]
    pub fn label(&self) -> Option<&str> {
        match self {
            Self::Delivered { label, .. } | Self::DeliveryFailed { label, .. } => Some(label),
            _ => None,
        }
    }

    /// Returns true for the final event of a queued command.
    #[must_use]
    pub const fn is_delivery_outcome(&self) -> bool {
        matches!(self, Self::Delivered { .. } | Self::DeliveryFailed { .. })
    }
}

/// A subscription to events.
pub struct Subscription {
    receiver: broadcast::Receiver<Event>,
}

impl Subscription {
    /// Receives the next event.
    ///
    /// Returns `None` once the dispatcher is gone.
    pub async fn recv(&mut self) -> Option<Event> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!("subscriber lagged, skipped {} events", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Waits for an event matching `predicate`.
    ///
    /// Returns `None` if the timeout expires or the channel is closed.
    pub async fn wait_for<F>(&mut self, timeout: Duration, mut predicate: F) -> Option<Event>
    where
        F: FnMut(&Event) -> bool,
    {
        tokio::select! {
            biased;
            result = async {
                while let Some(event) = self.recv().await {
                    if predicate(&event) {
                        return Some(event);
                    }
                }
                None
            } => result,
            () = tokio::time::sleep(timeout) => None,
        }
    }
}

#[derive(Debug)]
struct EventDispatcherInner {
    sender: broadcast::Sender<Event>,
}

/// Dispatches events to subscribers.
#[derive(Debug, Clone)]
pub struct EventDispatcher {
    inner: Arc<EventDispatcherInner>,
}

impl EventDispatcher {
    /// Creates a new event dispatcher.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            inner: Arc::new(EventDispatcherInner { sender }),
        }
    }

    /// Dispatches an event to all subscribers.
    pub fn dispatch(&self, event: Event) {
        // No receivers is fine
        let _ = self.inner.sender.send(event);
    }

    /// Subscribes to all future events.
    #[must_use]
    pub fn subscribe(&self) -> Subscription {
        Subscription {
            receiver: self.inner.sender.subscribe(),
        }
    }
}
