//! Ordered command queue and its delivery worker.
//!
//! A single worker task consumes the queue for the lifetime of the link, so
//! at most one transaction is ever in flight and commands reach the hub in
//! the order they were enqueued. Closing the queue lets the worker drain
//! what is left and exit.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::delivery::sender::Deliver;
use crate::error::{Error, Result};
use crate::event::{Event, EventDispatcher};
use crate::protocol::Command;

/// Sending half of the command queue.
#[derive(Debug, Clone)]
pub struct CommandQueue {
    tx: mpsc::Sender<Command>,
}

impl CommandQueue {
    /// Creates a queue and spawns its delivery worker.
    pub fn spawn<D>(
        deliverer: D,
        dispatcher: EventDispatcher,
        capacity: usize,
    ) -> (Self, JoinHandle<()>)
    where
        D: Deliver + 'static,
    {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let worker = tokio::spawn(run_delivery_loop(rx, deliverer, dispatcher));
        (Self { tx }, worker)
    }

    /// Appends a command without waiting.
    pub fn enqueue(&self, command: Command) -> Result<()> {
        self.tx.try_send(command).map_err(|e| match e {
            mpsc::error::TrySendError::Full(command) => {
                tracing::warn!("command queue full, dropping {}", command.label());
                Error::QueueFull
            }
            mpsc::error::TrySendError::Closed(_) => Error::ChannelClosed,
        })
    }

    /// Returns the number of commands waiting.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }
}

async fn run_delivery_loop<D: Deliver>(
    mut rx: mpsc::Receiver<Command>,
    deliverer: D,
    dispatcher: EventDispatcher,
) {
    tracing::debug!("delivery worker started");

    while let Some(command) = rx.recv().await {
        match deliverer.deliver(&command).await {
            Ok(delivery) => {
                tracing::debug!(
                    "delivered {} (transaction {}, {} attempts)",
                    command.label(),
                    delivery.transaction_id,
                    delivery.attempts
                );
                dispatcher.dispatch(Event::Delivered {
                    transaction_id: delivery.transaction_id,
                    attempts: delivery.attempts,
                    label: command.label().to_owned(),
                });
            }
            Err(e) => {
                tracing::error!("failed to deliver {}: {}", command.label(), e);
                dispatcher.dispatch(Event::DeliveryFailed {
                    label: command.label().to_owned(),
                    reason: e.to_string(),
                });
            }
        }
    }

    tracing::debug!("command queue closed, delivery worker exiting");
}
