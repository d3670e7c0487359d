//! Main [`LightwaveLink`] client implementation.
//!
//! This module provides the session object that owns everything needed to
//! talk to one hub: the command queue and its delivery worker, the
//! transaction id allocator, the state collector and the TRV proxy client.
//! Several links can coexist in one process without sharing any state.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::collector::{LinkState, StateCollector};
use crate::delivery::{CommandQueue, ReliableSender};
use crate::error::{Error, Result};
use crate::event::{Event, EventDispatcher, Subscription};
use crate::protocol::{Command, TransactionIdAllocator};
use crate::proxy::{ProxyConfig, TrvProxy};
use crate::transport::{LinkConfig, ResponseMode};
use crate::types::{TrvReading, TrvStatus};

/// Capacity of the event broadcast channel.
const EVENT_CAPACITY: usize = 256;

/// Client for communicating with a Lightwave hub.
pub struct LightwaveLink {
    config: LinkConfig,
    ids: Arc<TransactionIdAllocator>,
    state: LinkState,
    dispatcher: EventDispatcher,
    proxy: Option<TrvProxy>,

    // Background tasks
    queue: Option<CommandQueue>,
    worker_task: Option<JoinHandle<()>>,
    collector: Option<StateCollector>,
}

impl LightwaveLink {
    /// Creates a new link (not yet connected).
    #[must_use]
    pub fn new(config: LinkConfig) -> Self {
        let proxy = config.proxy.clone().map(TrvProxy::new);
        Self {
            config,
            ids: Arc::new(TransactionIdAllocator::new()),
            state: LinkState::new(),
            dispatcher: EventDispatcher::new(EVENT_CAPACITY),
            proxy,
            queue: None,
            worker_task: None,
            collector: None,
        }
    }

    /// Starts the link.
    ///
    /// This will:
    /// 1. Bind the state collector, in shared-listener mode
    /// 2. Spawn the delivery worker
    ///
    /// # Errors
    ///
    /// Returns an error if the receive port cannot be bound.
    pub async fn connect(&mut self) -> Result<()> {
        if self.queue.is_some() {
            return Ok(());
        }

        tracing::info!(
            "connecting to hub {} ({:?} mode)",
            self.config.hub_addr(),
            self.config.response_mode
        );

        // Replies seen by an earlier session are stale
        self.state.clear_last_response().await;

        if self.config.response_mode == ResponseMode::SharedListener {
            self.start_listener()?;
        }

        let sender = ReliableSender::new(
            self.config.clone(),
            Arc::clone(&self.ids),
            self.state.clone(),
        )
        .with_events(self.dispatcher.clone());
        let (queue, worker) =
            CommandQueue::spawn(sender, self.dispatcher.clone(), self.config.queue_capacity);
        self.queue = Some(queue);
        self.worker_task = Some(worker);

        self.dispatcher.dispatch(Event::Connected);
        Ok(())
    }

    /// Starts the state collector if it is not running.
    ///
    /// The collector and a per-transaction socket cannot both receive the
    /// same reply, so the link switches to
    /// [`ResponseMode::SharedListener`]. Transactions already queued pick
    /// this up as well.
    pub fn start_listener(&mut self) -> Result<()> {
        if self.collector.as_ref().is_some_and(StateCollector::is_running) {
            return Ok(());
        }
        let collector = StateCollector::start(
            self.config.receive_port,
            self.state.clone(),
            self.dispatcher.clone(),
        )?;
        tracing::info!("listening for hub datagrams on {}", collector.local_addr());

        self.config.response_mode = ResponseMode::SharedListener;
        self.collector = Some(collector);
        Ok(())
    }

    /// Stops the link.
    ///
    /// Commands already queued are delivered (or exhaust their retries)
    /// before this returns.
    pub async fn disconnect(&mut self) -> Result<()> {
        // Dropping the queue closes it; the worker drains and exits
        if let Some(queue) = self.queue.take() {
            tracing::info!("waiting for {} pending commands", queue.pending());
        }
        if let Some(worker) = self.worker_task.take() {
            if let Err(e) = worker.await {
                tracing::warn!("delivery worker ended abnormally: {}", e);
            }
        }

        if let Some(mut collector) = self.collector.take() {
            collector.stop();
        }

        tracing::info!("disconnected from hub {}", self.config.hub);
        self.dispatcher.dispatch(Event::Disconnected);
        Ok(())
    }

    /// Returns true if connected.
    #[must_use]
    pub const fn is_connected(&self) -> bool {
        self.queue.is_some()
    }

    /// Returns the link configuration.
    #[must_use]
    pub const fn config(&self) -> &LinkConfig {
        &self.config
    }

    /// Returns the state shared with the collector.
    #[must_use]
    pub const fn state(&self) -> &LinkState {
        &self.state
    }

    /// Subscribes to events.
    #[must_use]
    pub fn subscribe(&self) -> Subscription {
        self.dispatcher.subscribe()
    }

    /// Queues a command for delivery.
    ///
    /// Returns as soon as the command is queued. The delivery outcome is
    /// logged and published as an [`Event`].
    pub fn send(&self, command: Command) -> Result<()> {
        let queue = self.queue.as_ref().ok_or(Error::NotConnected)?;
        match command.device_id() {
            Some(device) => tracing::debug!("queueing {} for {}", command.label(), device),
            None => tracing::debug!("queueing {}", command.label()),
        }
        queue.enqueue(command)
    }

    // ==================== Hub Commands ====================

    /// Asks the hub to pair with this client.
    pub fn register(&self) -> Result<()> {
        self.send(Command::register())
    }

    /// Removes every paired client from the hub.
    pub fn deregister_all(&self) -> Result<()> {
        self.send(Command::deregister_all())
    }

    // ==================== Device Commands ====================

    /// Turns a dimmable light on at full brightness.
    pub fn turn_on_light(&self, device_id: &str, name: &str) -> Result<()> {
        self.send(Command::turn_on_light(device_id, name))
    }

    /// Turns a switch on.
    pub fn turn_on_switch(&self, device_id: &str, name: &str) -> Result<()> {
        self.send(Command::turn_on_switch(device_id, name))
    }

    /// Turns a light on at a brightness in `0..=255`.
    pub fn turn_on_with_brightness(
        &self,
        device_id: &str,
        name: &str,
        brightness: u8,
    ) -> Result<()> {
        self.send(Command::turn_on_with_brightness(device_id, name, brightness))
    }

    /// Turns a light or switch off.
    pub fn turn_off(&self, device_id: &str, name: &str) -> Result<()> {
        self.send(Command::turn_off(device_id, name))
    }

    /// Sets a TRV's target temperature.
    pub fn set_temperature(&self, device_id: &str, temperature: f64, name: &str) -> Result<()> {
        self.send(Command::set_temperature(device_id, temperature, name))
    }

    // ==================== TRV Status ====================

    /// Uses a TRV proxy for status queries.
    pub fn set_trv_proxy(&mut self, host: impl Into<String>, port: u16) {
        let config = ProxyConfig::new(host, port);
        self.config.proxy = Some(config.clone());
        self.proxy = Some(TrvProxy::new(config));
    }

    /// Returns the latest collected reading for a TRV.
    pub async fn trv_reading(&self, serial: &str) -> Option<TrvReading> {
        self.state.trv_reading(serial).await
    }

    /// Returns all collected TRV readings.
    pub async fn trv_readings(&self) -> HashMap<String, TrvReading> {
        self.state.trv_readings().await
    }

    /// Reads the status of a TRV.
    ///
    /// Collected telemetry is used when present. Otherwise the proxy is
    /// asked, if one is configured. Unknown devices and failed queries
    /// yield an empty status.
    pub async fn read_trv_status(&self, serial: &str) -> TrvStatus {
        if let Some(reading) = self.state.trv_reading(serial).await {
            tracing::debug!("TRV data found locally: {}", serial);
            return reading.status();
        }

        match &self.proxy {
            Some(proxy) => proxy.query(serial).await,
            None => {
                tracing::debug!("TRV data not found: {}", serial);
                TrvStatus::default()
            }
        }
    }
}

impl Drop for LightwaveLink {
    fn drop(&mut self) {
        // Abort background tasks
        if let Some(task) = self.worker_task.take() {
            task.abort();
        }
    }
}
