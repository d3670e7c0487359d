//! Long-lived listener on the hub's receive port.
//!
//! The hub pushes TRV telemetry as JSON broadcasts and sends command
//! replies to the same port. The collector indexes telemetry by device
//! serial and keeps the most recent non-telemetry datagram so that
//! transactions in [`ResponseMode::SharedListener`] can inspect it.
//!
//! [`ResponseMode::SharedListener`]: crate::transport::ResponseMode::SharedListener

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::net::UdpSocket;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;

use crate::error::Result;
use crate::event::{Event, EventDispatcher};
use crate::protocol::{MAX_DATAGRAM_SIZE, strip_broadcast_prefix};
use crate::transport::bind_receive_socket;
use crate::types::TrvReading;

/// State shared between the collector, the delivery worker and callers.
#[derive(Debug, Clone, Default)]
pub struct LinkState {
    trv: Arc<RwLock<HashMap<String, TrvReading>>>,
    last_response: Arc<Mutex<Option<String>>>,
    listening: Arc<AtomicBool>,
}

/// What the collector did with a datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Absorbed {
    /// Telemetry stored for the given serial.
    Telemetry(String),
    /// Stored as the last response.
    Response,
}

impl LinkState {
    /// Creates empty state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the latest reading for a TRV.
    pub async fn trv_reading(&self, serial: &str) -> Option<TrvReading> {
        self.trv.read().await.get(serial).cloned()
    }

    /// Returns a snapshot of all known TRV readings.
    pub async fn trv_readings(&self) -> HashMap<String, TrvReading> {
        self.trv.read().await.clone()
    }

    /// Returns the last non-telemetry datagram, if any.
    pub async fn last_response(&self) -> Option<String> {
        self.last_response.lock().await.clone()
    }

    /// Returns true while a collector owns the receive port.
    ///
    /// The port is shared with `SO_REUSEPORT`, so the kernel hands each
    /// unicast reply to only one of the bound sockets. Transactions must
    /// read replies from the collector while it runs.
    #[must_use]
    pub fn is_listening(&self) -> bool {
        self.listening.load(Ordering::Acquire)
    }

    fn set_listening(&self, listening: bool) {
        self.listening.store(listening, Ordering::Release);
    }

    /// Forgets the last response.
    pub async fn clear_last_response(&self) {
        *self.last_response.lock().await = None;
    }

    /// Files one received datagram.
    pub async fn absorb(&self, datagram: &str) -> Absorbed {
        let payload = strip_broadcast_prefix(datagram.trim_end());
        match TrvReading::from_json(payload) {
            Ok(reading) => {
                if let Some(serial) = reading.serial.clone() {
                    tracing::trace!("telemetry from {}", serial);
                    self.trv.write().await.insert(serial.clone(), reading);
                    return Absorbed::Telemetry(serial);
                }
            }
            Err(e) => tracing::trace!("not telemetry: {}", e),
        }

        *self.last_response.lock().await = Some(datagram.to_owned());
        Absorbed::Response
    }
}

/// Background task owning the shared receive socket.
pub struct StateCollector {
    local_addr: SocketAddr,
    state: LinkState,
    task: Option<JoinHandle<()>>,
}

impl StateCollector {
    /// Binds the receive port and starts collecting.
    pub fn start(port: u16, state: LinkState, dispatcher: EventDispatcher) -> Result<Self> {
        let socket = bind_receive_socket(port)?;
        let local_addr = socket.local_addr()?;

        state.set_listening(true);
        let task = tokio::spawn(run_receive_loop(socket, state.clone(), dispatcher));

        Ok(Self {
            local_addr,
            state,
            task: Some(task),
        })
    }

    /// Returns the bound address.
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Returns true while the receive loop is alive.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Stops the receive loop.
    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            tracing::info!("stopping state collector");
            task.abort();
            self.state.set_listening(false);
        }
    }
}

impl Drop for StateCollector {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run_receive_loop(socket: UdpSocket, state: LinkState, dispatcher: EventDispatcher) {
    let mut buf = [0u8; MAX_DATAGRAM_SIZE];

    loop {
        let (n, from) = match socket.recv_from(&mut buf).await {
            Ok(received) => received,
            Err(e) => {
                tracing::warn!("collector receive error: {}", e);
                continue;
            }
        };

        let datagram = String::from_utf8_lossy(&buf[..n]);
        tracing::trace!("received {} bytes from {}", n, from);

        let absorbed = state.absorb(&datagram).await;
        match absorbed {
            Absorbed::Telemetry(serial) => dispatcher.dispatch(Event::TrvUpdated { serial }),
            Absorbed::Response => dispatcher.dispatch(Event::Response(datagram.into_owned())),
        }
    }
}
