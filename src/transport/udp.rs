//! UDP transport to the Lightwave hub.
//!
//! Commands go out on [`HUB_SEND_PORT`]; the hub answers and broadcasts on
//! [`HUB_RECEIVE_PORT`]. Several sockets in the same process (the state
//! collector and a per-transaction receiver) may bind the receive port at
//! once, so every receive socket enables address and port reuse.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;

use crate::error::Result;
use crate::protocol::{HUB_RECEIVE_PORT, HUB_SEND_PORT};
use crate::proxy::ProxyConfig;

/// Default wait for a single acknowledgement read.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(2);

/// Default pause between attempts in synchronous mode.
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_millis(250);

/// Default wait before inspecting the shared listener's last response.
pub const DEFAULT_LISTENER_WAIT: Duration = Duration::from_secs(1);

/// Default number of attempts per transaction.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 15;

/// Default number of commands that may wait for delivery.
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// How a transaction waits for its acknowledgement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ResponseMode {
    /// Bind a private receive socket and read replies directly.
    ///
    /// Only while no state collector is running on the receive port.
    #[default]
    Synchronous,
    /// Rely on the state collector, which owns the receive port.
    SharedListener,
}

/// Configuration for a link to one hub.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Hub address.
    pub hub: IpAddr,
    /// Port the hub receives commands on.
    pub send_port: u16,
    /// Port replies and broadcasts arrive on.
    pub receive_port: u16,
    /// How acknowledgements are awaited.
    pub response_mode: ResponseMode,
    /// Deadline for one attempt in synchronous mode.
    pub read_timeout: Duration,
    /// Pause after a failed attempt in synchronous mode.
    pub retry_backoff: Duration,
    /// Wait before reading the last response in shared-listener mode.
    pub listener_wait: Duration,
    /// Attempts per transaction.
    pub max_attempts: u32,
    /// Capacity of the command queue.
    pub queue_capacity: usize,
    /// TRV proxy, if one is used.
    pub proxy: Option<ProxyConfig>,
}

impl LinkConfig {
    /// Creates a configuration for the given hub with default settings.
    #[must_use]
    pub fn new(hub: impl Into<IpAddr>) -> Self {
        Self {
            hub: hub.into(),
            send_port: HUB_SEND_PORT,
            receive_port: HUB_RECEIVE_PORT,
            response_mode: ResponseMode::default(),
            read_timeout: DEFAULT_READ_TIMEOUT,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
            listener_wait: DEFAULT_LISTENER_WAIT,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            proxy: None,
        }
    }

    /// Sets the hub's command port.
    #[must_use]
    pub const fn send_port(mut self, port: u16) -> Self {
        self.send_port = port;
        self
    }

    /// Sets the port replies arrive on.
    #[must_use]
    pub const fn receive_port(mut self, port: u16) -> Self {
        self.receive_port = port;
        self
    }

    /// Sets how acknowledgements are awaited.
    #[must_use]
    pub const fn response_mode(mut self, mode: ResponseMode) -> Self {
        self.response_mode = mode;
        self
    }

    /// Sets the per-attempt read deadline.
    #[must_use]
    pub const fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Sets the pause between attempts.
    #[must_use]
    pub const fn retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    /// Sets the shared-listener wait.
    #[must_use]
    pub const fn listener_wait(mut self, wait: Duration) -> Self {
        self.listener_wait = wait;
        self
    }

    /// Sets the number of attempts per transaction.
    #[must_use]
    pub const fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Sets the command queue capacity.
    #[must_use]
    pub const fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Sets the TRV proxy.
    #[must_use]
    pub fn proxy(mut self, proxy: ProxyConfig) -> Self {
        self.proxy = Some(proxy);
        self
    }

    /// Returns the address commands are sent to.
    #[must_use]
    pub const fn hub_addr(&self) -> SocketAddr {
        SocketAddr::new(self.hub, self.send_port)
    }
}

/// Binds a socket on the receive port that can share the port with others.
///
/// Broadcast reception is enabled since the hub broadcasts its replies.
pub fn bind_receive_socket(port: u16) -> Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    #[cfg(unix)]
    socket.set_reuse_port(true)?;
    socket.set_broadcast(true)?;
    socket.set_nonblocking(true)?;

    let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port);
    socket.bind(&addr.into())?;
    tracing::debug!("bound receive socket on {}", addr);

    let socket: std::net::UdpSocket = socket.into();
    Ok(UdpSocket::from_std(socket)?)
}

/// Binds an ephemeral socket for sending commands.
pub async fn bind_send_socket() -> Result<UdpSocket> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;
    socket.set_broadcast(true)?;
    Ok(socket)
}
