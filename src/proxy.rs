//! Client for the TRV proxy.
//!
//! The proxy captures TRV broadcasts on behalf of clients that cannot
//! listen on the hub's port themselves. It is queried with the bare device
//! serial and answers with a single JSON object.

use std::net::Ipv4Addr;
use std::time::Duration;

use tokio::net::UdpSocket;

use crate::error::{Error, Result};
use crate::protocol::MAX_DATAGRAM_SIZE;
use crate::types::{TrvReading, TrvStatus};

/// Default wait for a proxy answer.
pub const DEFAULT_PROXY_TIMEOUT: Duration = Duration::from_secs(2);

/// Location of a TRV proxy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyConfig {
    /// Proxy host name or address.
    pub host: String,
    /// Proxy UDP port.
    pub port: u16,
    /// Wait for the answer.
    pub timeout: Duration,
}

impl ProxyConfig {
    /// Creates a proxy configuration with the default timeout.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            timeout: DEFAULT_PROXY_TIMEOUT,
        }
    }

    /// Sets the answer timeout.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Queries a TRV proxy.
#[derive(Debug, Clone)]
pub struct TrvProxy {
    config: ProxyConfig,
}

impl TrvProxy {
    /// Creates a client for the given proxy.
    #[must_use]
    pub const fn new(config: ProxyConfig) -> Self {
        Self { config }
    }

    /// Returns the proxy configuration.
    #[must_use]
    pub const fn config(&self) -> &ProxyConfig {
        &self.config
    }

    /// Fetches the current reading for a TRV.
    ///
    /// Only datagrams from the proxy's address are accepted as the answer.
    pub async fn fetch(&self, serial: &str) -> Result<TrvReading> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;
        socket
            .connect((self.config.host.as_str(), self.config.port))
            .await?;
        socket.send(serial.as_bytes()).await?;

        let mut buf = [0u8; MAX_DATAGRAM_SIZE];
        let n = tokio::time::timeout(self.config.timeout, socket.recv(&mut buf))
            .await
            .map_err(|_| Error::timeout(self.config.timeout))??;

        let text = std::str::from_utf8(&buf[..n]).map_err(|e| Error::MalformedResponse {
            reason: e.to_string(),
        })?;
        TrvReading::from_json(text).map_err(|e| Error::MalformedResponse {
            reason: e.to_string(),
        })
    }

    /// Queries the status of a TRV.
    ///
    /// Failures are logged and yield an empty status.
    pub async fn query(&self, serial: &str) -> TrvStatus {
        match self.fetch(serial).await {
            Ok(reading) => {
                if let Some(error) = &reading.error {
                    tracing::warn!("TRV proxy error for {}: {}", serial, error);
                }
                reading.status()
            }
            Err(Error::Timeout { .. }) => {
                tracing::warn!("TRV proxy not responding");
                TrvStatus::default()
            }
            Err(e) => {
                tracing::warn!("TRV proxy query for {} failed: {}", serial, e);
                TrvStatus::default()
            }
        }
    }
}
