//! # lightwave
//!
//! A Rust client library providing a reliable command link to LightwaveRF hubs.
//!
//! The hub speaks a text protocol over UDP with no delivery guarantee. This
//! library queues commands, sends them one at a time with a transaction id,
//! and retries until the hub acknowledges. It can also collect the JSON
//! telemetry that thermostatic radiator valves (TRVs) push through the hub,
//! or ask a TRV proxy for it on demand.
//!
//! ## Features
//!
//! - Async/await based API using Tokio
//! - Ordered, at-least-once command delivery with a single delivery worker
//! - Event-driven notification of delivery outcomes and telemetry
//! - Fire-and-forget command API; failures are logged, never thrown
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::net::Ipv4Addr;
//!
//! use lightwave::{LightwaveLink, LinkConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), lightwave::Error> {
//!     let mut link = LightwaveLink::new(LinkConfig::new(Ipv4Addr::new(192, 168, 1, 10)));
//!     link.connect().await?;
//!
//!     // R2D1 is room 2 device 1
//!     link.turn_off("R2D1", "Wall Lights")?;
//!     link.turn_on_with_brightness("R2D2", "Ceiling Lights", 128)?;
//!
//!     link.set_trv_proxy("127.0.0.1", 7878);
//!     let status = link.read_trv_status("0538XX").await;
//!     println!("Radiator: {:?}", status.temperature);
//!
//!     // Waits for queued commands
//!     link.disconnect().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! The library is organized into several modules:
//!
//! - [`protocol`] - Transaction framing, commands, id allocation
//! - [`types`] - TRV telemetry structures
//! - [`transport`] - Link configuration and UDP socket setup
//! - [`delivery`] - Reliable send and the ordered command queue
//! - [`collector`] - Listener for pushed telemetry and replies
//! - [`proxy`] - TRV proxy client
//! - [`event`] - Async event system for delivery outcomes and telemetry
//! - [`client`] - High-level [`LightwaveLink`] session

pub mod client;
pub mod collector;
pub mod delivery;
pub mod error;
pub mod event;
pub mod protocol;
pub mod proxy;
pub mod transport;
pub mod types;

// Re-exports for convenience
pub use client::LightwaveLink;
pub use collector::{LinkState, StateCollector};
pub use delivery::{CommandQueue, Deliver, Delivery, ReliableSender};
pub use error::{Error, Result};
pub use event::{Event, EventDispatcher, Subscription};
pub use protocol::{Command, Reply, TransactionIdAllocator, brightness_level};
pub use proxy::{ProxyConfig, TrvProxy};
pub use transport::{LinkConfig, ResponseMode};
pub use types::{TrvReading, TrvStatus, battery_percentage};
