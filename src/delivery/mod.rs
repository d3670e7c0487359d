//! Reliable, ordered command delivery.
//!
//! - [`sender`] runs the transaction retry protocol for one command
//! - [`queue`] serializes commands through a single delivery worker

pub mod queue;
pub mod sender;

pub use queue::CommandQueue;
pub use sender::{Deliver, Delivery, ReliableSender};
