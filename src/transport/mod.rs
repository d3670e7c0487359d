//! Transport layer for Lightwave communication.
//!
//! The hub speaks plain text over UDP. This module holds the link
//! configuration and the socket setup shared by the delivery worker and
//! the state collector.

pub mod udp;

pub use udp::{LinkConfig, ResponseMode, bind_receive_socket, bind_send_socket};
