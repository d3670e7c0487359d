//! Protocol definitions for Lightwave link communication.
//!
//! This module contains the low-level protocol types including:
//! - Transaction framing and reply classification
//! - Command text construction
//! - Transaction id allocation

pub mod command;
pub mod frame;
pub mod transaction;

pub use command::{Command, DEREGISTER_ALL, MAX_BRIGHTNESS_LEVEL, REGISTER, brightness_level};
pub use frame::{
    BROADCAST_PREFIX, HUB_RECEIVE_PORT, HUB_SEND_PORT, MAX_DATAGRAM_SIZE, NOT_REGISTERED_NOTICE,
    Reply, encode as encode_frame, strip_broadcast_prefix,
};
pub use transaction::{MAX_TRANSACTION_ID, MIN_TRANSACTION_ID, TransactionIdAllocator};
