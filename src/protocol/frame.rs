//! Transaction framing for the Lightwave link protocol.
//!
//! Every command sent to the hub is prefixed with a transaction id so the
//! acknowledgement can be matched back to it:
//! ```text
//! <transaction id>,<command text>
//! 7,!R1D3F0|Turn Off|Wall Lights
//! ```
//! The hub answers on the receive port with `<id>,OK` or `<id>,ERR,...`.
//! Clients it does not know get a free-text notice instead.

use bytes::Bytes;

/// UDP port the hub listens on for commands.
pub const HUB_SEND_PORT: u16 = 9760;

/// UDP port the hub sends responses and broadcasts to.
pub const HUB_RECEIVE_PORT: u16 = 9761;

/// Largest datagram read from the hub or proxy.
pub const MAX_DATAGRAM_SIZE: usize = 1024;

/// Text the hub sends to clients that have not been paired yet.
pub const NOT_REGISTERED_NOTICE: &str = "Not yet registered.";

/// Prefix the hub puts in front of JSON broadcasts.
pub const BROADCAST_PREFIX: &str = "*!";

/// Encodes a command into a transaction frame.
#[must_use]
pub fn encode(transaction_id: u16, command: &str) -> Bytes {
    Bytes::from(format!("{transaction_id},{command}"))
}

/// Classification of a datagram received while waiting for a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// The hub accepted the transaction.
    Ok,
    /// The hub rejected the transaction.
    Err(String),
    /// The hub does not know this client.
    NotRegistered,
    /// The datagram belongs to something else.
    Unrelated,
}

impl Reply {
    /// Classifies a response against the transaction being waited on.
    ///
    /// The registration notice carries no transaction id, so it is checked
    /// first and matches any transaction.
    #[must_use]
    pub fn classify(response: &str, transaction_id: u16) -> Self {
        if response.contains(NOT_REGISTERED_NOTICE) {
            return Self::NotRegistered;
        }

        let Some(rest) = response
            .strip_prefix(transaction_id.to_string().as_str())
            .and_then(|r| r.strip_prefix(','))
        else {
            return Self::Unrelated;
        };

        if rest.starts_with("OK") {
            Self::Ok
        } else if rest.starts_with("ERR") {
            Self::Err(response.to_owned())
        } else {
            Self::Unrelated
        }
    }
}

/// Strips the broadcast prefix from a hub datagram, if present.
#[must_use]
pub fn strip_broadcast_prefix(datagram: &str) -> &str {
    datagram.strip_prefix(BROADCAST_PREFIX).unwrap_or(datagram)
}
