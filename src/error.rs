//! Error types for the lightwave library.

use thiserror::Error;

/// The main error type for lightwave operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// No response arrived before the deadline.
    #[error("timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// The hub answered with an explicit `ERR`.
    #[error("protocol error: {message}")]
    Protocol { message: String },

    /// The hub does not know this client yet.
    #[error("client is not registered with the hub")]
    NotRegistered,

    /// A response could not be interpreted.
    #[error("malformed response: {reason}")]
    MalformedResponse { reason: String },

    /// Every attempt of a transaction failed.
    #[error("transaction {transaction_id} failed after {attempts} attempts")]
    RetriesExhausted { transaction_id: u16, attempts: u32 },

    /// The link is not connected.
    #[error("not connected")]
    NotConnected,

    /// The command queue is at capacity.
    #[error("command queue is full")]
    QueueFull,

    /// Channel receive error.
    #[error("channel closed")]
    ChannelClosed,
}

impl Error {
    /// Builds a timeout error from a duration.
    #[must_use]
    pub fn timeout(duration: std::time::Duration) -> Self {
        Self::Timeout {
            timeout_ms: u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// Returns true for the failures a retry can recover from.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::Protocol { .. } | Self::NotRegistered
        )
    }
}

/// Result type alias for lightwave operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_timeout_from_duration() {
        let err = Error::timeout(Duration::from_secs(2));
        assert!(matches!(err, Error::Timeout { timeout_ms: 2000 }));
        assert_eq!(err.to_string(), "timed out after 2000ms");
    }

    #[test]
    fn test_retryable_kinds() {
        assert!(Error::NotRegistered.is_retryable());
        assert!(
            Error::Protocol {
                message: "1,ERR".into()
            }
            .is_retryable()
        );
        assert!(!Error::QueueFull.is_retryable());
        assert!(!Error::Io(std::io::Error::other("boom")).is_retryable());
    }
}
