//! Transaction id allocation.

use std::sync::atomic::{AtomicU16, Ordering};

/// Lowest transaction id the hub accepts.
pub const MIN_TRANSACTION_ID: u16 = 1;

/// Highest transaction id before the counter wraps.
pub const MAX_TRANSACTION_ID: u16 = 999;

/// Cyclic allocator over `[1, 999]`.
///
/// Ids strictly increase until 999 and then wrap back to 1; 0 is never
/// handed out. Allocation is lock-free and safe to share between tasks.
#[derive(Debug)]
pub struct TransactionIdAllocator {
    last: AtomicU16,
}

impl TransactionIdAllocator {
    /// Creates an allocator whose first id is 1.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            last: AtomicU16::new(MAX_TRANSACTION_ID),
        }
    }

    /// Creates an allocator whose first id follows `last`.
    ///
    /// Out-of-range values are treated as 999, so the next id is 1.
    #[cfg(test)]
    #[must_use]
    pub(crate) const fn starting_after(last: u16) -> Self {
        let last = if last >= MIN_TRANSACTION_ID && last <= MAX_TRANSACTION_ID {
            last
        } else {
            MAX_TRANSACTION_ID
        };
        Self {
            last: AtomicU16::new(last),
        }
    }

    /// Allocates the next transaction id.
    pub fn next_id(&self) -> u16 {
        let previous = self
            .last
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |id| Some(successor(id)))
            .unwrap_or(MAX_TRANSACTION_ID);
        successor(previous)
    }
}

impl Default for TransactionIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

const fn successor(id: u16) -> u16 {
    if id >= MAX_TRANSACTION_ID {
        MIN_TRANSACTION_ID
    } else {
        id + 1
    }
}
