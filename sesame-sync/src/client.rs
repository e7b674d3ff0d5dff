//! The contract a remote indexer (the "client") fulfils for client-mode
//! sync.
//!
//! Each method is a fire-and-forget request carrying a [`RequestId`]; the
//! client gathers results on its own threads and reports back through the
//! manager's `announce_*` entry points, quoting the same id. Responses whose
//! id no longer matches the manager's in-flight scan are dropped silently.

use crate::wallet::{Address, TxId};

/// Correlates a client response with the originating request.
///
/// Ids handed to one client are strictly increasing and start at 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestId(u32);

impl RequestId {
    /// The integer form.
    #[must_use]
    pub fn value(&self) -> u32 {
        self.0
    }

    /// Reconstitute an id received across a host boundary.
    #[must_use]
    pub fn from_value(value: u32) -> Self {
        Self(value)
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Callbacks into the remote indexer.
///
/// Calls are made outside the manager's state lock; implementations may
/// block briefly but should hand the work to their own threads. The eventual
/// `announce_*` responses may arrive from any thread, including synchronously
/// from inside the callback itself.
pub trait SyncClient: Send + Sync {
    /// Ask for the current chain height. Answered via
    /// `announce_get_block_number`.
    fn get_block_number(&self, rid: RequestId);

    /// Ask for every transaction touching `addresses` within the half-open
    /// block range `[beg_block_number, end_block_number)`. Answered via a
    /// series of `announce_get_transactions_item` calls followed by one
    /// `announce_get_transactions_done`.
    ///
    /// A repeated call quoting the same id widens an in-flight query:
    /// `addresses` then carries only the newly discovered addresses and the
    /// client is expected to accumulate them.
    fn get_transactions(
        &self,
        addresses: Vec<Address>,
        beg_block_number: u64,
        end_block_number: u64,
        rid: RequestId,
    );

    /// Broadcast a serialized transaction. Answered via
    /// `announce_submit_transaction`.
    fn submit_transaction(&self, raw: Vec<u8>, txid: TxId, rid: RequestId);
}
