//! Trait for interfacing a wallet with the sync engine.

use crate::wallet::{Address, AddressScope, TransactionRecord, TxId};

/// The operations a wallet must offer for the sync engine to drive it.
///
/// The engine treats the wallet as the single authority on transaction
/// decoding and registration. All methods are called with the wallet's own
/// lock held by the engine; implementations must not call back into the
/// manager.
pub trait SyncWallet {
    /// Errors associated with interfacing the sync engine with wallet data.
    type Error: std::fmt::Debug + std::fmt::Display + std::error::Error;

    /// Every address the wallet has derived so far, in native encoding.
    fn all_addresses(&self) -> Result<Vec<Address>, Self::Error>;

    /// The legacy encoding of `address`, if the chain has one.
    fn legacy_address(&self, address: &Address) -> Result<Option<Address>, Self::Error>;

    /// Derive addresses in `scope` until `gap_limit` consecutive unused
    /// addresses exist past the last used one.
    fn generate_addresses(
        &mut self,
        scope: AddressScope,
        gap_limit: u32,
    ) -> Result<(), Self::Error>;

    /// The first unused address in `scope`.
    fn first_unused_address(&self, scope: AddressScope) -> Result<Address, Self::Error>;

    /// The wallet's view of all its transactions.
    fn transactions(&self) -> Result<Vec<TransactionRecord>, Self::Error>;

    /// Decode `raw` far enough to produce its id, or `None` when the bytes
    /// do not form a signed transaction worth registering.
    fn extract_transaction_id(&self, raw: &[u8]) -> Result<Option<TxId>, Self::Error>;

    /// Whether the wallet already tracks `txid`.
    fn contains_transaction(&self, txid: &TxId) -> Result<bool, Self::Error>;

    /// Register a newly discovered transaction with its announced
    /// confirmation data. Registration is idempotent and the wallet is
    /// authoritative: it may reject transactions that are not relevant to
    /// it.
    fn register_transaction(
        &mut self,
        raw: &[u8],
        block_height: Option<u64>,
        timestamp: u64,
    ) -> Result<(), Self::Error>;

    /// Update the confirmation data of an already-known transaction.
    ///
    /// Must return an error if `txid` is unknown.
    fn update_transaction(
        &mut self,
        txid: &TxId,
        block_height: Option<u64>,
        timestamp: u64,
    ) -> Result<(), Self::Error>;
}
