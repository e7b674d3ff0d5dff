//! Sesame sync error module.

/// Top level error enumerating any error that may occur while driving a sync
/// manager.
///
/// Transport failures (an indexer reporting an unsuccessful range query, a
/// peer manager failing to publish) are not errors at this layer; they
/// surface through the event stream and leave the manager eventually
/// consistent.
#[derive(Debug, thiserror::Error)]
pub enum SyncError<E>
where
    E: std::fmt::Debug + std::fmt::Display,
{
    /// No checkpoint is recorded before the requested time; the chain
    /// parameter table cannot anchor the earliest block of interest.
    #[error("no checkpoint recorded before timestamp {0}")]
    MissingCheckpoint(u64),
    /// The wallet yielded an empty address set; there is nothing to ask the
    /// indexer for.
    #[error("wallet has no addresses to query")]
    NoWalletAddresses,
    /// Wallet error.
    #[error("wallet error. {0}")]
    WalletError(E),
}
