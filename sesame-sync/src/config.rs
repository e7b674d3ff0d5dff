//! Sync engine configuration and protocol constants.

/// Number of confirmations before a transaction is considered settled for
/// rescan-depth purposes.
pub const CONFIRMATION_BLOCK_COUNT: u64 = 6;

/// Assumed block interval, in minutes.
pub const MINUTES_PER_BLOCK: u64 = 10;

/// Maximum number of days the indexer's database is assumed to lag the
/// chain. Every client-mode scan re-requests at least this many trailing
/// blocks.
pub const SYNC_DAYS_OFFSET: u64 = 1;

/// Block-count equivalent of [`SYNC_DAYS_OFFSET`]. A scan window wider than
/// this is classified as a full scan.
pub const SYNC_START_BLOCK_OFFSET: u64 = (SYNC_DAYS_OFFSET * 24 * 60) / MINUTES_PER_BLOCK;

/// One week of seconds; the earliest block of interest is anchored at the
/// checkpoint at least this far before the account's earliest key time.
pub const ONE_WEEK_IN_SECONDS: u64 = 7 * 24 * 60 * 60;

/// Default gap limit for externally visible (receive) addresses.
pub const DEFAULT_GAP_LIMIT_EXTERNAL: u32 = 10;

/// Default gap limit for internal (change) addresses.
pub const DEFAULT_GAP_LIMIT_INTERNAL: u32 = 5;

/// Tunable parameters for a sync manager.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Gap limit for the external address scope.
    pub gap_limit_external: u32,
    /// Gap limit for the internal address scope.
    pub gap_limit_internal: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            gap_limit_external: DEFAULT_GAP_LIMIT_EXTERNAL,
            gap_limit_internal: DEFAULT_GAP_LIMIT_INTERNAL,
        }
    }
}
