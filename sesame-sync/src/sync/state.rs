//! The in-flight state of one client-mode range query.
//!
//! A scan is created when `update_transactions` finds the manager connected
//! and idle, lives across any number of gap-limit extensions of the same
//! window, and is wiped on completion, failure, disconnect or rescan.

use std::collections::HashSet;
use std::ops::Range;

use crate::client::RequestId;
use crate::config::{SYNC_START_BLOCK_OFFSET, SyncConfig};
use crate::wallet::traits::SyncWallet;
use crate::wallet::{Address, AddressScope};

pub(crate) struct ScanState {
    pub(crate) request_id: RequestId,
    /// Every address (native and legacy form) already sent to the indexer
    /// this scan.
    known_addresses: HashSet<Address>,
    /// First unused addresses at the last completion checkpoint; a change
    /// signals gap-limit expansion.
    last_external_address: Address,
    last_internal_address: Address,
    /// Half-open block window, `end > start`.
    pub(crate) block_range: Range<u64>,
    pub(crate) is_full_scan: bool,
}

impl ScanState {
    /// Compute the scan window, pre-roll the wallet's address chains to
    /// their gap limits and snapshot the address set.
    pub(crate) fn init<W: SyncWallet>(
        wallet: &mut W,
        config: &SyncConfig,
        synced_block_height: u64,
        network_block_height: u64,
        request_id: RequestId,
    ) -> Result<Self, W::Error> {
        // The end is exclusive, so add one to cover the last block.
        let end = synced_block_height.max(network_block_height) + 1;
        // Re-request at least the trailing day of blocks to cover indexer
        // lag.
        let beg = synced_block_height.min(end.saturating_sub(SYNC_START_BLOCK_OFFSET));
        debug_assert!(end > beg);

        wallet.generate_addresses(AddressScope::External, config.gap_limit_external)?;
        wallet.generate_addresses(AddressScope::Internal, config.gap_limit_internal)?;

        let last_external_address = wallet.first_unused_address(AddressScope::External)?;
        let last_internal_address = wallet.first_unused_address(AddressScope::Internal)?;

        let known_addresses = watched_addresses(wallet)?;

        Ok(Self {
            request_id,
            known_addresses,
            last_external_address,
            last_internal_address,
            is_full_scan: (end - beg) > SYNC_START_BLOCK_OFFSET,
            block_range: beg..end,
        })
    }

    /// The full address set for the initial `get_transactions` call, in a
    /// deterministic order.
    pub(crate) fn addresses(&self) -> Vec<Address> {
        let mut addresses: Vec<Address> = self.known_addresses.iter().cloned().collect();
        addresses.sort();
        addresses
    }

    /// The height the wallet is considered synced to once this window
    /// completes.
    pub(crate) fn synced_block_height(&self) -> u64 {
        self.block_range.end - 1
    }

    /// Re-roll the gap windows and report the addresses not yet sent to the
    /// indexer.
    ///
    /// Returns an empty list when the first-unused pair is unchanged since
    /// the last checkpoint, which is the signal that the window finished
    /// with a stable address set. Otherwise the checkpoint advances and the
    /// newly discovered addresses (native and legacy forms) are returned
    /// for a re-issued query over the same window.
    pub(crate) fn advance_and_collect_new_addresses<W: SyncWallet>(
        &mut self,
        wallet: &mut W,
        config: &SyncConfig,
    ) -> Result<Vec<Address>, W::Error> {
        wallet.generate_addresses(AddressScope::External, config.gap_limit_external)?;
        wallet.generate_addresses(AddressScope::Internal, config.gap_limit_internal)?;

        let external = wallet.first_unused_address(AddressScope::External)?;
        let internal = wallet.first_unused_address(AddressScope::Internal)?;

        if external == self.last_external_address && internal == self.last_internal_address {
            return Ok(Vec::new());
        }

        self.last_external_address = external;
        self.last_internal_address = internal;

        let mut new_addresses: Vec<Address> = watched_addresses(wallet)?
            .into_iter()
            .filter(|address| !self.known_addresses.contains(address))
            .collect();
        new_addresses.sort();
        self.known_addresses.extend(new_addresses.iter().cloned());

        Ok(new_addresses)
    }
}

/// The union of the wallet's current address set and the legacy-encoded
/// forms. The same address in two encodings counts as two entries to query.
fn watched_addresses<W: SyncWallet>(wallet: &W) -> Result<HashSet<Address>, W::Error> {
    let native = wallet.all_addresses()?;
    let mut watched = HashSet::with_capacity(native.len() * 2);
    for address in native {
        if let Some(legacy) = wallet.legacy_address(&address)? {
            watched.insert(legacy);
        }
        watched.insert(address);
    }

    Ok(watched)
}
