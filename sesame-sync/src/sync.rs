//! The mode-polymorphic sync manager facade.
//!
//! A [`SyncManager`] is a tagged variant over the two concrete managers;
//! every operation dispatches on the tag. The mode is fixed at construction.
//! Client-only `announce_*` calls arriving at a P2P-mode manager are
//! silently ignored, which is a legal race when the owning wallet manager
//! has changed modes underneath an in-flight indexer response.

use std::sync::{Arc, Mutex};

use sesame_status::{sync_depth::SyncDepth, sync_mode::SyncMode};

use crate::chain::ChainParameters;
use crate::client::{RequestId, SyncClient};
use crate::config::{CONFIRMATION_BLOCK_COUNT, SyncConfig};
use crate::error::SyncError;
use crate::event::EventSink;
use crate::peer::PeerManager;
use crate::wallet::traits::SyncWallet;
use crate::wallet::Transaction;

pub mod brd;
pub mod p2p;
pub(crate) mod state;

pub use brd::ClientSyncManager;
pub use p2p::PeerSyncManager;

/// A snapshot of a sync manager's state, for displaying to a user or
/// consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncStatus {
    /// The manager's mode.
    pub mode: SyncMode,
    /// Whether the manager is connected.
    pub is_connected: bool,
    /// Whether a full scan is in progress.
    pub is_full_scan: bool,
    /// Highest chain height observed.
    pub network_block_height: u64,
    /// Last block covered by completed discovery; client mode only.
    pub synced_block_height: Option<u64>,
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "mode: {}, connected: {}, full scan: {}, network height: {}",
            self.mode, self.is_connected, self.is_full_scan, self.network_block_height
        )
    }
}

impl From<SyncStatus> for json::JsonValue {
    fn from(value: SyncStatus) -> Self {
        json::object! {
            "mode" => value.mode.to_string(),
            "is_connected" => value.is_connected,
            "is_full_scan" => value.is_full_scan,
            "network_block_height" => value.network_block_height,
            "synced_block_height" => match value.synced_block_height {
                Some(height) => json::JsonValue::from(height),
                None => json::JsonValue::Null,
            },
        }
    }
}

/// The height of the wallet's most recent settled outgoing transaction:
/// valid, actually sending funds, and confirmed deeper than
/// [`CONFIRMATION_BLOCK_COUNT`] below `last_block_height`. This is how far
/// back a low-depth rescan needs to reach.
pub(crate) fn last_confirmed_send_height<W: SyncWallet>(
    wallet: &W,
    last_block_height: u64,
) -> Result<Option<u64>, W::Error> {
    if last_block_height < CONFIRMATION_BLOCK_COUNT {
        return Ok(None);
    }

    let mut send_height = None;
    for record in wallet.transactions()? {
        let Some(block_height) = record.block_height else {
            continue;
        };
        if record.is_valid
            && record.amount_sent != 0
            && block_height < last_block_height - CONFIRMATION_BLOCK_COUNT
        {
            send_height = send_height.max(Some(block_height));
        }
    }

    Ok(send_height)
}

/// Mode-polymorphic facade over the two concrete sync managers.
///
/// Created once per wallet; destroyed by dropping it, which in P2P mode
/// disconnects the peer manager.
pub enum SyncManager<W: SyncWallet> {
    /// Client (BRD) mode: discovery through a remote indexer.
    Client(ClientSyncManager<W>),
    /// P2P mode: sync delegated to a peer manager.
    Peer(Arc<PeerSyncManager<W>>),
}

impl<W> SyncManager<W>
where
    W: SyncWallet + Send + 'static,
{
    /// Construct a manager for `mode`.
    ///
    /// Client mode requires `client`, P2P mode requires `peer_manager`;
    /// constructing without the matching collaborator is a programming
    /// fault and panics.
    #[allow(clippy::too_many_arguments)]
    pub fn new_for_mode(
        mode: SyncMode,
        config: SyncConfig,
        chain_params: Arc<dyn ChainParameters>,
        wallet: Arc<Mutex<W>>,
        earliest_key_time: u64,
        block_height: u64,
        sink: Arc<dyn EventSink>,
        client: Option<Arc<dyn SyncClient>>,
        peer_manager: Option<Arc<dyn PeerManager>>,
    ) -> Result<Self, SyncError<W::Error>> {
        match mode {
            SyncMode::BrdOnly => {
                let client = client.expect("client-mode construction requires a sync client");
                Ok(Self::Client(ClientSyncManager::new(
                    config,
                    chain_params,
                    wallet,
                    client,
                    sink,
                    earliest_key_time,
                    block_height,
                )?))
            }
            SyncMode::P2pOnly => {
                let peer_manager =
                    peer_manager.expect("p2p-mode construction requires a peer manager");
                Ok(Self::Peer(PeerSyncManager::new(
                    chain_params.as_ref(),
                    wallet,
                    peer_manager,
                    sink,
                    earliest_key_time,
                    block_height,
                )?))
            }
        }
    }

    /// The mode the manager was constructed with.
    pub fn mode(&self) -> SyncMode {
        match self {
            Self::Client(_) => SyncMode::BrdOnly,
            Self::Peer(_) => SyncMode::P2pOnly,
        }
    }

    /// The network block height as last observed.
    pub fn get_block_height(&self) -> u64 {
        match self {
            Self::Client(manager) => manager.get_block_height(),
            Self::Peer(manager) => manager.get_block_height(),
        }
    }

    /// Whether a full scan is in progress.
    pub fn is_in_full_scan(&self) -> bool {
        match self {
            Self::Client(manager) => manager.is_in_full_scan(),
            Self::Peer(manager) => manager.is_in_full_scan(),
        }
    }

    /// A point-in-time snapshot for status reporting.
    pub fn status(&self) -> SyncStatus {
        match self {
            Self::Client(manager) => manager.status(),
            Self::Peer(manager) => manager.status(),
        }
    }

    /// Connect to the network.
    pub fn connect(&self) -> Result<(), SyncError<W::Error>> {
        match self {
            Self::Client(manager) => manager.connect(),
            Self::Peer(manager) => {
                manager.connect();
                Ok(())
            }
        }
    }

    /// Disconnect from the network, cancelling any scan in progress.
    pub fn disconnect(&self) {
        match self {
            Self::Client(manager) => manager.disconnect(),
            Self::Peer(manager) => manager.disconnect(),
        }
    }

    /// Rescan from the earliest block of interest.
    pub fn scan(&self) -> Result<(), SyncError<W::Error>> {
        self.scan_to_depth(SyncDepth::High)
    }

    /// Rescan to the requested depth.
    pub fn scan_to_depth(&self, depth: SyncDepth) -> Result<(), SyncError<W::Error>> {
        match self {
            Self::Client(manager) => manager.scan_to_depth(depth),
            Self::Peer(manager) => manager.scan_to_depth(depth),
        }
    }

    /// Broadcast a transaction. The transaction stays caller-owned; the
    /// outcome arrives as a `TxnSubmitted` event.
    pub fn submit(&self, transaction: &Transaction) {
        match self {
            Self::Client(manager) => manager.submit(transaction),
            Self::Peer(manager) => manager.submit(transaction),
        }
    }

    /// Drive periodic work from an external timer.
    pub fn tick_tock(&self) -> Result<(), SyncError<W::Error>> {
        match self {
            Self::Client(manager) => manager.tick_tock(),
            Self::Peer(manager) => {
                manager.tick_tock();
                Ok(())
            }
        }
    }

    /// Report progress of a P2P full scan, if one is under way. A no-op in
    /// client mode.
    pub fn p2p_full_scan_report(&self) {
        if let Self::Peer(manager) = self {
            if manager.is_in_full_scan() {
                manager.tick_tock();
            }
        }
    }

    /// Indexer response to `get_block_number`; client mode only.
    pub fn announce_get_block_number(&self, rid: RequestId, block_height: u64) {
        match self {
            Self::Client(manager) => manager.announce_get_block_number(rid, block_height),
            Self::Peer(_) => {
                tracing::debug!(%rid, "ignoring block number announcement in p2p mode");
            }
        }
    }

    /// One transaction from an in-flight range query; client mode only.
    pub fn announce_get_transactions_item(
        &self,
        rid: RequestId,
        raw: &[u8],
        timestamp: u64,
        block_height: u64,
    ) -> Result<(), SyncError<W::Error>> {
        match self {
            Self::Client(manager) => {
                manager.announce_get_transactions_item(rid, raw, timestamp, block_height)
            }
            Self::Peer(_) => {
                tracing::debug!(%rid, "ignoring transaction item announcement in p2p mode");
                Ok(())
            }
        }
    }

    /// Completion of a range query; client mode only.
    pub fn announce_get_transactions_done(
        &self,
        rid: RequestId,
        success: bool,
    ) -> Result<(), SyncError<W::Error>> {
        match self {
            Self::Client(manager) => manager.announce_get_transactions_done(rid, success),
            Self::Peer(_) => {
                tracing::debug!(%rid, "ignoring scan completion announcement in p2p mode");
                Ok(())
            }
        }
    }

    /// Outcome of a `submit_transaction` call; client mode only.
    pub fn announce_submit_transaction(
        &self,
        rid: RequestId,
        transaction: &Transaction,
        error: i32,
    ) -> Result<(), SyncError<W::Error>> {
        match self {
            Self::Client(manager) => manager.announce_submit_transaction(rid, transaction, error),
            Self::Peer(_) => {
                tracing::debug!(%rid, "ignoring submission announcement in p2p mode");
                Ok(())
            }
        }
    }
}
