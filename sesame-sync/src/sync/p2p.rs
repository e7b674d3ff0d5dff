//! P2P-mode sync: a thin adapter translating a peer manager's callbacks
//! into the unified event model.

use std::sync::{Arc, Mutex, MutexGuard, Weak};

use sesame_status::{sync_depth::SyncDepth, sync_mode::SyncMode};

use crate::chain::ChainParameters;
use crate::config::ONE_WEEK_IN_SECONDS;
use crate::error::SyncError;
use crate::event::{self, EventSink, StopReason, SyncEvent, emit};
use crate::peer::{
    BlockRecord, ConnectStatus, PeerManager, PeerManagerEvents, PeerRecord, PublishCompletion,
};
use crate::sync::{SyncStatus, last_confirmed_send_height};
use crate::wallet::traits::SyncWallet;
use crate::wallet::Transaction;

/// Owns the peer manager handle and mirrors its callbacks as lifecycle
/// events. Connection and scan state flip in response to the callbacks, not
/// to `connect`/`disconnect` themselves, which merely delegate.
pub struct PeerSyncManager<W: SyncWallet> {
    peer_manager: Arc<dyn PeerManager>,
    wallet: Arc<Mutex<W>>,
    sink: Arc<dyn EventSink>,
    state: Mutex<PeerState>,
}

struct PeerState {
    /// Highest chain height seen on the network; never retracted.
    network_block_height: u64,
    is_connected: bool,
    /// Whether a full sync is in progress, versus tracking new blocks at
    /// the tip.
    is_full_scan: bool,
}

impl<W> PeerSyncManager<W>
where
    W: SyncWallet + Send + 'static,
{
    /// Construct a disconnected P2P-mode manager and register it as the
    /// peer manager's event handler.
    ///
    /// The peer manager handle is owned exclusively from here on; dropping
    /// the manager disconnects it.
    pub fn new(
        chain_params: &dyn ChainParameters,
        wallet: Arc<Mutex<W>>,
        peer_manager: Arc<dyn PeerManager>,
        sink: Arc<dyn EventSink>,
        earliest_key_time: u64,
        block_height: u64,
    ) -> Result<Arc<Self>, SyncError<W::Error>> {
        let anchor_time = earliest_key_time.saturating_sub(ONE_WEEK_IN_SECONDS);
        let checkpoint = chain_params
            .checkpoint_before(anchor_time)
            .ok_or(SyncError::MissingCheckpoint(anchor_time))?;

        let manager = Arc::new(Self {
            peer_manager,
            wallet,
            sink,
            state: Mutex::new(PeerState {
                network_block_height: checkpoint.height.max(block_height),
                is_connected: false,
                is_full_scan: false,
            }),
        });

        let manager_dyn: Arc<dyn PeerManagerEvents> = manager.clone();
        let handler: Weak<dyn PeerManagerEvents> = Arc::downgrade(&manager_dyn);
        manager.peer_manager.set_event_handler(handler);

        Ok(manager)
    }

    /// The network block height as last observed.
    pub fn get_block_height(&self) -> u64 {
        event::debug_assert_not_emitting();
        self.lock_state().network_block_height
    }

    /// Whether a full sync is in progress.
    pub fn is_in_full_scan(&self) -> bool {
        event::debug_assert_not_emitting();
        self.lock_state().is_full_scan
    }

    /// A point-in-time snapshot for status reporting.
    pub fn status(&self) -> SyncStatus {
        event::debug_assert_not_emitting();
        let state = self.lock_state();
        SyncStatus {
            mode: SyncMode::P2pOnly,
            is_connected: state.is_connected,
            is_full_scan: state.is_full_scan,
            network_block_height: state.network_block_height,
            synced_block_height: None,
        }
    }

    /// Start connecting to peers. The `Connected` event follows from the
    /// peer manager's callbacks.
    pub fn connect(&self) {
        event::debug_assert_not_emitting();
        self.peer_manager.connect();
    }

    /// Disconnect from all peers.
    pub fn disconnect(&self) {
        event::debug_assert_not_emitting();
        self.peer_manager.disconnect();
    }

    /// Rescan from the earliest block of interest.
    pub fn scan(&self) -> Result<(), SyncError<W::Error>> {
        self.scan_to_depth(SyncDepth::High)
    }

    /// Ask the peer manager for a rescan at the requested depth. Like the
    /// peer manager's own rescan, this only has an effect while connected.
    pub fn scan_to_depth(&self, depth: SyncDepth) -> Result<(), SyncError<W::Error>> {
        event::debug_assert_not_emitting();
        match depth {
            SyncDepth::Low => {
                let last_block_height = self.peer_manager.last_block_height();
                let send_height = last_confirmed_send_height(&*self.lock_wallet(), last_block_height)
                    .map_err(SyncError::WalletError)?;
                match send_height {
                    Some(height) => self.peer_manager.rescan_from_height(height),
                    None => self.peer_manager.rescan(),
                }
            }
            SyncDepth::Medium => self.peer_manager.rescan_from_last_checkpoint(),
            SyncDepth::High => self.peer_manager.rescan(),
        }

        Ok(())
    }

    /// Broadcast a transaction. The peer manager receives its own copy
    /// along with a move-once completion context that reports the outcome
    /// as a `TxnSubmitted` event.
    pub fn submit(&self, transaction: &Transaction) {
        event::debug_assert_not_emitting();
        let completion = PublishCompletion::new(transaction.clone(), self.sink.clone());
        self.peer_manager
            .publish_transaction(transaction.clone(), completion);
    }

    /// Sample sync progress and report it while a full scan is under way.
    /// Only progress strictly inside (0, 100) is emitted; the endpoints are
    /// encoded by `SyncStarted` and `SyncStopped`.
    pub fn tick_tock(&self) {
        event::debug_assert_not_emitting();
        let percent = 100.0 * self.peer_manager.sync_progress(0);
        let timestamp = self.peer_manager.last_block_timestamp();

        if percent > 0.0 && percent < 100.0 {
            let state = self.lock_state();
            // Emitted under the lock so progress never trails a
            // disconnect.
            if state.is_connected && state.is_full_scan {
                emit(
                    self.sink.as_ref(),
                    SyncEvent::SyncProgress { timestamp, percent },
                );
            }
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, PeerState> {
        self.state.lock().expect("sync state lock poisoned")
    }

    fn lock_wallet(&self) -> MutexGuard<'_, W> {
        self.wallet.lock().expect("wallet lock poisoned")
    }

    fn peer_manager_connected(&self) -> bool {
        self.peer_manager.connect_status() != ConnectStatus::Disconnected
    }
}

impl<W> PeerManagerEvents for PeerSyncManager<W>
where
    W: SyncWallet + Send + 'static,
{
    /// A sync has started: connect if we were not connected, supersede any
    /// full scan already in progress, and always signal the start.
    fn sync_started(&self) {
        let mut state = self.lock_state();
        let need_connection_event = !state.is_connected;
        let need_stop_event = state.is_full_scan;

        state.is_connected = true;
        // A peer sync always walks a full window.
        state.is_full_scan = true;

        tracing::debug!(need_connection_event, need_stop_event, "peer sync started");

        if need_stop_event {
            emit(
                self.sink.as_ref(),
                SyncEvent::SyncStopped {
                    reason: StopReason::Interrupted,
                },
            );
        }
        if need_connection_event {
            emit(self.sink.as_ref(), SyncEvent::Connected);
        }
        emit(self.sink.as_ref(), SyncEvent::SyncStarted);
    }

    /// A sync has stopped, which may mean the tip was reached or that we
    /// disconnected; the peer manager's connectivity decides.
    fn sync_stopped(&self, reason: i32) {
        let still_connected = self.peer_manager_connected();

        let mut state = self.lock_state();
        let need_stop_event = state.is_full_scan;
        let need_disconnection_event = !still_connected && state.is_connected;

        state.is_connected = !need_disconnection_event && still_connected;
        if need_stop_event {
            state.is_full_scan = false;
        }

        tracing::debug!(reason, need_stop_event, need_disconnection_event, "peer sync stopped");

        if need_stop_event {
            emit(
                self.sink.as_ref(),
                SyncEvent::SyncStopped {
                    reason: StopReason::from_code(reason),
                },
            );
        }
        if need_disconnection_event {
            emit(self.sink.as_ref(), SyncEvent::Disconnected);
        }
    }

    /// Delivered on new blocks and on peer churn. Advances the height
    /// watermark and doubles as a disconnect detector, since the peer
    /// manager does not always deliver `sync_stopped` when its last peer
    /// drops.
    fn tx_status_update(&self) {
        let still_connected = self.peer_manager_connected();
        let block_height = self.peer_manager.last_block_height();

        {
            let mut state = self.lock_state();
            let need_disconnection_event = !still_connected && state.is_connected;
            let need_stop_event = need_disconnection_event && state.is_full_scan;
            let need_height_event = block_height > state.network_block_height;

            if need_disconnection_event {
                state.is_connected = false;
            }
            if need_stop_event {
                state.is_full_scan = false;
            }
            state.network_block_height = state.network_block_height.max(block_height);

            tracing::debug!(need_stop_event, need_disconnection_event, "peer tx status update");

            if need_height_event {
                emit(
                    self.sink.as_ref(),
                    SyncEvent::BlockHeightUpdated {
                        height: block_height,
                    },
                );
            }
            if need_stop_event {
                emit(
                    self.sink.as_ref(),
                    SyncEvent::SyncStopped {
                        reason: StopReason::Interrupted,
                    },
                );
            }
            if need_disconnection_event {
                emit(self.sink.as_ref(), SyncEvent::Disconnected);
            }
        }

        // The transaction set notification carries no state transition and
        // is delivered outside the lock.
        emit(self.sink.as_ref(), SyncEvent::TxnsUpdated);
    }

    fn save_blocks(&self, replace: bool, blocks: Vec<BlockRecord>) {
        let event = if replace {
            SyncEvent::SetBlocks { blocks }
        } else {
            SyncEvent::AddBlocks { blocks }
        };
        emit(self.sink.as_ref(), event);
    }

    fn save_peers(&self, replace: bool, peers: Vec<PeerRecord>) {
        let event = if replace {
            SyncEvent::SetPeers { peers }
        } else {
            SyncEvent::AddPeers { peers }
        };
        emit(self.sink.as_ref(), event);
    }

    fn network_is_reachable(&self) -> bool {
        true
    }

    fn thread_cleanup(&self) {}
}

impl<W: SyncWallet> Drop for PeerSyncManager<W> {
    fn drop(&mut self) {
        self.peer_manager.disconnect();
    }
}
