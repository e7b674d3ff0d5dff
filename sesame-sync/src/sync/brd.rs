//! Client-mode sync: transaction discovery by polling a cooperative remote
//! indexer over the wallet's address set.

use std::sync::{Arc, Mutex, MutexGuard};

use sesame_status::{sync_depth::SyncDepth, sync_mode::SyncMode};

use crate::chain::ChainParameters;
use crate::client::{RequestId, SyncClient};
use crate::config::{ONE_WEEK_IN_SECONDS, SyncConfig};
use crate::error::SyncError;
use crate::event::{self, EventSink, StopReason, SyncEvent, emit};
use crate::sync::state::ScanState;
use crate::sync::{SyncStatus, last_confirmed_send_height};
use crate::wallet::traits::SyncWallet;
use crate::wallet::Transaction;

/// Discovers transactions by asking the indexer for everything touching the
/// wallet's addresses within a block window, widening the address set as
/// gap-limit discovery surfaces new addresses.
pub struct ClientSyncManager<W: SyncWallet> {
    chain_params: Arc<dyn ChainParameters>,
    wallet: Arc<Mutex<W>>,
    client: Arc<dyn SyncClient>,
    sink: Arc<dyn EventSink>,
    config: SyncConfig,
    /// Earliest block of interest; fixed at construction.
    init_block_height: u64,
    state: Mutex<ClientState>,
}

struct ClientState {
    /// Highest chain height reported by the indexer; never retracted.
    network_block_height: u64,
    /// Last block covered by completed discovery; reset downward by a
    /// rescan.
    synced_block_height: u64,
    is_connected: bool,
    last_request_id: u32,
    /// Present iff a scan is in progress.
    scan: Option<ScanState>,
}

impl ClientState {
    fn generate_request_id(&mut self) -> RequestId {
        self.last_request_id += 1;
        RequestId::from_value(self.last_request_id)
    }
}

impl<W: SyncWallet> ClientSyncManager<W> {
    /// Construct a disconnected client-mode manager.
    ///
    /// The earliest block of interest is anchored at the checkpoint at
    /// least one week before `earliest_key_time`; `block_height` is the
    /// best height known from persistence, and the network view starts at
    /// whichever of the two is higher so a sync can begin before the first
    /// height poll answers.
    pub fn new(
        config: SyncConfig,
        chain_params: Arc<dyn ChainParameters>,
        wallet: Arc<Mutex<W>>,
        client: Arc<dyn SyncClient>,
        sink: Arc<dyn EventSink>,
        earliest_key_time: u64,
        block_height: u64,
    ) -> Result<Self, SyncError<W::Error>> {
        let anchor_time = earliest_key_time.saturating_sub(ONE_WEEK_IN_SECONDS);
        let checkpoint = chain_params
            .checkpoint_before(anchor_time)
            .ok_or(SyncError::MissingCheckpoint(anchor_time))?;

        let init_block_height = checkpoint.height.min(block_height);

        Ok(Self {
            chain_params,
            wallet,
            client,
            sink,
            config,
            init_block_height,
            state: Mutex::new(ClientState {
                network_block_height: checkpoint.height.max(block_height),
                synced_block_height: init_block_height,
                is_connected: false,
                last_request_id: 0,
                scan: None,
            }),
        })
    }

    /// The network block height as last reported.
    pub fn get_block_height(&self) -> u64 {
        event::debug_assert_not_emitting();
        self.lock_state().network_block_height
    }

    /// Whether a full scan is in progress.
    pub fn is_in_full_scan(&self) -> bool {
        event::debug_assert_not_emitting();
        self.lock_state()
            .scan
            .as_ref()
            .is_some_and(|scan| scan.is_full_scan)
    }

    /// A point-in-time snapshot for status reporting.
    pub fn status(&self) -> SyncStatus {
        event::debug_assert_not_emitting();
        let state = self.lock_state();
        SyncStatus {
            mode: SyncMode::BrdOnly,
            is_connected: state.is_connected,
            is_full_scan: state.scan.as_ref().is_some_and(|scan| scan.is_full_scan),
            network_block_height: state.network_block_height,
            synced_block_height: Some(state.synced_block_height),
        }
    }

    /// Mark the manager connected and kick off a height poll and a scan.
    /// A no-op when already connected, apart from re-driving the poll.
    pub fn connect(&self) -> Result<(), SyncError<W::Error>> {
        event::debug_assert_not_emitting();
        {
            let mut state = self.lock_state();
            if !state.is_connected {
                state.is_connected = true;
                // Emitted while holding the state lock so that event order
                // is a linearization of state transitions.
                emit(self.sink.as_ref(), SyncEvent::Connected);
            }
        }

        self.update_block_number();
        self.update_transactions()
    }

    /// Mark the manager disconnected, cancelling any scan in progress.
    pub fn disconnect(&self) {
        event::debug_assert_not_emitting();
        let mut state = self.lock_state();
        if state.is_connected {
            state.is_connected = false;
            let was_full_scan = state.scan.take().is_some_and(|scan| scan.is_full_scan);

            if was_full_scan {
                emit(
                    self.sink.as_ref(),
                    SyncEvent::SyncStopped {
                        reason: StopReason::Interrupted,
                    },
                );
            }
            emit(self.sink.as_ref(), SyncEvent::Disconnected);
        }
    }

    /// Rescan from the earliest block of interest.
    pub fn scan(&self) -> Result<(), SyncError<W::Error>> {
        self.scan_to_depth(SyncDepth::High)
    }

    /// Cancel any scan in progress, rewind the synced height according to
    /// `depth` and start over. Only has an effect while connected,
    /// mirroring the P2P rescan behavior; the forced disconnect/connect
    /// pair tells the indexer to treat the session as reset.
    pub fn scan_to_depth(&self, depth: SyncDepth) -> Result<(), SyncError<W::Error>> {
        event::debug_assert_not_emitting();
        {
            let mut state = self.lock_state();
            if state.is_connected {
                let was_full_scan = state.scan.take().is_some_and(|scan| scan.is_full_scan);

                if was_full_scan {
                    emit(
                        self.sink.as_ref(),
                        SyncEvent::SyncStopped {
                            reason: StopReason::Interrupted,
                        },
                    );
                }
                emit(self.sink.as_ref(), SyncEvent::Disconnected);
                emit(self.sink.as_ref(), SyncEvent::Connected);

                state.synced_block_height = match depth {
                    SyncDepth::Low => {
                        let wallet = self.lock_wallet();
                        last_confirmed_send_height(&*wallet, state.network_block_height)
                            .map_err(SyncError::WalletError)?
                            .unwrap_or(self.init_block_height)
                    }
                    SyncDepth::Medium => self
                        .chain_params
                        .checkpoint_before_height(state.network_block_height)
                        .map_or(self.init_block_height, |checkpoint| checkpoint.height),
                    SyncDepth::High => self.init_block_height,
                };
            }
        }

        self.update_block_number();
        self.update_transactions()
    }

    /// Hand a transaction to the indexer for broadcast, or synthesize a
    /// failed submission when disconnected.
    pub fn submit(&self, transaction: &Transaction) {
        event::debug_assert_not_emitting();
        let rid = {
            let mut state = self.lock_state();
            state
                .is_connected
                .then(|| state.generate_request_id())
        };

        // The submission outcome carries no state transition, so both the
        // client call and the synthesized failure happen outside the lock.
        match rid {
            Some(rid) => {
                self.client
                    .submit_transaction(transaction.raw().to_vec(), transaction.txid(), rid);
            }
            None => emit(
                self.sink.as_ref(),
                SyncEvent::TxnSubmitted {
                    transaction: transaction.clone(),
                    error: -1,
                },
            ),
        }
    }

    /// Drive progress from an external timer: refresh the height and start
    /// a scan if none is in flight.
    pub fn tick_tock(&self) -> Result<(), SyncError<W::Error>> {
        event::debug_assert_not_emitting();
        self.update_block_number();
        self.update_transactions()
    }

    /// Indexer response to `get_block_number`. Heights never move
    /// backwards and are ignored while disconnected.
    pub fn announce_get_block_number(&self, _rid: RequestId, block_height: u64) {
        event::debug_assert_not_emitting();
        let mut state = self.lock_state();
        if state.is_connected && block_height > state.network_block_height {
            state.network_block_height = block_height;
            emit(
                self.sink.as_ref(),
                SyncEvent::BlockHeightUpdated {
                    height: block_height,
                },
            );
        }
    }

    /// One transaction from an in-flight range query. Items quoting a stale
    /// request id, or arriving after a disconnect, are dropped silently.
    pub fn announce_get_transactions_item(
        &self,
        rid: RequestId,
        raw: &[u8],
        timestamp: u64,
        block_height: u64,
    ) -> Result<(), SyncError<W::Error>> {
        event::debug_assert_not_emitting();
        let txid = self
            .lock_wallet()
            .extract_transaction_id(raw)
            .map_err(SyncError::WalletError)?;
        let Some(txid) = txid else {
            return Ok(());
        };

        let accepted = {
            let state = self.lock_state();
            state.is_connected
                && state
                    .scan
                    .as_ref()
                    .is_some_and(|scan| scan.request_id == rid)
        };
        if !accepted {
            tracing::debug!(%rid, %txid, "dropping stale transaction item");
            return Ok(());
        }

        let mut wallet = self.lock_wallet();
        if wallet
            .contains_transaction(&txid)
            .map_err(SyncError::WalletError)?
        {
            wallet
                .update_transaction(&txid, Some(block_height), timestamp)
                .map_err(SyncError::WalletError)?;
        } else {
            wallet
                .register_transaction(raw, Some(block_height), timestamp)
                .map_err(SyncError::WalletError)?;
        }

        Ok(())
    }

    /// Indexer signal that a range query finished. On success the gap
    /// windows are re-rolled: if the first-unused addresses moved, the same
    /// window is re-issued over the newly discovered addresses under the
    /// same request id; otherwise the window is complete and the synced
    /// height advances to its last block.
    pub fn announce_get_transactions_done(
        &self,
        rid: RequestId,
        success: bool,
    ) -> Result<(), SyncError<W::Error>> {
        event::debug_assert_not_emitting();
        let mut reissue = None;
        {
            let mut state = self.lock_state();
            let in_flight = state.is_connected
                && state
                    .scan
                    .as_ref()
                    .is_some_and(|scan| scan.request_id == rid);
            if !in_flight {
                tracing::debug!(%rid, success, "dropping stale scan completion");
                return Ok(());
            }

            let mut scan = state.scan.take().expect("scan is in flight");
            if success {
                let advanced = {
                    let mut wallet = self.lock_wallet();
                    scan.advance_and_collect_new_addresses(&mut *wallet, &self.config)
                };
                let new_addresses = match advanced {
                    Ok(new_addresses) => new_addresses,
                    Err(error) => {
                        // The scan cannot continue; close it out before
                        // surfacing the wallet failure.
                        if scan.is_full_scan {
                            emit(
                                self.sink.as_ref(),
                                SyncEvent::SyncStopped {
                                    reason: StopReason::Interrupted,
                                },
                            );
                        }
                        return Err(SyncError::WalletError(error));
                    }
                };

                if new_addresses.is_empty() {
                    state.synced_block_height = scan.synced_block_height();
                    if scan.is_full_scan {
                        emit(
                            self.sink.as_ref(),
                            SyncEvent::SyncStopped {
                                reason: StopReason::Complete,
                            },
                        );
                    }
                } else {
                    reissue = Some((new_addresses, scan.block_range.clone()));
                    state.scan = Some(scan);
                }
            } else if scan.is_full_scan {
                emit(
                    self.sink.as_ref(),
                    SyncEvent::SyncStopped {
                        reason: StopReason::Interrupted,
                    },
                );
            }
        }

        if let Some((addresses, block_range)) = reissue {
            self.client
                .get_transactions(addresses, block_range.start, block_range.end, rid);
        }

        Ok(())
    }

    /// Indexer response to `submit_transaction`. A successful broadcast is
    /// registered with the wallet if it is not already known.
    pub fn announce_submit_transaction(
        &self,
        _rid: RequestId,
        transaction: &Transaction,
        error: i32,
    ) -> Result<(), SyncError<W::Error>> {
        event::debug_assert_not_emitting();
        if error == 0 {
            let mut wallet = self.lock_wallet();
            if !wallet
                .contains_transaction(&transaction.txid())
                .map_err(SyncError::WalletError)?
            {
                wallet
                    .register_transaction(transaction.raw(), None, 0)
                    .map_err(SyncError::WalletError)?;
            }
        }

        emit(
            self.sink.as_ref(),
            SyncEvent::TxnSubmitted {
                transaction: transaction.clone(),
                error,
            },
        );

        Ok(())
    }

    /// Ask the indexer for the current chain height under a fresh request
    /// id. The call happens outside the lock.
    fn update_block_number(&self) {
        let rid = {
            let mut state = self.lock_state();
            state
                .is_connected
                .then(|| state.generate_request_id())
        };

        if let Some(rid) = rid {
            self.client.get_block_number(rid);
        }
    }

    /// Start a new range query if connected and idle. `SyncStarted` is
    /// emitted under the lock for full scans; the client call happens
    /// outside it.
    fn update_transactions(&self) -> Result<(), SyncError<W::Error>> {
        let mut request = None;
        {
            let mut state = self.lock_state();
            if state.is_connected && state.scan.is_none() {
                let rid = state.generate_request_id();
                let scan = {
                    let mut wallet = self.lock_wallet();
                    ScanState::init(
                        &mut *wallet,
                        &self.config,
                        state.synced_block_height,
                        state.network_block_height,
                        rid,
                    )
                    .map_err(SyncError::WalletError)?
                };

                let addresses = scan.addresses();
                if addresses.is_empty() {
                    return Err(SyncError::NoWalletAddresses);
                }

                request = Some((addresses, scan.block_range.clone(), rid));
                if scan.is_full_scan {
                    emit(self.sink.as_ref(), SyncEvent::SyncStarted);
                }
                state.scan = Some(scan);
            }
        }

        if let Some((addresses, block_range, rid)) = request {
            self.client
                .get_transactions(addresses, block_range.start, block_range.end, rid);
        }

        Ok(())
    }

    fn lock_state(&self) -> MutexGuard<'_, ClientState> {
        self.state.lock().expect("sync state lock poisoned")
    }

    /// Lock order is always manager state first, wallet second.
    fn lock_wallet(&self) -> MutexGuard<'_, W> {
        self.wallet.lock().expect("wallet lock poisoned")
    }
}
