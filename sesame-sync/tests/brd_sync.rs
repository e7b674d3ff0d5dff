//! Client-mode sync scenarios: catch-up, gap-limit extension, cancellation,
//! submission and rescan depths, with invariant checks over the recorded
//! event stream.

use std::sync::{Arc, Mutex};

use sesame_sync::chain::{ChainParameters, Checkpoint, CheckpointTable};
use sesame_sync::client::{RequestId, SyncClient};
use sesame_sync::config::{ONE_WEEK_IN_SECONDS, SyncConfig};
use sesame_sync::error::SyncError;
use sesame_sync::event::{StopReason, SyncEvent};
use sesame_sync::sync::SyncManager;
use sesame_sync::testutils::{
    ClientCall, MemoryWallet, RecordingClient, RecordingSink, assert_connection_alternation,
    assert_request_ids_strictly_increasing, assert_sync_event_pairing, encode_transaction,
    test_transaction,
};
use sesame_sync::wallet::traits::SyncWallet as _;
use sesame_sync::wallet::{AddressScope, TransactionRecord, TxId};
use sesame_sync::{SyncDepth, SyncMode};

const CHECKPOINT_HEIGHT: u64 = 100;
const CHECKPOINT_TIME: u64 = 1_000_000;
const EARLIEST_KEY_TIME: u64 = CHECKPOINT_TIME + ONE_WEEK_IN_SECONDS + 1;

struct Harness {
    manager: SyncManager<MemoryWallet>,
    wallet: Arc<Mutex<MemoryWallet>>,
    client: Arc<RecordingClient>,
    sink: Arc<RecordingSink>,
}

impl Harness {
    /// Invariant checks over everything recorded so far: connection
    /// alternation, sync-event pairing, request-id monotonicity. Run at
    /// the end of every scenario.
    fn assert_invariants(&self) {
        let events = self.sink.events();
        assert_connection_alternation(&events);
        assert_sync_event_pairing(&events);
        assert_request_ids_strictly_increasing(&self.client.request_ids());
    }
}

fn build_harness(
    wallet: MemoryWallet,
    block_height: u64,
    checkpoints: Vec<Checkpoint>,
    config: SyncConfig,
) -> Harness {
    let wallet = Arc::new(Mutex::new(wallet));
    let client = Arc::new(RecordingClient::new());
    let sink = Arc::new(RecordingSink::new());
    let chain: Arc<dyn ChainParameters> = Arc::new(CheckpointTable::new(checkpoints));
    let client_dyn: Arc<dyn SyncClient> = client.clone();

    let manager = SyncManager::new_for_mode(
        SyncMode::BrdOnly,
        config,
        chain,
        wallet.clone(),
        EARLIEST_KEY_TIME,
        block_height,
        sink.clone(),
        Some(client_dyn),
        None,
    )
    .expect("client-mode manager");

    Harness {
        manager,
        wallet,
        client,
        sink,
    }
}

fn harness(block_height: u64) -> Harness {
    harness_with_wallet(MemoryWallet::new(), block_height)
}

fn harness_with_wallet(wallet: MemoryWallet, block_height: u64) -> Harness {
    build_harness(
        wallet,
        block_height,
        vec![Checkpoint {
            height: CHECKPOINT_HEIGHT,
            timestamp: CHECKPOINT_TIME,
        }],
        SyncConfig::default(),
    )
}

fn get_transactions_parts(call: &ClientCall) -> (Vec<String>, u64, u64, RequestId) {
    match call {
        ClientCall::GetTransactions {
            addresses,
            beg_block_number,
            end_block_number,
            rid,
        } => (
            addresses
                .iter()
                .map(|address| address.as_str().to_owned())
                .collect(),
            *beg_block_number,
            *end_block_number,
            *rid,
        ),
        other => panic!("expected a get_transactions call, got {other:?}"),
    }
}

fn confirmed_send(height: u64) -> TransactionRecord {
    TransactionRecord {
        txid: TxId::from_bytes([3; 32]),
        block_height: Some(height),
        timestamp: 0,
        amount_sent: 1_000,
        is_valid: true,
    }
}

#[test]
fn simple_catch_up() {
    let h = harness(244);
    h.manager.connect().unwrap();

    let calls = h.client.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(
        calls[0],
        ClientCall::GetBlockNumber {
            rid: RequestId::from_value(1)
        }
    );
    let (addresses, beg, end, scan_rid) = get_transactions_parts(&calls[1]);
    assert!(!addresses.is_empty());
    // Window [100, 245): width 145 exceeds the one-day offset.
    assert_eq!((beg, end), (100, 245));
    assert_eq!(scan_rid, RequestId::from_value(2));

    assert_eq!(
        h.sink.events(),
        vec![SyncEvent::Connected, SyncEvent::SyncStarted]
    );

    h.manager
        .announce_get_transactions_done(scan_rid, true)
        .unwrap();

    assert_eq!(
        h.sink.events()[2..],
        [SyncEvent::SyncStopped {
            reason: StopReason::Complete
        }]
    );
    assert_eq!(h.manager.get_block_height(), 244);
    assert_eq!(h.manager.status().synced_block_height, Some(244));
    // No further client traffic after a stable completion.
    assert_eq!(h.client.calls().len(), 2);
    h.assert_invariants();
}

#[test]
fn catch_up_after_height_announcement() {
    let h = harness(100);
    h.manager.connect().unwrap();

    let calls = h.client.take_calls();
    let poll_rid = match calls[0] {
        ClientCall::GetBlockNumber { rid } => rid,
        ref other => panic!("expected a get_block_number call, got {other:?}"),
    };
    // Caught up, so the first window is narrow and not a full scan.
    let (_, _, end, scan_rid) = get_transactions_parts(&calls[1]);
    assert_eq!(end, 101);
    assert_eq!(h.sink.events(), vec![SyncEvent::Connected]);

    h.manager
        .announce_get_transactions_done(scan_rid, true)
        .unwrap();
    assert_eq!(h.sink.events().len(), 1, "narrow scans emit no sync events");

    h.manager.announce_get_block_number(poll_rid, 244);
    assert_eq!(
        h.sink.events()[1..],
        [SyncEvent::BlockHeightUpdated { height: 244 }]
    );

    // The next tick starts the real catch-up over [100, 245).
    h.manager.tick_tock().unwrap();
    let calls = h.client.take_calls();
    let (_, beg, end, scan_rid) = get_transactions_parts(&calls[1]);
    assert_eq!((beg, end), (100, 245));
    assert_eq!(h.sink.events()[2..], [SyncEvent::SyncStarted]);

    h.manager
        .announce_get_transactions_done(scan_rid, true)
        .unwrap();
    assert_eq!(
        h.sink.events()[3..],
        [SyncEvent::SyncStopped {
            reason: StopReason::Complete
        }]
    );
    assert_eq!(h.manager.get_block_height(), 244);
    assert_eq!(h.manager.status().synced_block_height, Some(244));
    h.assert_invariants();
}

#[test]
fn gap_limit_extension_requeries_same_window() {
    let h = harness(244);
    h.manager.connect().unwrap();

    let calls = h.client.take_calls();
    let (first_addresses, beg, end, scan_rid) = get_transactions_parts(&calls[1]);

    // A returned transaction pays the captured first-unused external
    // address.
    let paid = h
        .wallet
        .lock()
        .unwrap()
        .first_unused_address(AddressScope::External)
        .unwrap();
    let txid = TxId::from_bytes([7; 32]);
    let raw = encode_transaction(&txid, &[paid], 0);
    h.manager
        .announce_get_transactions_item(scan_rid, &raw, 1_700_000_000, 200)
        .unwrap();

    h.manager
        .announce_get_transactions_done(scan_rid, true)
        .unwrap();

    // The window is re-issued under the same request id with only the newly
    // discovered addresses.
    let calls = h.client.take_calls();
    assert_eq!(calls.len(), 1);
    let (new_addresses, new_beg, new_end, new_rid) = get_transactions_parts(&calls[0]);
    assert_eq!(new_rid, scan_rid);
    assert_eq!((new_beg, new_end), (beg, end));
    assert!(!new_addresses.is_empty());
    for address in &new_addresses {
        assert!(
            !first_addresses.contains(address),
            "{address} was already announced"
        );
    }

    // Still scanning: no SyncStopped yet.
    assert_eq!(
        h.sink.events(),
        vec![SyncEvent::Connected, SyncEvent::SyncStarted]
    );

    // A completion with no further discovery finishes the window.
    h.manager
        .announce_get_transactions_done(scan_rid, true)
        .unwrap();
    assert_eq!(
        h.sink.events()[2..],
        [SyncEvent::SyncStopped {
            reason: StopReason::Complete
        }]
    );
    assert_eq!(h.manager.status().synced_block_height, Some(244));
    assert!(
        h.wallet
            .lock()
            .unwrap()
            .contains_transaction(&txid)
            .unwrap()
    );
    h.assert_invariants();
}

#[test]
fn repeated_item_updates_in_place() {
    let h = harness(244);
    h.manager.connect().unwrap();
    let (_, _, _, scan_rid) = get_transactions_parts(&h.client.calls()[1]);

    let txid = TxId::from_bytes([8; 32]);
    let raw = encode_transaction(&txid, &[], 0);
    h.manager
        .announce_get_transactions_item(scan_rid, &raw, 1_000, 200)
        .unwrap();
    h.manager
        .announce_get_transactions_item(scan_rid, &raw, 2_000, 201)
        .unwrap();

    let records = h.wallet.lock().unwrap().transactions().unwrap();
    let record = records.iter().find(|record| record.txid == txid).unwrap();
    assert_eq!(record.block_height, Some(201));
    assert_eq!(record.timestamp, 2_000);
    h.assert_invariants();
}

#[test]
fn disconnect_cancels_scan_and_drops_late_completion() {
    let h = harness(244);
    h.manager.connect().unwrap();
    let (_, _, _, scan_rid) = get_transactions_parts(&h.client.calls()[1]);

    h.manager.disconnect();
    assert_eq!(
        h.sink.events(),
        vec![
            SyncEvent::Connected,
            SyncEvent::SyncStarted,
            SyncEvent::SyncStopped {
                reason: StopReason::Interrupted
            },
            SyncEvent::Disconnected,
        ]
    );

    // The straggling completion is silently ignored.
    h.manager
        .announce_get_transactions_done(scan_rid, true)
        .unwrap();
    assert_eq!(h.sink.events().len(), 4);
    assert_eq!(h.client.calls().len(), 2);
    assert_eq!(h.manager.status().synced_block_height, Some(100));

    // A second disconnect is a no-op.
    h.manager.disconnect();
    assert_eq!(h.sink.events().len(), 4);
    h.assert_invariants();
}

#[test]
fn stale_item_does_not_touch_the_wallet() {
    let h = harness(244);
    h.manager.connect().unwrap();

    let txid = TxId::from_bytes([5; 32]);
    let raw = encode_transaction(&txid, &[], 0);
    // Quotes the height poll's id, not the scan's.
    h.manager
        .announce_get_transactions_item(RequestId::from_value(1), &raw, 1_000, 200)
        .unwrap();

    assert!(
        !h.wallet
            .lock()
            .unwrap()
            .contains_transaction(&txid)
            .unwrap()
    );
    h.assert_invariants();
}

#[test]
fn failed_scan_stops_with_error_and_recovers_on_tick() {
    let h = harness(244);
    h.manager.connect().unwrap();
    let (_, _, _, scan_rid) = get_transactions_parts(&h.client.calls()[1]);

    h.manager
        .announce_get_transactions_done(scan_rid, false)
        .unwrap();
    assert_eq!(
        h.sink.events()[2..],
        [SyncEvent::SyncStopped {
            reason: StopReason::Interrupted
        }]
    );
    // Synced height did not advance.
    assert_eq!(h.manager.status().synced_block_height, Some(100));

    // The next tick starts a fresh scan under a new id.
    h.manager.tick_tock().unwrap();
    let calls = h.client.calls();
    let (_, _, _, retry_rid) = get_transactions_parts(&calls[calls.len() - 1]);
    assert!(retry_rid.value() > scan_rid.value());
    assert_eq!(h.sink.events()[3..], [SyncEvent::SyncStarted]);
    h.assert_invariants();
}

#[test]
fn submit_while_disconnected_synthesizes_failure() {
    let h = harness(244);
    let transaction = test_transaction(9);

    h.manager.submit(&transaction);

    assert_eq!(
        h.sink.events(),
        vec![SyncEvent::TxnSubmitted {
            transaction,
            error: -1
        }]
    );
    assert!(h.client.calls().is_empty());
    h.assert_invariants();
}

#[test]
fn submit_while_connected_registers_on_success() {
    let h = harness(244);
    h.manager.connect().unwrap();
    h.client.take_calls();

    let transaction = test_transaction(9);
    h.manager.submit(&transaction);

    let calls = h.client.take_calls();
    assert_eq!(calls.len(), 1);
    let submit_rid = match &calls[0] {
        ClientCall::SubmitTransaction { raw, txid, rid } => {
            assert_eq!(raw, transaction.raw());
            assert_eq!(*txid, transaction.txid());
            *rid
        }
        other => panic!("expected a submit_transaction call, got {other:?}"),
    };

    h.manager
        .announce_submit_transaction(submit_rid, &transaction, 0)
        .unwrap();
    assert!(h.sink.events().contains(&SyncEvent::TxnSubmitted {
        transaction: transaction.clone(),
        error: 0
    }));
    assert!(
        h.wallet
            .lock()
            .unwrap()
            .contains_transaction(&transaction.txid())
            .unwrap()
    );
    h.assert_invariants();
}

#[test]
fn failed_submission_is_not_registered() {
    let h = harness(244);
    h.manager.connect().unwrap();

    let transaction = test_transaction(4);
    h.manager.submit(&transaction);
    h.manager
        .announce_submit_transaction(RequestId::from_value(3), &transaction, 110)
        .unwrap();

    assert!(h.sink.events().contains(&SyncEvent::TxnSubmitted {
        transaction: transaction.clone(),
        error: 110
    }));
    assert!(
        !h.wallet
            .lock()
            .unwrap()
            .contains_transaction(&transaction.txid())
            .unwrap()
    );
    h.assert_invariants();
}

#[test]
fn non_advancing_block_height_is_ignored() {
    let h = harness(244);
    h.manager.connect().unwrap();
    let poll_rid = match h.client.calls()[0] {
        ClientCall::GetBlockNumber { rid } => rid,
        ref other => panic!("expected a get_block_number call, got {other:?}"),
    };
    let events_before = h.sink.events().len();

    h.manager.announce_get_block_number(poll_rid, 200);
    h.manager.announce_get_block_number(poll_rid, 244);
    assert_eq!(h.sink.events().len(), events_before);
    assert_eq!(h.manager.get_block_height(), 244);

    // Heights announced while disconnected are ignored too, even greater
    // ones.
    h.manager.disconnect();
    h.manager.announce_get_block_number(poll_rid, 999);
    assert_eq!(h.manager.get_block_height(), 244);
    h.assert_invariants();
}

#[test]
fn low_depth_rescan_starts_at_last_confirmed_send() {
    let mut wallet = MemoryWallet::new();
    wallet.insert_record(confirmed_send(200));
    let h = harness_with_wallet(wallet, 1_000);

    h.manager.connect().unwrap();
    h.client.take_calls();
    let events_before = h.sink.events().len();

    h.manager.scan_to_depth(SyncDepth::Low).unwrap();

    assert_eq!(
        h.sink.events()[events_before..],
        [
            SyncEvent::SyncStopped {
                reason: StopReason::Interrupted
            },
            SyncEvent::Disconnected,
            SyncEvent::Connected,
            SyncEvent::SyncStarted,
        ]
    );

    let calls = h.client.take_calls();
    let (_, beg, end, _) = get_transactions_parts(&calls[1]);
    assert_eq!((beg, end), (200, 1_001));
    h.assert_invariants();
}

#[test]
fn low_depth_rescan_falls_back_to_init_height() {
    let h = harness(1_000);
    h.manager.connect().unwrap();
    h.client.take_calls();

    h.manager.scan_to_depth(SyncDepth::Low).unwrap();

    let calls = h.client.take_calls();
    let (_, beg, _, _) = get_transactions_parts(&calls[1]);
    assert_eq!(beg, CHECKPOINT_HEIGHT);
    h.assert_invariants();
}

#[test]
fn medium_depth_rescan_uses_previous_checkpoint() {
    let h = build_harness(
        MemoryWallet::new(),
        1_000,
        vec![
            Checkpoint {
                height: CHECKPOINT_HEIGHT,
                timestamp: CHECKPOINT_TIME,
            },
            Checkpoint {
                height: 900,
                timestamp: 2_000_000,
            },
        ],
        SyncConfig::default(),
    );
    h.manager.connect().unwrap();
    h.client.take_calls();

    h.manager.scan_to_depth(SyncDepth::Medium).unwrap();
    assert_eq!(h.manager.status().synced_block_height, Some(900));

    let calls = h.client.take_calls();
    let (_, beg, end, _) = get_transactions_parts(&calls[1]);
    // The window still re-requests the trailing day below the checkpoint.
    assert_eq!((beg, end), (857, 1_001));
    h.assert_invariants();
}

#[test]
fn high_depth_rescan_rewinds_to_init_height() {
    let h = harness(1_000);
    h.manager.connect().unwrap();
    h.client.take_calls();

    h.manager.scan_to_depth(SyncDepth::High).unwrap();

    assert_eq!(
        h.manager.status().synced_block_height,
        Some(CHECKPOINT_HEIGHT)
    );
    let calls = h.client.take_calls();
    let (_, beg, _, _) = get_transactions_parts(&calls[1]);
    assert_eq!(beg, CHECKPOINT_HEIGHT);
    h.assert_invariants();
}

#[test]
fn rescan_while_disconnected_is_inert() {
    let h = harness(1_000);
    h.manager.scan().unwrap();

    assert!(h.sink.events().is_empty());
    assert!(h.client.calls().is_empty());
    h.assert_invariants();
}

#[test]
fn connect_surfaces_wallet_failure() {
    // A zero gap limit leaves the wallet without a first-unused address,
    // which surfaces as a wallet error from the scan setup.
    let h = build_harness(
        MemoryWallet::new(),
        244,
        vec![Checkpoint {
            height: CHECKPOINT_HEIGHT,
            timestamp: CHECKPOINT_TIME,
        }],
        SyncConfig {
            gap_limit_external: 0,
            gap_limit_internal: 0,
        },
    );

    let error = h.manager.connect().unwrap_err();
    assert!(matches!(error, SyncError::WalletError(_)));
    // The connection itself still happened.
    assert_eq!(h.sink.events(), vec![SyncEvent::Connected]);
    h.assert_invariants();
}

#[test]
fn event_stream_invariants_hold_across_a_session() {
    let mut wallet = MemoryWallet::new();
    wallet.insert_record(confirmed_send(200));
    let h = harness_with_wallet(wallet, 1_000);

    h.manager.connect().unwrap();
    let (_, _, _, scan_rid) = get_transactions_parts(&h.client.calls()[1]);
    h.manager
        .announce_get_transactions_done(scan_rid, true)
        .unwrap();
    h.manager
        .announce_get_block_number(RequestId::from_value(1), 500);
    h.manager
        .announce_get_block_number(RequestId::from_value(1), 1_200);
    h.manager.tick_tock().unwrap();
    h.manager.scan_to_depth(SyncDepth::Low).unwrap();
    h.manager.disconnect();
    h.manager.connect().unwrap();
    h.manager.disconnect();

    let events = h.sink.events();
    assert_connection_alternation(&events);
    assert_sync_event_pairing(&events);
    assert_request_ids_strictly_increasing(&h.client.request_ids());

    // The height watermark never went backwards.
    assert_eq!(h.manager.get_block_height(), 1_200);
}
