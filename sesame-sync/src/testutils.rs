//! In-memory collaborators for exercising the sync engine in tests.
//!
//! The fixtures record everything the engine does to them: the wallet keeps
//! a real (if tiny) address book and transaction map, the client and peer
//! manager log their calls, and the sink logs the event stream for
//! invariant checks.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::client::{RequestId, SyncClient};
use crate::event::{EventSink, SyncEvent};
use crate::peer::{ConnectStatus, PeerManager, PeerManagerEvents, PublishCompletion};
use crate::wallet::traits::SyncWallet;
use crate::wallet::{Address, AddressScope, Transaction, TransactionRecord, TxId};

/// Errors of the in-memory wallet.
#[derive(Debug, thiserror::Error)]
pub enum MemoryWalletError {
    /// Transaction not tracked by the wallet.
    #[error("unknown transaction {0}")]
    UnknownTransaction(TxId),
    /// Transaction bytes did not decode.
    #[error("malformed transaction bytes")]
    MalformedTransaction,
    /// No unused address available in the requested scope.
    #[error("no unused {0} address derived")]
    NoUnusedAddress(AddressScope),
}

/// A minimal wallet: two derived address chains, a used-address set and a
/// transaction map. Transactions use the test wire format of
/// [`encode_transaction`].
#[derive(Debug, Default)]
pub struct MemoryWallet {
    external: Vec<Address>,
    internal: Vec<Address>,
    used: HashSet<Address>,
    records: BTreeMap<TxId, TransactionRecord>,
}

impl MemoryWallet {
    /// An empty wallet; address chains fill in on demand.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a transaction record directly, bypassing the wire format.
    pub fn insert_record(&mut self, record: TransactionRecord) {
        self.records.insert(record.txid, record);
    }

    /// Mark an address as used, as if a transaction had paid it.
    pub fn mark_used(&mut self, address: &Address) {
        self.used.insert(address.clone());
    }

    fn derive(scope: AddressScope, index: usize) -> Address {
        match scope {
            AddressScope::External => Address::new(format!("rcv-{index:03}")),
            AddressScope::Internal => Address::new(format!("chg-{index:03}")),
        }
    }

    fn chain(&self, scope: AddressScope) -> &Vec<Address> {
        match scope {
            AddressScope::External => &self.external,
            AddressScope::Internal => &self.internal,
        }
    }

    fn chain_mut(&mut self, scope: AddressScope) -> &mut Vec<Address> {
        match scope {
            AddressScope::External => &mut self.external,
            AddressScope::Internal => &mut self.internal,
        }
    }

    /// Resolve an announced output back to a derived address, accepting
    /// both native and legacy encodings.
    fn native_form(&self, output: &Address) -> Option<Address> {
        let native = match output.as_str().strip_prefix("legacy-") {
            Some(stripped) => Address::new(stripped),
            None => output.clone(),
        };
        (self.external.contains(&native) || self.internal.contains(&native)).then_some(native)
    }
}

impl SyncWallet for MemoryWallet {
    type Error = MemoryWalletError;

    fn all_addresses(&self) -> Result<Vec<Address>, Self::Error> {
        Ok(self
            .external
            .iter()
            .chain(self.internal.iter())
            .cloned()
            .collect())
    }

    fn legacy_address(&self, address: &Address) -> Result<Option<Address>, Self::Error> {
        Ok(Some(Address::new(format!("legacy-{address}"))))
    }

    fn generate_addresses(
        &mut self,
        scope: AddressScope,
        gap_limit: u32,
    ) -> Result<(), Self::Error> {
        loop {
            let unused = self
                .chain(scope)
                .iter()
                .filter(|address| !self.used.contains(*address))
                .count();
            if unused >= gap_limit as usize {
                return Ok(());
            }
            let index = self.chain(scope).len();
            let address = Self::derive(scope, index);
            self.chain_mut(scope).push(address);
        }
    }

    fn first_unused_address(&self, scope: AddressScope) -> Result<Address, Self::Error> {
        self.chain(scope)
            .iter()
            .find(|address| !self.used.contains(*address))
            .cloned()
            .ok_or(MemoryWalletError::NoUnusedAddress(scope))
    }

    fn transactions(&self) -> Result<Vec<TransactionRecord>, Self::Error> {
        Ok(self.records.values().cloned().collect())
    }

    fn extract_transaction_id(&self, raw: &[u8]) -> Result<Option<TxId>, Self::Error> {
        if raw.len() < 32 {
            return Ok(None);
        }
        let mut txid = [0u8; 32];
        txid.copy_from_slice(&raw[..32]);
        Ok(Some(TxId::from_bytes(txid)))
    }

    fn contains_transaction(&self, txid: &TxId) -> Result<bool, Self::Error> {
        Ok(self.records.contains_key(txid))
    }

    fn register_transaction(
        &mut self,
        raw: &[u8],
        block_height: Option<u64>,
        timestamp: u64,
    ) -> Result<(), Self::Error> {
        let decoded = decode_transaction(raw)?;
        for output in &decoded.outputs {
            if let Some(native) = self.native_form(output) {
                self.used.insert(native);
            }
        }
        self.records.insert(
            decoded.txid,
            TransactionRecord {
                txid: decoded.txid,
                block_height,
                timestamp,
                amount_sent: decoded.amount_sent,
                is_valid: true,
            },
        );
        Ok(())
    }

    fn update_transaction(
        &mut self,
        txid: &TxId,
        block_height: Option<u64>,
        timestamp: u64,
    ) -> Result<(), Self::Error> {
        let record = self
            .records
            .get_mut(txid)
            .ok_or(MemoryWalletError::UnknownTransaction(*txid))?;
        record.block_height = block_height;
        record.timestamp = timestamp;
        Ok(())
    }
}

struct DecodedTransaction {
    txid: TxId,
    outputs: Vec<Address>,
    amount_sent: u64,
}

/// Encode a transaction in the fixtures' wire format: txid, output
/// addresses, amount sent.
#[must_use]
pub fn encode_transaction(txid: &TxId, pay_to: &[Address], amount_sent: u64) -> Vec<u8> {
    let mut raw = Vec::new();
    raw.extend_from_slice(txid.as_bytes());
    raw.write_u8(pay_to.len() as u8).expect("vec write");
    for address in pay_to {
        let bytes = address.as_str().as_bytes();
        raw.write_u8(bytes.len() as u8).expect("vec write");
        raw.extend_from_slice(bytes);
    }
    raw.write_u64::<LittleEndian>(amount_sent).expect("vec write");
    raw
}

fn decode_transaction(raw: &[u8]) -> Result<DecodedTransaction, MemoryWalletError> {
    let mut reader = raw;
    let mut txid = [0u8; 32];
    std::io::Read::read_exact(&mut reader, &mut txid)
        .map_err(|_| MemoryWalletError::MalformedTransaction)?;
    let output_count = reader
        .read_u8()
        .map_err(|_| MemoryWalletError::MalformedTransaction)?;
    let mut outputs = Vec::with_capacity(output_count as usize);
    for _ in 0..output_count {
        let length = reader
            .read_u8()
            .map_err(|_| MemoryWalletError::MalformedTransaction)? as usize;
        if reader.len() < length {
            return Err(MemoryWalletError::MalformedTransaction);
        }
        let (bytes, rest) = reader.split_at(length);
        outputs.push(Address::new(
            std::str::from_utf8(bytes).map_err(|_| MemoryWalletError::MalformedTransaction)?,
        ));
        reader = rest;
    }
    let amount_sent = reader
        .read_u64::<LittleEndian>()
        .map_err(|_| MemoryWalletError::MalformedTransaction)?;

    Ok(DecodedTransaction {
        txid: TxId::from_bytes(txid),
        outputs,
        amount_sent,
    })
}

/// A ready-made transaction with a recognizable txid and no outputs.
#[must_use]
pub fn test_transaction(seed: u8) -> Transaction {
    let txid = TxId::from_bytes([seed; 32]);
    let raw = encode_transaction(&txid, &[], 0);
    Transaction::new(txid, raw)
}

/// Event sink that records the stream for later assertions.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<SyncEvent>>,
}

impl RecordingSink {
    /// An empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The events recorded so far.
    #[must_use]
    pub fn events(&self) -> Vec<SyncEvent> {
        self.events.lock().expect("sink lock").clone()
    }

    /// Drain the recorded events.
    #[must_use]
    pub fn take_events(&self) -> Vec<SyncEvent> {
        std::mem::take(&mut *self.events.lock().expect("sink lock"))
    }
}

impl EventSink for RecordingSink {
    fn handle_event(&self, event: SyncEvent) {
        self.events.lock().expect("sink lock").push(event);
    }
}

/// Panics unless `Connected`/`Disconnected` alternate, starting from
/// disconnected.
pub fn assert_connection_alternation(events: &[SyncEvent]) {
    let mut connected = false;
    for event in events {
        match event {
            SyncEvent::Connected => {
                assert!(!connected, "Connected while already connected: {events:?}");
                connected = true;
            }
            SyncEvent::Disconnected => {
                assert!(connected, "Disconnected while already disconnected: {events:?}");
                connected = false;
            }
            _ => {}
        }
    }
}

/// Panics unless fresh request ids strictly increase. A repeated id is
/// legal only when it equals the most recent one: that is the same
/// in-flight window re-issued over a widened address set.
pub fn assert_request_ids_strictly_increasing(request_ids: &[u32]) {
    let mut last = 0;
    for &rid in request_ids {
        assert!(
            rid > last || (rid == last && last != 0),
            "request ids not increasing: {request_ids:?}"
        );
        last = rid;
    }
}

/// Panics unless every `SyncStarted` is balanced by exactly one
/// `SyncStopped` before the next `SyncStarted`.
pub fn assert_sync_event_pairing(events: &[SyncEvent]) {
    let mut in_sync = false;
    for event in events {
        match event {
            SyncEvent::SyncStarted => {
                assert!(!in_sync, "SyncStarted without SyncStopped: {events:?}");
                in_sync = true;
            }
            SyncEvent::SyncStopped { .. } => {
                assert!(in_sync, "SyncStopped without SyncStarted: {events:?}");
                in_sync = false;
            }
            _ => {}
        }
    }
}

/// A call the engine made into the indexer client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCall {
    /// `get_block_number`.
    GetBlockNumber {
        /// Request id.
        rid: RequestId,
    },
    /// `get_transactions`.
    GetTransactions {
        /// Addresses to query.
        addresses: Vec<Address>,
        /// Window start, inclusive.
        beg_block_number: u64,
        /// Window end, exclusive.
        end_block_number: u64,
        /// Request id.
        rid: RequestId,
    },
    /// `submit_transaction`.
    SubmitTransaction {
        /// Serialized transaction.
        raw: Vec<u8>,
        /// Transaction id.
        txid: TxId,
        /// Request id.
        rid: RequestId,
    },
}

/// Indexer stub that records every call.
#[derive(Default)]
pub struct RecordingClient {
    calls: Mutex<Vec<ClientCall>>,
    request_ids: Mutex<Vec<u32>>,
}

impl RecordingClient {
    /// A client with no recorded calls.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The calls recorded so far.
    #[must_use]
    pub fn calls(&self) -> Vec<ClientCall> {
        self.calls.lock().expect("client lock").clone()
    }

    /// Drain the recorded calls.
    #[must_use]
    pub fn take_calls(&self) -> Vec<ClientCall> {
        std::mem::take(&mut *self.calls.lock().expect("client lock"))
    }

    /// Every request id ever quoted to this client, in call order.
    /// Unaffected by [`RecordingClient::take_calls`], so monotonicity
    /// assertions see the whole session.
    #[must_use]
    pub fn request_ids(&self) -> Vec<u32> {
        self.request_ids.lock().expect("client lock").clone()
    }

    fn record(&self, call: ClientCall) {
        let rid = match &call {
            ClientCall::GetBlockNumber { rid }
            | ClientCall::GetTransactions { rid, .. }
            | ClientCall::SubmitTransaction { rid, .. } => *rid,
        };
        self.request_ids
            .lock()
            .expect("client lock")
            .push(rid.value());
        self.calls.lock().expect("client lock").push(call);
    }
}

impl SyncClient for RecordingClient {
    fn get_block_number(&self, rid: RequestId) {
        self.record(ClientCall::GetBlockNumber { rid });
    }

    fn get_transactions(
        &self,
        addresses: Vec<Address>,
        beg_block_number: u64,
        end_block_number: u64,
        rid: RequestId,
    ) {
        self.record(ClientCall::GetTransactions {
            addresses,
            beg_block_number,
            end_block_number,
            rid,
        });
    }

    fn submit_transaction(&self, raw: Vec<u8>, txid: TxId, rid: RequestId) {
        self.record(ClientCall::SubmitTransaction { raw, txid, rid });
    }
}

/// A call the engine made into the peer manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerCall {
    /// `connect`.
    Connect,
    /// `disconnect`.
    Disconnect,
    /// `rescan`.
    Rescan,
    /// `rescan_from_height`.
    RescanFromHeight(u64),
    /// `rescan_from_last_checkpoint`.
    RescanFromLastCheckpoint,
    /// `publish_transaction`, by txid.
    PublishTransaction(TxId),
}

/// Peer manager stub with scriptable status queries. Tests fire callbacks
/// through [`MockPeerManager::events`].
pub struct MockPeerManager {
    calls: Mutex<Vec<PeerCall>>,
    handler: Mutex<Option<Weak<dyn PeerManagerEvents>>>,
    connect_status: Mutex<ConnectStatus>,
    last_block_height: AtomicU64,
    last_block_timestamp: AtomicU64,
    sync_progress: Mutex<f64>,
    published: Mutex<Vec<(Transaction, PublishCompletion)>>,
}

impl Default for MockPeerManager {
    fn default() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            handler: Mutex::new(None),
            connect_status: Mutex::new(ConnectStatus::Disconnected),
            last_block_height: AtomicU64::new(0),
            last_block_timestamp: AtomicU64::new(0),
            sync_progress: Mutex::new(0.0),
            published: Mutex::new(Vec::new()),
        }
    }
}

impl MockPeerManager {
    /// A disconnected peer manager at height zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The registered event handler; panics if registration has not
    /// happened or the manager is gone.
    #[must_use]
    pub fn events(&self) -> Arc<dyn PeerManagerEvents> {
        self.handler
            .lock()
            .expect("peer lock")
            .as_ref()
            .expect("event handler registered")
            .upgrade()
            .expect("sync manager alive")
    }

    /// Script the connectivity reported to the engine.
    pub fn set_connect_status(&self, status: ConnectStatus) {
        *self.connect_status.lock().expect("peer lock") = status;
    }

    /// Script the best block height reported to the engine.
    pub fn set_last_block_height(&self, height: u64) {
        self.last_block_height.store(height, Ordering::SeqCst);
    }

    /// Script the best block timestamp reported to the engine.
    pub fn set_last_block_timestamp(&self, timestamp: u64) {
        self.last_block_timestamp.store(timestamp, Ordering::SeqCst);
    }

    /// Script the sync progress fraction reported to the engine.
    pub fn set_sync_progress(&self, fraction: f64) {
        *self.sync_progress.lock().expect("peer lock") = fraction;
    }

    /// The calls recorded so far.
    #[must_use]
    pub fn calls(&self) -> Vec<PeerCall> {
        self.calls.lock().expect("peer lock").clone()
    }

    /// Drain the recorded calls.
    #[must_use]
    pub fn take_calls(&self) -> Vec<PeerCall> {
        std::mem::take(&mut *self.calls.lock().expect("peer lock"))
    }

    /// Drain the pending publishes; tests resolve them by consuming the
    /// completion.
    #[must_use]
    pub fn take_published(&self) -> Vec<(Transaction, PublishCompletion)> {
        std::mem::take(&mut *self.published.lock().expect("peer lock"))
    }
}

impl PeerManager for MockPeerManager {
    fn connect(&self) {
        self.calls.lock().expect("peer lock").push(PeerCall::Connect);
    }

    fn disconnect(&self) {
        self.calls
            .lock()
            .expect("peer lock")
            .push(PeerCall::Disconnect);
    }

    fn rescan(&self) {
        self.calls.lock().expect("peer lock").push(PeerCall::Rescan);
    }

    fn rescan_from_height(&self, block_height: u64) {
        self.calls
            .lock()
            .expect("peer lock")
            .push(PeerCall::RescanFromHeight(block_height));
    }

    fn rescan_from_last_checkpoint(&self) {
        self.calls
            .lock()
            .expect("peer lock")
            .push(PeerCall::RescanFromLastCheckpoint);
    }

    fn publish_transaction(&self, transaction: Transaction, completion: PublishCompletion) {
        self.calls
            .lock()
            .expect("peer lock")
            .push(PeerCall::PublishTransaction(transaction.txid()));
        self.published
            .lock()
            .expect("peer lock")
            .push((transaction, completion));
    }

    fn last_block_height(&self) -> u64 {
        self.last_block_height.load(Ordering::SeqCst)
    }

    fn last_block_timestamp(&self) -> u64 {
        self.last_block_timestamp.load(Ordering::SeqCst)
    }

    fn sync_progress(&self, _start_height: u64) -> f64 {
        *self.sync_progress.lock().expect("peer lock")
    }

    fn connect_status(&self) -> ConnectStatus {
        *self.connect_status.lock().expect("peer lock")
    }

    fn set_event_handler(&self, events: Weak<dyn PeerManagerEvents>) {
        *self.handler.lock().expect("peer lock") = Some(events);
    }
}
