//! The contract a P2P peer manager fulfils for P2P-mode sync, the callback
//! trait the sync engine registers with it, and the persistence records that
//! flow through the event stream.

use std::io::{Read, Write};
use std::net::{IpAddr, Ipv6Addr};
use std::sync::{Arc, Weak};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::event::{EventSink, SyncEvent, emit};
use crate::wallet::Transaction;

/// Connectivity of the peer manager, as sampled by the sync engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectStatus {
    /// No peers connected and none being dialed.
    Disconnected,
    /// Dialing peers.
    Connecting,
    /// At least one peer connected.
    Connected,
}

/// The P2P collaborator driving peer-to-peer sync.
///
/// The sync engine owns the peer manager handle exclusively and registers
/// itself as the event handler at construction. Status queries
/// ([`PeerManager::connect_status`], [`PeerManager::last_block_height`],
/// [`PeerManager::sync_progress`]) must be answerable without blocking on
/// callback delivery.
pub trait PeerManager: Send + Sync {
    /// Start connecting to peers.
    fn connect(&self);

    /// Disconnect from all peers.
    fn disconnect(&self);

    /// Rescan from the earliest block of interest.
    fn rescan(&self);

    /// Rescan from `block_height`.
    fn rescan_from_height(&self, block_height: u64);

    /// Rescan from the last hardcoded checkpoint.
    fn rescan_from_last_checkpoint(&self);

    /// Broadcast `transaction` to the network. Ownership of the transaction
    /// and the completion context transfers to the peer manager, which must
    /// consume `completion` exactly once when the broadcast resolves.
    fn publish_transaction(&self, transaction: Transaction, completion: PublishCompletion);

    /// Height of the best block seen on the network.
    fn last_block_height(&self) -> u64;

    /// Timestamp of the best block seen on the network.
    fn last_block_timestamp(&self) -> u64;

    /// Sync progress from `start_height`, as a fraction in `0.0..=1.0`.
    fn sync_progress(&self, start_height: u64) -> f64;

    /// Current connectivity.
    fn connect_status(&self) -> ConnectStatus;

    /// Register the event handler. Called once, at sync manager
    /// construction; implementations upgrade the handle per callback and
    /// skip delivery once it is gone.
    fn set_event_handler(&self, events: Weak<dyn PeerManagerEvents>);
}

/// Callbacks a peer manager delivers to its registered handler.
///
/// The sync engine's P2P manager implements this trait, translating each
/// callback into the unified event model. Callbacks may arrive from any of
/// the peer manager's threads; the handler serializes them internally.
pub trait PeerManagerEvents: Send + Sync {
    /// A chain sync has started.
    fn sync_started(&self);

    /// A chain sync has stopped; `reason` is 0 on success.
    fn sync_stopped(&self, reason: i32);

    /// Transaction or connectivity status may have changed; also delivered
    /// when a new block arrives.
    fn tx_status_update(&self);

    /// Persist `blocks`, replacing the stored set when `replace` is true.
    fn save_blocks(&self, replace: bool, blocks: Vec<BlockRecord>);

    /// Persist `peers`, replacing the stored set when `replace` is true.
    fn save_peers(&self, replace: bool, peers: Vec<PeerRecord>);

    /// Whether the host believes the network is reachable.
    fn network_is_reachable(&self) -> bool;

    /// The peer manager is tearing down one of its threads.
    fn thread_cleanup(&self);
}

/// Move-once completion context for [`PeerManager::publish_transaction`].
///
/// Carries the caller's transaction and the event sink; consuming it reports
/// the broadcast outcome as a `TxnSubmitted` event. Dropping it without
/// calling [`PublishCompletion::complete`] swallows the outcome, so peer
/// managers must resolve every publish.
pub struct PublishCompletion {
    transaction: Transaction,
    sink: Arc<dyn EventSink>,
}

impl PublishCompletion {
    pub(crate) fn new(transaction: Transaction, sink: Arc<dyn EventSink>) -> Self {
        Self { transaction, sink }
    }

    /// Report the broadcast outcome; `error` is 0 on acceptance.
    pub fn complete(self, error: i32) {
        emit(
            self.sink.as_ref(),
            SyncEvent::TxnSubmitted {
                transaction: self.transaction,
                error,
            },
        );
    }
}

impl std::fmt::Debug for PublishCompletion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PublishCompletion")
            .field("txid", &self.transaction.txid())
            .finish_non_exhaustive()
    }
}

/// A serialized block as handed to the persistence layer through the event
/// stream. The sync engine never interprets the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockRecord {
    /// Height the block was accepted at.
    pub height: u64,
    /// Serialized block bytes.
    pub raw: Vec<u8>,
}

impl BlockRecord {
    /// Deserialize from `reader`.
    pub fn read<R: Read>(mut reader: R) -> std::io::Result<Self> {
        let height = reader.read_u64::<LittleEndian>()?;
        let length = reader.read_u32::<LittleEndian>()? as usize;
        let mut raw = vec![0u8; length];
        reader.read_exact(&mut raw)?;

        Ok(Self { height, raw })
    }

    /// Serialize into `writer`.
    pub fn write<W: Write>(&self, mut writer: W) -> std::io::Result<()> {
        writer.write_u64::<LittleEndian>(self.height)?;
        writer.write_u32::<LittleEndian>(self.raw.len() as u32)?;
        writer.write_all(&self.raw)
    }
}

/// A known network peer as handed to the persistence layer through the
/// event stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerRecord {
    /// Peer address.
    pub address: IpAddr,
    /// Peer port.
    pub port: u16,
    /// Service flags advertised by the peer.
    pub services: u64,
    /// When the peer was last seen.
    pub timestamp: u64,
}

impl PeerRecord {
    /// Deserialize from `reader`.
    pub fn read<R: Read>(mut reader: R) -> std::io::Result<Self> {
        let mut octets = [0u8; 16];
        reader.read_exact(&mut octets)?;
        let mapped = Ipv6Addr::from(octets);
        let address = match mapped.to_ipv4_mapped() {
            Some(v4) => IpAddr::V4(v4),
            None => IpAddr::V6(mapped),
        };
        let port = reader.read_u16::<LittleEndian>()?;
        let services = reader.read_u64::<LittleEndian>()?;
        let timestamp = reader.read_u64::<LittleEndian>()?;

        Ok(Self {
            address,
            port,
            services,
            timestamp,
        })
    }

    /// Serialize into `writer`. Addresses are stored IPv6-mapped.
    pub fn write<W: Write>(&self, mut writer: W) -> std::io::Result<()> {
        let mapped = match self.address {
            IpAddr::V4(v4) => v4.to_ipv6_mapped(),
            IpAddr::V6(v6) => v6,
        };
        writer.write_all(&mapped.octets())?;
        writer.write_u16::<LittleEndian>(self.port)?;
        writer.write_u64::<LittleEndian>(self.services)?;
        writer.write_u64::<LittleEndian>(self.timestamp)
    }
}
