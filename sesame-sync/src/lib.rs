#![warn(missing_docs)]
#![forbid(unsafe_code)]
#![doc = r#"
# Sesame Sync

## Overview
Sesame-sync is the synchronization engine of the sesame wallet stack. It
reconciles a local wallet's transaction set with the blockchain through one of
two interchangeable strategies behind a single facade:
- Client mode, which discovers transactions by polling a cooperative remote
  indexer over the wallet's address set, widening the set as gap-limit
  discovery surfaces new addresses.
- P2P mode, which adapts a peer manager's callbacks into the same unified
  event model.

Both strategies emit a totally ordered stream of lifecycle events
(connection, scan, block height) to a caller-supplied sink.

## Terminology
- Network block height - highest block height reported by the indexer or the
  P2P network; monotone non-decreasing for the lifetime of a manager.
- Synced block height - last block covered by completed transaction
  discovery; reset downward by a rescan.
- Full scan - a scan whose window is wider than one day of blocks; full scans
  are bracketed by `SyncStarted`/`SyncStopped` events.
- Gap limit - the number of consecutive unused addresses kept derived ahead
  of use, per address scope.
- Request id - a strictly increasing positive integer correlating an indexer
  response with the originating call.

## Event ordering
Events that reflect a state transition (`Connected`, `Disconnected`,
`SyncStarted`, `SyncStopped`, `SyncProgress`, `BlockHeightUpdated`) are
emitted while the manager's state lock is held, so their order at the sink is
a linearization of the state changes. Events that carry no state transition
(`TxnSubmitted`, `TxnsUpdated`, block and peer persistence events) are
emitted outside the lock, as is all collaborator I/O. Event sinks must not
call back into the manager from inside `handle_event`; doing so would
deadlock, and is asserted against in debug builds.

## Lifecycle
A [`sync::SyncManager`] is constructed once per wallet with
[`sync::SyncManager::new_for_mode`] and torn down by dropping it; dropping a
P2P-mode manager disconnects its peer manager. Operations are synchronous and
return promptly; long-running work happens in collaborator threads and
re-enters through the `announce_*` callbacks (client mode) or the
[`peer::PeerManagerEvents`] trait (P2P mode).
"#]

pub mod chain;
pub mod client;
pub mod config;
pub mod error;
pub mod event;
pub mod peer;
pub mod sync;
pub mod wallet;

#[cfg(any(test, feature = "testutils"))]
pub mod testutils;

pub use sync::SyncManager;
pub use sesame_status::{sync_depth::SyncDepth, sync_mode::SyncMode};
