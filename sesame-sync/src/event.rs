//! The unified lifecycle event stream and its sink contract.

use std::cell::Cell;

use crate::peer::{BlockRecord, PeerRecord};
use crate::wallet::Transaction;

/// Why a sync run came to an end.
///
/// The wire mapping is preserved for hosts that forward the reason as an
/// integer: `0` is success, `-1` is an interrupted or failed run, anything
/// else is a collaborator-supplied error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The scan window completed and the synced height advanced.
    Complete,
    /// The scan was cancelled (disconnect, rescan request) or the indexer
    /// reported failure.
    Interrupted,
    /// A collaborator-supplied error code (P2P mode passes these through).
    Error(i32),
}

impl StopReason {
    /// The integer form carried on the wire.
    #[must_use]
    pub fn code(&self) -> i32 {
        match self {
            Self::Complete => 0,
            Self::Interrupted => -1,
            Self::Error(code) => *code,
        }
    }

    /// Recover a reason from its integer form.
    #[must_use]
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => Self::Complete,
            -1 => Self::Interrupted,
            code => Self::Error(code),
        }
    }

    /// True only for [`StopReason::Complete`].
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Complete)
    }
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Complete => write!(f, "complete"),
            Self::Interrupted => write!(f, "interrupted"),
            Self::Error(code) => write!(f, "error({code})"),
        }
    }
}

/// A lifecycle event emitted by a sync manager.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// The manager is now connected.
    Connected,
    /// The manager is now disconnected.
    Disconnected,
    /// A full scan has begun.
    SyncStarted,
    /// A full scan has ended.
    SyncStopped {
        /// Why the scan ended.
        reason: StopReason,
    },
    /// Progress of an in-flight P2P full scan, strictly between the
    /// endpoints; 0 and 100 are encoded by `SyncStarted` and
    /// `SyncStopped { reason: Complete }`.
    SyncProgress {
        /// Timestamp of the last block processed.
        timestamp: u64,
        /// Percent complete, in the open interval (0, 100).
        percent: f64,
    },
    /// The network block height advanced.
    BlockHeightUpdated {
        /// The new height.
        height: u64,
    },
    /// The wallet's transaction set may have changed.
    TxnsUpdated,
    /// A submitted transaction was accepted or rejected.
    TxnSubmitted {
        /// The transaction as handed to `submit`.
        transaction: Transaction,
        /// `0` on acceptance; `-1` when synthesized for a submit while
        /// disconnected; otherwise a collaborator error code.
        error: i32,
    },
    /// Replace the persisted block set.
    SetBlocks {
        /// Blocks to persist.
        blocks: Vec<BlockRecord>,
    },
    /// Append to the persisted block set.
    AddBlocks {
        /// Blocks to persist.
        blocks: Vec<BlockRecord>,
    },
    /// Replace the persisted peer set.
    SetPeers {
        /// Peers to persist.
        peers: Vec<PeerRecord>,
    },
    /// Append to the persisted peer set.
    AddPeers {
        /// Peers to persist.
        peers: Vec<PeerRecord>,
    },
}

/// Receives the event stream of a sync manager.
///
/// State-transition events are delivered while the manager holds its state
/// lock so that their order is a linearization of state changes.
/// Implementations must return promptly and must not call back into the
/// manager from inside [`EventSink::handle_event`]; a synchronous re-entry
/// would deadlock on the state lock and is asserted against in debug builds.
pub trait EventSink: Send + Sync {
    /// Deliver one event.
    fn handle_event(&self, event: SyncEvent);
}

impl<F> EventSink for F
where
    F: Fn(SyncEvent) + Send + Sync,
{
    fn handle_event(&self, event: SyncEvent) {
        self(event)
    }
}

thread_local! {
    static EMITTING: Cell<bool> = const { Cell::new(false) };
}

/// Deliver `event` to `sink` with the re-entrancy marker set.
pub(crate) fn emit(sink: &dyn EventSink, event: SyncEvent) {
    let _guard = EmissionGuard::enter();
    sink.handle_event(event);
}

/// Asserts, in debug builds, that the caller is not executing inside a
/// sink's `handle_event`. Placed at every public manager entry point.
pub(crate) fn debug_assert_not_emitting() {
    debug_assert!(
        !EMITTING.with(Cell::get),
        "event sinks must not call back into the sync manager"
    );
}

struct EmissionGuard {
    was_emitting: bool,
}

impl EmissionGuard {
    fn enter() -> Self {
        let was_emitting = EMITTING.with(|flag| flag.replace(true));
        Self { was_emitting }
    }
}

impl Drop for EmissionGuard {
    fn drop(&mut self) {
        EMITTING.with(|flag| flag.set(self.was_emitting));
    }
}

#[cfg(test)]
mod tests {
    use super::{EventSink, StopReason, SyncEvent, debug_assert_not_emitting, emit};

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic(expected = "event sinks must not call back")]
    fn reentrant_sinks_are_caught_in_debug_builds() {
        struct ReentrantSink;

        impl EventSink for ReentrantSink {
            fn handle_event(&self, _event: SyncEvent) {
                // Simulates the sink calling back into a manager entry
                // point.
                debug_assert_not_emitting();
            }
        }

        emit(&ReentrantSink, SyncEvent::Connected);
    }

    #[test]
    fn emission_marker_is_cleared_after_delivery() {
        struct QuietSink;

        impl EventSink for QuietSink {
            fn handle_event(&self, _event: SyncEvent) {}
        }

        emit(&QuietSink, SyncEvent::Connected);
        debug_assert_not_emitting();
    }

    #[test]
    fn stop_reason_wire_mapping() {
        assert_eq!(StopReason::Complete.code(), 0);
        assert_eq!(StopReason::Interrupted.code(), -1);
        assert_eq!(StopReason::Error(110).code(), 110);

        assert_eq!(StopReason::from_code(0), StopReason::Complete);
        assert_eq!(StopReason::from_code(-1), StopReason::Interrupted);
        assert_eq!(StopReason::from_code(54), StopReason::Error(54));

        assert!(StopReason::Complete.is_success());
        assert!(!StopReason::Interrupted.is_success());
    }
}
