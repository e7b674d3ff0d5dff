#![warn(missing_docs)]
//! Small shared enums describing how a sesame wallet synchronizes with the
//! chain. Kept in a separate crate so that wallets, bindings and the sync
//! engine agree on the same vocabulary without depending on each other.

pub mod sync_depth;
pub mod sync_mode;
