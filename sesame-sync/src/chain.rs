//! Chain parameter access: the trusted checkpoint anchors a sync manager
//! uses to bound its earliest block of interest and to implement
//! medium-depth rescans.

/// A trusted (height, time) anchor from the chain parameter table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checkpoint {
    /// Block height of the anchor.
    pub height: u64,
    /// Unix timestamp of the anchor block.
    pub timestamp: u64,
}

/// Read access to a chain's checkpoint table.
///
/// Implementations are expected to be cheap lookups over an in-memory table;
/// they are called while the manager's state lock is held.
pub trait ChainParameters: Send + Sync {
    /// The latest checkpoint whose timestamp is at or before `unix_time`.
    fn checkpoint_before(&self, unix_time: u64) -> Option<Checkpoint>;

    /// The latest checkpoint whose height is strictly below `height`.
    fn checkpoint_before_height(&self, height: u64) -> Option<Checkpoint>;
}

/// A checkpoint table backed by a sorted list.
#[derive(Debug, Clone, Default)]
pub struct CheckpointTable {
    checkpoints: Vec<Checkpoint>,
}

impl CheckpointTable {
    /// Build a table from `checkpoints`, sorting them by height.
    #[must_use]
    pub fn new(mut checkpoints: Vec<Checkpoint>) -> Self {
        checkpoints.sort_by_key(|checkpoint| checkpoint.height);
        Self { checkpoints }
    }
}

impl ChainParameters for CheckpointTable {
    fn checkpoint_before(&self, unix_time: u64) -> Option<Checkpoint> {
        self.checkpoints
            .iter()
            .rev()
            .find(|checkpoint| checkpoint.timestamp <= unix_time)
            .copied()
    }

    fn checkpoint_before_height(&self, height: u64) -> Option<Checkpoint> {
        self.checkpoints
            .iter()
            .rev()
            .find(|checkpoint| checkpoint.height < height)
            .copied()
    }
}
