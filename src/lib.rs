//! In-memory (centralized) root hash coordination.
//!
//! Per registered compute runtime, the coordinator runs a sequence of
//! rounds: it collects commitments from the scheduled committee, detects
//! disagreement between the primary workers, escalates disagreement and
//! timeouts to the backup workers, and appends finalized blocks to the
//! runtime's chain while notifying subscribers. All state except the
//! genesis blocks lives in memory.
use thiserror::Error;

pub mod common;
pub mod pubsub;
pub mod registry;
pub mod scheduler;

mod block;
mod commitment;
mod memory;
mod round;

// Re-exports.
pub use block::{Block, Header, HeaderType};
pub use commitment::{Commitment, OpaqueCommitment};
pub use memory::MemoryRootHash;

use crate::common::{crypto::hash::Hash, namespace::Namespace};

/// Errors emitted by the root hash coordinator.
#[derive(Debug, Error)]
pub enum Error {
    #[error("roothash: runtime already registered")]
    RuntimeExists,

    #[error("roothash: no such runtime")]
    NoSuchRuntime,

    #[error("roothash: no blocks exist for runtime")]
    NoSuchBlocks,

    #[error("roothash: block not found")]
    NotFound,

    #[error("roothash: no round in progress")]
    NoRoundInProgress,

    #[error("roothash: commit canceled")]
    Canceled,

    #[error("roothash: malformed commitment")]
    InvalidCommitment,

    #[error("roothash/round: node not part of computation group")]
    NotInComputationGroup,

    #[error("roothash/round: node has incorrect role for current state")]
    IncorrectRole,

    #[error("roothash/round: commitment has invalid signature")]
    InvalidSignature,

    #[error("roothash/round: commitment not based on correct block")]
    NotBasedOnCorrectBlock,

    #[error("roothash/round: still waiting for commitments")]
    StillWaiting,

    #[error("roothash/round: discrepancy detected")]
    DiscrepancyDetected(Hash),

    #[error("roothash/round: backup committee already activated")]
    BackupAlreadyActive,
}

/// Notification of a protocol event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    /// Discrepancy resolution required.
    ///
    /// This signals to the backup workers that they should re-execute the
    /// computation identified by the I/O root.
    DiscrepancyDetected {
        /// I/O root of the disagreement.
        io_root: Hash,
        /// Header of the latest block at detection time.
        block_header: Header,
    },
}

/// Notification of a pruned block.
///
/// Pruning is performed by the surrounding system; the coordinator only
/// re-broadcasts these.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PrunedBlock {
    /// Runtime the block was pruned from.
    pub runtime_id: Namespace,
    /// Pruned round number.
    pub round: u64,
}
