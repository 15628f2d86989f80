//! Committee scheduler structures and interface.
use serde::{Deserialize, Serialize};
use serde_repr::{Deserialize_repr, Serialize_repr};

use crate::{
    common::{crypto::signature::PublicKey, namespace::Namespace},
    pubsub::Subscription,
};

/// Epoch number as assigned by the scheduler; committee identity is
/// constant within an epoch.
pub type EpochTime = u64;

/// The role a given node plays in a committee.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize_repr, Deserialize_repr)]
#[repr(u8)]
pub enum Role {
    /// An invalid role (should never appear on the wire).
    Invalid = 0,
    /// Indicates the node is a worker.
    Worker = 1,
    /// Indicates the node is a backup worker.
    BackupWorker = 2,
}

impl Default for Role {
    fn default() -> Self {
        Role::Invalid
    }
}

/// The functionality a committee exists to provide.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize_repr, Deserialize_repr)]
#[repr(u8)]
pub enum CommitteeKind {
    /// An invalid committee (should never appear on the wire).
    Invalid = 0,
    /// A compute committee.
    Compute = 1,
    /// A storage committee.
    Storage = 2,
}

impl Default for CommitteeKind {
    fn default() -> Self {
        CommitteeKind::Invalid
    }
}

/// A node participating in a committee.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CommitteeNode {
    /// The node's role in a committee.
    pub role: Role,
    /// The node's public key.
    pub public_key: PublicKey,
}

/// A per-runtime committee instance.
///
/// The pair `(runtime_id, valid_for)` identifies a committee; events
/// repeating that pair are duplicates.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Committee {
    /// The functionality provided by this committee.
    pub kind: CommitteeKind,
    /// The committee members.
    pub members: Vec<CommitteeNode>,
    /// The runtime this committee is scheduled for.
    pub runtime_id: Namespace,
    /// The epoch this committee is valid for.
    pub valid_for: EpochTime,
}

/// Scheduler interface.
pub trait Scheduler: Send + Sync {
    /// Subscribe to committee generation updates.
    ///
    /// The stream ends when the scheduler shuts down.
    fn watch_committees(&self) -> Subscription<Committee>;
}
