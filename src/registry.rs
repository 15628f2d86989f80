//! Runtime and node registry structures and interface.
use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_repr::{Deserialize_repr, Serialize_repr};

use crate::{
    common::{crypto::signature::PublicKey, namespace::Namespace},
    pubsub::Subscription,
};

/// Type of a runtime.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize_repr, Deserialize_repr)]
#[repr(u8)]
pub enum RuntimeKind {
    /// Invalid runtime that should never be explicitly set.
    Invalid = 0,
    /// Generic compute runtime.
    Compute = 1,
    /// Key manager runtime.
    KeyManager = 2,
}

impl Default for RuntimeKind {
    fn default() -> Self {
        RuntimeKind::Invalid
    }
}

/// A runtime descriptor.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Runtime {
    /// Globally unique long term identifier of the runtime.
    pub id: Namespace,
    /// Type of runtime.
    pub kind: RuntimeKind,
    /// Number of primary workers in the computation group.
    pub replica_group_size: u64,
    /// Number of backup workers in the computation group.
    pub replica_group_backup_size: u64,
    /// Number of stragglers the round can tolerate among the primary
    /// workers.
    pub replica_allowed_stragglers: u64,
}

impl Runtime {
    /// Returns true iff this runtime performs computation.
    pub fn is_compute(&self) -> bool {
        self.kind == RuntimeKind::Compute
    }
}

/// Per node, per runtime metadata.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRuntime {
    /// Public key identifying the runtime.
    pub id: Namespace,
    /// Extra per node + per runtime opaque data associated with the
    /// current instance.
    pub extra_info: Option<Vec<u8>>,
}

/// A node descriptor.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    /// Public key identifying the node.
    pub id: PublicKey,
    /// Epoch in which the node's commitment expires.
    pub expiration: u64,
    /// Runtimes the node advertises for.
    pub runtimes: Vec<NodeRuntime>,
}

impl Node {
    /// Searches for an existing supported runtime descriptor.
    pub fn get_runtime(&self, id: &Namespace) -> Option<&NodeRuntime> {
        self.runtimes.iter().find(|rt| &rt.id == id)
    }
}

/// Registry interface.
pub trait Registry: Send + Sync {
    /// Subscribe to runtime registration updates.
    ///
    /// The stream ends when the registry shuts down.
    fn watch_runtimes(&self) -> Subscription<Runtime>;

    /// Return all registered nodes.
    fn get_nodes(&self) -> Result<Vec<Node>>;

    /// Return the runtime descriptor for the given runtime.
    fn get_runtime(&self, id: &Namespace) -> Result<Runtime>;
}
