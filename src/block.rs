//! Runtime block and header.
use serde::{Deserialize, Serialize};
use serde_repr::{Deserialize_repr, Serialize_repr};

use crate::common::{crypto::hash::Hash, namespace::Namespace};

/// Runtime block.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Block {
    /// Header.
    pub header: Header,
}

impl Block {
    /// Creates a new genesis block given a runtime id and POSIX timestamp.
    pub fn new_genesis_block(id: Namespace, timestamp: u64) -> Block {
        Block {
            header: Header {
                version: 0,
                namespace: id,
                round: 0,
                timestamp,
                header_type: HeaderType::Genesis,
                previous_hash: Hash::empty_hash(),
                io_root: Hash::empty_hash(),
                state_root: Hash::empty_hash(),
            },
        }
    }

    /// Creates a new empty block with a specific type, continuing the
    /// chain from the passed block.
    pub fn new_empty_block(previous: &Block, timestamp: u64, header_type: HeaderType) -> Block {
        Block {
            header: Header {
                version: previous.header.version,
                namespace: previous.header.namespace,
                round: previous.header.round + 1,
                timestamp,
                header_type,
                previous_hash: previous.header.encoded_hash(),
                io_root: Hash::empty_hash(),
                // State root is unchanged.
                state_root: previous.header.state_root,
            },
        }
    }
}

/// Header type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize_repr, Deserialize_repr)]
#[repr(u8)]
pub enum HeaderType {
    Invalid = 0,
    Normal = 1,
    RoundFailed = 2,
    EpochTransition = 3,
    Genesis = 4,
}

impl Default for HeaderType {
    fn default() -> Self {
        HeaderType::Invalid
    }
}

/// Block header.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Header {
    /// Protocol version number.
    pub version: u16,
    /// Chain namespace.
    pub namespace: Namespace,
    /// Round number.
    pub round: u64,
    /// Timestamp (POSIX time).
    pub timestamp: u64,
    /// Header type.
    pub header_type: HeaderType,
    /// Hash of the previous block's header.
    pub previous_hash: Hash,
    /// Input/output root.
    pub io_root: Hash,
    /// State root.
    pub state_root: Hash,
}

impl Header {
    /// Returns a hash of the encoded header.
    pub fn encoded_hash(&self) -> Hash {
        Hash::digest_bytes(&serde_cbor::to_vec(self).unwrap())
    }

    /// Returns true iff the header is the parent of a child header.
    pub fn is_parent_of(&self, child: &Header) -> bool {
        child.previous_hash == self.encoded_hash()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_genesis_block() {
        let id = Namespace::from("0000000000000000000000000000000000000000000000000000000000000001");
        let genesis = Block::new_genesis_block(id, 1);

        assert_eq!(genesis.header.round, 0);
        assert_eq!(genesis.header.header_type, HeaderType::Genesis);
        assert_eq!(genesis.header.namespace, id);
    }

    #[test]
    fn test_empty_block_continuity() {
        let id = Namespace::from("0000000000000000000000000000000000000000000000000000000000000001");
        let genesis = Block::new_genesis_block(id, 1);
        let block = Block::new_empty_block(&genesis, 2, HeaderType::EpochTransition);

        assert_eq!(block.header.round, genesis.header.round + 1);
        assert_eq!(block.header.header_type, HeaderType::EpochTransition);
        assert_eq!(block.header.state_root, genesis.header.state_root);
        assert!(genesis.header.is_parent_of(&block.header));

        let next = Block::new_empty_block(&block, 3, HeaderType::Normal);
        assert!(block.header.is_parent_of(&next.header));
        assert!(!genesis.header.is_parent_of(&next.header));
    }

    #[test]
    fn test_encoded_hash_changes_with_content() {
        let id = Namespace::from("0000000000000000000000000000000000000000000000000000000000000001");
        let genesis = Block::new_genesis_block(id, 1);
        let mut other = genesis.clone();
        other.header.timestamp = 2;

        assert_ne!(genesis.header.encoded_hash(), other.header.encoded_hash());
    }
}
