//! Compute commitments.
use serde::{Deserialize, Serialize};

use crate::{
    block::Header,
    common::crypto::signature::{PrivateKey, PublicKey, Signature},
    Error,
};

/// Signature context used for commitments.
const COMMITMENT_SIGNATURE_CONTEXT: &[u8] = b"roothash: commitment";

/// A commitment in its opaque wire form.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpaqueCommitment {
    /// Serialized commitment.
    pub data: Vec<u8>,
}

/// A commitment, endorsing a proposed block header for the current round.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commitment {
    /// Proposed block header.
    pub header: Header,
    /// Public key of the committing node.
    pub node_id: PublicKey,
    /// Signature over the proposed header.
    pub signature: Signature,
}

impl Commitment {
    /// Construct a new signed commitment for the proposed header.
    pub fn sign(key: &PrivateKey, header: Header) -> Commitment {
        let message = serde_cbor::to_vec(&header).unwrap();
        let signature = key.sign(COMMITMENT_SIGNATURE_CONTEXT, &message);

        Commitment {
            header,
            node_id: key.public_key(),
            signature,
        }
    }

    /// Verify the commitment signature and return the proposed header.
    pub fn open(&self) -> Result<Header, Error> {
        let message = serde_cbor::to_vec(&self.header).unwrap();
        self.signature
            .verify(&self.node_id, COMMITMENT_SIGNATURE_CONTEXT, &message)
            .map_err(|_| Error::InvalidSignature)?;

        Ok(self.header.clone())
    }

    /// Deserialize a commitment from its opaque wire form.
    pub fn from_opaque(opaque: &OpaqueCommitment) -> Result<Commitment, Error> {
        serde_cbor::from_slice(&opaque.data).map_err(|_| Error::InvalidCommitment)
    }

    /// Serialize the commitment into its opaque wire form.
    pub fn to_opaque(&self) -> OpaqueCommitment {
        OpaqueCommitment {
            data: serde_cbor::to_vec(self).unwrap(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        block::{Block, HeaderType},
        common::namespace::Namespace,
    };

    fn test_header() -> Header {
        let id = Namespace::from("0000000000000000000000000000000000000000000000000000000000000001");
        let genesis = Block::new_genesis_block(id, 1);
        Block::new_empty_block(&genesis, 2, HeaderType::Normal).header
    }

    #[test]
    fn test_sign_open() {
        let key = PrivateKey::from_test_seed("test commitment key".to_owned());
        let commitment = Commitment::sign(&key, test_header());

        assert_eq!(commitment.open().unwrap(), test_header());
        assert_eq!(commitment.node_id, key.public_key());
    }

    #[test]
    fn test_open_rejects_tampered_header() {
        let key = PrivateKey::from_test_seed("test commitment key".to_owned());
        let mut commitment = Commitment::sign(&key, test_header());
        commitment.header.round += 1;

        assert!(matches!(commitment.open(), Err(Error::InvalidSignature)));
    }

    #[test]
    fn test_opaque_round_trip() {
        let key = PrivateKey::from_test_seed("test commitment key".to_owned());
        let commitment = Commitment::sign(&key, test_header());

        let opaque = commitment.to_opaque();
        let decoded = Commitment::from_opaque(&opaque).unwrap();
        assert_eq!(commitment, decoded);
    }

    #[test]
    fn test_from_opaque_rejects_garbage() {
        let opaque = OpaqueCommitment {
            data: b"not a commitment".to_vec(),
        };

        assert!(matches!(
            Commitment::from_opaque(&opaque),
            Err(Error::InvalidCommitment)
        ));
    }
}
