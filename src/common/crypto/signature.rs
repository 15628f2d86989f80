//! Signature types.
use anyhow::{anyhow, Result};
use ed25519_dalek::{Signer as _, Verifier as _};
use rand::rngs::OsRng;

use super::hash::Hash;

crate::impl_bytes!(
    PublicKey,
    ed25519_dalek::PUBLIC_KEY_LENGTH,
    "An Ed25519 public key."
);

crate::impl_bytes!(Signature, 64, "An Ed25519 signature.");

/// An Ed25519 private key.
pub struct PrivateKey(pub ed25519_dalek::Keypair);

impl PrivateKey {
    /// Generates a new private key pair.
    pub fn generate() -> Self {
        let mut rng = OsRng {};

        PrivateKey(ed25519_dalek::Keypair::generate(&mut rng))
    }

    /// Generate a new private key from a test key seed.
    pub fn from_test_seed(seed: String) -> Self {
        let seed = Hash::digest_bytes(seed.as_bytes());
        let secret = ed25519_dalek::SecretKey::from_bytes(seed.as_ref()).unwrap();
        let public = (&secret).into();

        PrivateKey(ed25519_dalek::Keypair { secret, public })
    }

    /// Returns the public key.
    pub fn public_key(&self) -> PublicKey {
        PublicKey(self.0.public.to_bytes())
    }

    /// Sign a message with domain separation.
    pub fn sign(&self, context: &[u8], message: &[u8]) -> Signature {
        let digest = Hash::digest_bytes_list(&[context, message]);

        Signature(self.0.sign(digest.as_ref()).to_bytes())
    }
}

impl Signature {
    /// Verify signature.
    pub fn verify(&self, pk: &PublicKey, context: &[u8], message: &[u8]) -> Result<()> {
        let digest = Hash::digest_bytes_list(&[context, message]);
        let pk = ed25519_dalek::PublicKey::from_bytes(&pk.0)
            .map_err(|_| anyhow!("signature: malformed public key"))?;
        let signature = ed25519_dalek::Signature::try_from(&self.0[..])
            .map_err(|_| anyhow!("signature: malformed signature"))?;

        pk.verify(digest.as_ref(), &signature)
            .map_err(|_| anyhow!("signature: verification failed"))
    }
}
