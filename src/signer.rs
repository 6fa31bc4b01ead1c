//! Schnorr event signing from a locally configured secret key.

use secp256k1::{Keypair, Message, Secp256k1};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::event::{Event, UnsignedEvent};

/// Signing failures, surfaced distinctly so the caller can prompt for
/// authentication instead of showing a generic error.
#[derive(Debug, Error)]
pub enum SignerError {
    #[error("no identity configured; set SECRET_KEY to publish")]
    NoIdentity,
}

/// Holds the user's keypair, if one is configured. A key-less signer still
/// serves all read paths; publishing fails with [`SignerError::NoIdentity`].
#[derive(Clone)]
pub struct Signer {
    keypair: Option<Keypair>,
}

impl Signer {
    /// Signer from an optional 32-byte hex secret key.
    pub fn from_secret_hex(secret: Option<&str>) -> anyhow::Result<Self> {
        let keypair = match secret {
            Some(hex_key) => {
                let bytes = hex::decode(hex_key)?;
                let secp = Secp256k1::new();
                Some(Keypair::from_seckey_slice(&secp, &bytes)?)
            }
            None => None,
        };
        Ok(Self { keypair })
    }

    /// Signer with no identity; every sign attempt fails.
    pub fn read_only() -> Self {
        Self { keypair: None }
    }

    /// Hex-encoded x-only public key of the configured identity.
    pub fn pubkey(&self) -> Result<String, SignerError> {
        let kp = self.keypair.as_ref().ok_or(SignerError::NoIdentity)?;
        Ok(hex::encode(kp.x_only_public_key().0.serialize()))
    }

    /// Attach identity, id, and signature to an unsigned event.
    ///
    /// The id is the SHA-256 of the canonical serialization
    /// `[0, pubkey, created_at, kind, tags, content]`.
    pub fn sign(&self, unsigned: UnsignedEvent) -> Result<Event, SignerError> {
        let kp = self.keypair.as_ref().ok_or(SignerError::NoIdentity)?;
        let secp = Secp256k1::new();
        let pubkey = hex::encode(kp.x_only_public_key().0.serialize());
        let serialized = serde_json::json!([
            0,
            pubkey,
            unsigned.created_at,
            unsigned.kind,
            unsigned.tags,
            unsigned.content,
        ]);
        let hash = Sha256::digest(serialized.to_string().as_bytes());
        let id = hex::encode(hash);
        let msg = Message::from_digest(hash.into());
        let sig = secp.sign_schnorr_no_aux_rand(&msg, kp);
        Ok(Event {
            id,
            pubkey,
            kind: unsigned.kind,
            created_at: unsigned.created_at,
            tags: unsigned.tags,
            content: unsigned.content,
            sig: hex::encode(sig.as_ref()),
        })
    }
}
