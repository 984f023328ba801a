// src/signature.rs
//! Update signing and verification
//!
//! An update signature covers exactly the tuple (channel id, sequence
//! number, sender, amount) under a domain separation tag, so an accepted
//! update can be replayed neither on another channel nor at another
//! sequence number.

use std::collections::HashMap;

use async_trait::async_trait;
use rand::rngs::OsRng;
use secp256k1::ecdsa::Signature;
use secp256k1::{Message, PublicKey, SecretKey, SECP256K1};
use sha2::{Digest, Sha256};

use crate::error::AuthError;
use crate::party::Party;
use crate::types::{Bytes32, ChannelId, PartyId, UPDATE_DOMAIN_TAG};

/// Computes the canonical digest an update signature commits to.
pub fn update_digest(channel: &ChannelId, sequence: u64, from: &PartyId, amount: u64) -> Bytes32 {
    let mut hasher = Sha256::new();
    hasher.update(UPDATE_DOMAIN_TAG);
    hasher.update(channel.as_bytes());
    hasher.update(sequence.to_be_bytes());
    hasher.update(from.as_bytes());
    hasher.update(amount.to_be_bytes());
    hasher.finalize().into()
}

/// Signs a 32-byte digest with the party's secret key.
pub fn sign_digest(secret: &SecretKey, digest: &Bytes32) -> Result<Signature, AuthError> {
    let message = Message::from_slice(digest)?;
    Ok(SECP256K1.sign_ecdsa(&message, secret))
}

/// Checks a signature over a 32-byte digest against a verification key.
pub fn verify_digest(public: &PublicKey, digest: &Bytes32, signature: &Signature) -> bool {
    match Message::from_slice(digest) {
        Ok(message) => SECP256K1.verify_ecdsa(&message, signature, public).is_ok(),
        Err(_) => false,
    }
}

/// Capability for producing update signatures on behalf of a party.
///
/// Callers of multi-hop transfers hand the router one of these; the router
/// requests one signature per hop. Implementations may hold keys locally or
/// defer to a remote wallet, hence the async boundary.
#[async_trait]
pub trait UpdateSigner: Send + Sync {
    async fn sign_update(
        &self,
        channel: &ChannelId,
        sequence: u64,
        from: &PartyId,
        amount: u64,
    ) -> Result<Signature, AuthError>;
}

/// In-memory signer backed by a map of party secret keys.
#[derive(Debug, Default)]
pub struct KeyringSigner {
    keys: HashMap<PartyId, SecretKey>,
}

impl KeyringSigner {
    pub fn new() -> Self {
        Self { keys: HashMap::new() }
    }

    /// Generates a fresh keypair and returns the party it belongs to.
    pub fn generate_party(&mut self) -> Party {
        let mut rng = OsRng;
        let secret = SecretKey::new(&mut rng);
        self.insert_key(secret)
    }

    /// Registers an existing secret key and returns the party it belongs to.
    pub fn insert_key(&mut self, secret: SecretKey) -> Party {
        let party = Party::new(PublicKey::from_secret_key(SECP256K1, &secret));
        self.keys.insert(party.id(), secret);
        party
    }

    pub fn knows(&self, party: &PartyId) -> bool {
        self.keys.contains_key(party)
    }
}

#[async_trait]
impl UpdateSigner for KeyringSigner {
    async fn sign_update(
        &self,
        channel: &ChannelId,
        sequence: u64,
        from: &PartyId,
        amount: u64,
    ) -> Result<Signature, AuthError> {
        let secret = self.keys.get(from).ok_or(AuthError::UnknownSigner(*from))?;
        let digest = update_digest(channel, sequence, from, amount);
        sign_digest(secret, &digest)
    }
}
