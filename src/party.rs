// src/party.rs

use std::fmt;

use secp256k1::PublicKey;
use serde::{Deserialize, Serialize};

use crate::types::{LedgerAddress, PartyId};

/// A participant in the channel network.
///
/// Identity is the hash of the verification key and never changes; the party
/// may acquire additional base-ledger addresses over its lifetime. Keys are
/// held by an external wallet, the core only keeps the public half.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Party {
    id: PartyId,
    public_key: PublicKey,
    addresses: Vec<LedgerAddress>,
}

impl Party {
    /// Creates a party from its verification key.
    pub fn new(public_key: PublicKey) -> Self {
        let id = PartyId::derive(&public_key.serialize());
        Self { id, public_key, addresses: Vec::new() }
    }

    pub fn id(&self) -> PartyId {
        self.id
    }

    pub fn public_key(&self) -> PublicKey {
        self.public_key
    }

    /// Records a newly acquired base-ledger address.
    pub fn add_address(&mut self, address: LedgerAddress) {
        self.addresses.push(address);
    }

    pub fn addresses(&self) -> &[LedgerAddress] {
        &self.addresses
    }
}

impl fmt::Display for Party {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "party {}", self.id)
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::OsRng;
    use secp256k1::{SecretKey, SECP256K1};

    use super::*;

    #[test]
    fn test_identity_tracks_key() {
        let mut rng = OsRng;
        let secret = SecretKey::new(&mut rng);
        let public = PublicKey::from_secret_key(SECP256K1, &secret);

        let party = Party::new(public);
        assert_eq!(party.id(), PartyId::derive(&public.serialize()));
        assert_eq!(party.public_key(), public);
    }

    #[test]
    fn test_addresses_accumulate() {
        let mut rng = OsRng;
        let secret = SecretKey::new(&mut rng);
        let mut party = Party::new(PublicKey::from_secret_key(SECP256K1, &secret));

        assert!(party.addresses().is_empty());
        party.add_address("addr-1".to_string());
        party.add_address("addr-2".to_string());
        assert_eq!(party.addresses(), ["addr-1".to_string(), "addr-2".to_string()]);
    }
}
