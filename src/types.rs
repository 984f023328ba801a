// src/types.rs
//! Core type definitions for the Hoplite library
//!
//! This module defines fundamental types used across multiple modules,
//! providing a centralized location for shared type definitions.

use std::fmt;

use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

// ============================================================================
// Fundamental Types
// ============================================================================

/// Type alias for 32-byte arrays used across cryptographic operations
pub type Bytes32 = [u8; 32];

/// Base-ledger address a settlement output can pay to.
pub type LedgerAddress = String;

/// Domain separation tag for channel update digests
///
/// Prefixes every signed update hash so a signature over an update cannot
/// collide with any other hash context.
pub const UPDATE_DOMAIN_TAG: &[u8] = b"HPL_UPDATE_v0";

/// Domain separation tag for channel id derivation
pub const CHANNEL_DOMAIN_TAG: &[u8] = b"HPL_CH_v0";

// ============================================================================
// Channel Identifier
// ============================================================================

/// Unique channel identifier (32 bytes)
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ChannelId(pub Bytes32);

impl ChannelId {
    /// Create from bytes
    pub fn from_bytes(bytes: Bytes32) -> Self {
        ChannelId(bytes)
    }

    /// Derive a fresh id from the two parties' key material plus entropy.
    pub fn fresh(party_a: &[u8], party_b: &[u8]) -> Self {
        let mut nonce = [0u8; 32];
        OsRng.fill_bytes(&mut nonce);

        let mut hasher = Sha256::new();
        hasher.update(CHANNEL_DOMAIN_TAG);
        hasher.update(party_a);
        hasher.update(party_b);
        hasher.update(nonce);
        ChannelId(hasher.finalize().into())
    }

    pub fn as_bytes(&self) -> &Bytes32 {
        &self.0
    }

    /// Convert to hex string
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Short display (first 8 chars)
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }

    /// Parse from a full hex string, as produced by [`ChannelId::to_hex`].
    pub fn from_hex(s: &str) -> Option<Self> {
        let bytes = hex::decode(s).ok()?;
        let bytes: Bytes32 = bytes.try_into().ok()?;
        Some(ChannelId(bytes))
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.short())
    }
}

impl fmt::Debug for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChannelId(0x{})", self.to_hex())
    }
}

// ============================================================================
// Party Identifier
// ============================================================================

/// Identity of a channel participant, derived from its public key (32 bytes)
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PartyId(pub Bytes32);

impl PartyId {
    /// Create from bytes
    pub fn from_bytes(bytes: Bytes32) -> Self {
        PartyId(bytes)
    }

    /// Derive from serialized public key material.
    pub fn derive(key_material: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(key_material);
        PartyId(hasher.finalize().into())
    }

    pub fn as_bytes(&self) -> &Bytes32 {
        &self.0
    }

    /// Convert to hex string
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Short display (first 8 chars)
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl fmt::Display for PartyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.short())
    }
}

impl fmt::Debug for PartyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PartyId(0x{})", self.to_hex())
    }
}

// ============================================================================
// Transaction Identifier
// ============================================================================

/// Identifier of a base-ledger transaction (32 bytes)
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TxId(pub Bytes32);

impl TxId {
    /// Create from bytes
    pub fn from_bytes(bytes: Bytes32) -> Self {
        TxId(bytes)
    }

    /// Convert to hex string
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Short display (first 8 chars)
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.short())
    }
}

impl fmt::Debug for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TxId(0x{})", self.to_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_channel_ids_are_distinct() {
        let a = ChannelId::fresh(b"alice", b"bob");
        let b = ChannelId::fresh(b"alice", b"bob");
        assert_ne!(a, b);
    }

    #[test]
    fn test_hex_round_trip() {
        let id = ChannelId::from_bytes([7u8; 32]);
        let parsed = ChannelId::from_hex(&id.to_hex());
        assert_eq!(parsed, Some(id));

        assert_eq!(ChannelId::from_hex("zz"), None);
        assert_eq!(ChannelId::from_hex("0042"), None);
    }

    #[test]
    fn test_party_id_derivation_is_stable() {
        let a = PartyId::derive(b"key material");
        let b = PartyId::derive(b"key material");
        assert_eq!(a, b);
        assert_ne!(a, PartyId::derive(b"other key"));
    }
}
