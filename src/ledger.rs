// src/ledger.rs
//! Base-ledger boundary
//!
//! The overlay touches the underlying ledger at exactly two points: channel
//! open, when funding moves into custody, and channel close, when the
//! settlement pays the final balances back out. Balance updates never cross
//! this boundary.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::debug;

use crate::channel::Settlement;
use crate::error::LedgerError;
use crate::types::{LedgerAddress, TxId};

/// The slow settlement layer underneath the channel overlay.
///
/// Implementations submit transactions and report acceptance. Callers are
/// expected to bound each call with a timeout; a ledger that answers slowly
/// is indistinguishable from one that is down.
#[async_trait]
pub trait BaseLedger: Send + Sync {
    /// Submits a transaction locking `amount` into a channel's custody
    /// address.
    async fn post_funding_transaction(
        &self,
        amount: u64,
        custody: &LedgerAddress,
    ) -> std::result::Result<TxId, LedgerError>;

    /// Submits the payout transaction for a closed channel.
    async fn post_settlement_transaction(
        &self,
        settlement: &Settlement,
    ) -> std::result::Result<TxId, LedgerError>;
}

/// One funding transaction accepted by the in-memory ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FundingRecord {
    pub txid: TxId,
    pub amount: u64,
    pub custody: LedgerAddress,
}

/// One settlement transaction accepted by the in-memory ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettlementRecord {
    pub txid: TxId,
    pub settlement: Settlement,
}

#[derive(Debug, Default)]
struct LedgerInner {
    fundings: Vec<FundingRecord>,
    settlements: Vec<SettlementRecord>,
}

/// A self-contained ledger that keeps every accepted transaction in memory.
///
/// Serves tests and local experiments; a deployment implements
/// [`BaseLedger`] against a real node instead.
#[derive(Debug, Default)]
pub struct InMemoryLedger {
    inner: Mutex<LedgerInner>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Funding transactions accepted so far, in submission order.
    pub async fn fundings(&self) -> Vec<FundingRecord> {
        self.inner.lock().await.fundings.clone()
    }

    /// Settlement transactions accepted so far, in submission order.
    pub async fn settlements(&self) -> Vec<SettlementRecord> {
        self.inner.lock().await.settlements.clone()
    }

    /// Amount still held in custody: everything funded minus everything
    /// settled back out.
    pub async fn locked(&self) -> u64 {
        let inner = self.inner.lock().await;
        let funded: u64 = inner.fundings.iter().map(|record| record.amount).sum();
        let settled: u64 =
            inner.settlements.iter().map(|record| record.settlement.total()).sum();
        funded.saturating_sub(settled)
    }
}

fn funding_txid(index: usize, amount: u64, custody: &LedgerAddress) -> TxId {
    let mut hasher = Sha256::new();
    hasher.update(b"HPL_FUND_v0");
    hasher.update((index as u64).to_be_bytes());
    hasher.update(amount.to_be_bytes());
    hasher.update(custody.as_bytes());
    TxId::from_bytes(hasher.finalize().into())
}

fn settlement_txid(index: usize, settlement: &Settlement) -> TxId {
    let mut hasher = Sha256::new();
    hasher.update(b"HPL_SETTLE_v0");
    hasher.update((index as u64).to_be_bytes());
    hasher.update(settlement.channel_id.as_bytes());
    for output in &settlement.outputs {
        hasher.update(output.party.as_bytes());
        hasher.update(output.amount.to_be_bytes());
    }
    TxId::from_bytes(hasher.finalize().into())
}

#[async_trait]
impl BaseLedger for InMemoryLedger {
    async fn post_funding_transaction(
        &self,
        amount: u64,
        custody: &LedgerAddress,
    ) -> std::result::Result<TxId, LedgerError> {
        if amount == 0 {
            return Err(LedgerError::FundingFailed("funding amount is zero".into()));
        }
        let mut inner = self.inner.lock().await;
        let txid = funding_txid(inner.fundings.len(), amount, custody);
        inner.fundings.push(FundingRecord { txid, amount, custody: custody.clone() });
        debug!("ledger accepted funding {}: {} into {}", txid, amount, custody);
        Ok(txid)
    }

    async fn post_settlement_transaction(
        &self,
        settlement: &Settlement,
    ) -> std::result::Result<TxId, LedgerError> {
        if settlement.outputs.is_empty() {
            return Err(LedgerError::SettlementFailed("settlement has no outputs".into()));
        }
        let mut inner = self.inner.lock().await;
        let txid = settlement_txid(inner.settlements.len(), settlement);
        inner
            .settlements
            .push(SettlementRecord { txid, settlement: settlement.clone() });
        debug!("ledger accepted settlement {} for channel {}", txid, settlement.channel_id);
        Ok(txid)
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::OsRng;
    use secp256k1::{PublicKey, SecretKey, SECP256K1};

    use super::*;
    use crate::channel::Channel;
    use crate::party::Party;

    fn test_party() -> Party {
        let mut rng = OsRng;
        let secret = SecretKey::new(&mut rng);
        Party::new(PublicKey::from_secret_key(SECP256K1, &secret))
    }

    #[tokio::test]
    async fn test_records_fundings() {
        let ledger = InMemoryLedger::new();

        let custody = "channel-custody-test".to_string();
        let first = ledger.post_funding_transaction(40, &custody).await.unwrap();
        let second = ledger.post_funding_transaction(10, &custody).await.unwrap();
        assert_ne!(first, second);

        let fundings = ledger.fundings().await;
        assert_eq!(fundings.len(), 2);
        assert_eq!(fundings[0].amount, 40);
        assert_eq!(fundings[1].amount, 10);
        assert_eq!(ledger.locked().await, 50);
    }

    #[tokio::test]
    async fn test_rejects_zero_funding() {
        let ledger = InMemoryLedger::new();
        let custody = "channel-custody-test".to_string();

        let result = ledger.post_funding_transaction(0, &custody).await;
        assert!(matches!(result, Err(LedgerError::FundingFailed(_))));
        assert!(ledger.fundings().await.is_empty());
    }

    #[tokio::test]
    async fn test_settlement_releases_custody() {
        let ledger = InMemoryLedger::new();
        let alice = test_party();
        let bob = test_party();
        let mut channel = Channel::open(&alice, 40, &bob, 10).unwrap();

        let custody = format!("channel-custody-{}", channel.id().to_hex());
        ledger.post_funding_transaction(40, &custody).await.unwrap();
        ledger.post_funding_transaction(10, &custody).await.unwrap();
        assert_eq!(ledger.locked().await, 50);

        let settlement = channel.close().unwrap();
        let txid = ledger.post_settlement_transaction(&settlement).await.unwrap();

        let settlements = ledger.settlements().await;
        assert_eq!(settlements.len(), 1);
        assert_eq!(settlements[0].txid, txid);
        assert_eq!(settlements[0].settlement.total(), 50);
        assert_eq!(ledger.locked().await, 0);
    }
}
