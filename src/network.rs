// src/network.rs
//! Channel network facade
//!
//! Ties the pieces together: the topology for registration and lookup, the
//! path finder for discovery, the router for multi-hop execution, the base
//! ledger for funding and settlement, and an optional snapshot store. This
//! is the surface a node operator drives.

use std::sync::Arc;

use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::channel::{Channel, ChannelStatus, Settlement, UpdateMessage};
use crate::config::NetworkConfig;
use crate::error::{LedgerError, Result, ValidationError};
use crate::ledger::BaseLedger;
use crate::party::Party;
use crate::router::{TransactionRouter, TransferReceipt};
use crate::routing::PathFinder;
use crate::signature::UpdateSigner;
use crate::storage::ChannelStore;
use crate::topology::NetworkTopology;
use crate::types::{ChannelId, LedgerAddress, PartyId, TxId};

/// A node's view of the payment channel network.
pub struct ChannelNetwork {
    config: NetworkConfig,
    topology: NetworkTopology,
    path_finder: PathFinder,
    router: TransactionRouter,
    ledger: Arc<dyn BaseLedger>,
    store: Option<ChannelStore>,
}

impl ChannelNetwork {
    /// Builds a network over the given base ledger. A `data_dir` in the
    /// config enables per-channel JSON snapshots under it.
    pub fn new(config: NetworkConfig, ledger: Arc<dyn BaseLedger>) -> Result<Self> {
        let store = match &config.data_dir {
            Some(dir) => Some(ChannelStore::new(dir)?),
            None => None,
        };
        let path_finder = PathFinder::new(config.max_route_hops);
        Ok(Self {
            config,
            topology: NetworkTopology::new(),
            path_finder,
            router: TransactionRouter::new(),
            ledger,
            store,
        })
    }

    pub fn topology(&self) -> &NetworkTopology {
        &self.topology
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    /// Base-ledger address holding a channel's collateral.
    pub fn custody_address(id: &ChannelId) -> LedgerAddress {
        format!("channel-custody-{}", id.to_hex())
    }

    /// Point-in-time copy of a registered channel's state.
    pub async fn channel_state(&self, id: &ChannelId) -> Option<Channel> {
        let handle = self.topology.channel(id).await?;
        let guard = handle.lock().await;
        Some(guard.clone())
    }

    /// Opens a channel: posts each party's funding to the base ledger,
    /// activates the channel and registers it with the topology.
    ///
    /// A funding that times out or is rejected registers nothing.
    pub async fn open_channel(
        &self,
        party_a: &Party,
        funding_a: u64,
        party_b: &Party,
        funding_b: u64,
    ) -> Result<ChannelId> {
        let mut channel = Channel::pending(party_a, funding_a, party_b, funding_b)?;
        let id = channel.id();
        let custody = Self::custody_address(&id);

        // Only parties putting funds in post a funding transaction.
        for funding in [funding_a, funding_b] {
            if funding > 0 {
                let txid = self.post_funding(funding, &custody).await?;
                debug!("funding {} confirmed for channel {}", txid, id);
            }
        }

        channel.activate()?;
        self.persist(&channel);
        self.topology.add_channel(channel).await?;
        info!("channel {} open between {} and {}", id, party_a.id(), party_b.id());
        Ok(id)
    }

    /// Applies a signed balance update to a registered channel.
    pub async fn update_channel(&self, update: &UpdateMessage) -> Result<()> {
        let handle = self
            .topology
            .channel(&update.channel_id)
            .await
            .ok_or(ValidationError::UnknownChannel(update.channel_id))?;
        let mut guard = handle.lock().await;
        match guard.apply_update(update) {
            Ok(()) => {
                self.persist(&guard);
                Ok(())
            }
            Err(err) => {
                // A rejected check changes nothing, but a conservation
                // violation froze the channel and that must survive restart.
                if guard.is_frozen() {
                    self.persist(&guard);
                }
                Err(err)
            }
        }
    }

    /// Closes a channel, posts its settlement and deregisters it.
    ///
    /// If the settlement fails to post, the channel stays registered in the
    /// Closed state; calling again retries with the same final balances.
    /// Concurrent closers race for the posting duty under the channel lock,
    /// so the payout reaches the ledger at most once; the losers fail with
    /// `SettlementInFlight`.
    pub async fn close_channel(&self, id: &ChannelId) -> Result<Settlement> {
        let handle =
            self.topology.channel(id).await.ok_or(ValidationError::UnknownChannel(*id))?;

        let settlement = {
            let mut guard = handle.lock().await;
            if guard.status() != ChannelStatus::Closed {
                guard.close()?;
                self.persist(&guard);
            }
            guard.begin_settlement()?
        };

        let txid = match self.post_settlement(&settlement).await {
            Ok(txid) => txid,
            Err(err) => {
                handle.lock().await.abort_settlement();
                return Err(err);
            }
        };
        info!("channel {} settled in transaction {}", id, txid);

        self.topology.remove_channel(id).await?;
        if let Some(store) = &self.store {
            if let Err(err) = store.remove(id) {
                warn!("channel {} snapshot removal failed: {}", id, err);
            }
        }
        Ok(settlement)
    }

    /// Moves `amount` from `source` to `destination`, finding a route and
    /// executing it atomically.
    pub async fn transfer(
        &self,
        source: &PartyId,
        destination: &PartyId,
        amount: u64,
        signer: &dyn UpdateSigner,
    ) -> Result<TransferReceipt> {
        let route =
            self.path_finder.find_route(&self.topology, source, destination, amount).await?;
        let receipt = self.router.execute(&self.topology, &route, amount, signer).await?;

        for hop in &receipt.hops {
            if let Some(handle) = self.topology.channel(&hop.channel_id).await {
                let guard = handle.lock().await;
                self.persist(&guard);
            }
        }
        info!(
            "transfer {} complete: {} from {} to {}",
            receipt.transfer_id, amount, source, destination
        );
        Ok(receipt)
    }

    async fn post_funding(&self, amount: u64, custody: &LedgerAddress) -> Result<TxId> {
        let posted = timeout(
            self.config.funding_timeout(),
            self.ledger.post_funding_transaction(amount, custody),
        )
        .await;
        match posted {
            Ok(result) => Ok(result?),
            Err(_) => Err(LedgerError::Timeout(self.config.funding_timeout_seconds).into()),
        }
    }

    async fn post_settlement(&self, settlement: &Settlement) -> Result<TxId> {
        let posted = timeout(
            self.config.settlement_timeout(),
            self.ledger.post_settlement_transaction(settlement),
        )
        .await;
        match posted {
            Ok(result) => Ok(result?),
            Err(_) => {
                Err(LedgerError::Timeout(self.config.settlement_timeout_seconds).into())
            }
        }
    }

    fn persist(&self, channel: &Channel) {
        if let Some(store) = &self.store {
            if let Err(err) = store.save(channel) {
                warn!("channel {} snapshot failed: {}", channel.id(), err);
            }
        }
    }
}
