// src/router.rs
//! Atomic multi-hop transfer execution
//!
//! Route hops cross independently-owned channels and no base-ledger
//! transaction spans them, so the router supplies the atomicity itself:
//! reserve (lock-free feasibility), lock every route channel in ascending
//! id order, commit hop by hop in route order, and roll applied hops back
//! in reverse if any hop fails. Locks release only after the route fully
//! commits or fully reverts, so a transfer never partially completes.

use std::collections::HashMap;

use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::channel::{BalanceSnapshot, Channel, UpdateMessage};
use crate::error::{
    AuthError, ChannelStateError, ConcurrencyConflictError, Error, InsufficientFundsError,
    Result, ValidationError,
};
use crate::routing::{Route, RouteHop};
use crate::signature::UpdateSigner;
use crate::topology::NetworkTopology;
use crate::types::{ChannelId, PartyId};

/// Record of one applied hop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HopReceipt {
    pub channel_id: ChannelId,
    pub from: PartyId,
    pub sequence_number: u64,
}

/// Proof of a fully committed transfer.
#[derive(Debug, Clone)]
pub struct TransferReceipt {
    pub transfer_id: Uuid,
    pub amount: u64,
    pub hops: Vec<HopReceipt>,
}

/// Executes routed transfers with a reserve, lock, commit-or-rollback
/// discipline.
#[derive(Debug, Default)]
pub struct TransactionRouter;

impl TransactionRouter {
    pub fn new() -> Self {
        Self
    }

    /// Moves `amount` along every hop of the route as one atomic unit.
    ///
    /// Capacity consumed by a competing writer between the reserve check
    /// and this route's commit surfaces as
    /// [`ConcurrencyConflictError::CapacityConsumed`]; the caller may
    /// rediscover a route and retry.
    pub async fn execute(
        &self,
        topology: &NetworkTopology,
        route: &Route,
        amount: u64,
        signer: &dyn UpdateSigner,
    ) -> Result<TransferReceipt> {
        if route.is_empty() {
            return Err(ValidationError::EmptyRoute.into());
        }
        if amount == 0 {
            return Err(ValidationError::ZeroAmount.into());
        }

        self.reserve(topology, route, amount).await?;
        let mut guards = self.lock_route(topology, route).await?;
        let hops = self.commit(&mut guards, route, amount, signer).await?;

        let transfer_id = Uuid::new_v4();
        info!("transfer {} committed: {} over {} hops", transfer_id, amount, hops.len());
        Ok(TransferReceipt { transfer_id, amount, hops })
    }

    /// Phase 1: feasibility check against live balances, holding no lock
    /// longer than a single read. A shortfall aborts the transfer before
    /// any channel is dirtied.
    async fn reserve(
        &self,
        topology: &NetworkTopology,
        route: &Route,
        amount: u64,
    ) -> Result<()> {
        let mut expected_from: Option<PartyId> = None;
        for (index, hop) in route.hops.iter().enumerate() {
            let handle = topology
                .channel(&hop.channel_id)
                .await
                .ok_or(ValidationError::UnknownChannel(hop.channel_id))?;
            let guard = handle.lock().await;

            let counterparty = guard.counterparty(&hop.from).ok_or(AuthError::NotAMember {
                channel: hop.channel_id,
                party: hop.from,
            })?;
            if let Some(expected) = expected_from {
                if hop.from != expected {
                    return Err(ValidationError::DiscontinuousRoute { index }.into());
                }
            }

            let available = guard.capacity_towards(&hop.from);
            if available < amount {
                return Err(InsufficientFundsError::RouteCapacity {
                    channel: hop.channel_id,
                    available,
                    amount,
                }
                .into());
            }
            expected_from = Some(counterparty);
        }
        Ok(())
    }

    /// Phase 2: acquire every route channel's lock in ascending channel id
    /// order regardless of route order, so overlapping transfers cannot
    /// deadlock each other. Every handle is resolved from the registry
    /// before the first lock is taken; no task touches the registry while
    /// holding a channel lock.
    async fn lock_route(
        &self,
        topology: &NetworkTopology,
        route: &Route,
    ) -> Result<HashMap<ChannelId, OwnedMutexGuard<Channel>>> {
        let mut ids: Vec<ChannelId> = route.hops.iter().map(|hop| hop.channel_id).collect();
        ids.sort();
        for pair in ids.windows(2) {
            if pair[0] == pair[1] {
                return Err(ValidationError::DuplicateRouteChannel(pair[0]).into());
            }
        }

        let mut handles = Vec::with_capacity(ids.len());
        for id in &ids {
            let handle =
                topology.channel(id).await.ok_or(ValidationError::UnknownChannel(*id))?;
            handles.push((*id, handle));
        }

        let mut guards = HashMap::with_capacity(handles.len());
        for (id, handle) in handles {
            guards.insert(id, handle.lock_owned().await);
        }
        debug!("locked {} channels for transfer", guards.len());
        Ok(guards)
    }

    /// Phase 3: apply one signed update per hop in route order. Any failure
    /// restores the applied prefix in reverse while every lock is still
    /// held.
    async fn commit(
        &self,
        guards: &mut HashMap<ChannelId, OwnedMutexGuard<Channel>>,
        route: &Route,
        amount: u64,
        signer: &dyn UpdateSigner,
    ) -> Result<Vec<HopReceipt>> {
        let mut applied: Vec<(ChannelId, BalanceSnapshot)> = Vec::with_capacity(route.len());
        let mut receipts = Vec::with_capacity(route.len());

        for hop in &route.hops {
            match self.commit_hop(guards, hop, amount, signer).await {
                Ok((snapshot, receipt)) => {
                    applied.push((hop.channel_id, snapshot));
                    receipts.push(receipt);
                }
                Err(err) => {
                    warn!(
                        "transfer aborted at channel {}: {}; rolling back {} applied hops",
                        hop.channel_id,
                        err,
                        applied.len()
                    );
                    Self::rollback(guards, &applied);
                    return Err(err);
                }
            }
        }
        Ok(receipts)
    }

    async fn commit_hop(
        &self,
        guards: &mut HashMap<ChannelId, OwnedMutexGuard<Channel>>,
        hop: &RouteHop,
        amount: u64,
        signer: &dyn UpdateSigner,
    ) -> Result<(BalanceSnapshot, HopReceipt)> {
        let guard = guards
            .get_mut(&hop.channel_id)
            .ok_or(ValidationError::UnknownChannel(hop.channel_id))?;

        let sequence = guard
            .sequence_number()
            .checked_add(1)
            .ok_or(ChannelStateError::SequenceExhausted { channel: hop.channel_id })?;
        let signature = signer.sign_update(&hop.channel_id, sequence, &hop.from, amount).await?;
        let update = UpdateMessage {
            channel_id: hop.channel_id,
            sequence_number: sequence,
            from: hop.from,
            amount,
            signature,
        };

        let snapshot = guard.snapshot();
        match guard.apply_update(&update) {
            Ok(()) => Ok((
                snapshot,
                HopReceipt {
                    channel_id: hop.channel_id,
                    from: hop.from,
                    sequence_number: sequence,
                },
            )),
            // Reserve vouched for this hop's capacity; failing the funds
            // check now means a concurrent writer consumed it.
            Err(Error::InsufficientFunds(_)) => {
                Err(ConcurrencyConflictError::CapacityConsumed { channel: hop.channel_id }
                    .into())
            }
            Err(err) => Err(err),
        }
    }

    fn rollback(
        guards: &mut HashMap<ChannelId, OwnedMutexGuard<Channel>>,
        applied: &[(ChannelId, BalanceSnapshot)],
    ) {
        for (channel_id, snapshot) in applied.iter().rev() {
            if let Some(guard) = guards.get_mut(channel_id) {
                guard.restore(*snapshot);
                debug!("channel {} rolled back", channel_id);
            }
        }
    }
}
