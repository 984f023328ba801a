// src/channel.rs
//! Channel state management and operations
//!
//! This module provides the bilateral payment channel: two parties lock
//! collateral into a shared capacity and move it between their balances
//! with signed, sequence-numbered updates. The base ledger is touched only
//! when a channel opens or closes.

use std::fmt;

use secp256k1::ecdsa::Signature;
use secp256k1::PublicKey;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{
    AuthError, ChannelStateError, ConcurrencyConflictError, InsufficientFundsError, Result,
    ValidationError,
};
use crate::party::Party;
use crate::signature::{update_digest, verify_digest};
use crate::types::{ChannelId, PartyId};

/// Lifecycle state of a channel. Transitions only move forward; a closed
/// channel never reopens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ChannelStatus {
    /// Funding posted to the base ledger, not yet confirmed
    Opening,
    /// Accepting balance updates
    Open,
    /// Cooperative close initiated, no further updates
    Closing,
    /// Final balances settled, channel is inert
    Closed,
}

impl fmt::Display for ChannelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChannelStatus::Opening => "opening",
            ChannelStatus::Open => "open",
            ChannelStatus::Closing => "closing",
            ChannelStatus::Closed => "closed",
        };
        write!(f, "{}", s)
    }
}

/// A signed balance update, as exchanged between the two parties.
///
/// The signature covers exactly (channel id, sequence number, sender,
/// amount); see [`crate::signature::update_digest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateMessage {
    pub channel_id: ChannelId,
    pub sequence_number: u64,
    pub from: PartyId,
    pub amount: u64,
    pub signature: Signature,
}

/// One payout instruction of a settlement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementOutput {
    pub party: PartyId,
    pub amount: u64,
}

/// Final payout instructions produced by closing a channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settlement {
    pub channel_id: ChannelId,
    pub outputs: Vec<SettlementOutput>,
}

impl Settlement {
    /// Sum of all payouts; equals the channel capacity.
    pub fn total(&self) -> u64 {
        self.outputs.iter().map(|o| o.amount).sum()
    }

    /// Payout owed to a party, if it appears in the settlement.
    pub fn amount_for(&self, party: &PartyId) -> Option<u64> {
        self.outputs.iter().find(|o| o.party == *party).map(|o| o.amount)
    }
}

impl fmt::Display for Settlement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "settlement of channel {}:", self.channel_id)?;
        for output in &self.outputs {
            write!(f, " {} -> {}", output.party, output.amount)?;
        }
        Ok(())
    }
}

/// Pre-update copy of the mutable channel fields, used to undo a hop when a
/// multi-hop transfer aborts mid-commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct BalanceSnapshot {
    balance_a: u64,
    balance_b: u64,
    sequence_number: u64,
}

/// A bilateral payment channel.
///
/// Capacity is fixed at open; every accepted update conserves it. Once a
/// channel is registered with the topology it lives behind a lock and all
/// mutation goes through these operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    id: ChannelId,
    party_a: PartyId,
    party_b: PartyId,
    key_a: PublicKey,
    key_b: PublicKey,
    balance_a: u64,
    balance_b: u64,
    capacity: u64,
    sequence_number: u64,
    status: ChannelStatus,
    frozen: bool,
    // Runtime latch, not channel state; snapshots never carry it.
    #[serde(skip)]
    settling: bool,
}

impl Channel {
    /// Creates a channel awaiting funding confirmation.
    ///
    /// Balances mirror the funding split and the capacity is their sum.
    /// Rejects identical parties, zero combined funding, and fundings whose
    /// sum does not fit in a `u64`.
    pub fn pending(
        party_a: &Party,
        funding_a: u64,
        party_b: &Party,
        funding_b: u64,
    ) -> std::result::Result<Self, ValidationError> {
        if party_a.id() == party_b.id() {
            return Err(ValidationError::IdenticalParties);
        }
        let capacity =
            funding_a.checked_add(funding_b).ok_or(ValidationError::CapacityOverflow)?;
        if capacity == 0 {
            return Err(ValidationError::ZeroCapacity);
        }

        let id = ChannelId::fresh(
            &party_a.public_key().serialize(),
            &party_b.public_key().serialize(),
        );

        Ok(Self {
            id,
            party_a: party_a.id(),
            party_b: party_b.id(),
            key_a: party_a.public_key(),
            key_b: party_b.public_key(),
            balance_a: funding_a,
            balance_b: funding_b,
            capacity,
            sequence_number: 0,
            status: ChannelStatus::Opening,
            frozen: false,
            settling: false,
        })
    }

    /// Creates a channel that is immediately open, for callers that confirm
    /// funding out of band.
    pub fn open(
        party_a: &Party,
        funding_a: u64,
        party_b: &Party,
        funding_b: u64,
    ) -> std::result::Result<Self, ValidationError> {
        let mut channel = Self::pending(party_a, funding_a, party_b, funding_b)?;
        channel.status = ChannelStatus::Open;
        Ok(channel)
    }

    /// Moves a pending channel to open once its funding confirmed.
    pub fn activate(&mut self) -> std::result::Result<(), ChannelStateError> {
        if self.status != ChannelStatus::Opening {
            return Err(ChannelStateError::CannotActivate {
                channel: self.id,
                status: self.status,
            });
        }
        self.status = ChannelStatus::Open;
        debug!("channel {} activated", self.id);
        Ok(())
    }

    pub fn id(&self) -> ChannelId {
        self.id
    }

    pub fn party_a(&self) -> PartyId {
        self.party_a
    }

    pub fn party_b(&self) -> PartyId {
        self.party_b
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn sequence_number(&self) -> u64 {
        self.sequence_number
    }

    pub fn status(&self) -> ChannelStatus {
        self.status
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Balances as (party A, party B).
    pub fn balances(&self) -> (u64, u64) {
        (self.balance_a, self.balance_b)
    }

    pub fn is_member(&self, party: &PartyId) -> bool {
        *party == self.party_a || *party == self.party_b
    }

    /// Balance held by a party, if it is a member.
    pub fn balance_of(&self, party: &PartyId) -> Option<u64> {
        if *party == self.party_a {
            Some(self.balance_a)
        } else if *party == self.party_b {
            Some(self.balance_b)
        } else {
            None
        }
    }

    /// The other member of the channel.
    pub fn counterparty(&self, party: &PartyId) -> Option<PartyId> {
        if *party == self.party_a {
            Some(self.party_b)
        } else if *party == self.party_b {
            Some(self.party_a)
        } else {
            None
        }
    }

    /// Amount `from` could currently push through this channel. Zero when
    /// the channel is not open, is frozen, or `from` is not a member.
    pub fn capacity_towards(&self, from: &PartyId) -> u64 {
        if self.status != ChannelStatus::Open || self.frozen {
            return 0;
        }
        self.balance_of(from).unwrap_or(0)
    }

    /// Applies a signed balance update.
    ///
    /// Checks run in a fixed order before any field changes: open status,
    /// not frozen, addressed to this channel, sender is a member, amount
    /// positive, amount within the sender's balance, sequence number is
    /// current + 1, signature verifies. A failed check leaves the channel
    /// exactly as it was.
    pub fn apply_update(&mut self, update: &UpdateMessage) -> Result<()> {
        if self.status != ChannelStatus::Open {
            return Err(
                ChannelStateError::NotOpen { channel: self.id, status: self.status }.into()
            );
        }
        if self.frozen {
            return Err(ChannelStateError::Frozen { channel: self.id }.into());
        }
        if update.channel_id != self.id {
            return Err(ValidationError::ChannelMismatch {
                channel: self.id,
                message: update.channel_id,
            }
            .into());
        }

        let sender_is_a = update.from == self.party_a;
        if !sender_is_a && update.from != self.party_b {
            return Err(
                AuthError::NotAMember { channel: self.id, party: update.from }.into()
            );
        }
        let key = if sender_is_a { self.key_a } else { self.key_b };
        let (sender_balance, receiver_balance) = if sender_is_a {
            (self.balance_a, self.balance_b)
        } else {
            (self.balance_b, self.balance_a)
        };

        if update.amount == 0 {
            return Err(ValidationError::ZeroAmount.into());
        }
        if update.amount > sender_balance {
            return Err(InsufficientFundsError::BalanceExceeded {
                channel: self.id,
                balance: sender_balance,
                amount: update.amount,
            }
            .into());
        }

        let expected = self
            .sequence_number
            .checked_add(1)
            .ok_or(ChannelStateError::SequenceExhausted { channel: self.id })?;
        if update.sequence_number != expected {
            return Err(ConcurrencyConflictError::StaleSequence {
                channel: self.id,
                expected,
                actual: update.sequence_number,
            }
            .into());
        }

        let digest = update_digest(&self.id, update.sequence_number, &update.from, update.amount);
        if !verify_digest(&key, &digest, &update.signature) {
            return Err(AuthError::BadSignature {
                channel: self.id,
                sequence: update.sequence_number,
            }
            .into());
        }

        // All checks passed; commit the new balances.
        let next_sender = sender_balance.checked_sub(update.amount).ok_or(
            InsufficientFundsError::BalanceExceeded {
                channel: self.id,
                balance: sender_balance,
                amount: update.amount,
            },
        )?;
        let next_receiver = receiver_balance
            .checked_add(update.amount)
            .ok_or(ValidationError::CapacityOverflow)?;

        if sender_is_a {
            self.balance_a = next_sender;
            self.balance_b = next_receiver;
        } else {
            self.balance_b = next_sender;
            self.balance_a = next_receiver;
        }
        self.sequence_number = expected;

        debug!(
            "channel {} update {} applied: {} moved {}",
            self.id, expected, update.from, update.amount
        );
        self.audit()?;
        Ok(())
    }

    /// Initiates a cooperative close. The channel stops accepting updates
    /// but has not yet produced its settlement.
    pub fn begin_close(&mut self) -> std::result::Result<(), ChannelStateError> {
        if self.frozen {
            return Err(ChannelStateError::Frozen { channel: self.id });
        }
        if self.status != ChannelStatus::Open {
            return Err(ChannelStateError::CannotClose { channel: self.id, status: self.status });
        }
        self.status = ChannelStatus::Closing;
        Ok(())
    }

    /// Closes the channel and returns the final payout instructions.
    pub fn close(&mut self) -> std::result::Result<Settlement, ChannelStateError> {
        if self.frozen {
            return Err(ChannelStateError::Frozen { channel: self.id });
        }
        match self.status {
            ChannelStatus::Open | ChannelStatus::Closing => {}
            status => {
                return Err(ChannelStateError::CannotClose { channel: self.id, status });
            }
        }

        self.status = ChannelStatus::Closed;
        debug!(
            "channel {} closed at sequence {}: {} / {}",
            self.id, self.sequence_number, self.balance_a, self.balance_b
        );
        Ok(Settlement { channel_id: self.id, outputs: self.final_outputs() })
    }

    /// Payout instructions of a channel that has already closed. `None`
    /// until then.
    pub fn settlement(&self) -> Option<Settlement> {
        if self.status == ChannelStatus::Closed {
            Some(Settlement { channel_id: self.id, outputs: self.final_outputs() })
        } else {
            None
        }
    }

    /// Claims the duty to post this channel's settlement.
    ///
    /// At most one caller holds the duty at a time, so concurrent closers
    /// cannot hand the same payout to the base ledger twice. A post that
    /// does not land must return the duty with
    /// [`Channel::abort_settlement`] before anyone can retry.
    pub fn begin_settlement(&mut self) -> std::result::Result<Settlement, ChannelStateError> {
        if self.status != ChannelStatus::Closed {
            return Err(ChannelStateError::NotClosed { channel: self.id, status: self.status });
        }
        if self.settling {
            return Err(ChannelStateError::SettlementInFlight { channel: self.id });
        }
        self.settling = true;
        Ok(Settlement { channel_id: self.id, outputs: self.final_outputs() })
    }

    /// Returns the settlement duty after a post that did not land.
    pub fn abort_settlement(&mut self) {
        self.settling = false;
    }

    fn final_outputs(&self) -> Vec<SettlementOutput> {
        vec![
            SettlementOutput { party: self.party_a, amount: self.balance_a },
            SettlementOutput { party: self.party_b, amount: self.balance_b },
        ]
    }

    /// Re-checks the conservation invariant. A violation freezes the
    /// channel; frozen channels reject every further operation until
    /// reconciled by hand against base-ledger evidence.
    pub fn audit(&mut self) -> std::result::Result<(), ChannelStateError> {
        if self.balance_a.checked_add(self.balance_b) != Some(self.capacity) {
            self.frozen = true;
            warn!(
                "channel {} frozen: balances {} + {} do not match capacity {}",
                self.id, self.balance_a, self.balance_b, self.capacity
            );
            return Err(ChannelStateError::ConservationViolation {
                channel: self.id,
                balance_a: self.balance_a,
                balance_b: self.balance_b,
                capacity: self.capacity,
            });
        }
        Ok(())
    }

    pub(crate) fn snapshot(&self) -> BalanceSnapshot {
        BalanceSnapshot {
            balance_a: self.balance_a,
            balance_b: self.balance_b,
            sequence_number: self.sequence_number,
        }
    }

    pub(crate) fn restore(&mut self, snapshot: BalanceSnapshot) {
        self.balance_a = snapshot.balance_a;
        self.balance_b = snapshot.balance_b;
        self.sequence_number = snapshot.sequence_number;
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "channel {} [{}] {}:{} / {}:{} seq {}",
            self.id,
            self.status,
            self.party_a,
            self.balance_a,
            self.party_b,
            self.balance_b,
            self.sequence_number
        )
    }
}
