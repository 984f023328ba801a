// src/error.rs
//! Error types for the Hoplite library
//!
//! This module defines error types used throughout the library,
//! providing detailed error information for debugging and handling.

use thiserror::Error;

use crate::channel::ChannelStatus;
use crate::types::ChannelId;
use crate::types::PartyId;

/// The main error type for the Hoplite library
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// Malformed or illegal input
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Membership and signature failures
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// Amount exceeds an available balance or capacity
    #[error(transparent)]
    InsufficientFunds(#[from] InsufficientFundsError),

    /// Route discovery failures
    #[error(transparent)]
    RouteNotFound(#[from] RouteNotFoundError),

    /// Losing side of a concurrent update race
    #[error(transparent)]
    ConcurrencyConflict(#[from] ConcurrencyConflictError),

    /// Operation invalid for the channel's current state
    #[error(transparent)]
    ChannelState(#[from] ChannelStateError),

    /// Base-ledger boundary failures
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// Snapshot persistence failures
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors raised by input validation, before any state is touched
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ValidationError {
    /// A channel needs two distinct parties
    #[error("channel parties must be distinct")]
    IdenticalParties,

    /// Combined funding cannot be zero
    #[error("channel capacity cannot be zero")]
    ZeroCapacity,

    /// Combined funding exceeds the representable capacity
    #[error("channel capacity overflow")]
    CapacityOverflow,

    /// Transfer amount cannot be zero
    #[error("transfer amount cannot be zero")]
    ZeroAmount,

    /// A party cannot transfer to itself
    #[error("source and destination are the same party")]
    SelfTransfer,

    /// No channel registered under this id
    #[error("unknown channel: {0}")]
    UnknownChannel(ChannelId),

    /// A channel with this id is already registered
    #[error("channel already registered: {0}")]
    DuplicateChannel(ChannelId),

    /// Update message addressed to a different channel
    #[error("update for channel {message} delivered to channel {channel}")]
    ChannelMismatch { channel: ChannelId, message: ChannelId },

    /// A route must contain at least one hop
    #[error("route is empty")]
    EmptyRoute,

    /// A route may traverse each channel at most once
    #[error("route visits channel {0} more than once")]
    DuplicateRouteChannel(ChannelId),

    /// Consecutive hops must share the intermediary party
    #[error("route hop {index} does not continue from the previous hop")]
    DiscontinuousRoute { index: usize },
}

/// Errors raised by membership and signature checks
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum AuthError {
    /// The acting party is not one of the channel's two members
    #[error("party {party} is not a member of channel {channel}")]
    NotAMember { channel: ChannelId, party: PartyId },

    /// Signature did not verify against the sender's key
    #[error("signature rejected for update {sequence} on channel {channel}")]
    BadSignature { channel: ChannelId, sequence: u64 },

    /// No signing key available for this party
    #[error("no signing key for party {0}")]
    UnknownSigner(PartyId),

    /// Underlying secp256k1 failure
    #[error(transparent)]
    Secp(#[from] secp256k1::Error),
}

/// Errors raised when an amount exceeds what a balance can cover
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum InsufficientFundsError {
    /// Sender's channel balance cannot cover the amount
    #[error("balance {balance} cannot cover {amount} on channel {channel}")]
    BalanceExceeded { channel: ChannelId, balance: u64, amount: u64 },

    /// A route hop cannot forward the full amount
    #[error("channel {channel} can forward {available}, transfer needs {amount}")]
    RouteCapacity { channel: ChannelId, available: u64, amount: u64 },
}

/// Errors raised when route discovery exhausts the graph
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum RouteNotFoundError {
    /// No path with sufficient capacity on every hop
    #[error("no viable route from {origin} to {destination} for {amount}")]
    NoViableRoute { origin: PartyId, destination: PartyId, amount: u64 },
}

/// Errors raised by the losing side of a concurrent race
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConcurrencyConflictError {
    /// Update carries a sequence number other than current + 1
    #[error("channel {channel} expected sequence {expected}, update carries {actual}")]
    StaleSequence { channel: ChannelId, expected: u64, actual: u64 },

    /// Capacity vouched for at reserve time was consumed before commit
    #[error("capacity on channel {channel} was consumed before commit")]
    CapacityConsumed { channel: ChannelId },
}

/// Errors raised when an operation is invalid for the channel's status
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ChannelStateError {
    /// Updates require an open channel
    #[error("channel {channel} is {status}, updates require an open channel")]
    NotOpen { channel: ChannelId, status: ChannelStatus },

    /// Activation is only valid for a channel awaiting funding
    #[error("cannot activate channel {channel} from {status}")]
    CannotActivate { channel: ChannelId, status: ChannelStatus },

    /// Close is only valid for an open or closing channel
    #[error("cannot close channel {channel} from {status}")]
    CannotClose { channel: ChannelId, status: ChannelStatus },

    /// Deregistration requires a closed channel
    #[error("channel {channel} is {status}, removal requires a closed channel")]
    NotClosed { channel: ChannelId, status: ChannelStatus },

    /// Another caller already holds the settlement posting duty
    #[error("settlement for channel {channel} is already in flight")]
    SettlementInFlight { channel: ChannelId },

    /// Channel is frozen pending manual reconciliation
    #[error("channel {channel} is frozen pending reconciliation")]
    Frozen { channel: ChannelId },

    /// Sequence number space is exhausted
    #[error("sequence number exhausted on channel {channel}")]
    SequenceExhausted { channel: ChannelId },

    /// Balances no longer sum to the locked capacity
    #[error(
        "conservation violated on channel {channel}: {balance_a} + {balance_b} != {capacity}"
    )]
    ConservationViolation { channel: ChannelId, balance_a: u64, balance_b: u64, capacity: u64 },
}

/// Errors crossing the base-ledger boundary
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum LedgerError {
    /// Funding transaction was rejected or lost
    #[error("funding transaction failed: {0}")]
    FundingFailed(String),

    /// Settlement transaction was rejected or lost
    #[error("settlement transaction failed: {0}")]
    SettlementFailed(String),

    /// Ledger could not be reached
    #[error("ledger unreachable: {0}")]
    Unreachable(String),

    /// Ledger did not answer within the configured window
    #[error("ledger operation timed out after {0} seconds")]
    Timeout(u64),
}

/// Errors raised by channel snapshot persistence
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum StorageError {
    /// Filesystem failure
    #[error("storage io: {0}")]
    Io(String),

    /// Snapshot could not be encoded or decoded
    #[error("snapshot encoding: {0}")]
    Encoding(String),
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Encoding(err.to_string())
    }
}

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;
