// ./src/lib.rs
//! Hoplite: an off-chain payment channel overlay for a UTXO ledger.
//!
//! Parties lock collateral into bilateral channels and exchange signed,
//! sequence-numbered balance updates without touching the base ledger per
//! payment. Channels form a network, so parties without a direct channel
//! transfer through intermediaries over capacity-checked routes that commit
//! atomically or not at all.

#![forbid(unsafe_code)]

pub mod channel;
pub mod config;
pub mod error;
pub mod ledger;
pub mod network;
pub mod party;
pub mod router;
pub mod routing;
pub mod signature;
pub mod storage;
pub mod topology;
pub mod types;

pub use channel::{Channel, ChannelStatus, Settlement, SettlementOutput, UpdateMessage};
pub use config::NetworkConfig;
pub use error::{Error, Result};
pub use ledger::{BaseLedger, InMemoryLedger};
pub use network::ChannelNetwork;
pub use party::Party;
pub use router::{HopReceipt, TransactionRouter, TransferReceipt};
pub use routing::{PathFinder, Route, RouteHop};
pub use signature::{KeyringSigner, UpdateSigner};
pub use storage::ChannelStore;
pub use topology::NetworkTopology;
pub use types::{ChannelId, PartyId, TxId};
