// src/topology.rs
//! Channel registry and party adjacency
//!
//! The topology owns every registered channel behind a per-channel lock and
//! keeps the party graph they induce. A channel's registry entry and its two
//! adjacency entries change together under one write lock, so readers see
//! either both or neither. The registry lock is never held while waiting on
//! a channel lock.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use crate::channel::{Channel, ChannelStatus};
use crate::error::{ChannelStateError, Result, ValidationError};
use crate::types::{ChannelId, PartyId};

/// Shared handle to a registered channel. Every capacity read used for a
/// decision and every update goes through this lock.
pub type ChannelHandle = Arc<Mutex<Channel>>;

#[derive(Default)]
struct TopologyInner {
    channels: HashMap<ChannelId, ChannelHandle>,
    adjacency: HashMap<PartyId, BTreeSet<ChannelId>>,
}

/// Registry of live channels and the graph view routing runs on.
pub struct NetworkTopology {
    inner: RwLock<TopologyInner>,
}

impl NetworkTopology {
    pub fn new() -> Self {
        Self { inner: RwLock::new(TopologyInner::default()) }
    }

    /// Registers a channel and wires both parties into the adjacency map.
    pub async fn add_channel(
        &self,
        channel: Channel,
    ) -> std::result::Result<ChannelId, ValidationError> {
        let mut inner = self.inner.write().await;
        let id = channel.id();
        if inner.channels.contains_key(&id) {
            return Err(ValidationError::DuplicateChannel(id));
        }

        let party_a = channel.party_a();
        let party_b = channel.party_b();
        inner.channels.insert(id, Arc::new(Mutex::new(channel)));
        inner.adjacency.entry(party_a).or_default().insert(id);
        inner.adjacency.entry(party_b).or_default().insert(id);

        info!("channel {} registered between {} and {}", id, party_a, party_b);
        Ok(id)
    }

    /// Deregisters a channel. Only closed channels may leave the topology;
    /// the registry entry and both adjacency entries go together.
    ///
    /// The status check takes only the channel lock. Closed is terminal, so
    /// the check stays valid when the registry lock is taken afterwards; if
    /// two removers race, the loser reports the channel as unknown.
    pub async fn remove_channel(&self, id: &ChannelId) -> Result<()> {
        let handle = self.channel(id).await.ok_or(ValidationError::UnknownChannel(*id))?;
        let (party_a, party_b) = {
            let guard = handle.lock().await;
            if guard.status() != ChannelStatus::Closed {
                return Err(ChannelStateError::NotClosed {
                    channel: *id,
                    status: guard.status(),
                }
                .into());
            }
            (guard.party_a(), guard.party_b())
        };

        let mut inner = self.inner.write().await;
        if inner.channels.remove(id).is_none() {
            return Err(ValidationError::UnknownChannel(*id).into());
        }
        for party in [party_a, party_b] {
            if let Some(set) = inner.adjacency.get_mut(&party) {
                set.remove(id);
                if set.is_empty() {
                    inner.adjacency.remove(&party);
                }
            }
        }

        debug!("channel {} deregistered", id);
        Ok(())
    }

    /// Handle to a registered channel.
    pub async fn channel(&self, id: &ChannelId) -> Option<ChannelHandle> {
        self.inner.read().await.channels.get(id).cloned()
    }

    pub async fn contains(&self, id: &ChannelId) -> bool {
        self.inner.read().await.channels.contains_key(id)
    }

    pub async fn channel_count(&self) -> usize {
        self.inner.read().await.channels.len()
    }

    /// Ids of every channel the party participates in, in id order.
    pub async fn channels_of(&self, party: &PartyId) -> BTreeSet<ChannelId> {
        self.inner.read().await.adjacency.get(party).cloned().unwrap_or_default()
    }

    /// Amount `from` could currently push through the channel, read under
    /// the channel lock.
    pub async fn capacity_towards(
        &self,
        id: &ChannelId,
        from: &PartyId,
    ) -> std::result::Result<u64, ValidationError> {
        let handle = self.channel(id).await.ok_or(ValidationError::UnknownChannel(*id))?;
        let guard = handle.lock().await;
        Ok(guard.capacity_towards(from))
    }
}

impl Default for NetworkTopology {
    fn default() -> Self {
        Self::new()
    }
}
