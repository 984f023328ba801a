// src/routing.rs
//! Capacity-constrained route discovery
//!
//! Depth-first search over the party graph. An edge is viable only when its
//! channel is open and the near side holds the full transfer amount; there
//! is no splitting across parallel channels. The first complete path wins,
//! so routes are correct but not hop-minimal.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, RouteNotFoundError, ValidationError};
use crate::topology::NetworkTopology;
use crate::types::{ChannelId, PartyId};

/// One hop of a route: the channel to traverse and the party paying into it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteHop {
    pub channel_id: ChannelId,
    pub from: PartyId,
}

/// Ordered hops from source to destination. Consecutive hops share their
/// intermediary: each hop's receiver is the next hop's sender.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    pub hops: Vec<RouteHop>,
}

impl Route {
    pub fn len(&self) -> usize {
        self.hops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hops.is_empty()
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "route[{}]", self.hops.len())?;
        for hop in &self.hops {
            write!(f, " {}@{}", hop.from, hop.channel_id)?;
        }
        Ok(())
    }
}

/// Depth-first route search with a hop bound.
///
/// The search takes no lock for longer than a single capacity read, so a
/// returned route is a point-in-time candidate; the router re-validates it
/// under locks before committing anything.
pub struct PathFinder {
    max_hops: usize,
}

impl PathFinder {
    pub fn new(max_hops: usize) -> Self {
        Self { max_hops: max_hops.max(1) }
    }

    /// Finds a route able to carry `amount` on every hop.
    ///
    /// The visited set marks parties on the active path, so a route never
    /// revisits a party; it is unwound on backtrack, which keeps the search
    /// complete. Exhausting the graph yields [`RouteNotFoundError`].
    pub async fn find_route(
        &self,
        topology: &NetworkTopology,
        source: &PartyId,
        destination: &PartyId,
        amount: u64,
    ) -> Result<Route> {
        if amount == 0 {
            return Err(ValidationError::ZeroAmount.into());
        }
        if source == destination {
            return Err(ValidationError::SelfTransfer.into());
        }

        struct Frame {
            party: PartyId,
            edges: Vec<ChannelId>,
            next: usize,
        }

        let mut visited: BTreeSet<PartyId> = BTreeSet::new();
        visited.insert(*source);
        let mut path: Vec<RouteHop> = Vec::new();
        let mut stack = vec![Frame {
            party: *source,
            edges: topology.channels_of(source).await.into_iter().collect(),
            next: 0,
        }];

        while !stack.is_empty() {
            let top = stack.len() - 1;
            if stack[top].next >= stack[top].edges.len() {
                // This party has no edges left; unwind it from the path.
                if let Some(finished) = stack.pop() {
                    visited.remove(&finished.party);
                }
                path.pop();
                continue;
            }

            let channel_id = stack[top].edges[stack[top].next];
            stack[top].next += 1;
            let current = stack[top].party;

            let handle = match topology.channel(&channel_id).await {
                Some(handle) => handle,
                None => continue,
            };
            let (available, counterparty) = {
                let guard = handle.lock().await;
                (guard.capacity_towards(&current), guard.counterparty(&current))
            };
            let next_party = match counterparty {
                Some(party) => party,
                None => continue,
            };

            if available < amount {
                debug!(
                    "pruned channel {}: {} available, {} needed",
                    channel_id, available, amount
                );
                continue;
            }

            if next_party == *destination {
                path.push(RouteHop { channel_id, from: current });
                debug!("route found for {} -> {}: {} hops", source, destination, path.len());
                return Ok(Route { hops: path });
            }

            if visited.contains(&next_party) {
                continue;
            }
            // Descending costs one hop and completing costs at least one more.
            if path.len() + 1 >= self.max_hops {
                continue;
            }

            visited.insert(next_party);
            path.push(RouteHop { channel_id, from: current });
            let edges = topology.channels_of(&next_party).await.into_iter().collect();
            stack.push(Frame { party: next_party, edges, next: 0 });
        }

        debug!("no route for {} -> {} carrying {}", source, destination, amount);
        Err(RouteNotFoundError::NoViableRoute {
            origin: *source,
            destination: *destination,
            amount,
        }
        .into())
    }
}
