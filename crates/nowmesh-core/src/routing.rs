//! Reverse-path routing table
//!
//! Routes are learned purely from observed traffic: when a frame
//! originated by `src` arrives from the immediate neighbor `via`,
//! the way back to `src` is through `via`. Direct neighbors are not
//! learned - their path is the link itself.
//!
//! The most recent observation wins unconditionally; no signal
//! quality or hop count comparison is consulted. Entries expire five
//! minutes after the last observation.

use crate::packet::NodeId;
use std::collections::HashMap;

/// Route lifetime since last observation, in milliseconds
pub const ROUTE_TTL_MS: u64 = 300_000;

/// Minimum interval between garbage-collection passes
pub const GC_INTERVAL_MS: u64 = 60_000;

/// Default capacity bound for the table
pub const MAX_ROUTES: usize = 64;

/// A learned route toward a destination
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteEntry {
    /// Neighbor to forward through
    pub next_hop: NodeId,
    /// Monotonic timestamp of the last observation (ms)
    pub last_seen: u64,
}

/// Table of reverse-path routes, bounded and time-evicted
#[derive(Debug)]
pub struct RouteTable {
    routes: HashMap<NodeId, RouteEntry>,
    max_routes: usize,
}

impl RouteTable {
    /// Create a table with the default capacity
    pub fn new() -> Self {
        Self::with_capacity(MAX_ROUTES)
    }

    /// Create a table bounded to `max_routes` entries
    pub fn with_capacity(max_routes: usize) -> Self {
        Self {
            routes: HashMap::new(),
            max_routes,
        }
    }

    /// Learn (or refresh) the route back to `origin` through `via`
    ///
    /// A frame delivered by its own originator is a direct neighbor;
    /// nothing is learned for it.
    pub fn learn(&mut self, origin: NodeId, via: NodeId, now: u64) {
        if origin == via {
            return;
        }
        if self.routes.len() >= self.max_routes && !self.routes.contains_key(&origin) {
            self.evict_oldest();
        }
        self.routes.insert(
            origin,
            RouteEntry {
                next_hop: via,
                last_seen: now,
            },
        );
    }

    /// Next hop toward a destination, if one is known
    pub fn lookup(&self, dst: NodeId) -> Option<NodeId> {
        self.routes.get(&dst).map(|r| r.next_hop)
    }

    /// Full entry for a destination
    pub fn entry(&self, dst: NodeId) -> Option<&RouteEntry> {
        self.routes.get(&dst)
    }

    /// Drop every entry not observed within `ROUTE_TTL_MS`
    ///
    /// Returns the number of entries removed. The caller throttles
    /// invocation to once per `GC_INTERVAL_MS`.
    pub fn gc(&mut self, now: u64) -> usize {
        let before = self.routes.len();
        self.routes
            .retain(|_, r| now.saturating_sub(r.last_seen) <= ROUTE_TTL_MS);
        before - self.routes.len()
    }

    /// Number of known routes
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Check if the table is empty
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Remove every route
    pub fn clear(&mut self) {
        self.routes.clear();
    }

    fn evict_oldest(&mut self) {
        if let Some(oldest) = self
            .routes
            .iter()
            .min_by_key(|(_, r)| r.last_seen)
            .map(|(id, _)| *id)
        {
            self.routes.remove(&oldest);
        }
    }
}

impl Default for RouteTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: u8) -> NodeId {
        NodeId::from_bytes([n, 0, 0, 0, 0, 0])
    }

    #[test]
    fn test_learn_and_lookup() {
        let mut table = RouteTable::new();
        table.learn(id(1), id(2), 100);

        assert_eq!(table.lookup(id(1)), Some(id(2)));
        assert_eq!(table.lookup(id(3)), None);
    }

    #[test]
    fn test_direct_neighbor_not_learned() {
        let mut table = RouteTable::new();
        table.learn(id(1), id(1), 100);

        assert!(table.is_empty());
        assert_eq!(table.lookup(id(1)), None);
    }

    #[test]
    fn test_most_recent_observation_wins() {
        let mut table = RouteTable::new();
        table.learn(id(1), id(2), 100);
        table.learn(id(1), id(3), 200);

        assert_eq!(table.lookup(id(1)), Some(id(3)));
        assert_eq!(table.entry(id(1)).unwrap().last_seen, 200);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_gc_bound() {
        let mut table = RouteTable::new();
        table.learn(id(1), id(2), 0);
        table.learn(id(3), id(2), 150_000);

        // At exactly the TTL boundary nothing expires
        assert_eq!(table.gc(300_000), 0);
        assert_eq!(table.len(), 2);

        // One tick past the boundary the stale entry goes
        assert_eq!(table.gc(300_001), 1);
        assert_eq!(table.lookup(id(1)), None);
        assert_eq!(table.lookup(id(3)), Some(id(2)));
    }

    #[test]
    fn test_gc_fresh_entry_survives() {
        let mut table = RouteTable::new();
        table.learn(id(1), id(2), 400_000);
        assert_eq!(table.gc(400_001), 0);
        assert_eq!(table.lookup(id(1)), Some(id(2)));
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let mut table = RouteTable::with_capacity(3);
        table.learn(id(1), id(9), 100);
        table.learn(id(2), id(9), 200);
        table.learn(id(3), id(9), 300);
        table.learn(id(4), id(9), 400);

        assert_eq!(table.len(), 3);
        assert_eq!(table.lookup(id(1)), None);
        assert_eq!(table.lookup(id(4)), Some(id(9)));

        // Refreshing an existing destination does not evict
        table.learn(id(2), id(8), 500);
        assert_eq!(table.len(), 3);
        assert_eq!(table.lookup(id(3)), Some(id(9)));
    }
}
