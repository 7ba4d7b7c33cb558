//! Bounded encrypted-peer cache with LRU eviction
//!
//! The radio offers a hard-limited number of encrypted peer slots;
//! this cache is the sole arbiter of them. It mirrors every admission
//! and eviction into the transport within the same call, so the
//! transport's slot state never diverges from the cache.
//!
//! Entries live in a single insertion-ordered container: front is the
//! least recently used, back is the most recent. While a node is
//! attached its parent entry is pinned - it is never selected as an
//! eviction victim, since losing the upstream link would orphan the
//! whole subtree below.
//!
//! Broadcast uses a separate unencrypted pseudo-peer for the all-ones
//! address; it is admitted once, never counted against capacity and
//! never evicted.

use crate::keys::Pmk;
use crate::packet::NodeId;
use crate::traits::{MeshError, MeshResult, Transport};
use std::collections::VecDeque;

/// Encrypted peer slot limit (kept under the radio hardware maximum)
pub const MAX_PEERS: usize = 6;

/// One cached peer link
#[derive(Debug, Clone)]
struct PeerEntry {
    id: NodeId,
    lmk: [u8; 16],
}

/// Outcome of a successful admission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Peer was already cached; refreshed to most-recently-used
    AlreadyPresent,
    /// Peer admitted into a free slot
    Added,
    /// Peer admitted after evicting the given victim
    Replaced(NodeId),
}

/// LRU cache of active encrypted peers
#[derive(Debug)]
pub struct PeerCache {
    /// LRU order: front = oldest, back = most recent
    entries: VecDeque<PeerEntry>,
    capacity: usize,
    broadcast_ready: bool,
}

impl PeerCache {
    /// Create a cache with the default slot limit
    pub fn new() -> Self {
        Self::with_capacity(MAX_PEERS)
    }

    /// Create a cache bounded to `capacity` encrypted slots
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
            broadcast_ready: false,
        }
    }

    /// Ensure `peer` holds a transport slot, evicting if necessary
    ///
    /// `pinned` names the parent link that must never be chosen as a
    /// victim. `channel` is handed to the transport (0 = follow the
    /// current radio channel). On a transport failure nothing is
    /// recorded, so the next attempt starts clean.
    pub fn touch_or_admit(
        &mut self,
        peer: NodeId,
        pinned: Option<NodeId>,
        channel: u8,
        pmk: &Pmk,
        transport: &mut dyn Transport,
    ) -> MeshResult<Admission> {
        if let Some(pos) = self.entries.iter().position(|e| e.id == peer) {
            let entry = self.entries.remove(pos).expect("position just found");
            self.entries.push_back(entry);
            return Ok(Admission::AlreadyPresent);
        }

        let mut evicted = None;
        if self.entries.len() >= self.capacity {
            let victim_pos = self
                .entries
                .iter()
                .position(|e| Some(e.id) != pinned)
                .ok_or(MeshError::NoSlot)?;
            let victim_id = self.entries[victim_pos].id;
            // Release the transport slot first: on failure the cache
            // still mirrors the radio's peer table exactly.
            transport.remove_peer(victim_id)?;
            self.entries.remove(victim_pos);
            evicted = Some(victim_id);
        }

        let lmk = pmk.derive_lmk(peer);
        transport.add_peer(peer, channel, true, Some(lmk))?;
        self.entries.push_back(PeerEntry { id: peer, lmk });

        Ok(match evicted {
            Some(victim) => Admission::Replaced(victim),
            None => Admission::Added,
        })
    }

    /// Admit the all-ones broadcast pseudo-peer (idempotent)
    pub fn ensure_broadcast_peer(&mut self, transport: &mut dyn Transport) -> MeshResult<()> {
        if self.broadcast_ready || transport.peer_exists(NodeId::BROADCAST) {
            self.broadcast_ready = true;
            return Ok(());
        }
        transport.add_peer(NodeId::BROADCAST, 0, false, None)?;
        self.broadcast_ready = true;
        Ok(())
    }

    /// Drop every encrypted entry, releasing its transport slot
    ///
    /// The broadcast pseudo-peer stays.
    pub fn clear(&mut self, transport: &mut dyn Transport) {
        for entry in self.entries.drain(..) {
            // Best effort: a failed removal leaves the slot to the radio
            let _ = transport.remove_peer(entry.id);
        }
    }

    /// Check whether a peer is cached
    pub fn contains(&self, peer: NodeId) -> bool {
        self.entries.iter().any(|e| e.id == peer)
    }

    /// The derived key recorded for a cached peer
    pub fn lmk_of(&self, peer: NodeId) -> Option<&[u8; 16]> {
        self.entries.iter().find(|e| e.id == peer).map(|e| &e.lmk)
    }

    /// The current eviction candidate (oldest entry)
    pub fn oldest(&self) -> Option<NodeId> {
        self.entries.front().map(|e| e.id)
    }

    /// Number of encrypted entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if no encrypted entries are cached
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for PeerCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::SimTransport;

    fn id(n: u8) -> NodeId {
        NodeId::from_bytes([n, 0, 0, 0, 0, 0])
    }

    fn pmk() -> Pmk {
        Pmk::new(b"KKKKKKKKKKKKKKKK").unwrap()
    }

    #[test]
    fn test_admit_and_touch() {
        let mut transport = SimTransport::new(id(99), 1);
        let mut cache = PeerCache::new();
        let pmk = pmk();

        let outcome = cache
            .touch_or_admit(id(1), None, 0, &pmk, &mut transport)
            .unwrap();
        assert_eq!(outcome, Admission::Added);
        assert!(cache.contains(id(1)));
        assert!(transport.peer_exists(id(1)));

        let outcome = cache
            .touch_or_admit(id(1), None, 0, &pmk, &mut transport)
            .unwrap();
        assert_eq!(outcome, Admission::AlreadyPresent);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_lru_eviction_order() {
        let mut transport = SimTransport::new(id(99), 1);
        let mut cache = PeerCache::with_capacity(3);
        let pmk = pmk();

        for n in 1..=3 {
            cache
                .touch_or_admit(id(n), None, 0, &pmk, &mut transport)
                .unwrap();
        }
        // Refresh peer 1 so peer 2 becomes the oldest
        cache
            .touch_or_admit(id(1), None, 0, &pmk, &mut transport)
            .unwrap();

        let outcome = cache
            .touch_or_admit(id(4), None, 0, &pmk, &mut transport)
            .unwrap();
        assert_eq!(outcome, Admission::Replaced(id(2)));
        assert!(!cache.contains(id(2)));
        assert!(!transport.peer_exists(id(2)));
        assert!(cache.contains(id(1)));
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn test_parent_pinning() {
        let mut transport = SimTransport::new(id(99), 1);
        let mut cache = PeerCache::new();
        let pmk = pmk();
        let parent = id(1);

        // Parent admitted first: it sits at the LRU end
        for n in 1..=6 {
            cache
                .touch_or_admit(id(n), Some(parent), 0, &pmk, &mut transport)
                .unwrap();
        }
        assert_eq!(cache.oldest(), Some(parent));

        let outcome = cache
            .touch_or_admit(id(7), Some(parent), 0, &pmk, &mut transport)
            .unwrap();
        // The victim skips the pinned parent and takes the next-oldest
        assert_eq!(outcome, Admission::Replaced(id(2)));
        assert!(cache.contains(parent));
        assert_eq!(cache.len(), MAX_PEERS);
    }

    #[test]
    fn test_no_slot_when_only_parent_left() {
        let mut transport = SimTransport::new(id(99), 1);
        let mut cache = PeerCache::with_capacity(1);
        let pmk = pmk();
        let parent = id(1);

        cache
            .touch_or_admit(parent, Some(parent), 0, &pmk, &mut transport)
            .unwrap();
        let result = cache.touch_or_admit(id(2), Some(parent), 0, &pmk, &mut transport);
        assert_eq!(result, Err(MeshError::NoSlot));
        assert!(cache.contains(parent));
    }

    #[test]
    fn test_transport_failure_records_nothing() {
        let mut transport = SimTransport::new(id(99), 1);
        transport.fail_add_peer = true;
        let mut cache = PeerCache::new();

        let result = cache.touch_or_admit(id(1), None, 0, &pmk(), &mut transport);
        assert!(matches!(result, Err(MeshError::Transport(_))));
        assert!(cache.is_empty());

        // Next attempt is free to retry
        transport.fail_add_peer = false;
        assert!(cache
            .touch_or_admit(id(1), None, 0, &pmk(), &mut transport)
            .is_ok());
    }

    #[test]
    fn test_broadcast_peer_idempotent() {
        let mut transport = SimTransport::new(id(99), 1);
        let mut cache = PeerCache::new();

        cache.ensure_broadcast_peer(&mut transport).unwrap();
        cache.ensure_broadcast_peer(&mut transport).unwrap();

        assert!(transport.peer_exists(NodeId::BROADCAST));
        assert_eq!(transport.add_peer_calls(), 1);
        // The pseudo-peer does not consume an encrypted slot
        assert!(cache.is_empty());
    }

    #[test]
    fn test_clear_keeps_broadcast() {
        let mut transport = SimTransport::new(id(99), 1);
        let mut cache = PeerCache::new();
        let pmk = pmk();

        cache.ensure_broadcast_peer(&mut transport).unwrap();
        cache
            .touch_or_admit(id(1), None, 0, &pmk, &mut transport)
            .unwrap();
        cache.clear(&mut transport);

        assert!(cache.is_empty());
        assert!(!transport.peer_exists(id(1)));
        assert!(transport.peer_exists(NodeId::BROADCAST));
    }

    #[test]
    fn test_recorded_lmk_matches_derivation() {
        let mut transport = SimTransport::new(id(99), 1);
        let mut cache = PeerCache::new();
        let pmk = pmk();

        cache
            .touch_or_admit(id(5), None, 0, &pmk, &mut transport)
            .unwrap();
        assert_eq!(cache.lmk_of(id(5)), Some(&pmk.derive_lmk(id(5))));
    }
}
