//! Core mesh traits and error types
//!
//! This module defines the seams between the mesh engine and its
//! environment: the datagram transport underneath it and the event
//! sink a gateway exposes above it. Both are kept protocol-agnostic
//! so the engine can run against real radio bindings or the in-memory
//! simulation transport.

use crate::entity::EntityDescriptor;
use crate::packet::NodeId;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

/// Errors that can occur in mesh operations
#[derive(Debug, Clone, PartialEq)]
pub enum MeshError {
    /// Invalid configuration (bad PMK length, empty mesh name, ...)
    Config(String),
    /// Transport failed during initialization; fatal
    InitFailed(String),
    /// Frame too short or missing a mandatory payload
    Malformed,
    /// Encoded frame would exceed the transport frame limit
    Oversize(usize),
    /// No route to destination and no upstream default
    NoRoute(NodeId),
    /// Peer cache full and only the parent is evictable
    NoSlot,
    /// Transport operation failed
    Transport(String),
}

impl std::fmt::Display for MeshError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MeshError::Config(s) => write!(f, "Invalid configuration: {}", s),
            MeshError::InitFailed(s) => write!(f, "Transport initialization failed: {}", s),
            MeshError::Malformed => write!(f, "Malformed frame"),
            MeshError::Oversize(n) => write!(f, "Frame of {} bytes exceeds transport limit", n),
            MeshError::NoRoute(id) => write!(f, "No route to node {}", id),
            MeshError::NoSlot => write!(f, "No evictable peer slot"),
            MeshError::Transport(s) => write!(f, "Transport error: {}", s),
        }
    }
}

impl std::error::Error for MeshError {}

/// Result type for mesh operations
pub type MeshResult<T> = Result<T, MeshError>;

/// The datagram transport the engine runs on
///
/// Modeled on the ESP-NOW primitive set: a peer table with per-link
/// keys, channel tuning, and best-effort datagram delivery. Receive
/// delivery is wired by the host, which feeds incoming datagrams to
/// `MeshEngine::handle_frame` on the same executor that drives
/// `MeshEngine::tick`.
///
/// `init` and `set_key` failures are fatal to the engine; every other
/// operation may fail transiently and is retried for free on the next
/// attempt.
pub trait Transport: Debug {
    /// Initialize the radio
    fn init(&mut self) -> MeshResult<()>;

    /// Set the session master key (exactly 16 bytes)
    fn set_key(&mut self, pmk: &[u8; 16]) -> MeshResult<()>;

    /// Tune the radio to a channel (1..=13)
    fn set_channel(&mut self, channel: u8) -> MeshResult<()>;

    /// The stable hardware identity of this member
    fn local_id(&self) -> NodeId;

    /// Register a link peer
    ///
    /// `channel` 0 means "follow the current radio channel". An
    /// encrypted peer carries the derived per-link key; the broadcast
    /// pseudo-peer is registered unencrypted with `lmk = None`.
    fn add_peer(
        &mut self,
        id: NodeId,
        channel: u8,
        encrypt: bool,
        lmk: Option<[u8; 16]>,
    ) -> MeshResult<()>;

    /// Deregister a link peer
    fn remove_peer(&mut self, id: NodeId) -> MeshResult<()>;

    /// Check whether a peer slot is already registered
    fn peer_exists(&self, id: NodeId) -> bool;

    /// Send a datagram to a registered peer (broadcast if all-ones)
    fn send(&mut self, id: NodeId, data: &[u8]) -> MeshResult<()>;
}

/// Application event sink exposed by the gateway
///
/// The root engine decodes REG and DATA frames addressed to it and
/// hands the results here; bridging to an external publish/subscribe
/// system is the host's business.
pub trait EventSink {
    /// An entity registration arrived from `origin`
    fn on_registration(&mut self, origin: NodeId, registration: &EntityDescriptor);

    /// A telemetry payload arrived from `origin`
    ///
    /// The leading 4 bytes are the entity hash (little-endian); the
    /// remainder is the type-specific value encoding.
    fn on_data(&mut self, origin: NodeId, payload: &[u8]);
}

/// Statistics for mesh engine operation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MeshStats {
    /// Number of frames received from the transport
    pub frames_rx: u64,
    /// Number of frames handed to the transport
    pub frames_tx: u64,
    /// Number of frames relayed on behalf of other members
    pub frames_forwarded: u64,
    /// Announces received
    pub announces_rx: u64,
    /// Announces emitted
    pub announces_tx: u64,
    /// Registrations delivered to the sink (root only)
    pub registrations_rx: u64,
    /// Telemetry payloads delivered to the sink (root only)
    pub data_rx: u64,
    /// Frames dropped: too short or missing mandatory payload
    pub dropped_malformed: u64,
    /// Frames dropped: foreign network id
    pub dropped_net_id: u64,
    /// Frames dropped: TTL exhausted before forwarding
    pub dropped_ttl: u64,
    /// Originations dropped for lack of a route
    pub no_route: u64,
    /// Originations dropped because no peer slot was evictable
    pub no_slot: u64,
    /// Transport send/add_peer failures (frame lost, state unchanged)
    pub tx_errors: u64,
    /// Peers evicted from the cache to make room
    pub peers_evicted: u64,
    /// Routes removed by garbage collection
    pub routes_expired: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mesh_error_display() {
        let err = MeshError::NoRoute(NodeId::from_bytes([1, 2, 3, 4, 5, 6]));
        assert!(err.to_string().contains("No route"));
        assert!(MeshError::Oversize(300).to_string().contains("300"));
    }

    #[test]
    fn test_stats_default() {
        let stats = MeshStats::default();
        assert_eq!(stats.frames_rx, 0);
        assert_eq!(stats.no_slot, 0);
    }
}
