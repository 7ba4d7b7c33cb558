//! # NowMesh Core Library
//!
//! This crate implements an ESP-NOW-style wireless mesh overlay for
//! low-power IoT nodes reporting sensor and actuator state to a
//! gateway. A spanning tree is elected around a designated root,
//! reverse-path routes are learned from observed traffic, and frames
//! are forwarded over multiple hops: down the tree through learned
//! routes, up the tree through the parent by default.
//!
//! ## Overview
//!
//! - **Packet**: fixed 18-byte little-endian frame header, network-id
//!   filtering, 250-byte transport frame cap
//! - **Keys**: one 16-byte pre-shared master key (PMK), per-peer link
//!   keys (LMK) derived by XOR against the peer identity
//! - **Routing**: reverse-path learning with 5-minute expiry
//! - **Peers**: bounded encrypted peer slots with LRU eviction that
//!   pins the parent link
//! - **Engine**: announce propagation, parent selection, receive
//!   dispatch and forwarding, driven by a single monotonic tick
//!
//! ## Data Flow
//!
//! ```text
//! RX: transport → decode → dispatch → {learn, announce, sink, forward}
//! TX: producer → originate → route → peer admission → transport.send
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use nowmesh_core::{MeshConfig, MeshEngine};
//!
//! // Bring up a sensor node on a radio binding
//! let config = MeshConfig::node("SmartHome", b"0123456789ABCDEF");
//! let mut engine = MeshEngine::new(config, radio)?;
//! engine.add_entity(kitchen_temp_descriptor());
//!
//! // Host event loop
//! loop {
//!     let now = monotonic_ms();
//!     for (from, bytes, rssi) in radio_rx.drain() {
//!         engine.handle_frame(from, &bytes, rssi, now);
//!     }
//!     engine.tick(now);
//! }
//! ```

pub mod engine;
pub mod entity;
pub mod keys;
pub mod packet;
pub mod peers;
pub mod routing;
pub mod simulation;
pub mod traits;

// Re-export main types
pub use engine::{MeshConfig, MeshEngine, Role, ANNOUNCE_INTERVAL_MS, SCAN_STEP_MS, UNATTACHED};
pub use entity::{EntityDescriptor, EntityKind, EntityValue};
pub use keys::{derive_lmk, Pmk, LMK_LEN, PMK_LEN};
pub use packet::{network_id, MeshHeader, NodeId, PktType, MAX_FRAME};
pub use peers::{Admission, PeerCache, MAX_PEERS};
pub use routing::{RouteTable, GC_INTERVAL_MS, ROUTE_TTL_MS};
pub use traits::{EventSink, MeshError, MeshResult, MeshStats, Transport};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::engine::{MeshConfig, MeshEngine, Role};
    pub use crate::entity::{EntityDescriptor, EntityKind, EntityValue};
    pub use crate::packet::{network_id, MeshHeader, NodeId, PktType};
    pub use crate::traits::{EventSink, MeshError, MeshResult, Transport};
}
