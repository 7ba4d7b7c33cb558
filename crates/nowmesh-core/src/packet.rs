//! Mesh packet types and framing
//!
//! This module defines the wire format shared by every mesh member.
//! Frames are little-endian and size-capped by the radio transport.
//!
//! ## Frame Structure
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                         Mesh Frame                           │
//! ├────────────────────┬─────────────────────────────────────────┤
//! │  Header (18B)      │  Payload (0-232B)                       │
//! └────────────────────┴─────────────────────────────────────────┘
//!
//! Header:
//! ┌───────────┬─────────────┬────────────┬────────────┬─────────┐
//! │ Type (1B) │ NetId (4B)  │ Src (6B)   │ Dst (6B)   │ TTL (1B)│
//! │           │ (LE, djb2)  │            │            │         │
//! └───────────┴─────────────┴────────────┴────────────┴─────────┘
//! ```
//!
//! The destination field carries two sentinels: a leading `0xFF`
//! byte marks a broadcast, and the all-zero address is the "virtual
//! root" routed to whichever member holds the gateway role.

use crate::traits::{MeshError, MeshResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Node identifier - the 6-byte hardware address of a member
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId([u8; 6]);

impl NodeId {
    /// Broadcast address (all 0xFF)
    pub const BROADCAST: NodeId = NodeId([0xFF; 6]);

    /// Virtual root address (all 0x00), routed to the gateway
    pub const VIRTUAL_ROOT: NodeId = NodeId([0x00; 6]);

    /// Create a new NodeId from 6 bytes
    pub fn from_bytes(bytes: [u8; 6]) -> Self {
        NodeId(bytes)
    }

    /// Create a NodeId from a slice, if it is exactly 6 bytes
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let arr: [u8; 6] = bytes.try_into().ok()?;
        Some(NodeId(arr))
    }

    /// Get the raw bytes
    pub fn as_bytes(&self) -> &[u8; 6] {
        &self.0
    }

    /// Check if this is a broadcast address (leading byte 0xFF)
    pub fn is_broadcast(&self) -> bool {
        self.0[0] == 0xFF
    }

    /// Check if this is the virtual-root sentinel (all zero)
    pub fn is_virtual_root(&self) -> bool {
        self.0 == [0u8; 6]
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            self.0[0], self.0[1], self.0[2], self.0[3], self.0[4], self.0[5]
        )
    }
}

/// Compute the 32-bit network identifier from the operator-supplied
/// mesh name (djb2 hash, wrapping 32-bit arithmetic).
///
/// Every frame carries this value; frames hashed from a different
/// name are dropped at the first dispatch step.
pub fn network_id(mesh_name: &str) -> u32 {
    let mut h: u32 = 5381;
    for &b in mesh_name.as_bytes() {
        h = h.wrapping_mul(33).wrapping_add(b as u32);
    }
    h
}

/// Frame types for the different message categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PktType {
    /// Channel-scan probe from an unattached node
    Probe,
    /// Spanning-tree announce carrying the emitter's hop distance
    Announce,
    /// Entity registration descriptor toward the root
    Reg,
    /// Telemetry value toward the root
    Data,
    /// Downstream command (reserved)
    Cmd,
    /// Unknown type, preserved and forwarded opaquely
    Other(u8),
}

impl PktType {
    /// Create from the wire byte
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            0x01 => PktType::Probe,
            0x02 => PktType::Announce,
            0x10 => PktType::Reg,
            0x20 => PktType::Data,
            0x30 => PktType::Cmd,
            other => PktType::Other(other),
        }
    }

    /// Get the wire byte value
    pub fn as_byte(&self) -> u8 {
        match self {
            PktType::Probe => 0x01,
            PktType::Announce => 0x02,
            PktType::Reg => 0x10,
            PktType::Data => 0x20,
            PktType::Cmd => 0x30,
            PktType::Other(b) => *b,
        }
    }
}

/// Frame header containing routing information
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeshHeader {
    /// Frame type
    pub kind: PktType,
    /// Network identifier (djb2 of the mesh name)
    pub net_id: u32,
    /// Originator identity
    pub src: NodeId,
    /// Final destination identity
    pub dst: NodeId,
    /// Hops remaining; frames are dropped at 0 instead of forwarded
    pub ttl: u8,
}

/// Maximum total frame size imposed by the transport
pub const MAX_FRAME: usize = 250;

impl MeshHeader {
    /// Header size in bytes
    pub const SIZE: usize = 18;

    /// Maximum payload that fits behind the header
    pub const MAX_PAYLOAD: usize = MAX_FRAME - Self::SIZE;

    /// Serialize header to its fixed 18-byte layout
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        bytes[0] = self.kind.as_byte();
        bytes[1..5].copy_from_slice(&self.net_id.to_le_bytes());
        bytes[5..11].copy_from_slice(self.src.as_bytes());
        bytes[11..17].copy_from_slice(self.dst.as_bytes());
        bytes[17] = self.ttl;
        bytes
    }

    /// Deserialize a header from bytes
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < Self::SIZE {
            return None;
        }
        Some(Self {
            kind: PktType::from_byte(bytes[0]),
            net_id: u32::from_le_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]),
            src: NodeId::from_slice(&bytes[5..11])?,
            dst: NodeId::from_slice(&bytes[11..17])?,
            ttl: bytes[17],
        })
    }
}

/// Serialize a header plus payload into a single wire frame
///
/// Fails with `Oversize` when the result would exceed the transport
/// frame limit of 250 bytes.
pub fn encode_frame(header: &MeshHeader, payload: &[u8]) -> MeshResult<Vec<u8>> {
    let total = MeshHeader::SIZE + payload.len();
    if total > MAX_FRAME {
        return Err(MeshError::Oversize(total));
    }
    let mut bytes = Vec::with_capacity(total);
    bytes.extend_from_slice(&header.to_bytes());
    bytes.extend_from_slice(payload);
    Ok(bytes)
}

/// Split a received datagram into header and borrowed payload
pub fn decode_frame(bytes: &[u8]) -> MeshResult<(MeshHeader, &[u8])> {
    let header = MeshHeader::from_bytes(bytes).ok_or(MeshError::Malformed)?;
    Ok((header, &bytes[MeshHeader::SIZE..]))
}

/// Check a decoded frame against the local network identity and the
/// per-type payload requirements. ANNOUNCE must carry at least the
/// one-byte hop distance; every other type may be empty.
pub fn validate(header: &MeshHeader, payload: &[u8], expected_net_id: u32) -> bool {
    if header.net_id != expected_net_id {
        return false;
    }
    if header.kind == PktType::Announce && payload.is_empty() {
        return false;
    }
    true
}
