//! Pre-shared master key and per-peer key derivation
//!
//! Every member holds the same 16-byte PMK; each encrypted link gets
//! a local master key derived from it and the peer identity:
//!
//! ```text
//! LMK[i] = PMK[i] XOR peer_id[i mod 6]      for i in 0..16
//! ```
//!
//! The derivation is deterministic: any two members sharing the PMK
//! compute the identical LMK for a given peer identity. The transport
//! applies the key per registered peer slot.

use crate::packet::NodeId;
use crate::traits::{MeshError, MeshResult};

/// Required PMK length in bytes
pub const PMK_LEN: usize = 16;

/// Derived LMK length in bytes
pub const LMK_LEN: usize = 16;

/// The session master key shared by all mesh members
#[derive(Clone)]
pub struct Pmk([u8; PMK_LEN]);

impl Pmk {
    /// Create a PMK, rejecting anything that is not exactly 16 bytes
    pub fn new(bytes: &[u8]) -> MeshResult<Self> {
        let arr: [u8; PMK_LEN] = bytes
            .try_into()
            .map_err(|_| MeshError::Config(format!("PMK must be {} bytes, got {}", PMK_LEN, bytes.len())))?;
        Ok(Pmk(arr))
    }

    /// Get the raw key bytes
    pub fn as_bytes(&self) -> &[u8; PMK_LEN] {
        &self.0
    }

    /// Derive the local master key for a peer link
    pub fn derive_lmk(&self, peer: NodeId) -> [u8; LMK_LEN] {
        let peer = peer.as_bytes();
        let mut lmk = [0u8; LMK_LEN];
        for (i, slot) in lmk.iter_mut().enumerate() {
            *slot = self.0[i] ^ peer[i % peer.len()];
        }
        lmk
    }
}

impl std::fmt::Debug for Pmk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Pmk").field(&"[REDACTED]").finish()
    }
}

/// Derive an LMK from raw slices
///
/// Fails unless the PMK is exactly 16 bytes and the peer identity is
/// non-empty.
pub fn derive_lmk(pmk: &[u8], peer_id: &[u8]) -> MeshResult<[u8; LMK_LEN]> {
    if pmk.len() != PMK_LEN {
        return Err(MeshError::Config(format!(
            "PMK must be {} bytes, got {}",
            PMK_LEN,
            pmk.len()
        )));
    }
    if peer_id.is_empty() {
        return Err(MeshError::Config("empty peer identity".to_string()));
    }
    let mut lmk = [0u8; LMK_LEN];
    for (i, slot) in lmk.iter_mut().enumerate() {
        *slot = pmk[i] ^ peer_id[i % peer_id.len()];
    }
    Ok(lmk)
}
