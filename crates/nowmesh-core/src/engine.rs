//! Mesh engine: spanning-tree membership, dispatch and forwarding
//!
//! The engine glues the other components together and owns every
//! piece of mutable mesh state. It is deliberately single-owner:
//! both entry points (`handle_frame` from the transport receive path
//! and `tick` from the host executor) take `&mut self`, so dispatch
//! and periodic transmission are serialized by construction.
//!
//! ## Lifecycle
//!
//! ```text
//!               ┌──────────────────────────────────────────────┐
//!               │                 MeshEngine                   │
//!   datagrams ─►│ handle_frame ─► learn ─► announce / deliver  │
//!               │                        └► forward ──┐        │
//!               │ tick ─► announce / scan / reg-queue ├► send  │
//!               │         route-gc                    │        │
//!               └─────────────────────────────────────┼────────┘
//!                                                     ▼
//!                                 PeerCache ─► Transport::send
//! ```
//!
//! A gateway (root) sits at hop 0 and periodically announces itself;
//! nodes scan the channel range until they hear an announce, adopt
//! the emitter as parent, and from then on relay announces of their
//! own hop distance. Frames addressed elsewhere are forwarded: down
//! the tree through learned reverse-path routes, up the tree through
//! the parent by default.

use crate::entity::{pack_data, pack_registration, parse_registration, EntityDescriptor, EntityValue};
use crate::keys::Pmk;
use crate::packet::{decode_frame, encode_frame, validate, MeshHeader, NodeId, PktType};
use crate::packet::network_id;
use crate::peers::{Admission, PeerCache};
use crate::routing::{RouteTable, GC_INTERVAL_MS};
use crate::traits::{EventSink, MeshError, MeshResult, MeshStats, Transport};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::{debug, info, warn};

/// Interval between announce emissions, in milliseconds
pub const ANNOUNCE_INTERVAL_MS: u64 = 5_000;

/// Interval between channel-scan steps while unattached
pub const SCAN_STEP_MS: u64 = 200;

/// Pacing delay between queued registration frames
pub const REG_PACING_MS: u64 = 50;

/// TTL for REG and DATA originations
pub const DATA_TTL: u8 = 10;

/// TTL for link-local control frames (ANNOUNCE, PROBE)
pub const CONTROL_TTL: u8 = 1;

/// Number of radio channels scanned (1..=13)
pub const NUM_CHANNELS: u8 = 13;

/// Hop-count sentinel for a node without a parent
pub const UNATTACHED: u8 = 0xFF;

/// Mesh membership role, fixed at construction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    /// Gateway: hop 0, delivers application payloads to the sink
    Root,
    /// Sensor node: scans for a parent and reports upstream
    Node,
}

/// Engine configuration
#[derive(Debug, Clone)]
pub struct MeshConfig {
    /// Operator-chosen mesh name, hashed to the network id
    pub mesh_name: String,
    /// Session master key (exactly 16 bytes)
    pub pmk: Vec<u8>,
    /// Membership role
    pub role: Role,
    /// Initial scan channel (nodes; 1..=13)
    pub channel: u8,
}

impl MeshConfig {
    /// Configuration for a gateway
    pub fn root(mesh_name: &str, pmk: &[u8]) -> Self {
        Self {
            mesh_name: mesh_name.to_string(),
            pmk: pmk.to_vec(),
            role: Role::Root,
            channel: 1,
        }
    }

    /// Configuration for a sensor node
    pub fn node(mesh_name: &str, pmk: &[u8]) -> Self {
        Self {
            mesh_name: mesh_name.to_string(),
            pmk: pmk.to_vec(),
            role: Role::Node,
            channel: 1,
        }
    }

    /// Override the initial scan channel
    pub fn with_channel(mut self, channel: u8) -> Self {
        self.channel = channel;
        self
    }
}

/// The mesh engine
///
/// Generic over the datagram [`Transport`] it runs on. All timing is
/// caller-supplied: every entry point takes `now_ms` from the host's
/// monotonic clock, so nothing here sleeps or reads wall time.
pub struct MeshEngine<T: Transport> {
    transport: T,
    sink: Option<Box<dyn EventSink>>,

    net_id: u32,
    local_id: NodeId,
    pmk: Pmk,
    role: Role,

    hop_count: u8,
    parent: Option<NodeId>,
    channel: u8,

    routes: RouteTable,
    peers: PeerCache,

    entities: Vec<EntityDescriptor>,
    pending_regs: VecDeque<EntityDescriptor>,
    next_reg_at: u64,

    last_announce_tx: Option<u64>,
    last_scan_step: Option<u64>,
    last_route_gc: u64,

    stats: MeshStats,
}

impl<T: Transport> std::fmt::Debug for MeshEngine<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MeshEngine")
            .field("role", &self.role)
            .field("local_id", &self.local_id)
            .field("net_id", &format_args!("{:08X}", self.net_id))
            .field("hop_count", &self.hop_count)
            .field("parent", &self.parent)
            .finish()
    }
}

impl<T: Transport> MeshEngine<T> {
    /// Create and initialize an engine
    ///
    /// Validates the configuration, brings up the transport and keys
    /// it. Transport failures here are fatal (`InitFailed`); there is
    /// no half-initialized engine to schedule.
    pub fn new(config: MeshConfig, mut transport: T) -> MeshResult<Self> {
        if config.mesh_name.is_empty() {
            return Err(MeshError::Config("mesh_name must not be empty".to_string()));
        }
        if !config.mesh_name.is_ascii() {
            return Err(MeshError::Config("mesh_name must be ASCII".to_string()));
        }
        if !(1..=NUM_CHANNELS).contains(&config.channel) {
            return Err(MeshError::Config(format!(
                "channel {} outside 1..={}",
                config.channel, NUM_CHANNELS
            )));
        }
        let pmk = Pmk::new(&config.pmk)?;
        let net_id = network_id(&config.mesh_name);

        transport
            .init()
            .map_err(|e| MeshError::InitFailed(e.to_string()))?;
        transport
            .set_key(pmk.as_bytes())
            .map_err(|e| MeshError::InitFailed(e.to_string()))?;
        if config.role == Role::Node {
            transport
                .set_channel(config.channel)
                .map_err(|e| MeshError::InitFailed(e.to_string()))?;
        }
        let local_id = transport.local_id();

        let hop_count = match config.role {
            Role::Root => 0,
            Role::Node => UNATTACHED,
        };

        info!(
            role = ?config.role,
            id = %local_id,
            max_peers = crate::peers::MAX_PEERS,
            "mesh initialized, net id {:08X}",
            net_id
        );

        Ok(Self {
            transport,
            sink: None,
            net_id,
            local_id,
            pmk,
            role: config.role,
            hop_count,
            parent: None,
            channel: config.channel,
            routes: RouteTable::new(),
            peers: PeerCache::new(),
            entities: Vec::new(),
            pending_regs: VecDeque::new(),
            next_reg_at: 0,
            last_announce_tx: None,
            last_scan_step: None,
            last_route_gc: 0,
            stats: MeshStats::default(),
        })
    }

    /// Attach the application event sink (gateway side)
    pub fn with_sink(mut self, sink: Box<dyn EventSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Add a local entity to the inventory registered at attach time
    pub fn add_entity(&mut self, descriptor: EntityDescriptor) {
        self.entities.push(descriptor);
    }

    // --- Accessors ---

    /// This member's identity
    pub fn local_id(&self) -> NodeId {
        self.local_id
    }

    /// The 32-bit network identifier
    pub fn net_id(&self) -> u32 {
        self.net_id
    }

    /// Membership role
    pub fn role(&self) -> Role {
        self.role
    }

    /// Hop distance from the root (0xFF while unattached)
    pub fn hop_count(&self) -> u8 {
        self.hop_count
    }

    /// The adopted parent, if attached
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    /// Whether this member participates in the spanning tree
    pub fn is_attached(&self) -> bool {
        self.hop_count != UNATTACHED
    }

    /// Current radio channel
    pub fn current_channel(&self) -> u8 {
        self.channel
    }

    /// Operation counters
    pub fn stats(&self) -> &MeshStats {
        &self.stats
    }

    /// The reverse-path routing table
    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    /// The encrypted-peer cache
    pub fn peers(&self) -> &PeerCache {
        &self.peers
    }

    /// The underlying transport
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Mutable access to the underlying transport
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Registrations still waiting for their pacing slot
    pub fn pending_registrations(&self) -> usize {
        self.pending_regs.len()
    }

    // --- Receive path ---

    /// Dispatch one received datagram
    ///
    /// Called by the host from the transport receive path, on the
    /// same executor that drives [`tick`](Self::tick). Never panics
    /// and returns promptly; malformed or foreign frames are counted
    /// and dropped.
    pub fn handle_frame(&mut self, observed_from: NodeId, data: &[u8], rssi: i8, now: u64) {
        self.stats.frames_rx += 1;

        let (header, payload) = match decode_frame(data) {
            Ok(parts) => parts,
            Err(_) => {
                self.stats.dropped_malformed += 1;
                return;
            }
        };
        if !validate(&header, payload, self.net_id) {
            if header.net_id != self.net_id {
                self.stats.dropped_net_id += 1;
            } else {
                self.stats.dropped_malformed += 1;
            }
            return;
        }

        // Reverse-path learning. The delivering neighbor is reachable
        // over the link itself and never learned as a transit route.
        if header.src != observed_from && header.src != self.local_id {
            self.routes.learn(header.src, observed_from, now);
        }

        if header.kind == PktType::Announce {
            self.stats.announces_rx += 1;
            self.handle_announce(&header, payload, rssi, now);
            return;
        }

        let is_bcast = header.dst.is_broadcast();
        let is_for_me = header.dst == self.local_id
            || (self.role == Role::Root && header.dst.is_virtual_root());

        if is_for_me || is_bcast {
            self.deliver_local(&header, payload);
        }

        if !is_for_me && !is_bcast {
            if header.ttl == 0 {
                self.stats.dropped_ttl += 1;
                return;
            }
            let mut forwarded = header;
            forwarded.ttl -= 1;
            if self.originate(forwarded, payload, now).is_ok() {
                self.stats.frames_forwarded += 1;
            }
        }
    }

    /// Parent selection: adopt any announce that improves on the
    /// current hop distance, never one that merely matches it.
    fn handle_announce(&mut self, header: &MeshHeader, payload: &[u8], rssi: i8, now: u64) {
        if self.role != Role::Node {
            return;
        }
        let remote_hop = payload[0];
        if u16::from(remote_hop) + 1 >= u16::from(self.hop_count) {
            return;
        }

        let was_unattached = self.hop_count == UNATTACHED;
        self.hop_count = remote_hop + 1;
        self.parent = Some(header.src);
        info!(
            parent = %header.src,
            hop = self.hop_count,
            channel = self.channel,
            rssi,
            "parent adopted"
        );

        // Pin the upstream link into a peer slot immediately; a
        // failure here is retried on the first upstream send.
        let channel = if was_unattached { self.channel } else { 0 };
        if let Err(e) =
            self.peers
                .touch_or_admit(header.src, self.parent, channel, &self.pmk, &mut self.transport)
        {
            warn!(error = %e, "parent admission failed");
            self.stats.tx_errors += 1;
        }

        if was_unattached {
            self.queue_registrations(now);
        }
    }

    /// Root-side local delivery of application frames
    fn deliver_local(&mut self, header: &MeshHeader, payload: &[u8]) {
        if self.role != Role::Root {
            // Downstream command delivery (CMD) is reserved; nodes
            // have no local application surface yet.
            return;
        }
        let Some(sink) = self.sink.as_mut() else {
            return;
        };
        match header.kind {
            PktType::Reg => match parse_registration(payload) {
                Some(descriptor) => {
                    self.stats.registrations_rx += 1;
                    sink.on_registration(header.src, &descriptor);
                }
                None => self.stats.dropped_malformed += 1,
            },
            PktType::Data => {
                self.stats.data_rx += 1;
                sink.on_data(header.src, payload);
            }
            _ => {}
        }
    }

    // --- Send path ---

    /// Route a frame to its next hop and hand it to the transport
    ///
    /// Broadcast goes out through the unencrypted pseudo-peer; known
    /// destinations through their learned reverse path; everything
    /// else upstream through the parent. The root has no upstream, so
    /// unknown destinations are dropped with `NoRoute`. Send failures
    /// are logged and counted but deliberately not propagated - the
    /// frame is best-effort and state is unchanged for a free retry.
    pub fn originate(&mut self, header: MeshHeader, payload: &[u8], _now: u64) -> MeshResult<()> {
        let result = self.route_and_send(header, payload);
        if let Err(ref e) = result {
            match e {
                MeshError::NoRoute(dst) => {
                    self.stats.no_route += 1;
                    debug!(dst = %dst, "no route, frame dropped");
                }
                MeshError::NoSlot => {
                    self.stats.no_slot += 1;
                    warn!("peer cache exhausted, frame dropped");
                }
                _ => {
                    self.stats.tx_errors += 1;
                    warn!(error = %e, "origination failed");
                }
            }
        }
        result
    }

    fn route_and_send(&mut self, header: MeshHeader, payload: &[u8]) -> MeshResult<()> {
        let next_hop = if header.dst.is_broadcast() {
            NodeId::BROADCAST
        } else if let Some(via) = self.routes.lookup(header.dst) {
            via
        } else if self.role == Role::Node && self.is_attached() {
            self.parent.expect("attached node has a parent")
        } else {
            return Err(MeshError::NoRoute(header.dst));
        };

        if next_hop.is_broadcast() {
            self.peers.ensure_broadcast_peer(&mut self.transport)?;
        } else {
            let channel = if self.is_attached() { 0 } else { self.channel };
            let pinned = if self.is_attached() { self.parent } else { None };
            if let Admission::Replaced(victim) =
                self.peers
                    .touch_or_admit(next_hop, pinned, channel, &self.pmk, &mut self.transport)?
            {
                self.stats.peers_evicted += 1;
                debug!(victim = %victim, admitted = %next_hop, "peer evicted");
            }
        }

        let frame = encode_frame(&header, payload)?;
        match self.transport.send(next_hop, &frame) {
            Ok(()) => self.stats.frames_tx += 1,
            Err(e) => {
                self.stats.tx_errors += 1;
                warn!(next_hop = %next_hop, error = %e, "send failed");
            }
        }
        Ok(())
    }

    /// Publish an entity value change toward the gateway
    ///
    /// Emits a DATA frame addressed to the virtual root. `NoSlot` and
    /// `NoRoute` surface to the caller; the next value change simply
    /// tries again.
    pub fn publish(&mut self, entity_hash: u32, value: &EntityValue, now: u64) -> MeshResult<()> {
        let header = MeshHeader {
            kind: PktType::Data,
            net_id: self.net_id,
            src: self.local_id,
            dst: NodeId::VIRTUAL_ROOT,
            ttl: DATA_TTL,
        };
        self.originate(header, &pack_data(entity_hash, value), now)
    }

    // --- Periodic work ---

    /// One cooperative scheduling step
    ///
    /// Drives announce emission, the unattached channel scan, route
    /// garbage collection and the paced registration queue. Invoke
    /// frequently (order of tens of milliseconds) with the host's
    /// monotonic clock.
    pub fn tick(&mut self, now: u64) {
        match self.role {
            Role::Root => {
                if self.announce_due(now) {
                    self.send_announce(now);
                }
            }
            Role::Node => {
                if self.is_attached() {
                    if self.announce_due(now) {
                        self.send_announce(now);
                    }
                } else if self.scan_due(now) {
                    self.scan_step(now);
                }
            }
        }

        if now.saturating_sub(self.last_route_gc) >= GC_INTERVAL_MS {
            self.last_route_gc = now;
            let removed = self.routes.gc(now);
            if removed > 0 {
                self.stats.routes_expired += removed as u64;
                debug!(removed, "route gc");
            }
        }

        self.drain_registrations(now);
    }

    fn announce_due(&self, now: u64) -> bool {
        self.last_announce_tx
            .map(|t| now.saturating_sub(t) >= ANNOUNCE_INTERVAL_MS)
            .unwrap_or(true)
    }

    fn scan_due(&self, now: u64) -> bool {
        self.last_scan_step
            .map(|t| now.saturating_sub(t) >= SCAN_STEP_MS)
            .unwrap_or(true)
    }

    fn send_announce(&mut self, now: u64) {
        self.last_announce_tx = Some(now);
        let header = MeshHeader {
            kind: PktType::Announce,
            net_id: self.net_id,
            src: self.local_id,
            dst: NodeId::BROADCAST,
            ttl: CONTROL_TTL,
        };
        let hop = self.hop_count;
        if self.originate(header, &[hop], now).is_ok() {
            self.stats.announces_tx += 1;
        }
    }

    /// Advance the channel sweep and probe for a network
    fn scan_step(&mut self, now: u64) {
        self.last_scan_step = Some(now);
        self.channel = (self.channel % NUM_CHANNELS) + 1;
        if let Err(e) = self.transport.set_channel(self.channel) {
            warn!(channel = self.channel, error = %e, "channel change failed");
            return;
        }
        let header = MeshHeader {
            kind: PktType::Probe,
            net_id: self.net_id,
            src: self.local_id,
            dst: NodeId::BROADCAST,
            ttl: CONTROL_TTL,
        };
        let _ = self.originate(header, &[], now);
    }

    /// Queue one registration per local entity, drained with pacing
    /// from the tick rather than burst from the announce handler.
    fn queue_registrations(&mut self, now: u64) {
        self.pending_regs = self.entities.iter().cloned().collect();
        self.next_reg_at = now;
        if !self.pending_regs.is_empty() {
            debug!(count = self.pending_regs.len(), "registrations queued");
        }
    }

    fn drain_registrations(&mut self, now: u64) {
        if !self.is_attached() || self.pending_regs.is_empty() || now < self.next_reg_at {
            return;
        }
        let descriptor = self.pending_regs.pop_front().expect("queue checked non-empty");
        let header = MeshHeader {
            kind: PktType::Reg,
            net_id: self.net_id,
            src: self.local_id,
            dst: NodeId::VIRTUAL_ROOT,
            ttl: DATA_TTL,
        };
        let payload = pack_registration(&descriptor);
        if let Err(MeshError::NoSlot) = self.originate(header, &payload, now) {
            // Slot pressure is transient; keep the descriptor and
            // retry at the next pacing boundary.
            self.pending_regs.push_front(descriptor);
        }
        self.next_reg_at = now + REG_PACING_MS;
    }
}
