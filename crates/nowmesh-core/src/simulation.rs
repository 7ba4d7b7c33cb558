//! Multi-node mesh simulation
//!
//! This module provides a hardware-free harness for exercising whole
//! meshes: an in-memory [`Transport`] that records peer-table calls
//! and outgoing datagrams, plus a simulator that steps a set of
//! engines over a shared virtual air interface.
//!
//! Delivery is channel-aware: a datagram only reaches a linked member
//! whose radio sits on the channel the frame went out on, which makes
//! the unattached channel sweep behave like it does over a real
//! radio. Unicast frames additionally require a matching destination
//! identity.
//!
//! ## Example
//!
//! ```ignore
//! let mut sim = MeshSimulator::new(10);
//! let root = sim.add_engine(root_engine);
//! let node = sim.add_engine(node_engine);
//! sim.link(root, node);
//!
//! while !sim.engine(node).is_attached() && sim.now() < 70_000 {
//!     sim.step();
//! }
//! ```

use crate::engine::MeshEngine;
use crate::entity::EntityDescriptor;
use crate::packet::NodeId;
use crate::traits::{EventSink, MeshError, MeshResult, Transport};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

/// A peer slot registered with the simulated radio
#[derive(Debug, Clone, PartialEq)]
pub struct SimPeer {
    pub id: NodeId,
    pub channel: u8,
    pub encrypt: bool,
    pub lmk: Option<[u8; 16]>,
}

/// A datagram handed to the simulated radio
#[derive(Debug, Clone)]
pub struct SimFrame {
    /// Link-level destination (broadcast if all-ones)
    pub to: NodeId,
    /// Wire bytes
    pub data: Vec<u8>,
    /// Channel the sender's radio was tuned to
    pub channel: u8,
}

/// In-memory transport with failure injection
#[derive(Debug)]
pub struct SimTransport {
    id: NodeId,
    channel: u8,
    peers: Vec<SimPeer>,
    outbox: VecDeque<SimFrame>,
    add_peer_calls: u64,
    /// Fail the next `init` call
    pub fail_init: bool,
    /// Fail the next `set_key` call
    pub fail_set_key: bool,
    /// Fail `add_peer` calls while set
    pub fail_add_peer: bool,
    /// Fail `send` calls while set
    pub fail_send: bool,
}

impl SimTransport {
    /// Create a simulated radio with the given identity and channel
    pub fn new(id: NodeId, channel: u8) -> Self {
        Self {
            id,
            channel,
            peers: Vec::new(),
            outbox: VecDeque::new(),
            add_peer_calls: 0,
            fail_init: false,
            fail_set_key: false,
            fail_add_peer: false,
            fail_send: false,
        }
    }

    /// Take every queued outgoing frame
    pub fn drain_outbox(&mut self) -> Vec<SimFrame> {
        self.outbox.drain(..).collect()
    }

    /// Check whether anything is waiting to go out
    pub fn outbox_is_empty(&self) -> bool {
        self.outbox.is_empty()
    }

    /// Current radio channel
    pub fn channel(&self) -> u8 {
        self.channel
    }

    /// The registered slot for a peer, if any
    pub fn peer(&self, id: NodeId) -> Option<&SimPeer> {
        self.peers.iter().find(|p| p.id == id)
    }

    /// All registered peer slots
    pub fn peers(&self) -> &[SimPeer] {
        &self.peers
    }

    /// Number of `add_peer` calls accepted so far
    pub fn add_peer_calls(&self) -> u64 {
        self.add_peer_calls
    }
}

impl Transport for SimTransport {
    fn init(&mut self) -> MeshResult<()> {
        if self.fail_init {
            return Err(MeshError::Transport("init refused".to_string()));
        }
        Ok(())
    }

    fn set_key(&mut self, _pmk: &[u8; 16]) -> MeshResult<()> {
        if self.fail_set_key {
            return Err(MeshError::Transport("set_key refused".to_string()));
        }
        Ok(())
    }

    fn set_channel(&mut self, channel: u8) -> MeshResult<()> {
        if !(1..=13).contains(&channel) {
            return Err(MeshError::Transport(format!("channel {} out of range", channel)));
        }
        self.channel = channel;
        Ok(())
    }

    fn local_id(&self) -> NodeId {
        self.id
    }

    fn add_peer(
        &mut self,
        id: NodeId,
        channel: u8,
        encrypt: bool,
        lmk: Option<[u8; 16]>,
    ) -> MeshResult<()> {
        if self.fail_add_peer {
            return Err(MeshError::Transport("peer table refused".to_string()));
        }
        self.add_peer_calls += 1;
        let slot = SimPeer {
            id,
            channel,
            encrypt,
            lmk,
        };
        match self.peers.iter_mut().find(|p| p.id == id) {
            Some(existing) => *existing = slot,
            None => self.peers.push(slot),
        }
        Ok(())
    }

    fn remove_peer(&mut self, id: NodeId) -> MeshResult<()> {
        self.peers.retain(|p| p.id != id);
        Ok(())
    }

    fn peer_exists(&self, id: NodeId) -> bool {
        self.peers.iter().any(|p| p.id == id)
    }

    fn send(&mut self, id: NodeId, data: &[u8]) -> MeshResult<()> {
        if self.fail_send {
            return Err(MeshError::Transport("radio busy".to_string()));
        }
        if !self.peer_exists(id) {
            return Err(MeshError::Transport(format!("peer {} not registered", id)));
        }
        self.outbox.push_back(SimFrame {
            to: id,
            data: data.to_vec(),
            channel: self.channel,
        });
        Ok(())
    }
}

/// Event sink that records deliveries for later inspection
///
/// Cheap to clone; the engine's boxed copy and the test's handle share
/// the same log.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    inner: Rc<RefCell<SinkLog>>,
}

#[derive(Debug, Default)]
struct SinkLog {
    registrations: Vec<(NodeId, EntityDescriptor)>,
    data: Vec<(NodeId, Vec<u8>)>,
}

impl RecordingSink {
    /// Create an empty recording sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Registrations delivered so far
    pub fn registrations(&self) -> Vec<(NodeId, EntityDescriptor)> {
        self.inner.borrow().registrations.clone()
    }

    /// Telemetry payloads delivered so far
    pub fn data(&self) -> Vec<(NodeId, Vec<u8>)> {
        self.inner.borrow().data.clone()
    }
}

impl EventSink for RecordingSink {
    fn on_registration(&mut self, origin: NodeId, registration: &EntityDescriptor) {
        self.inner
            .borrow_mut()
            .registrations
            .push((origin, registration.clone()));
    }

    fn on_data(&mut self, origin: NodeId, payload: &[u8]) {
        self.inner.borrow_mut().data.push((origin, payload.to_vec()));
    }
}

/// Steps a set of engines over a shared virtual air interface
pub struct MeshSimulator {
    engines: Vec<MeshEngine<SimTransport>>,
    links: Vec<(usize, usize)>,
    now: u64,
    step_ms: u64,
    rssi_dbm: i8,
}

impl MeshSimulator {
    /// Create a simulator advancing `step_ms` of virtual time per step
    pub fn new(step_ms: u64) -> Self {
        Self {
            engines: Vec::new(),
            links: Vec::new(),
            now: 0,
            step_ms,
            rssi_dbm: -60,
        }
    }

    /// Add an engine; returns its index
    pub fn add_engine(&mut self, engine: MeshEngine<SimTransport>) -> usize {
        self.engines.push(engine);
        self.engines.len() - 1
    }

    /// Declare a symmetric radio link between two members
    pub fn link(&mut self, a: usize, b: usize) {
        self.links.push((a, b));
    }

    /// Current virtual time in milliseconds
    pub fn now(&self) -> u64 {
        self.now
    }

    /// Borrow an engine
    pub fn engine(&self, index: usize) -> &MeshEngine<SimTransport> {
        &self.engines[index]
    }

    /// Borrow an engine mutably
    pub fn engine_mut(&mut self, index: usize) -> &mut MeshEngine<SimTransport> {
        &mut self.engines[index]
    }

    fn linked(&self, a: usize, b: usize) -> bool {
        self.links.contains(&(a, b)) || self.links.contains(&(b, a))
    }

    /// Run one step: tick every engine, then deliver the air
    pub fn step(&mut self) {
        let now = self.now;
        for engine in &mut self.engines {
            engine.tick(now);
        }

        let mut in_flight = Vec::new();
        for (index, engine) in self.engines.iter_mut().enumerate() {
            let from = engine.local_id();
            for frame in engine.transport_mut().drain_outbox() {
                in_flight.push((index, from, frame));
            }
        }

        for (sender, from, frame) in in_flight {
            for receiver in 0..self.engines.len() {
                if receiver == sender || !self.linked(sender, receiver) {
                    continue;
                }
                let engine = &mut self.engines[receiver];
                if engine.transport().channel() != frame.channel {
                    continue;
                }
                if frame.to.is_broadcast() || frame.to == engine.local_id() {
                    let rssi = self.rssi_dbm;
                    engine.handle_frame(from, &frame.data, rssi, now);
                }
            }
        }

        self.now += self.step_ms;
    }

    /// Run steps until `duration_ms` of virtual time has passed
    pub fn run_for(&mut self, duration_ms: u64) {
        let deadline = self.now + duration_ms;
        while self.now < deadline {
            self.step();
        }
    }
}
