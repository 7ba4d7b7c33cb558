//! End-to-end mesh scenarios
//!
//! These tests exercise whole meshes through the public API and the
//! in-memory simulator: tree formation, multi-hop forwarding toward
//! the gateway, peer-slot pressure and route expiry. Every wire
//! observation goes through the real codec.

use nowmesh_core::engine::DATA_TTL;
use nowmesh_core::packet::{decode_frame, encode_frame};
use nowmesh_core::simulation::{MeshSimulator, RecordingSink, SimTransport};
use nowmesh_core::{
    network_id, EntityDescriptor, EntityKind, EntityValue, MeshConfig, MeshEngine, MeshHeader,
    NodeId, PktType, RouteTable, Transport,
};

const PMK: &[u8] = b"KKKKKKKKKKKKKKKK";

fn id(n: u8) -> NodeId {
    NodeId::from_bytes([0, 0, 0, 0, 0, n])
}

fn root_engine(n: u8, channel: u8) -> MeshEngine<SimTransport> {
    MeshEngine::new(MeshConfig::root("M", PMK), SimTransport::new(id(n), channel)).unwrap()
}

fn node_engine(n: u8) -> MeshEngine<SimTransport> {
    MeshEngine::new(MeshConfig::node("M", PMK), SimTransport::new(id(n), 1)).unwrap()
}

/// S1: the network-id hash is a fixed function of the mesh name.
#[test]
fn hash_vector() {
    // djb2 over bytes 54 65 73 74 4D 65 73 68, accumulator 5381
    assert_eq!(network_id("TestMesh"), 0x74A7_6CD2);
    assert_eq!(network_id(""), 5381);
}

/// S2: a scanning node finds the root, adopts it and keys the link.
#[test]
fn two_node_attach() {
    let mut sim = MeshSimulator::new(100);
    let root = sim.add_engine(root_engine(1, 1));
    let node = sim.add_engine(node_engine(2));
    sim.link(root, node);

    sim.step();
    while !sim.engine(node).is_attached() && sim.now() < 70_000 {
        sim.step();
    }

    let member = sim.engine(node);
    assert!(member.is_attached());
    assert_eq!(member.hop_count(), 1);
    assert_eq!(member.parent(), Some(id(1)));

    // The parent link is registered encrypted with the derived key
    let slot = member.transport().peer(id(1)).expect("parent slot");
    assert!(slot.encrypt);
    let lmk = slot.lmk.expect("parent slot has a key");
    let root_id = id(1);
    for i in 0..16 {
        assert_eq!(lmk[i], b'K' ^ root_id.as_bytes()[i % 6]);
    }
}

/// S3: a registration crosses two hops and reaches the gateway sink.
#[test]
fn three_node_forward() {
    let sink = RecordingSink::new();
    let mut sim = MeshSimulator::new(50);
    let root = sim.add_engine(root_engine(1, 1).with_sink(Box::new(sink.clone())));
    let relay = sim.add_engine(node_engine(2));

    let mut leaf_engine = node_engine(3);
    leaf_engine.add_entity(EntityDescriptor::new(
        0x1234_5678,
        EntityKind::Sensor,
        "Soil Moisture",
        "%",
        "humidity",
    ));
    let leaf = sim.add_engine(leaf_engine);

    // Chain topology: root - relay - leaf
    sim.link(root, relay);
    sim.link(relay, leaf);

    while sink.registrations().is_empty() && sim.now() < 300_000 {
        sim.step();
    }

    let registrations = sink.registrations();
    assert_eq!(registrations.len(), 1);
    let (origin, descriptor) = &registrations[0];
    assert_eq!(*origin, id(3));
    assert_eq!(descriptor.hash, 0x1234_5678);
    assert_eq!(descriptor.name, "Soil Moisture");
    assert_eq!(descriptor.entity_kind(), Some(EntityKind::Sensor));

    // The tree formed behind the delivery: leaf sits two hops out and
    // the relay actually relayed.
    assert_eq!(sim.engine(relay).hop_count(), 1);
    assert_eq!(sim.engine(leaf).hop_count(), 2);
    assert!(sim.engine(relay).stats().frames_forwarded >= 1);

    // Telemetry follows the same path
    let now = sim.now();
    sim.engine_mut(leaf)
        .publish(0x1234_5678, &EntityValue::Number(41.5), now)
        .unwrap();
    let deadline = sim.now() + 10_000;
    while sink.data().is_empty() && sim.now() < deadline {
        sim.step();
    }
    let data = sink.data();
    assert_eq!(data.len(), 1);
    assert_eq!(data[0].0, id(3));
    assert_eq!(EntityValue::decode_number(&data[0].1[4..]), Some(41.5));
}

/// A forwarded frame carries exactly one less hop than it arrived with.
#[test]
fn forward_decrements_ttl_once() {
    let mut node = node_engine(9);
    // Attach to parent 1
    let announce = MeshHeader {
        kind: PktType::Announce,
        net_id: network_id("M"),
        src: id(1),
        dst: NodeId::BROADCAST,
        ttl: 1,
    };
    node.handle_frame(id(1), &encode_frame(&announce, &[0]).unwrap(), -60, 0);
    node.transport_mut().drain_outbox();

    let header = MeshHeader {
        kind: PktType::Reg,
        net_id: network_id("M"),
        src: id(5),
        dst: NodeId::VIRTUAL_ROOT,
        ttl: DATA_TTL,
    };
    let reg = EntityDescriptor::new(9, EntityKind::Sensor, "x", "", "");
    let payload = nowmesh_core::entity::pack_registration(&reg);
    node.handle_frame(id(5), &encode_frame(&header, &payload).unwrap(), -60, 100);

    let sent = node.transport_mut().drain_outbox();
    assert_eq!(sent.len(), 1);
    let (forwarded, _) = decode_frame(&sent[0].data).unwrap();
    assert_eq!(forwarded.ttl, DATA_TTL - 1);
}

/// S4: slot pressure evicts the oldest non-parent peer, never the parent.
#[test]
fn lru_eviction_preserves_parent() {
    let mut node = node_engine(9);
    let parent = id(1);

    // Attach: the parent takes the first slot
    let announce = MeshHeader {
        kind: PktType::Announce,
        net_id: network_id("M"),
        src: parent,
        dst: NodeId::BROADCAST,
        ttl: 1,
    };
    node.handle_frame(parent, &encode_frame(&announce, &[0]).unwrap(), -60, 0);

    // Six further next-hop neighbors 11..=16: each learned as the way
    // to some origin, then used for a forward, which admits it.
    for (step, neighbor) in (11u8..=16).enumerate() {
        let origin = id(100 + step as u8);
        let learn = MeshHeader {
            kind: PktType::Data,
            net_id: network_id("M"),
            src: origin,
            dst: id(9),
            ttl: 5,
        };
        node.handle_frame(id(neighbor), &encode_frame(&learn, b"").unwrap(), -60, 100);

        let downstream = MeshHeader {
            kind: PktType::Data,
            net_id: network_id("M"),
            src: parent,
            dst: origin,
            ttl: 5,
        };
        node.handle_frame(parent, &encode_frame(&downstream, b"").unwrap(), -60, 200);
    }

    let peers = node.peers();
    assert_eq!(peers.len(), nowmesh_core::MAX_PEERS);
    // Parent survived a full wrap of slot pressure
    assert!(peers.contains(parent));
    // The first-admitted non-parent peer is gone
    assert!(!peers.contains(id(11)));
    assert!(peers.contains(id(16)));
    assert!(!node.transport().peer_exists(id(11)));
    assert_eq!(node.stats().peers_evicted, 1);
}

/// S5: a well-formed frame on the wrong network touches nothing.
#[test]
fn wrong_net_id_dropped() {
    let mut node = node_engine(9);
    let header = MeshHeader {
        kind: PktType::Data,
        net_id: 0xDEAD_BEEF,
        src: id(4),
        dst: id(9),
        ttl: 5,
    };
    let frame = encode_frame(&header, b"payload").unwrap();

    let routes_before = node.routes().len();
    node.handle_frame(id(4), &frame, -60, 100);

    assert_eq!(node.routes().len(), routes_before);
    assert!(node.peers().is_empty());
    assert!(node.transport().outbox_is_empty());
    assert_eq!(node.stats().dropped_net_id, 1);
}

/// S6: routes expire five minutes after the last observation.
#[test]
fn route_gc_literal_times() {
    let mut routes = RouteTable::new();
    routes.learn(id(1), id(2), 0);
    assert_eq!(routes.gc(300_001), 1);
    assert_eq!(routes.lookup(id(1)), None);

    routes.learn(id(1), id(2), 400_000);
    assert_eq!(routes.gc(400_001), 0);
    assert_eq!(routes.lookup(id(1)), Some(id(2)));
}

/// Stats serialize for operator tooling.
#[test]
fn stats_serialize() {
    let node = node_engine(9);
    let json = serde_json::to_string(node.stats()).unwrap();
    assert!(json.contains("frames_rx"));
}
