//! NowMesh Operator Command-Line Interface
//!
//! This CLI provides tools for:
//! - Computing the network id for a mesh name
//! - Deriving per-peer link keys from a PMK
//! - Simulating whole meshes without radio hardware
//!
//! Transport bindings for real radios live outside this workspace;
//! the simulator runs the same engine code over an in-memory air
//! interface.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use nowmesh_core::engine::ANNOUNCE_INTERVAL_MS;
use nowmesh_core::simulation::{MeshSimulator, RecordingSink, SimTransport};
use nowmesh_core::{
    derive_lmk, network_id, EntityDescriptor, EntityKind, EntityValue, MeshConfig, MeshEngine,
    MeshHeader, NodeId, MAX_FRAME, MAX_PEERS, PMK_LEN, ROUTE_TTL_MS,
};
use tracing::info;

#[derive(Parser)]
#[command(name = "nowmesh")]
#[command(author, version, about = "NowMesh overlay CLI", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compute the 32-bit network id for a mesh name
    Hash {
        /// Mesh name as configured on every member
        name: String,
    },

    /// Derive the link key (LMK) for a peer from the PMK
    Key {
        /// Pre-shared master key (16 ASCII characters)
        #[arg(long)]
        pmk: String,

        /// Peer identity, colon-separated hex (aa:bb:cc:dd:ee:ff)
        #[arg(long)]
        peer: String,
    },

    /// Show wire-format constants and protocol parameters
    Info,

    /// Simulate a mesh of one gateway and a chain of nodes
    Simulate {
        /// Number of sensor nodes behind the gateway
        #[arg(short, long, default_value = "3")]
        nodes: usize,

        /// Virtual time to simulate, in seconds
        #[arg(short, long, default_value = "120")]
        duration: u64,

        /// Mesh name (hashed to the network id)
        #[arg(long, default_value = "SimMesh")]
        mesh_name: String,

        /// Print per-node statistics as JSON
        #[arg(long)]
        json: bool,
    },
}

fn parse_peer(s: &str) -> Result<NodeId> {
    let bytes: Vec<u8> = s
        .split(':')
        .map(|part| u8::from_str_radix(part, 16))
        .collect::<std::result::Result<_, _>>()
        .with_context(|| format!("invalid peer identity: {}", s))?;
    NodeId::from_slice(&bytes).ok_or_else(|| anyhow::anyhow!("peer identity must be 6 bytes"))
}

fn cmd_hash(name: String) -> Result<()> {
    if name.is_empty() {
        bail!("mesh name must not be empty");
    }
    println!("{:08X}", network_id(&name));
    Ok(())
}

fn cmd_key(pmk: String, peer: String) -> Result<()> {
    if pmk.len() != PMK_LEN {
        bail!("PMK must be exactly {} bytes, got {}", PMK_LEN, pmk.len());
    }
    let peer = parse_peer(&peer)?;
    let lmk = derive_lmk(pmk.as_bytes(), peer.as_bytes())
        .map_err(|e| anyhow::anyhow!("key derivation failed: {}", e))?;

    let hex: String = lmk.iter().map(|b| format!("{:02x}", b)).collect();
    println!("{}", hex);
    Ok(())
}

fn cmd_info() -> Result<()> {
    println!("=== NowMesh Protocol Parameters ===");
    println!();
    println!("Frame header:        {} bytes (type, net_id, src, dst, ttl)", MeshHeader::SIZE);
    println!("Maximum frame:       {} bytes", MAX_FRAME);
    println!("Peer slots:          {} encrypted + broadcast pseudo-peer", MAX_PEERS);
    println!("Route lifetime:      {} s", ROUTE_TTL_MS / 1000);
    println!("Announce interval:   {} s", ANNOUNCE_INTERVAL_MS / 1000);
    println!("Scan channels:       1..=13");
    println!();
    println!("Frame types:");
    println!("  0x01 PROBE       channel-scan probe (unattached nodes)");
    println!("  0x02 ANNOUNCE    spanning-tree announce, payload = hop");
    println!("  0x10 REG         entity registration toward the root");
    println!("  0x20 DATA        telemetry value toward the root");
    println!("  0x30 CMD         downstream command (reserved)");
    Ok(())
}

fn cmd_simulate(nodes: usize, duration: u64, mesh_name: String, json: bool) -> Result<()> {
    if nodes == 0 {
        bail!("need at least one node");
    }
    let pmk = b"0123456789ABCDEF";
    let sink = RecordingSink::new();
    let mut sim = MeshSimulator::new(50);

    let root_id = NodeId::from_bytes([0x02, 0, 0, 0, 0, 0x01]);
    let root = sim.add_engine(
        MeshEngine::new(MeshConfig::root(&mesh_name, pmk), SimTransport::new(root_id, 1))
            .map_err(|e| anyhow::anyhow!("root init: {}", e))?
            .with_sink(Box::new(sink.clone())),
    );

    println!("=== NowMesh Simulation ===");
    println!();
    println!("Gateway:  {} (net id {:08X})", root_id, network_id(&mesh_name));
    println!("Nodes:    {} in a chain", nodes);
    println!("Duration: {} s virtual", duration);
    println!();

    // Chain topology: gateway - n1 - n2 - ... Each node carries one
    // temperature sensor entity.
    let mut previous = root;
    let mut members = Vec::new();
    for i in 0..nodes {
        let member_id = NodeId::from_bytes([0x02, 0, 0, 0, 0, 0x10 + i as u8]);
        let mut engine = MeshEngine::new(
            MeshConfig::node(&mesh_name, pmk),
            SimTransport::new(member_id, 1),
        )
        .map_err(|e| anyhow::anyhow!("node init: {}", e))?;
        engine.add_entity(EntityDescriptor::new(
            0x1000 + i as u32,
            EntityKind::Sensor,
            &format!("Temperature {}", i + 1),
            "°C",
            "temperature",
        ));
        let index = sim.add_engine(engine);
        sim.link(previous, index);
        members.push((index, member_id));
        previous = index;
    }

    // Step the mesh; every attached node publishes a reading each
    // 10 s of virtual time.
    let mut next_publish = 10_000u64;
    let deadline = duration * 1000;
    while sim.now() < deadline {
        sim.step();
        if sim.now() >= next_publish {
            let now = sim.now();
            for (i, (index, _)) in members.iter().enumerate() {
                let engine = sim.engine_mut(*index);
                if engine.is_attached() {
                    let reading = 20.0 + (i as f32) + (now as f32 / 60_000.0);
                    let _ = engine.publish(0x1000 + i as u32, &EntityValue::Number(reading), now);
                }
            }
            next_publish += 10_000;
        }
    }

    info!(registrations = sink.registrations().len(), "simulation finished");

    println!("=== Results ===");
    println!();
    println!("Registrations delivered: {}", sink.registrations().len());
    println!("Readings delivered:      {}", sink.data().len());
    println!();
    println!(
        "{:<22} {:<6} {:<8} {:<8} {:<8} {:<8}",
        "Member", "Hop", "TX", "RX", "Fwd", "Drops"
    );
    println!("{}", "-".repeat(64));

    let mut report = Vec::new();
    for index in std::iter::once(root).chain(members.iter().map(|(i, _)| *i)) {
        let engine = sim.engine(index);
        let stats = engine.stats();
        println!(
            "{:<22} {:<6} {:<8} {:<8} {:<8} {:<8}",
            engine.local_id().to_string(),
            engine.hop_count(),
            stats.frames_tx,
            stats.frames_rx,
            stats.frames_forwarded,
            stats.dropped_net_id + stats.dropped_malformed + stats.dropped_ttl,
        );
        report.push((engine.local_id(), stats.clone()));
    }

    if json {
        println!();
        let entries: Vec<serde_json::Value> = report
            .iter()
            .map(|(id, stats)| {
                serde_json::json!({
                    "member": id.to_string(),
                    "stats": stats,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&entries)?);
    }

    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let log_level = match cli.verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .init();

    match cli.command {
        Commands::Hash { name } => cmd_hash(name),
        Commands::Key { pmk, peer } => cmd_key(pmk, peer),
        Commands::Info => cmd_info(),
        Commands::Simulate {
            nodes,
            duration,
            mesh_name,
            json,
        } => cmd_simulate(nodes, duration, mesh_name, json),
    }
}
