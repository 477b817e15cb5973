mod mesh;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::info;
use tracing_subscriber::EnvFilter;

use mesh::Mesh;

#[derive(Parser)]
#[command(name = "conclave-sim", about = "Scenario runner for the conclave replication engine")]
struct Cli {
    /// Seed for the delivery-interleaving RNG.
    #[arg(long, default_value = "42")]
    seed: u64,

    /// Log filter (tracing EnvFilter syntax).
    #[arg(long, default_value = "info")]
    log: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Fuse a full mesh, run broadcast rounds, verify total order.
    Mesh {
        /// Number of peers.
        #[arg(long, default_value = "4")]
        peers: u8,
        /// Broadcast rounds (every peer broadcasts once per round).
        #[arg(long, default_value = "20")]
        rounds: u32,
    },

    /// Fuse a full mesh, then kill peers one by one and verify the
    /// survivors keep agreeing on membership and message order.
    Churn {
        /// Number of peers to start with.
        #[arg(long, default_value = "5")]
        peers: u8,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cli.log))
        .init();

    let mut rng = StdRng::seed_from_u64(cli.seed);
    match cli.command {
        Command::Mesh { peers, rounds } => run_mesh(peers, rounds, &mut rng),
        Command::Churn { peers } => run_churn(peers, &mut rng),
    }
}

/// Fuse every pair and deliver until the group settles.
fn full_mesh(peers: u8, rng: &mut StdRng) -> Result<Mesh> {
    if peers < 2 {
        bail!("need at least 2 peers");
    }

    let mut mesh = Mesh::new(peers);
    let ids = mesh.ids();
    for (i, &a) in ids.iter().enumerate() {
        for &b in &ids[i + 1..] {
            mesh.fuse(a, b);
            mesh.deliver(rng);
        }
    }

    let expected: std::collections::BTreeSet<_> = ids.iter().copied().collect();
    for &id in &ids {
        if *mesh.members(id) != expected {
            bail!("hub {id} settled on {:?}, wanted the full group", mesh.members(id));
        }
    }
    info!(peers, "group formed");
    Ok(mesh)
}

fn run_mesh(peers: u8, rounds: u32, rng: &mut StdRng) -> Result<()> {
    let mut mesh = full_mesh(peers, rng)?;
    let ids = mesh.ids();

    for round in 0..rounds {
        for &id in &ids {
            let payload = format!("{id}:{round}").into_bytes();
            let fx = mesh.hub_mut(id).total_order_broadcast(payload);
            mesh.absorb(id, fx);
        }
        mesh.deliver(rng);
    }

    let reference = mesh.deliveries(ids[0]);
    let expected = rounds as usize * ids.len();
    if reference.len() != expected {
        bail!("expected {expected} deliveries, got {}", reference.len());
    }
    for &id in &ids[1..] {
        if mesh.deliveries(id) != reference {
            bail!("delivery order diverged at {id}");
        }
    }

    info!(
        peers,
        rounds,
        deliveries = reference.len(),
        frames = mesh.frames_delivered,
        "total order held"
    );
    println!(
        "mesh ok: {} peers, {} deliveries per peer, {} frames on the wire",
        peers,
        reference.len(),
        mesh.frames_delivered
    );
    Ok(())
}

fn run_churn(peers: u8, rng: &mut StdRng) -> Result<()> {
    let mut mesh = full_mesh(peers, rng)?;
    let mut ids = mesh.ids();

    // Kill peers until two remain, broadcasting between each loss.
    while ids.len() > 2 {
        let victim = ids.pop().expect("non-empty");
        info!(%victim, "killing peer");
        mesh.kill(victim);
        mesh.deliver(rng);

        let expected: std::collections::BTreeSet<_> = ids.iter().copied().collect();
        for &id in &ids {
            if *mesh.members(id) != expected {
                bail!(
                    "after losing {victim}, hub {id} sees {:?}, wanted {:?}",
                    mesh.members(id),
                    expected
                );
            }
        }

        let fx = mesh
            .hub_mut(ids[0])
            .total_order_broadcast(format!("after losing {victim}").into_bytes());
        mesh.absorb(ids[0], fx);
        mesh.deliver(rng);

        let reference = mesh.deliveries(ids[0]);
        for &id in &ids[1..] {
            if mesh.deliveries(id) != reference {
                bail!("delivery order diverged at {id} after losing {victim}");
            }
        }
    }

    println!(
        "churn ok: shrank {} → {} peers, {} frames on the wire",
        peers,
        ids.len(),
        mesh.frames_delivered
    );
    Ok(())
}
