//! Lattice node binary.
//!
//! Loads the genesis configuration, restores the DAG from disk, and runs the
//! consensus core: block producer, layer timer, and the ports the RPC and
//! P2P adapters attach to. Exits non-zero on genesis or key validation
//! failure, or any unrecoverable startup error.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;

use lattice::config::{GenesisConfig, LatticeConfig};
use lattice::consensus::pos::OsRandomness;
use lattice::crypto::keys::{Keyring, ValidatorKey};
use lattice::network::ChannelGossip;
use lattice::node::Node;

/// Lattice L1 node: GHOSTDAG ledger with PoS finality and post-quantum
/// block authentication.
#[derive(Parser, Debug)]
#[command(name = "lattice", version, about)]
struct Cli {
    /// Path to the genesis configuration file.
    #[arg(long, default_value = "genesis/config.json")]
    genesis: PathBuf,

    /// Data directory for persistent storage.
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// RPC server bind address.
    #[arg(long)]
    rpc_bind: Option<String>,

    /// P2P server bind address.
    #[arg(long)]
    p2p_bind: Option<String>,

    /// P2P server port (overrides the p2p-bind port).
    #[arg(long)]
    p2p_port: Option<u16>,

    /// Bootnode address to connect to.
    #[arg(long)]
    bootnode: Option<String>,

    /// Comma-separated list of peer addresses to connect to.
    #[arg(long, value_delimiter = ',')]
    p2p_peers: Vec<String>,

    /// Path to this validator's PQ key file.
    #[arg(long)]
    validator_key: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();

    // Config file supplies defaults; CLI flags override.
    let data_dir = cli
        .data_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from(LatticeConfig::default().node.data_dir));
    let file_config = LatticeConfig::load(&data_dir);
    let rpc_bind = cli.rpc_bind.unwrap_or(file_config.node.rpc_bind);
    let p2p_bind = match cli.p2p_port {
        Some(port) => format!("0.0.0.0:{port}"),
        None => cli.p2p_bind.unwrap_or(file_config.node.p2p_bind),
    };
    let mut peers = file_config.node.p2p_peers.clone();
    peers.extend(cli.p2p_peers.iter().cloned());
    if let Some(bootnode) = &cli.bootnode {
        peers.insert(0, bootnode.clone());
    }

    let genesis = GenesisConfig::load(&cli.genesis).map_err(|e| {
        tracing::error!(error = %e, path = %cli.genesis.display(), "Genesis validation failed");
        e
    })?;

    // Signing keys: the explicit --validator-key file, plus any keys
    // directory shipped next to the genesis file (devnet keyrings).
    let mut keyring = Keyring::new();
    if let Some(path) = &cli.validator_key {
        let key = ValidatorKey::load(path).map_err(|e| {
            tracing::error!(error = %e, path = %path.display(), "Validator key rejected");
            e
        })?;
        keyring.insert(key.name.clone(), key.keypair);
    }
    if let Some(genesis_dir) = cli.genesis.parent() {
        let keys_dir = genesis_dir.join("keys");
        if keys_dir.is_dir() {
            let loaded = Keyring::load_dir(&keys_dir)?;
            tracing::info!(count = loaded.len(), "Loaded genesis keyring");
            for validator in &genesis.validators {
                if let Some(kp) = loaded.get(&validator.id) {
                    keyring.insert(validator.id.clone(), kp.clone());
                }
            }
        }
    }
    if keyring.is_empty() {
        tracing::warn!("No signing keys loaded; this node cannot produce blocks");
    }

    tracing::info!(
        chain_id = %genesis.chain_id,
        network = %genesis.network_name,
        rule = %genesis.dag_config.selected_parent_rule,
        layer_interval = genesis.dag_config.layer_interval,
        pq_scheme = %genesis.pq_config.scheme,
        hash_algo = %genesis.pq_config.hash_algo,
        soft_finality = genesis.finality_config.soft_finality_threshold,
        hard_finality = genesis.finality_config.hard_finality_threshold,
        rpc = %rpc_bind,
        p2p = %p2p_bind,
        peers = peers.len(),
        "Starting Lattice node"
    );

    // The gossip channel is drained by the external P2P adapter; the core
    // only publishes into it.
    let (gossip, mut gossip_rx) = ChannelGossip::channel();
    let node = Node::new(
        genesis,
        &data_dir,
        keyring,
        Arc::new(gossip),
        Box::new(OsRandomness),
    )?;

    // Until a transport is attached, drain and trace outbound announcements.
    tokio::spawn(async move {
        while let Some(message) = gossip_rx.recv().await {
            tracing::debug!(?message, "Outbound gossip");
        }
    });

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("Ctrl-C received, shutting down...");
        signal_token.cancel();
    });

    node.run(shutdown).await;
    Ok(())
}
