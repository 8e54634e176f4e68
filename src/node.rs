//! Node orchestration: wiring, background loops, and graceful shutdown.
//!
//! The node owns every core component behind per-component locks, drives the
//! layer timer and the monitoring tick, and exposes [`NodeHandle`] — the
//! port the external RPC and gossip adapters consume. Shutdown proceeds
//! producer → gossip → block store, bounded by a total timeout.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::config::GenesisConfig;
use crate::consensus::dag::{Block, BlockGraph};
use crate::consensus::pos::{LeaderRandomness, PosEngine};
use crate::consensus::validation::{validate_block, BlockError};
use crate::crypto::keys::Keyring;
use crate::mempool::{Mempool, MempoolError};
use crate::network::GossipPort;
use crate::producer::{BlockProducer, ProducerConfig};
use crate::replay::{self, ReplayError};
use crate::storage::{BlockStore, StoreError};
use crate::transaction::Transaction;

/// Faults that prevent the node from starting.
#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    #[error("storage error: {0}")]
    Store(#[from] StoreError),
    #[error("replay failed: {0}")]
    Replay(#[from] ReplayError),
}

/// The capability set handed to external adapters (RPC, gossip, indexer).
/// Cloneable; every clone shares the same components.
#[derive(Clone)]
pub struct NodeHandle {
    pub graph: Arc<RwLock<BlockGraph>>,
    pub pos: Arc<RwLock<PosEngine>>,
    pub mempool: Arc<RwLock<Mempool>>,
    pub store: Arc<BlockStore>,
    chain_id: String,
}

impl NodeHandle {
    /// Assemble a handle over shared components. Adapters normally obtain
    /// one from [`Node::handle`]; tests wire their own.
    pub fn new(
        graph: Arc<RwLock<BlockGraph>>,
        pos: Arc<RwLock<PosEngine>>,
        mempool: Arc<RwLock<Mempool>>,
        store: Arc<BlockStore>,
        chain_id: String,
    ) -> Self {
        NodeHandle {
            graph,
            pos,
            mempool,
            store,
            chain_id,
        }
    }

    /// Inbound gossip path: validate, insert, persist. The mempool drops any
    /// transactions the block carried.
    pub async fn dispatch_inbound_block(&self, block: Block) -> Result<(), BlockError> {
        let mut graph = self.graph.write().await;
        {
            let mut pos = self.pos.write().await;
            validate_block(&block, &graph, &mut pos, &self.chain_id)?;
            graph.add(block.clone())?;
        }
        drop(graph);

        if let Err(e) = self.store.store(&block) {
            tracing::error!(hash = %block.hash, error = %e, "Failed to persist gossiped block");
        }
        if !block.transactions.is_empty() {
            let hashes = block.tx_hashes();
            self.mempool.write().await.remove(&hashes);
        }
        tracing::info!(hash = %block.hash, height = block.height, "Accepted gossiped block");
        Ok(())
    }

    /// Transaction submission path (RPC contract).
    pub async fn submit_transaction(&self, tx: Transaction) -> Result<(), MempoolError> {
        self.mempool.write().await.add(tx)
    }

    /// The highest durably stored height.
    pub fn finalized_height(&self) -> i64 {
        self.store.finalized_height()
    }

    /// Fetch a block, preferring the in-memory graph.
    pub async fn get_block(&self, hash: &str) -> Option<Block> {
        if let Some(block) = self.graph.read().await.get(hash).cloned() {
            return Some(block);
        }
        self.store.get(hash).ok()
    }

    /// All persisted blocks in deterministic order.
    pub fn load_blocks(&self) -> Result<Vec<Block>, StoreError> {
        self.store.load()
    }
}

/// The assembled node.
pub struct Node {
    genesis: GenesisConfig,
    handle: NodeHandle,
    producer: Arc<BlockProducer>,
}

impl Node {
    /// Build the node: open storage, replay the DAG, wire the producer.
    pub fn new(
        genesis: GenesisConfig,
        data_dir: &Path,
        keyring: Keyring,
        gossip: Arc<dyn GossipPort>,
        randomness: Box<dyn LeaderRandomness>,
    ) -> Result<Self, NodeError> {
        let store = Arc::new(BlockStore::open(data_dir)?);
        store.store_genesis(&genesis)?;

        let mut graph = BlockGraph::new();
        let mut pos = PosEngine::new(
            genesis.pos_validators(),
            genesis.finality_config.clone(),
            randomness,
        );
        let report = replay::replay(&genesis, &mut graph, &mut pos, &store)?;
        tracing::info!(
            chain = %genesis.chain_id,
            validators = genesis.validators.len(),
            replayed = report.replayed,
            "Node initialized"
        );

        let graph = Arc::new(RwLock::new(graph));
        let pos = Arc::new(RwLock::new(pos));
        let mempool = Arc::new(RwLock::new(Mempool::with_defaults()));

        let producer_config = ProducerConfig {
            block_interval: Duration::from_secs_f64(genesis.dag_config.layer_interval),
            max_txs_per_block: genesis.dag_config.max_txs_per_block,
            min_txs_per_block: genesis.dag_config.min_txs_per_block,
            max_block_size: genesis.dag_config.max_block_size,
            ..ProducerConfig::default()
        };
        let producer = Arc::new(BlockProducer::new(
            Arc::clone(&graph),
            Arc::clone(&pos),
            Arc::clone(&mempool),
            Arc::clone(&store),
            Arc::new(keyring),
            gossip,
            genesis.chain_id.clone(),
            producer_config,
        ));

        let handle = NodeHandle {
            graph,
            pos,
            mempool,
            store,
            chain_id: genesis.chain_id.clone(),
        };
        Ok(Node {
            genesis,
            handle,
            producer,
        })
    }

    /// A handle for external adapters.
    pub fn handle(&self) -> NodeHandle {
        self.handle.clone()
    }

    pub fn producer(&self) -> &Arc<BlockProducer> {
        &self.producer
    }

    /// Run the node until `shutdown` fires: producer loop, layer timer, and
    /// the monitoring tick.
    pub async fn run(&self, shutdown: CancellationToken) {
        self.producer.start(shutdown.child_token());

        let layer_interval =
            Duration::from_secs_f64(self.genesis.dag_config.layer_interval.max(0.01));
        let mut layer_timer = tokio::time::interval(layer_interval);
        layer_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut monitor_timer = tokio::time::interval(Duration::from_secs(
            crate::constants::MONITOR_INTERVAL_SECS,
        ));

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("Shutdown signal received");
                    self.shutdown().await;
                    break;
                }
                _ = layer_timer.tick() => {
                    self.advance_layer().await;
                }
                _ = monitor_timer.tick() => {
                    self.log_status().await;
                }
            }
        }
    }

    /// One layer-timer tick: advance the layer and report finality.
    async fn advance_layer(&self) {
        let mut pos = self.handle.pos.write().await;
        pos.advance_layer();
        let layer = pos.current_layer();
        if pos.soft_final(layer) {
            tracing::info!(layer, "Layer achieved SOFT finality");
        }
        if pos.hard_final() {
            tracing::info!(layer, "Current epoch achieved HARD finality");
        }
        tracing::debug!(layer, "Advanced layer");
    }

    async fn log_status(&self) {
        let layer = self.handle.pos.read().await.current_layer();
        let blocks = self.handle.graph.read().await.len();
        let mempool = self.handle.mempool.read().await.size();
        tracing::info!(layer, blocks, mempool, "Node status");
    }

    /// Graceful shutdown in dependency order: producer first (no new
    /// blocks), then gossip, then the block store. In-flight store writes
    /// complete before the log handle is dropped.
    async fn shutdown(&self) {
        let deadline = Duration::from_secs(crate::constants::SHUTDOWN_TIMEOUT_SECS);
        let sequence = async {
            self.producer.stop();
            // Gossip adapters observe the same cancellation token and stop
            // on their own; the channel half simply drains.
            if let Err(e) = self.handle.store.close() {
                tracing::error!(error = %e, "Failed to close block store");
            }
        };
        if tokio::time::timeout(deadline, sequence).await.is_err() {
            tracing::error!("Shutdown timed out");
        }
        tracing::info!("Node shutdown complete");
    }
}
