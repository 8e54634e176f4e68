//! Startup replay: deterministic reconstruction of the DAG from disk.
//!
//! On process start the genesis block is constructed from the genesis
//! configuration and inserted, then every stored block is loaded in
//! `(height, hash)` order and pushed through the full validation pipeline
//! before insertion. Any failure is fatal to startup: a node that cannot
//! reproduce its own history must not produce on top of it.

use crate::config::GenesisConfig;
use crate::consensus::dag::{Block, BlockGraph, GraphError};
use crate::consensus::pos::PosEngine;
use crate::consensus::validation::{validate_block, BlockError};
use crate::storage::{BlockStore, StoreError};

/// Faults that abort startup.
#[derive(Debug, thiserror::Error)]
pub enum ReplayError {
    #[error("failed to load blocks from disk: {0}")]
    Store(#[from] StoreError),
    #[error("failed to insert block during replay: {0}")]
    Graph(#[from] GraphError),
    #[error("block {hash} failed validation during replay: {source}")]
    Rejected { hash: String, source: BlockError },
    #[error("no tips found in DAG after replay")]
    EmptyDag,
    #[error("replay verification failed: head {head} != expected {expected}")]
    HeadMismatch { head: String, expected: String },
}

/// Summary of a completed replay.
#[derive(Clone, Copy, Debug, Default)]
pub struct ReplayReport {
    /// Blocks restored from disk (genesis excluded).
    pub replayed: usize,
    /// Highest block height observed.
    pub head_height: i64,
}

/// Rebuild the DAG: genesis first, then every stored block, validated.
pub fn replay(
    genesis: &GenesisConfig,
    graph: &mut BlockGraph,
    pos: &mut PosEngine,
    store: &BlockStore,
) -> Result<ReplayReport, ReplayError> {
    let genesis_block = Block::genesis(genesis.timestamp);
    if !graph.contains(&genesis_block.hash) {
        graph.add(genesis_block)?;
    }

    let blocks = store.load()?;
    let mut report = ReplayReport::default();
    for block in blocks {
        if block.is_genesis() {
            continue;
        }
        validate_block(&block, graph, pos, &genesis.chain_id).map_err(|source| {
            ReplayError::Rejected {
                hash: block.hash.clone(),
                source,
            }
        })?;
        report.head_height = report.head_height.max(block.height);
        graph.add(block)?;
        report.replayed += 1;
    }

    tracing::info!(
        replayed = report.replayed,
        head_height = report.head_height,
        "Replay complete"
    );
    Ok(report)
}

/// Compare the first tip against an externally supplied expected head.
pub fn verify_head(graph: &BlockGraph, expected: &str) -> Result<(), ReplayError> {
    let tips = graph.tips();
    let head = tips.first().ok_or(ReplayError::EmptyDag)?;
    if head.hash != expected {
        return Err(ReplayError::HeadMismatch {
            head: head.hash.clone(),
            expected: expected.to_string(),
        });
    }
    Ok(())
}
