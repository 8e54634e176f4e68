//! The block producer: timer-driven assembly of blocks from mempool
//! transactions.
//!
//! Every tick the producer samples a leader by stake, drains a bounded batch
//! from the mempool under per-account nonce ordering and the block gas
//! budget, assembles a block over the current tips, signs it with the
//! leader's post-quantum key, runs the full validation pipeline, and commits:
//! graph insert, durable store, gossip publish, layer advance. Any failure
//! before the graph insert returns the selected transactions to the mempool
//! untouched.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::consensus::dag::{Block, BlockGraph, GraphError};
use crate::consensus::pos::{PosEngine, Validator};
use crate::consensus::validation::{validate_block, BlockError};
use crate::crypto::keys::Keyring;
use crate::mempool::Mempool;
use crate::network::GossipPort;
use crate::storage::{BlockStore, StoreError};
use crate::transaction::Transaction;

/// Producer configuration, sourced from genesis `dag_config` plus gas policy.
#[derive(Clone, Debug)]
pub struct ProducerConfig {
    pub block_interval: Duration,
    pub max_txs_per_block: usize,
    pub min_txs_per_block: usize,
    pub max_block_size: usize,
    /// Block gas budget.
    pub max_gas_limit: u64,
    pub min_gas_limit: u64,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        ProducerConfig {
            block_interval: Duration::from_secs(5),
            max_txs_per_block: 100,
            min_txs_per_block: 1,
            max_block_size: 1_000_000,
            max_gas_limit: crate::constants::DEFAULT_BLOCK_GAS_LIMIT,
            min_gas_limit: crate::constants::DEFAULT_MIN_BLOCK_GAS_LIMIT,
        }
    }
}

/// Faults aborting a production cycle.
#[derive(Debug, thiserror::Error)]
pub enum ProducerError {
    /// Transient: no validator available this cycle.
    #[error("no validator available")]
    NoValidator,
    /// This node holds no signing key for the sampled leader.
    #[error("no signing key for leader {0}")]
    MissingLeaderKey(String),
    #[error("block rejected: {0}")]
    Rejected(#[from] BlockError),
    #[error("graph insert failed: {0}")]
    Graph(#[from] GraphError),
    #[error("store failed: {0}")]
    Store(#[from] StoreError),
}

/// The block producer.
pub struct BlockProducer {
    graph: Arc<RwLock<BlockGraph>>,
    pos: Arc<RwLock<PosEngine>>,
    mempool: Arc<RwLock<Mempool>>,
    store: Arc<BlockStore>,
    keyring: Arc<Keyring>,
    gossip: Arc<dyn GossipPort>,
    chain_id: String,
    config: ProducerConfig,
    running: AtomicBool,
}

impl BlockProducer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        graph: Arc<RwLock<BlockGraph>>,
        pos: Arc<RwLock<PosEngine>>,
        mempool: Arc<RwLock<Mempool>>,
        store: Arc<BlockStore>,
        keyring: Arc<Keyring>,
        gossip: Arc<dyn GossipPort>,
        chain_id: String,
        config: ProducerConfig,
    ) -> Self {
        BlockProducer {
            graph,
            pos,
            mempool,
            store,
            keyring,
            gossip,
            chain_id,
            config,
            running: AtomicBool::new(false),
        }
    }

    /// Start the production loop. Idempotent: a second start while running
    /// is a no-op.
    pub fn start(self: &Arc<Self>, shutdown: CancellationToken) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!(
            interval = ?self.config.block_interval,
            max_txs = self.config.max_txs_per_block,
            "Starting block producer"
        );
        let producer = Arc::clone(self);
        tokio::spawn(async move {
            producer.run(shutdown).await;
        });
    }

    /// Stop the production loop. Idempotent.
    pub fn stop(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            tracing::info!("Block producer stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    async fn run(&self, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.block_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    self.stop();
                    break;
                }
                _ = interval.tick() => {
                    if !self.is_running() {
                        break;
                    }
                    match self.produce_once().await {
                        Ok(block) => {
                            tracing::info!(
                                hash = %block.hash,
                                height = block.height,
                                txs = block.transactions.len(),
                                producer = %block.producer_id,
                                "Produced block"
                            );
                        }
                        Err(ProducerError::NoValidator) => {
                            tracing::debug!("No validator available, skipping cycle");
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "Failed to produce block");
                        }
                    }
                }
            }
        }
    }

    /// Run one full production cycle. Public so the RPC layer (and tests)
    /// can force a block.
    pub async fn produce_once(&self) -> Result<Block, ProducerError> {
        // 1. Leader selection.
        let leader = {
            let mut pos = self.pos.write().await;
            pos.select_leader().cloned().ok_or(ProducerError::NoValidator)?
        };

        // 2. Transaction selection.
        let transactions = self.select_transactions().await;

        // 3–5. Assembly, validation, graph insert. Any failure here rolls
        // the selected transactions back into the mempool.
        let block = match self.assemble_and_insert(&leader, transactions.clone()).await {
            Ok(block) => block,
            Err(e) => {
                self.return_to_mempool(transactions).await;
                return Err(e);
            }
        };

        // 6. Commit tail: the block is in the DAG. A store failure aborts
        // the cycle before the layer advances, but the transactions stay in
        // the block; the log is the durability authority.
        self.store.store(&block)?;
        self.gossip.publish_block(&block);

        let mut pos = self.pos.write().await;
        pos.advance_layer();
        let layer = pos.current_layer().max(0) as u64;
        pos.record_participation(layer, &leader.id);
        Ok(block)
    }

    /// Draw candidates and apply the inclusion rules: per-account nonce
    /// ordering, the skip rule, the gas budget, re-validation, and the
    /// minimum-batch rule.
    async fn select_transactions(&self) -> Vec<Transaction> {
        let mut mempool = self.mempool.write().await;
        if mempool.size() == 0 {
            return Vec::new();
        }
        let candidates = mempool.pop(self.config.max_txs_per_block);
        let (ordered, returned) = order_candidates(candidates, self.config.max_gas_limit);
        for tx in returned {
            if let Err(e) = mempool.add(tx) {
                tracing::warn!(error = %e, "Failed to return transaction to mempool");
            }
        }

        // Defense in depth: anything that no longer validates is dropped.
        let mut selected = Vec::with_capacity(ordered.len());
        for tx in ordered {
            match mempool.validate(&tx) {
                Ok(()) => selected.push(tx),
                Err(e) => {
                    tracing::warn!(hash = %tx.hash, error = %e, "Dropping invalid transaction");
                }
            }
        }

        // A batch below the minimum goes back whole; the cycle produces an
        // empty block instead.
        if !selected.is_empty() && selected.len() < self.config.min_txs_per_block {
            tracing::debug!(
                count = selected.len(),
                min = self.config.min_txs_per_block,
                "Batch below minimum, producing empty block"
            );
            for tx in selected {
                if let Err(e) = mempool.add(tx) {
                    tracing::warn!(error = %e, "Failed to return transaction to mempool");
                }
            }
            return Vec::new();
        }
        selected
    }

    async fn assemble_and_insert(
        &self,
        leader: &Validator,
        transactions: Vec<Transaction>,
    ) -> Result<Block, ProducerError> {
        let keypair = self
            .keyring
            .get(&leader.id)
            .ok_or_else(|| ProducerError::MissingLeaderKey(leader.id.clone()))?;

        // Assemble over the current tips, then validate and insert under the
        // same graph lock so a concurrent gossip insert cannot interleave.
        let mut graph = self.graph.write().await;
        let block = assemble_block(&graph, leader, keypair, &self.chain_id, transactions);

        let mut pos = self.pos.write().await;
        validate_block(&block, &graph, &mut pos, &self.chain_id)?;
        graph.add(block.clone())?;
        Ok(block)
    }

    async fn return_to_mempool(&self, transactions: Vec<Transaction>) {
        if transactions.is_empty() {
            return;
        }
        let mut mempool = self.mempool.write().await;
        for tx in transactions {
            if let Err(e) = mempool.add(tx) {
                tracing::warn!(error = %e, "Failed to return transaction to mempool");
            }
        }
    }
}

/// Order gas-price-sorted candidates for inclusion.
///
/// Accounts are prioritized by their best candidate's gas price, but within
/// one account transactions are emitted nonce-ascending so the block honors
/// the strictly-increasing-nonce invariant. A candidate whose nonce does not
/// exceed the account's highest included nonce is skipped; once the running
/// gas total would exceed `max_gas_limit`, selection stops. Returns
/// `(selected, returned)` where `returned` preserves every skipped or unused
/// transaction.
pub fn order_candidates(
    candidates: Vec<Transaction>,
    max_gas_limit: u64,
) -> (Vec<Transaction>, Vec<Transaction>) {
    let mut account_order: Vec<String> = Vec::new();
    let mut by_account: HashMap<String, Vec<Transaction>> = HashMap::new();
    for tx in candidates {
        if !by_account.contains_key(&tx.from) {
            account_order.push(tx.from.clone());
        }
        by_account.entry(tx.from.clone()).or_default().push(tx);
    }
    for txs in by_account.values_mut() {
        txs.sort_by_key(|tx| tx.nonce);
    }

    let mut selected = Vec::new();
    let mut returned = Vec::new();
    let mut total_gas = 0u64;
    let mut budget_exhausted = false;

    for account in account_order {
        let txs = by_account.remove(&account).unwrap_or_default();
        let mut highest_included: Option<u64> = None;
        for tx in txs {
            if budget_exhausted {
                returned.push(tx);
                continue;
            }
            if highest_included.is_some_and(|h| tx.nonce <= h) {
                returned.push(tx);
                continue;
            }
            if total_gas + tx.gas_limit > max_gas_limit {
                budget_exhausted = true;
                returned.push(tx);
                continue;
            }
            total_gas += tx.gas_limit;
            highest_included = Some(tx.nonce);
            selected.push(tx);
        }
    }
    (selected, returned)
}

/// Assemble an unvalidated block over the graph's current tips, signed by
/// `keypair` under the CONSENSUS domain.
pub fn assemble_block(
    graph: &BlockGraph,
    leader: &Validator,
    keypair: &crate::crypto::keys::PqKeypair,
    chain_id: &str,
    transactions: Vec<Transaction>,
) -> Block {
    let tips = graph.tips();
    let parents: Vec<String> = if tips.is_empty() {
        vec![crate::constants::GENESIS_HASH.to_string()]
    } else {
        tips.iter().map(|b| b.hash.clone()).collect()
    };

    let height = parents
        .iter()
        .filter_map(|p| graph.get(p))
        .map(|b| b.height)
        .max()
        .unwrap_or(0)
        + 1;

    // Selected parent: the parent winning on (blue_score, blue_work) with
    // the lexicographically smallest hash as the tiebreak.
    let selected = parents
        .iter()
        .filter_map(|p| graph.get(p))
        .max_by(|a, b| {
            a.blue_score
                .cmp(&b.blue_score)
                .then(a.blue_work.cmp(&b.blue_work))
                .then_with(|| b.hash.cmp(&a.hash))
        });
    let (selected_parent, blue_score, blue_work) = match selected {
        Some(sp) => (
            sp.hash.clone(),
            sp.blue_score + 1,
            sp.blue_work + parents.len() as i64,
        ),
        None => (String::new(), 1, parents.len() as i64),
    };

    let mut block = Block {
        hash: String::new(),
        parents,
        height,
        blue_score,
        blue_work,
        selected_parent,
        timestamp: crate::unix_now(),
        signature: String::new(),
        transactions,
        producer_id: leader.id.clone(),
        producer_pubkey_hash: leader.pq_pubkey_hash.clone(),
    };
    block.signature = block.sign(keypair, chain_id);
    block.hash = block.compute_hash();
    block
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tx(from: &str, nonce: u64, gas_price: u128, gas_limit: u64) -> Transaction {
        Transaction::new(
            from,
            "0xdddddddddddddddddddddddddddddddddddddddd",
            100,
            gas_price,
            gas_limit,
            nonce,
            vec![],
            1_700_000_000,
        )
    }

    #[test]
    fn nonce_ascending_within_account() {
        // Higher-nonce tx carries the better gas price; inclusion must still
        // order nonce 1 before nonce 2.
        let candidates = vec![tx("a", 2, 50, 21_000), tx("a", 1, 10, 21_000)];
        let (selected, returned) = order_candidates(candidates, 1_000_000);
        let nonces: Vec<u64> = selected.iter().map(|t| t.nonce).collect();
        assert_eq!(nonces, vec![1, 2]);
        assert!(returned.is_empty());
    }

    #[test]
    fn duplicate_nonce_skipped() {
        let a = tx("a", 1, 50, 21_000);
        let b = tx("a", 1, 10, 21_000);
        let (selected, returned) = order_candidates(vec![a, b], 1_000_000);
        assert_eq!(selected.len(), 1);
        assert_eq!(returned.len(), 1);
    }

    #[test]
    fn gas_budget_stops_selection() {
        let candidates = vec![
            tx("a", 1, 50, 60_000),
            tx("b", 1, 40, 60_000),
            tx("c", 1, 30, 60_000),
        ];
        let (selected, returned) = order_candidates(candidates, 130_000);
        assert_eq!(selected.len(), 2);
        assert_eq!(returned.len(), 1);
        assert_eq!(returned[0].from, "c");
    }

    #[test]
    fn accounts_keep_gas_price_priority() {
        let candidates = vec![
            tx("rich", 1, 100, 21_000),
            tx("poor", 1, 1, 21_000),
            tx("rich", 2, 90, 21_000),
        ];
        let (selected, _) = order_candidates(candidates, 1_000_000);
        let order: Vec<(&str, u64)> = selected
            .iter()
            .map(|t| (t.from.as_str(), t.nonce))
            .collect();
        assert_eq!(order, vec![("rich", 1), ("rich", 2), ("poor", 1)]);
    }

    #[test]
    fn empty_candidates() {
        let (selected, returned) = order_candidates(vec![], 1_000_000);
        assert!(selected.is_empty());
        assert!(returned.is_empty());
    }
}
