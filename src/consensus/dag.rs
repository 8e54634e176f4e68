//! The block DAG and its GHOSTDAG total ordering.
//!
//! Unlike a linear chain, every block may reference several parents. The
//! graph maintains a children index alongside the block map, so tip and
//! anticone queries never walk the full vertex set more than once.
//!
//! Ordering is by blue score (descending), then blue work (descending),
//! then hash (lexicographic ascending) — deterministic for any block set.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};

use crate::crypto::{self, Domain};
use crate::transaction::{put_bytes, Transaction};

/// A block: one vertex in the DAG.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Block {
    /// Hex content digest (the literal `genesis` for the genesis block).
    pub hash: String,
    /// Ordered parent hashes; empty only for genesis.
    pub parents: Vec<String>,
    /// Strictly greater than every parent's height; genesis is 0.
    pub height: i64,
    /// GHOSTDAG blue score: the primary ordering key.
    pub blue_score: i64,
    /// Accumulated blue work: the secondary ordering key.
    pub blue_work: i64,
    /// The distinguished parent on the main chain; empty when unset.
    #[serde(default)]
    pub selected_parent: String,
    /// Unix seconds.
    pub timestamp: i64,
    /// Hex-encoded post-quantum signature over the canonical preimage.
    pub signature: String,
    /// Transactions carried by this block, in inclusion order.
    #[serde(default)]
    pub transactions: Vec<Transaction>,
    /// Validator that produced the block.
    pub producer_id: String,
    /// Keccak-256 hex of the producer's public key.
    pub producer_pubkey_hash: String,
}

impl Block {
    /// The genesis block: height 0, no parents, sentinel hash.
    pub fn genesis(timestamp: i64) -> Self {
        Block {
            hash: crate::constants::GENESIS_HASH.to_string(),
            parents: vec![],
            height: 0,
            blue_score: 0,
            blue_work: 0,
            selected_parent: String::new(),
            timestamp,
            signature: String::new(),
            transactions: vec![],
            producer_id: String::new(),
            producer_pubkey_hash: String::new(),
        }
    }

    /// Canonical hash preimage over the content fields.
    ///
    /// Protocol-defined layout (the signature is NOT part of the preimage):
    /// variable-length fields are length-prefixed with a big-endian `u32`,
    /// lists carry a big-endian `u32` element count, integers are fixed-width
    /// big-endian:
    ///
    /// ```text
    /// count(parents) || { len || parent }*
    /// || height:i64 || blue_score:i64 || blue_work:i64
    /// || len || selected_parent
    /// || timestamp:i64
    /// || len || producer_id || len || producer_pubkey_hash
    /// || count(transactions) || { len || tx_hash }*
    /// ```
    pub fn preimage(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(256);
        out.extend_from_slice(&(self.parents.len() as u32).to_be_bytes());
        for parent in &self.parents {
            put_bytes(&mut out, parent.as_bytes());
        }
        out.extend_from_slice(&self.height.to_be_bytes());
        out.extend_from_slice(&self.blue_score.to_be_bytes());
        out.extend_from_slice(&self.blue_work.to_be_bytes());
        put_bytes(&mut out, self.selected_parent.as_bytes());
        out.extend_from_slice(&self.timestamp.to_be_bytes());
        put_bytes(&mut out, self.producer_id.as_bytes());
        put_bytes(&mut out, self.producer_pubkey_hash.as_bytes());
        out.extend_from_slice(&(self.transactions.len() as u32).to_be_bytes());
        for tx in &self.transactions {
            put_bytes(&mut out, tx.hash.as_bytes());
        }
        out
    }

    /// The canonical content hash: hex(Keccak-256(preimage)).
    pub fn compute_hash(&self) -> String {
        crypto::keccak256_hex(&self.preimage())
    }

    /// Sign the canonical preimage under the CONSENSUS domain.
    pub fn sign(&self, keypair: &crate::crypto::keys::PqKeypair, chain_id: &str) -> String {
        hex::encode(keypair.sign_with_domain(Domain::Consensus, chain_id, &self.preimage()))
    }

    /// Whether this is the genesis block.
    pub fn is_genesis(&self) -> bool {
        self.hash == crate::constants::GENESIS_HASH
    }

    /// Hashes of the carried transactions, in inclusion order.
    pub fn tx_hashes(&self) -> Vec<String> {
        self.transactions.iter().map(|tx| tx.hash.clone()).collect()
    }
}

/// Structural graph faults. Fatal to the block, never to the node.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    #[error("duplicate block {0}")]
    DuplicateBlock(String),
    #[error("block {block} references missing parent {parent}")]
    MissingParent { block: String, parent: String },
    #[error("cycle detected: block height {height} <= parent height {parent_height}")]
    CycleDetected { height: i64, parent_height: i64 },
    #[error("selected parent {selected} of block {block} is not among its parents")]
    SelectedParentNotInParents { block: String, selected: String },
    #[error("block {0} not found")]
    UnknownBlock(String),
}

/// Ordering key wrapper so a [`BinaryHeap`] pops blocks in consensus order.
struct OrderKey {
    blue_score: i64,
    blue_work: i64,
    hash: String,
}

impl PartialEq for OrderKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}
impl Eq for OrderKey {}

impl PartialOrd for OrderKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OrderKey {
    fn cmp(&self, other: &Self) -> Ordering {
        // Max-heap: higher blue score first, then higher blue work, then
        // lexicographically smaller hash.
        self.blue_score
            .cmp(&other.blue_score)
            .then(self.blue_work.cmp(&other.blue_work))
            .then_with(|| other.hash.cmp(&self.hash))
    }
}

/// The in-memory block DAG.
#[derive(Debug, Default)]
pub struct BlockGraph {
    blocks: HashMap<String, Block>,
    /// Reverse edges: parent hash -> child hashes.
    children: HashMap<String, Vec<String>>,
}

impl BlockGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a block.
    ///
    /// Rejects duplicates, unresolvable parents, any parent at a height not
    /// strictly below the block (the cycle guard), and a selected parent
    /// outside the parent list.
    pub fn add(&mut self, block: Block) -> Result<(), GraphError> {
        if self.blocks.contains_key(&block.hash) {
            return Err(GraphError::DuplicateBlock(block.hash));
        }
        for parent in &block.parents {
            let parent_block =
                self.blocks
                    .get(parent)
                    .ok_or_else(|| GraphError::MissingParent {
                        block: block.hash.clone(),
                        parent: parent.clone(),
                    })?;
            if block.height <= parent_block.height {
                return Err(GraphError::CycleDetected {
                    height: block.height,
                    parent_height: parent_block.height,
                });
            }
        }
        if !block.selected_parent.is_empty() && !block.parents.contains(&block.selected_parent) {
            return Err(GraphError::SelectedParentNotInParents {
                block: block.hash.clone(),
                selected: block.selected_parent.clone(),
            });
        }

        for parent in &block.parents {
            self.children
                .entry(parent.clone())
                .or_default()
                .push(block.hash.clone());
        }
        self.blocks.insert(block.hash.clone(), block);
        Ok(())
    }

    /// Fetch a block by hash.
    pub fn get(&self, hash: &str) -> Option<&Block> {
        self.blocks.get(hash)
    }

    pub fn contains(&self, hash: &str) -> bool {
        self.blocks.contains_key(hash)
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// All blocks in consensus order: blue score descending, blue work
    /// descending, hash ascending. Deterministic for identical block sets.
    pub fn total_order(&self) -> Vec<&Block> {
        let mut heap: BinaryHeap<OrderKey> = self
            .blocks
            .values()
            .map(|b| OrderKey {
                blue_score: b.blue_score,
                blue_work: b.blue_work,
                hash: b.hash.clone(),
            })
            .collect();

        let mut ordered = Vec::with_capacity(self.blocks.len());
        while let Some(key) = heap.pop() {
            ordered.push(&self.blocks[&key.hash]);
        }
        ordered
    }

    /// The selected-parent chain from genesis to `hash`, inclusive.
    pub fn selected_parent_chain(&self, hash: &str) -> Result<Vec<&Block>, GraphError> {
        let mut chain = VecDeque::new();
        let mut current = hash.to_string();
        while !current.is_empty() {
            let block = self
                .blocks
                .get(&current)
                .ok_or_else(|| GraphError::UnknownBlock(current.clone()))?;
            chain.push_front(block);
            current = block.selected_parent.clone();
        }
        Ok(chain.into())
    }

    /// Blue score along the selected-parent chain: the selected parent's
    /// score plus one, with genesis scoring 1.
    pub fn blue_score_of(&self, hash: &str) -> Result<i64, GraphError> {
        Ok(self.selected_parent_chain(hash)?.len() as i64)
    }

    /// The reflexive past-cone of `hash`: the block itself plus everything
    /// reachable over parent edges.
    fn past(&self, hash: &str) -> HashSet<String> {
        let mut past = HashSet::new();
        let mut queue = VecDeque::from([hash.to_string()]);
        while let Some(current) = queue.pop_front() {
            if !past.insert(current.clone()) {
                continue;
            }
            if let Some(block) = self.blocks.get(&current) {
                for parent in &block.parents {
                    if !past.contains(parent) {
                        queue.push_back(parent.clone());
                    }
                }
            }
        }
        past
    }

    /// Blocks outside the past-cone of `hash`, excluding `hash` itself.
    pub fn anticone(&self, hash: &str) -> Result<Vec<&Block>, GraphError> {
        if !self.blocks.contains_key(hash) {
            return Err(GraphError::UnknownBlock(hash.to_string()));
        }
        let past = self.past(hash);
        let mut anticone: Vec<&Block> = self
            .blocks
            .values()
            .filter(|b| b.hash != hash && !past.contains(&b.hash))
            .collect();
        anticone.sort_by(|a, b| a.height.cmp(&b.height).then_with(|| a.hash.cmp(&b.hash)));
        Ok(anticone)
    }

    /// Current tips: blocks with no child, sorted by height ascending then
    /// hash ascending.
    pub fn tips(&self) -> Vec<&Block> {
        let mut tips: Vec<&Block> = self
            .blocks
            .values()
            .filter(|b| !self.children.contains_key(&b.hash))
            .collect();
        tips.sort_by(|a, b| a.height.cmp(&b.height).then_with(|| a.hash.cmp(&b.hash)));
        tips
    }

    /// Structural self-check: parents resolvable, selected parent a member
    /// of the parent list. (Duplicates cannot occur post-insert; the map key
    /// is the hash.)
    pub fn validate(&self) -> Result<(), GraphError> {
        for block in self.blocks.values() {
            for parent in &block.parents {
                if !self.blocks.contains_key(parent) {
                    return Err(GraphError::MissingParent {
                        block: block.hash.clone(),
                        parent: parent.clone(),
                    });
                }
            }
            if !block.selected_parent.is_empty()
                && !block.parents.contains(&block.selected_parent)
            {
                return Err(GraphError::SelectedParentNotInParents {
                    block: block.hash.clone(),
                    selected: block.selected_parent.clone(),
                });
            }
        }
        Ok(())
    }
}
