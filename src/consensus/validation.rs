//! The block validation pipeline.
//!
//! Every block — locally produced or received over gossip — runs the full
//! check sequence before it may enter the DAG: hash correctness, producer
//! identity, parent resolution, temporal window, acyclicity, signature, and
//! authorization. The first failure aborts with a kind-tagged error; on
//! success the producer's participation is recorded for the block's layer.

use crate::consensus::dag::{Block, BlockGraph, GraphError};
use crate::consensus::pos::PosEngine;
use crate::constants::{
    GENESIS_HASH, MAX_FUTURE_DRIFT_SECS, MAX_PAST_DRIFT_SECS, MIN_SIGNATURE_BYTES,
};
use crate::crypto::keys::PqPublicKey;
use crate::crypto::Domain;

/// Direction of a timestamp violation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimestampFault {
    TooFarFuture,
    TooFarPast,
}

/// What went wrong with a block signature.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SignatureFault {
    Empty,
    MalformedHex,
    TooShort,
    AllZeros,
    VerifyFailed,
}

/// Block-level validation faults. Fatal to the block, never to the node.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum BlockError {
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error("invalid hash: expected {expected}, got {got}")]
    InvalidHash { expected: String, got: String },
    #[error("invalid timestamp ({fault:?}): block {timestamp}, now {now}")]
    InvalidTimestamp {
        fault: TimestampFault,
        timestamp: i64,
        now: i64,
    },
    #[error("invalid signature: {0:?}")]
    InvalidSignature(SignatureFault),
    #[error("unknown block producer: {0}")]
    UnknownProducer(String),
    #[error("producer key hash mismatch for {producer}: expected {expected}, got {got}")]
    ProducerKeyHashMismatch {
        producer: String,
        expected: String,
        got: String,
    },
    #[error("producer {0} is not an authorized validator")]
    NotAuthorized(String),
}

/// Run the full pipeline against the current wall clock.
///
/// On success the producer's participation is recorded under the block's
/// height.
pub fn validate_block(
    block: &Block,
    graph: &BlockGraph,
    pos: &mut PosEngine,
    chain_id: &str,
) -> Result<(), BlockError> {
    validate_block_at(block, graph, pos, chain_id, crate::unix_now())
}

/// Run the full pipeline with an explicit `now` (Unix seconds).
pub fn validate_block_at(
    block: &Block,
    graph: &BlockGraph,
    pos: &mut PosEngine,
    chain_id: &str,
    now: i64,
) -> Result<(), BlockError> {
    check_hash(block)?;
    check_producer(block, pos)?;
    check_parents(block, graph)?;
    check_timestamp(block, now)?;
    check_acyclicity(block, graph)?;
    check_signature(block, pos, chain_id)?;
    check_authorization(block, pos)?;

    pos.record_participation(block.height.max(0) as u64, &block.producer_id);
    tracing::debug!(
        hash = %block.hash,
        height = block.height,
        producer = %block.producer_id,
        "Block validated"
    );
    Ok(())
}

/// 1. Recomputed canonical hash matches. The literal `genesis` is allowed.
fn check_hash(block: &Block) -> Result<(), BlockError> {
    if block.hash == GENESIS_HASH {
        return Ok(());
    }
    let expected = block.compute_hash();
    if block.hash != expected {
        return Err(BlockError::InvalidHash {
            expected,
            got: block.hash.clone(),
        });
    }
    Ok(())
}

/// 2. Producer is a known validator and its key hash matches the record.
fn check_producer(block: &Block, pos: &PosEngine) -> Result<(), BlockError> {
    if block.is_genesis() {
        return Ok(());
    }
    let expected = pos
        .validator_pq_hash(&block.producer_id)
        .ok_or_else(|| BlockError::UnknownProducer(block.producer_id.clone()))?;
    if block.producer_pubkey_hash != expected {
        return Err(BlockError::ProducerKeyHashMismatch {
            producer: block.producer_id.clone(),
            expected: expected.to_string(),
            got: block.producer_pubkey_hash.clone(),
        });
    }
    Ok(())
}

/// 3. Not a duplicate; every parent resolvable.
fn check_parents(block: &Block, graph: &BlockGraph) -> Result<(), BlockError> {
    if graph.contains(&block.hash) {
        return Err(GraphError::DuplicateBlock(block.hash.clone()).into());
    }
    for parent in &block.parents {
        if !graph.contains(parent) {
            return Err(GraphError::MissingParent {
                block: block.hash.clone(),
                parent: parent.clone(),
            }
            .into());
        }
    }
    Ok(())
}

/// 4. Timestamp within `[now - 3600, now + 300]`.
fn check_timestamp(block: &Block, now: i64) -> Result<(), BlockError> {
    if block.timestamp > now + MAX_FUTURE_DRIFT_SECS {
        return Err(BlockError::InvalidTimestamp {
            fault: TimestampFault::TooFarFuture,
            timestamp: block.timestamp,
            now,
        });
    }
    if block.timestamp < now - MAX_PAST_DRIFT_SECS {
        return Err(BlockError::InvalidTimestamp {
            fault: TimestampFault::TooFarPast,
            timestamp: block.timestamp,
            now,
        });
    }
    Ok(())
}

/// 5. Height strictly above every parent (no cycles by layer ordering).
fn check_acyclicity(block: &Block, graph: &BlockGraph) -> Result<(), BlockError> {
    for parent in &block.parents {
        if let Some(parent_block) = graph.get(parent) {
            if block.height <= parent_block.height {
                return Err(GraphError::CycleDetected {
                    height: block.height,
                    parent_height: parent_block.height,
                }
                .into());
            }
        }
    }
    Ok(())
}

/// 6. Signature decodes, clears the size floor, is not all zeros, and — when
/// the producer's full public key is registered — verifies under the
/// CONSENSUS domain against the canonical preimage.
fn check_signature(block: &Block, pos: &PosEngine, chain_id: &str) -> Result<(), BlockError> {
    if block.is_genesis() {
        return Ok(());
    }
    if block.signature.is_empty() {
        return Err(BlockError::InvalidSignature(SignatureFault::Empty));
    }
    let bytes = hex::decode(&block.signature)
        .map_err(|_| BlockError::InvalidSignature(SignatureFault::MalformedHex))?;
    if bytes.len() < MIN_SIGNATURE_BYTES {
        return Err(BlockError::InvalidSignature(SignatureFault::TooShort));
    }
    if bytes.iter().all(|&b| b == 0) {
        return Err(BlockError::InvalidSignature(SignatureFault::AllZeros));
    }

    if let Some(key_bytes) = pos
        .get(&block.producer_id)
        .and_then(|v| v.pq_public_key.clone())
    {
        let public = PqPublicKey::from_bytes(key_bytes)
            .ok_or(BlockError::InvalidSignature(SignatureFault::VerifyFailed))?;
        if !public.verify_with_domain(Domain::Consensus, chain_id, &block.preimage(), &bytes) {
            return Err(BlockError::InvalidSignature(SignatureFault::VerifyFailed));
        }
    }
    Ok(())
}

/// 7. The producer is among the currently active validators.
fn check_authorization(block: &Block, pos: &PosEngine) -> Result<(), BlockError> {
    if block.is_genesis() {
        return Ok(());
    }
    if !pos
        .active_validators()
        .iter()
        .any(|v| v.id == block.producer_id)
    {
        return Err(BlockError::NotAuthorized(block.producer_id.clone()));
    }
    Ok(())
}
