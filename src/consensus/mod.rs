//! Consensus: the GHOSTDAG block graph, the proof-of-stake engine, and the
//! block validation pipeline that gates entry into the DAG.

pub mod dag;
pub mod pos;
pub mod validation;

pub use dag::{Block, BlockGraph, GraphError};
pub use pos::{LeaderRandomness, OsRandomness, PosEngine, SeededRandomness, Validator};
pub use validation::{validate_block, BlockError, SignatureFault, TimestampFault};
