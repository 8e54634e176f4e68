//! Deterministic, crash-consistent block persistence.
//!
//! Each block lives in exactly one write-once file named
//! `<height>_<hash>.json` under `<data_dir>/blocks/`, and every store
//! appends one JSON-framed line to `<data_dir>/blocks.log`, fsynced before
//! the call returns. The log is the source of truth at replay: a partial
//! block file without its log line is treated as uncommitted.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::config::GenesisConfig;
use crate::consensus::dag::Block;

/// Storage faults. `Io` covers block files, `Log` the append-only log; a
/// failed log append means the block must be treated as uncommitted.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store I/O error: {0}")]
    Io(#[source] std::io::Error),
    #[error("log I/O error: {0}")]
    Log(#[source] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("block {0} not found")]
    NotFound(String),
    #[error("block store is closed")]
    Closed,
}

/// One line of the append-only log.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LogRecord {
    pub action: String,
    pub height: i64,
    pub hash: String,
    pub timestamp: i64,
    pub parents: Vec<String>,
}

/// The on-disk block store.
pub struct BlockStore {
    block_dir: PathBuf,
    genesis_file: PathBuf,
    /// Serialized append handle; `None` once closed.
    log: Mutex<Option<File>>,
}

impl BlockStore {
    /// Open (or create) a store rooted at `data_dir`.
    pub fn open(data_dir: &Path) -> Result<Self, StoreError> {
        let block_dir = data_dir.join("blocks");
        std::fs::create_dir_all(&block_dir).map_err(StoreError::Io)?;
        let log_file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(data_dir.join("blocks.log"))
            .map_err(StoreError::Log)?;
        Ok(BlockStore {
            block_dir,
            genesis_file: data_dir.join("genesis.json"),
            log: Mutex::new(Some(log_file)),
        })
    }

    /// Persist a block: write its file, then append and fsync the log
    /// record. Durability is reached only when the log sync succeeds.
    /// Write-once: storing a block whose file already exists is a no-op.
    pub fn store(&self, block: &Block) -> Result<(), StoreError> {
        let path = self.block_path(block.height, &block.hash);
        if path.exists() {
            return Ok(());
        }
        let json = serde_json::to_vec_pretty(block)?;
        std::fs::write(&path, json).map_err(StoreError::Io)?;

        let record = LogRecord {
            action: "store_block".into(),
            height: block.height,
            hash: block.hash.clone(),
            timestamp: block.timestamp,
            parents: block.parents.clone(),
        };
        let mut line = serde_json::to_vec(&record)?;
        line.push(b'\n');

        let mut guard = self.log.lock().expect("log mutex poisoned");
        let log = guard.as_mut().ok_or(StoreError::Closed)?;
        log.write_all(&line).map_err(StoreError::Log)?;
        log.sync_all().map_err(StoreError::Log)?;
        Ok(())
    }

    /// All stored blocks, sorted by height ascending then hash ascending.
    pub fn load(&self) -> Result<Vec<Block>, StoreError> {
        let mut entries: Vec<(i64, String, PathBuf)> = Vec::new();
        for entry in std::fs::read_dir(&self.block_dir).map_err(StoreError::Io)? {
            let entry = entry.map_err(StoreError::Io)?;
            let path = entry.path();
            let Some((height, hash)) = parse_block_filename(&path) else {
                continue;
            };
            entries.push((height, hash, path));
        }
        entries.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));

        let mut blocks = Vec::with_capacity(entries.len());
        for (_, _, path) in entries {
            let raw = std::fs::read(&path).map_err(StoreError::Io)?;
            blocks.push(serde_json::from_slice(&raw)?);
        }
        Ok(blocks)
    }

    /// Locate a single block by hash. Scans file names; acceptable at this
    /// scale.
    pub fn get(&self, hash: &str) -> Result<Block, StoreError> {
        for entry in std::fs::read_dir(&self.block_dir).map_err(StoreError::Io)? {
            let entry = entry.map_err(StoreError::Io)?;
            let path = entry.path();
            let Some((_, file_hash)) = parse_block_filename(&path) else {
                continue;
            };
            if file_hash == hash {
                let raw = std::fs::read(&path).map_err(StoreError::Io)?;
                return Ok(serde_json::from_slice(&raw)?);
            }
        }
        Err(StoreError::NotFound(hash.to_string()))
    }

    /// The maximum stored height; zero when empty.
    pub fn finalized_height(&self) -> i64 {
        let Ok(entries) = std::fs::read_dir(&self.block_dir) else {
            return 0;
        };
        entries
            .flatten()
            .filter_map(|e| parse_block_filename(&e.path()).map(|(h, _)| h))
            .max()
            .unwrap_or(0)
    }

    /// Number of stored block files.
    pub fn count(&self) -> Result<usize, StoreError> {
        let entries = std::fs::read_dir(&self.block_dir).map_err(StoreError::Io)?;
        Ok(entries
            .flatten()
            .filter(|e| parse_block_filename(&e.path()).is_some())
            .count())
    }

    /// Remove every stored block (test support).
    pub fn clear(&self) -> Result<(), StoreError> {
        std::fs::remove_dir_all(&self.block_dir).map_err(StoreError::Io)?;
        std::fs::create_dir_all(&self.block_dir).map_err(StoreError::Io)?;
        Ok(())
    }

    /// Flush and drop the log handle. Further stores fail with `Closed`.
    pub fn close(&self) -> Result<(), StoreError> {
        let mut guard = self.log.lock().expect("log mutex poisoned");
        if let Some(log) = guard.take() {
            log.sync_all().map_err(StoreError::Log)?;
        }
        Ok(())
    }

    /// Persist the genesis configuration at `<data_dir>/genesis.json`.
    pub fn store_genesis(&self, genesis: &GenesisConfig) -> Result<(), StoreError> {
        let json = serde_json::to_vec_pretty(genesis)?;
        std::fs::write(&self.genesis_file, json).map_err(StoreError::Io)
    }

    /// Load the genesis configuration persisted by [`Self::store_genesis`].
    pub fn load_genesis(&self) -> Result<GenesisConfig, StoreError> {
        let raw = std::fs::read(&self.genesis_file).map_err(StoreError::Io)?;
        Ok(serde_json::from_slice(&raw)?)
    }

    fn block_path(&self, height: i64, hash: &str) -> PathBuf {
        self.block_dir.join(format!("{height}_{hash}.json"))
    }
}

/// Parse `<height>_<hash>.json`; hashes may themselves contain underscores.
fn parse_block_filename(path: &Path) -> Option<(i64, String)> {
    if path.extension().and_then(|e| e.to_str()) != Some("json") {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    let (height, hash) = stem.split_once('_')?;
    Some((height.parse().ok()?, hash.to_string()))
}
