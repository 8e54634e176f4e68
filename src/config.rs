//! Genesis and node configuration.
//!
//! The genesis file (JSON) fixes the chain identity, the validator set, the
//! DAG parameters, the post-quantum scheme, and the finality thresholds.
//! An optional `lattice.toml` in the data directory supplies node defaults;
//! CLI flags override config-file values.

use std::path::Path;

use serde::{Deserialize, Serialize};

/// Configuration faults. Fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid genesis: {0}")]
    Invalid(String),
}

/// A validator entry in genesis.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GenesisValidator {
    pub id: String,
    pub pq_pubkey_hash: String,
    #[serde(default)]
    pub pq_public_key: String,
    pub stake: u64,
    pub weight: u64,
}

/// DAG parameters.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DagConfig {
    pub max_block_size: usize,
    /// Seconds between layers; fractional values allowed.
    pub layer_interval: f64,
    pub max_transactions_per_layer: usize,
    pub max_parents_per_vertex: usize,
    pub selected_parent_rule: String,
    pub anticone_size_limit: usize,
    pub blue_score_window: usize,
    pub max_txs_per_block: usize,
    pub min_txs_per_block: usize,
}

impl Default for DagConfig {
    fn default() -> Self {
        DagConfig {
            max_block_size: 1_000_000,
            layer_interval: 5.0,
            max_transactions_per_layer: 1_000,
            max_parents_per_vertex: 8,
            selected_parent_rule: "ghostdag".into(),
            anticone_size_limit: 32,
            blue_score_window: 100,
            max_txs_per_block: 100,
            min_txs_per_block: 1,
        }
    }
}

/// Post-quantum scheme parameters.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PqConfig {
    pub scheme: String,
    pub hash_algo: String,
    pub public_key_size: usize,
    pub signature_size: usize,
    /// Signing timeout in milliseconds.
    pub sign_timeout: u64,
}

impl Default for PqConfig {
    fn default() -> Self {
        PqConfig {
            scheme: "CRYSTALS-Dilithium2".into(),
            hash_algo: "Keccak-256".into(),
            public_key_size: crate::crypto::keys::DILITHIUM2_PK_BYTES,
            signature_size: crate::crypto::keys::DILITHIUM2_SIG_BYTES,
            sign_timeout: 5_000,
        }
    }
}

/// Finality thresholds.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct FinalityConfig {
    /// Fraction of stake that must participate for soft finality.
    pub soft_finality_threshold: f64,
    /// Consecutive-layer window for soft finality.
    pub soft_finality_layers: i64,
    /// Fraction of stake that must participate for hard finality.
    pub hard_finality_threshold: f64,
    /// Epoch window in seconds for hard finality.
    pub hard_finality_epoch_window: i64,
}

impl Default for FinalityConfig {
    fn default() -> Self {
        FinalityConfig {
            soft_finality_threshold: 0.67,
            soft_finality_layers: 3,
            hard_finality_threshold: 0.9,
            hard_finality_epoch_window: 600,
        }
    }
}

/// The genesis configuration file.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GenesisConfig {
    pub chain_id: String,
    pub network_name: String,
    pub timestamp: i64,
    pub validators: Vec<GenesisValidator>,
    pub dag_config: DagConfig,
    pub pq_config: PqConfig,
    pub finality_config: FinalityConfig,
}

impl GenesisConfig {
    /// Load and validate a genesis file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let genesis: GenesisConfig = serde_json::from_str(&raw)?;
        genesis.validate()?;
        Ok(genesis)
    }

    /// Structural validation of genesis content.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chain_id.is_empty() {
            return Err(ConfigError::Invalid("chain_id is empty".into()));
        }
        for (i, v) in self.validators.iter().enumerate() {
            if v.id.is_empty() {
                return Err(ConfigError::Invalid(format!("validator {i} has no id")));
            }
            if v.pq_pubkey_hash.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "validator {} ({}) has missing PQ public key hash",
                    i, v.id
                )));
            }
        }
        if self.dag_config.layer_interval <= 0.0 {
            return Err(ConfigError::Invalid("layer_interval must be positive".into()));
        }
        let f = &self.finality_config;
        for (name, value) in [
            ("soft_finality_threshold", f.soft_finality_threshold),
            ("hard_finality_threshold", f.hard_finality_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::Invalid(format!("{name} must be in [0, 1]")));
            }
        }
        Ok(())
    }

    /// Convert genesis validator entries into PoS validator records,
    /// decoding full public keys where present.
    pub fn pos_validators(&self) -> Vec<crate::consensus::pos::Validator> {
        self.validators
            .iter()
            .map(|v| crate::consensus::pos::Validator {
                id: v.id.clone(),
                stake: v.stake,
                weight: v.weight,
                pq_pubkey_hash: v.pq_pubkey_hash.clone(),
                pq_public_key: if v.pq_public_key.is_empty() {
                    None
                } else {
                    hex::decode(&v.pq_public_key).ok()
                },
            })
            .collect()
    }
}

/// Optional node config file (`lattice.toml` in the data directory).
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct LatticeConfig {
    pub node: NodeSection,
}

/// `[node]` section.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct NodeSection {
    pub data_dir: String,
    pub rpc_bind: String,
    pub p2p_bind: String,
    pub p2p_port: u16,
    pub p2p_peers: Vec<String>,
}

impl Default for NodeSection {
    fn default() -> Self {
        NodeSection {
            data_dir: "./lattice-data".into(),
            rpc_bind: "0.0.0.0:8545".into(),
            p2p_bind: "0.0.0.0:8555".into(),
            p2p_port: 8555,
            p2p_peers: vec![],
        }
    }
}

impl LatticeConfig {
    /// Load `lattice.toml` from the data directory; defaults when absent or
    /// unparsable (a broken config file is logged, not fatal).
    pub fn load(data_dir: &Path) -> Self {
        let path = data_dir.join("lattice.toml");
        match std::fs::read_to_string(&path) {
            Ok(contents) => match toml::from_str(&contents) {
                Ok(config) => {
                    tracing::info!("Loaded config from {}", path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!("Failed to parse {}: {}, using defaults", path.display(), e);
                    Self::default()
                }
            },
            Err(_) => Self::default(),
        }
    }
}
