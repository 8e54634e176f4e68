//! The proof-of-stake engine: validator membership, stake history,
//! stake-weighted leader selection, participation tracking, and the
//! soft/hard finality predicates.
//!
//! Time is sliced into layers advanced on a fixed interval. Every layer owns
//! a stake snapshot: membership and stake changes mutate the current
//! snapshot in place, and advancing a layer copies the snapshot forward.
//! A layer progresses `Tentative → SoftFinal → HardFinal` and never demotes.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::config::FinalityConfig;

/// A registered validator.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Validator {
    pub id: String,
    pub stake: u64,
    pub weight: u64,
    /// Keccak-256 hex of the validator's post-quantum public key.
    pub pq_pubkey_hash: String,
    /// Full public key bytes when known; enables full signature verification
    /// in the block validation pipeline.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pq_public_key: Option<Vec<u8>>,
}

/// Stake distribution at one layer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StakeSnapshot {
    pub layer: i64,
    pub stake: BTreeMap<String, u64>,
    pub total: u64,
}

/// Finality progression of a layer. Monotone: no demotion.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum LayerStatus {
    Tentative,
    SoftFinal,
    HardFinal,
}

/// Errors from validator-set mutation.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum PosError {
    #[error("validator {0} already exists")]
    DuplicateValidator(String),
    #[error("validator {0} not found")]
    UnknownValidator(String),
}

/// The randomness source behind leader selection.
///
/// Injected so that production nodes draw from OS entropy (or a VRF once
/// wired) while tests use a seeded generator for reproducible sampling.
pub trait LeaderRandomness: Send + Sync {
    /// Draw a target in `[0, total_stake)`. `total_stake` is never zero.
    fn pick(&mut self, total_stake: u64) -> u64;
}

/// OS-entropy randomness. The secure default.
#[derive(Default)]
pub struct OsRandomness;

impl LeaderRandomness for OsRandomness {
    fn pick(&mut self, total_stake: u64) -> u64 {
        rand::rng().random_range(0..total_stake)
    }
}

/// Deterministic randomness for tests and simulations.
pub struct SeededRandomness(StdRng);

impl SeededRandomness {
    pub fn new(seed: u64) -> Self {
        SeededRandomness(StdRng::seed_from_u64(seed))
    }
}

impl LeaderRandomness for SeededRandomness {
    fn pick(&mut self, total_stake: u64) -> u64 {
        self.0.random_range(0..total_stake)
    }
}

/// The PoS engine. Owns the validator list, stake history, participation
/// records, and layer clock.
pub struct PosEngine {
    validators: Vec<Validator>,
    finality: FinalityConfig,
    current_layer: i64,
    /// `(layer, unix_seconds)` recorded on every advance.
    layer_timestamps: Vec<(i64, i64)>,
    stake_history: Vec<StakeSnapshot>,
    /// layer -> validator ids observed producing at that layer.
    participation: BTreeMap<u64, BTreeSet<String>>,
    /// Monotone finality promotions.
    status: HashMap<i64, LayerStatus>,
    randomness: Box<dyn LeaderRandomness>,
}

impl PosEngine {
    /// Initialize the engine with the genesis validator set and an injected
    /// randomness source.
    pub fn new(
        validators: Vec<Validator>,
        finality: FinalityConfig,
        randomness: Box<dyn LeaderRandomness>,
    ) -> Self {
        let mut stake = BTreeMap::new();
        let mut total = 0u64;
        for v in &validators {
            stake.insert(v.id.clone(), v.stake);
            total += v.stake;
        }
        PosEngine {
            validators,
            finality,
            current_layer: 0,
            layer_timestamps: Vec::new(),
            stake_history: vec![StakeSnapshot {
                layer: 0,
                stake,
                total,
            }],
            participation: BTreeMap::new(),
            status: HashMap::new(),
            randomness,
        }
    }

    // ── Leader selection ────────────────────────────────────────────────

    /// Stake-weighted leader sampling over the most recent snapshot.
    ///
    /// Draws a target in `[0, total_stake)` and walks the validator list
    /// accumulating stake until the running sum reaches the target. With
    /// zero total stake the first validator is returned; with no validators,
    /// `None`.
    pub fn select_leader(&mut self) -> Option<&Validator> {
        if self.validators.is_empty() {
            return None;
        }
        let total = self.current_snapshot().total;
        if total == 0 {
            return self.validators.first();
        }

        let target = self.randomness.pick(total);
        let stake = &self.stake_history.last().expect("history never empty").stake;
        let mut accumulated = 0u64;
        let mut selected = 0usize;
        for (idx, v) in self.validators.iter().enumerate() {
            if let Some(s) = stake.get(&v.id) {
                accumulated += s;
                if accumulated >= target {
                    selected = idx;
                    break;
                }
            }
        }
        self.validators.get(selected)
    }

    // ── Validator set ───────────────────────────────────────────────────

    /// Add a validator, extending the current snapshot with its stake.
    pub fn add_validator(&mut self, validator: Validator) -> Result<(), PosError> {
        if self.validators.iter().any(|v| v.id == validator.id) {
            return Err(PosError::DuplicateValidator(validator.id));
        }
        let snapshot = self.stake_history.last_mut().expect("history never empty");
        snapshot.stake.insert(validator.id.clone(), validator.stake);
        snapshot.total += validator.stake;
        self.validators.push(validator);
        Ok(())
    }

    /// Remove a validator, subtracting its stake from the current snapshot.
    pub fn remove_validator(&mut self, id: &str) -> Result<(), PosError> {
        let idx = self
            .validators
            .iter()
            .position(|v| v.id == id)
            .ok_or_else(|| PosError::UnknownValidator(id.to_string()))?;
        self.validators.remove(idx);
        let snapshot = self.stake_history.last_mut().expect("history never empty");
        if let Some(stake) = snapshot.stake.remove(id) {
            snapshot.total -= stake;
        }
        Ok(())
    }

    /// Update a validator's stake, recomputing the snapshot total.
    pub fn update_stake(&mut self, id: &str, new_stake: u64) -> Result<(), PosError> {
        let validator = self
            .validators
            .iter_mut()
            .find(|v| v.id == id)
            .ok_or_else(|| PosError::UnknownValidator(id.to_string()))?;
        validator.stake = new_stake;
        let snapshot = self.stake_history.last_mut().expect("history never empty");
        snapshot.stake.insert(id.to_string(), new_stake);
        snapshot.total = snapshot.stake.values().sum();
        Ok(())
    }

    /// Whether `id` is a known validator.
    pub fn validator_exists(&self, id: &str) -> bool {
        self.validators.iter().any(|v| v.id == id)
    }

    /// The recorded public key hash for a validator, if known.
    pub fn validator_pq_hash(&self, id: &str) -> Option<&str> {
        self.validators
            .iter()
            .find(|v| v.id == id)
            .map(|v| v.pq_pubkey_hash.as_str())
    }

    /// Fetch a validator record.
    pub fn get(&self, id: &str) -> Option<&Validator> {
        self.validators.iter().find(|v| v.id == id)
    }

    /// The currently active validator set.
    pub fn active_validators(&self) -> &[Validator] {
        &self.validators
    }

    /// Total stake in the current snapshot.
    pub fn total_stake(&self) -> u64 {
        self.current_snapshot().total
    }

    // ── Layers ──────────────────────────────────────────────────────────

    pub fn current_layer(&self) -> i64 {
        self.current_layer
    }

    pub fn stake_history(&self) -> &[StakeSnapshot] {
        &self.stake_history
    }

    /// Advance to the next layer at the current wall-clock time.
    pub fn advance_layer(&mut self) {
        self.advance_layer_at(crate::unix_now());
    }

    /// Advance to the next layer, stamping it with `now` (Unix seconds) and
    /// copying the stake snapshot forward.
    pub fn advance_layer_at(&mut self, now: i64) {
        self.current_layer += 1;
        self.layer_timestamps.push((self.current_layer, now));
        let mut next = self.stake_history.last().expect("history never empty").clone();
        next.layer = self.current_layer;
        self.stake_history.push(next);
    }

    // ── Participation & finality ────────────────────────────────────────

    /// Record that `validator_id` produced at `layer`. Idempotent.
    pub fn record_participation(&mut self, layer: u64, validator_id: &str) {
        let entry = self.participation.entry(layer).or_default();
        if entry.insert(validator_id.to_string()) {
            tracing::debug!(
                layer,
                validator = validator_id,
                participants = entry.len(),
                "Participation recorded"
            );
        }
    }

    /// Validator ids recorded as participating at `layer`.
    pub fn participants(&self, layer: u64) -> Option<&BTreeSet<String>> {
        self.participation.get(&layer)
    }

    /// The stake snapshot in effect at `layer` (latest snapshot at or below
    /// it; the initial snapshot as a floor).
    fn snapshot_at(&self, layer: i64) -> &StakeSnapshot {
        self.stake_history
            .iter()
            .rev()
            .find(|s| s.layer <= layer)
            .unwrap_or_else(|| self.stake_history.first().expect("history never empty"))
    }

    fn current_snapshot(&self) -> &StakeSnapshot {
        self.stake_history.last().expect("history never empty")
    }

    /// Whether the stake recorded as participating at `layer` reaches
    /// `threshold` of the layer's total stake.
    fn layer_meets_threshold(&self, layer: i64, threshold: f64) -> bool {
        let snapshot = self.snapshot_at(layer);
        if snapshot.total == 0 {
            return false;
        }
        let required = (snapshot.total as f64 * threshold) as u64;
        let participating: u64 = self
            .participation
            .get(&(layer.max(0) as u64))
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| snapshot.stake.get(id))
                    .sum::<u64>()
            })
            .unwrap_or(0);
        participating >= required
    }

    /// Soft finality: every layer in the trailing `soft_finality_layers`
    /// window ending at `layer` meets the soft participation threshold.
    pub fn soft_final(&self, layer: i64) -> bool {
        let window = self.finality.soft_finality_layers;
        if layer < window {
            return false;
        }
        (layer - window + 1..=layer)
            .all(|l| self.layer_meets_threshold(l, self.finality.soft_finality_threshold))
    }

    /// Hard finality at the current wall-clock time.
    pub fn hard_final(&self) -> bool {
        self.hard_final_at(crate::unix_now())
    }

    /// Hard finality: every layer stamped within the trailing epoch window
    /// meets the hard participation threshold. False when no layer falls in
    /// the window.
    pub fn hard_final_at(&self, now: i64) -> bool {
        let window = self.finality.hard_finality_epoch_window;
        let recent: Vec<i64> = self
            .layer_timestamps
            .iter()
            .rev()
            .take_while(|(_, ts)| now - ts <= window)
            .map(|(layer, _)| *layer)
            .collect();
        if recent.is_empty() {
            return false;
        }
        recent
            .iter()
            .all(|&l| self.layer_meets_threshold(l, self.finality.hard_finality_threshold))
    }

    /// Current finality status of `layer`, with monotone promotion: a layer
    /// observed hard-final stays hard-final, soft-final never drops back to
    /// tentative.
    pub fn layer_status(&mut self, layer: i64) -> LayerStatus {
        let observed = if self.hard_final() && layer <= self.current_layer {
            LayerStatus::HardFinal
        } else if self.soft_final(layer) {
            LayerStatus::SoftFinal
        } else {
            LayerStatus::Tentative
        };
        let entry = self.status.entry(layer).or_insert(LayerStatus::Tentative);
        if observed > *entry {
            *entry = observed;
        }
        *entry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn finality(soft_layers: i64, soft: f64, hard: f64, window: i64) -> FinalityConfig {
        FinalityConfig {
            soft_finality_threshold: soft,
            soft_finality_layers: soft_layers,
            hard_finality_threshold: hard,
            hard_finality_epoch_window: window,
        }
    }

    fn validator(id: &str, stake: u64) -> Validator {
        Validator {
            id: id.to_string(),
            stake,
            weight: stake,
            pq_pubkey_hash: format!("hash-{id}"),
            pq_public_key: None,
        }
    }

    fn engine(stakes: &[(&str, u64)]) -> PosEngine {
        PosEngine::new(
            stakes.iter().map(|(id, s)| validator(id, *s)).collect(),
            finality(2, 0.67, 0.9, 600),
            Box::new(SeededRandomness::new(7)),
        )
    }

    #[test]
    fn empty_set_has_no_leader() {
        let mut pos = engine(&[]);
        assert!(pos.select_leader().is_none());
    }

    #[test]
    fn zero_stake_selects_first() {
        let mut pos = engine(&[("v1", 0), ("v2", 0)]);
        assert_eq!(pos.select_leader().unwrap().id, "v1");
    }

    #[test]
    fn snapshot_total_matches_sum() {
        let mut pos = engine(&[("v1", 100), ("v2", 200)]);
        pos.add_validator(validator("v3", 700)).unwrap();
        pos.advance_layer_at(10);
        pos.update_stake("v2", 50).unwrap();
        pos.remove_validator("v1").unwrap();
        for snapshot in pos.stake_history() {
            assert_eq!(snapshot.total, snapshot.stake.values().sum::<u64>());
        }
        assert_eq!(pos.total_stake(), 750);
    }

    #[test]
    fn duplicate_validator_rejected() {
        let mut pos = engine(&[("v1", 100)]);
        assert_eq!(
            pos.add_validator(validator("v1", 5)),
            Err(PosError::DuplicateValidator("v1".into()))
        );
    }

    #[test]
    fn unknown_validator_mutations_fail() {
        let mut pos = engine(&[("v1", 100)]);
        assert!(pos.remove_validator("v9").is_err());
        assert!(pos.update_stake("v9", 1).is_err());
    }

    #[test]
    fn advance_layer_grows_history_by_one() {
        let mut pos = engine(&[("v1", 100)]);
        for i in 0..5 {
            let layer_before = pos.current_layer();
            let history_before = pos.stake_history().len();
            pos.advance_layer_at(100 + i);
            assert_eq!(pos.current_layer(), layer_before + 1);
            assert_eq!(pos.stake_history().len(), history_before + 1);
        }
    }

    #[test]
    fn membership_change_mutates_current_snapshot_only() {
        let mut pos = engine(&[("v1", 100)]);
        pos.advance_layer_at(10);
        pos.add_validator(validator("v2", 50)).unwrap();
        assert!(!pos.stake_history()[0].stake.contains_key("v2"));
        assert_eq!(pos.stake_history()[1].stake["v2"], 50);
    }

    #[test]
    fn participation_is_idempotent() {
        let mut pos = engine(&[("v1", 100)]);
        pos.record_participation(5, "v1");
        pos.record_participation(5, "v1");
        assert_eq!(pos.participants(5).unwrap().len(), 1);
    }

    #[test]
    fn soft_finality_window() {
        // soft_layers = 2, threshold 0.67, three equal validators all
        // participating at layers 5 and 6.
        let mut pos = PosEngine::new(
            vec![validator("v1", 100), validator("v2", 100), validator("v3", 100)],
            finality(2, 0.67, 0.9, 600),
            Box::new(SeededRandomness::new(1)),
        );
        for layer in 1..=6 {
            pos.advance_layer_at(layer * 10);
        }
        for id in ["v1", "v2", "v3"] {
            pos.record_participation(5, id);
            pos.record_participation(6, id);
        }
        assert!(pos.soft_final(6));
        assert!(!pos.soft_final(5));
    }

    #[test]
    fn soft_finality_requires_threshold_stake() {
        let mut pos = PosEngine::new(
            vec![validator("v1", 100), validator("v2", 100), validator("v3", 100)],
            finality(1, 0.67, 0.9, 600),
            Box::new(SeededRandomness::new(1)),
        );
        for layer in 1..=3 {
            pos.advance_layer_at(layer * 10);
        }
        // One of three equal validators is 33% — below the 67% threshold.
        pos.record_participation(3, "v1");
        assert!(!pos.soft_final(3));
        pos.record_participation(3, "v2");
        pos.record_participation(3, "v3");
        assert!(pos.soft_final(3));
    }

    #[test]
    fn hard_finality_over_epoch_window() {
        let mut pos = PosEngine::new(
            vec![validator("v1", 100), validator("v2", 100)],
            finality(1, 0.5, 0.9, 100),
            Box::new(SeededRandomness::new(1)),
        );
        pos.advance_layer_at(1000);
        pos.advance_layer_at(1050);
        // Layer 1 and 2 are both inside the 100 s window at now = 1060.
        pos.record_participation(1, "v1");
        pos.record_participation(1, "v2");
        assert!(!pos.hard_final_at(1060)); // layer 2 has no participation
        pos.record_participation(2, "v1");
        pos.record_participation(2, "v2");
        assert!(pos.hard_final_at(1060));
        // Once layer 1 ages out of the window, only layer 2 must qualify.
        assert!(pos.hard_final_at(1151));
    }

    #[test]
    fn hard_finality_false_with_no_layers_in_window() {
        let mut pos = engine(&[("v1", 100)]);
        assert!(!pos.hard_final_at(1_000_000));
        pos.advance_layer_at(10);
        assert!(!pos.hard_final_at(1_000_000));
    }

    #[test]
    fn layer_status_is_monotone() {
        // Two equal validators; one participant clears the 0.5 soft
        // threshold but not the 0.9 hard threshold.
        let mut pos = PosEngine::new(
            vec![validator("v1", 100), validator("v2", 100)],
            finality(1, 0.5, 0.9, 100),
            Box::new(SeededRandomness::new(1)),
        );
        pos.advance_layer_at(crate::unix_now());
        assert_eq!(pos.layer_status(1), LayerStatus::Tentative);
        pos.record_participation(1, "v1");
        assert_eq!(pos.layer_status(1), LayerStatus::SoftFinal);
        // Even if participation were somehow lost, the status may not drop.
        pos.participation.clear();
        assert_eq!(pos.layer_status(1), LayerStatus::SoftFinal);
    }

    #[test]
    fn stake_weighted_selection_distribution() {
        // Stakes {v1: 100, v2: 200, v3: 700}: 10 000 draws from a uniform
        // source must stay within binomial bounds of {1000, 2000, 7000}.
        let mut pos = PosEngine::new(
            vec![validator("v1", 100), validator("v2", 200), validator("v3", 700)],
            finality(2, 0.67, 0.9, 600),
            Box::new(SeededRandomness::new(42)),
        );
        let mut counts: BTreeMap<String, u32> = BTreeMap::new();
        for _ in 0..10_000 {
            let id = pos.select_leader().unwrap().id.clone();
            *counts.entry(id).or_default() += 1;
        }
        // ±5 binomial standard deviations.
        let v1 = counts["v1"];
        let v2 = counts["v2"];
        let v3 = counts["v3"];
        assert!((850..=1150).contains(&v1), "v1 count {v1}");
        assert!((1800..=2200).contains(&v2), "v2 count {v2}");
        assert!((6770..=7230).contains(&v3), "v3 count {v3}");
        assert_eq!(v1 + v2 + v3, 10_000);
    }
}
