//! Configuration: every tunable of mining and prediction in one TOML document.
//!
//! All fields carry named defaults, so an empty file (or no file at all) yields
//! the standard setup. Settings are read once at startup and passed by
//! reference to the subsystems that need them.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Complete configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Worker threads for mining and for prediction.
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,
    /// Base seed. Worker `i` is seeded with `seed + i`; entropy when absent.
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub learn: LearnConfig,
    #[serde(default)]
    pub scoring: ScoringConfig,
    #[serde(default)]
    pub apply: ApplyConfig,
}

fn default_worker_threads() -> usize {
    20
}

impl Default for Config {
    fn default() -> Self {
        Self {
            worker_threads: default_worker_threads(),
            seed: None,
            paths: PathsConfig::default(),
            learn: LearnConfig::default(),
            scoring: ScoringConfig::default(),
            apply: ApplyConfig::default(),
        }
    }
}

impl Config {
    /// Load from a TOML file.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            source: e,
        })?;
        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Save to a TOML file.
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let content = toml::to_string_pretty(self).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Write {
                path: parent.display().to_string(),
                source: e,
            })?;
        }
        std::fs::write(path, content).map_err(|e| ConfigError::Write {
            path: path.display().to_string(),
            source: e,
        })
    }

    /// Reject values no run can work with.
    pub fn validate(&self) -> ConfigResult<()> {
        fn invalid(field: &str, message: &str) -> ConfigError {
            ConfigError::Invalid {
                field: field.to_string(),
                message: message.to_string(),
            }
        }

        if self.worker_threads == 0 {
            return Err(invalid("worker_threads", "must be at least 1"));
        }
        // A sampled walk carries the head edge plus the body, all in one path.
        let max_body = crate::graph::path::MAX_HOPS - 1;
        if self.learn.max_length_cyclic > max_body.min(crate::learn::dice::MAX_CYCLIC_LENGTH) {
            return Err(invalid("learn.max_length_cyclic", "must be at most 3"));
        }
        if self.learn.max_length_acyclic > max_body.min(crate::learn::dice::MAX_ACYCLIC_LENGTH) {
            return Err(invalid("learn.max_length_acyclic", "must be at most 3"));
        }
        if self.learn.snapshots_at.is_empty() {
            return Err(invalid("learn.snapshots_at", "needs at least one snapshot time"));
        }
        if self.learn.snapshots_at.windows(2).any(|w| w[0] >= w[1]) {
            return Err(invalid("learn.snapshots_at", "times must be strictly increasing"));
        }
        if self.apply.top_k == 0 {
            return Err(invalid("apply.top_k", "must be at least 1"));
        }
        if !(0.0..=1.0).contains(&self.learn.epsilon) {
            return Err(invalid("learn.epsilon", "must be within [0, 1]"));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Paths
// ---------------------------------------------------------------------------

/// Input and output files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    #[serde(default = "default_training")]
    pub training: PathBuf,
    #[serde(default = "default_valid")]
    pub valid: PathBuf,
    #[serde(default = "default_test")]
    pub test: PathBuf,
    /// Rule file read by `apply`.
    #[serde(default = "default_rules")]
    pub rules: PathBuf,
    /// Snapshot prefix; snapshots land at `<output>-<seconds>`.
    #[serde(default = "default_output")]
    pub output: PathBuf,
    #[serde(default = "default_predictions")]
    pub predictions: PathBuf,
    /// Bandit history prefix; no history is written when absent.
    #[serde(default)]
    pub dice: Option<PathBuf>,
    /// Score-tree dump written next to the predictions when set.
    #[serde(default)]
    pub explanation: Option<PathBuf>,
}

fn default_training() -> PathBuf {
    PathBuf::from("data/train.txt")
}
fn default_valid() -> PathBuf {
    PathBuf::from("data/valid.txt")
}
fn default_test() -> PathBuf {
    PathBuf::from("data/test.txt")
}
fn default_rules() -> PathBuf {
    PathBuf::from("out/rules-100")
}
fn default_output() -> PathBuf {
    PathBuf::from("out/rules")
}
fn default_predictions() -> PathBuf {
    PathBuf::from("out/predictions-100")
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            training: default_training(),
            valid: default_valid(),
            test: default_test(),
            rules: default_rules(),
            output: default_output(),
            predictions: default_predictions(),
            dice: None,
            explanation: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Learning
// ---------------------------------------------------------------------------

/// Bandit policy used outside exploration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Policy {
    /// Slot with the highest relevant score.
    Greedy,
    /// Roulette wheel proportional to relevant scores.
    Weighted,
}

/// Scalar yield reported for each stored rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reward {
    Correct,
    CorrectConfidence,
    CorrectApplied,
    CorrectAppliedSquared,
    /// Correct predictions times applied confidence, halved per extra body atom.
    CorrectAppliedLength,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearnConfig {
    /// Elapsed seconds after which a snapshot is written; the last one ends the run.
    #[serde(default = "default_snapshots_at")]
    pub snapshots_at: Vec<u64>,
    #[serde(default = "default_batch_time_ms")]
    pub batch_time_ms: u64,
    #[serde(default = "default_max_length_cyclic")]
    pub max_length_cyclic: usize,
    #[serde(default = "default_max_length_acyclic")]
    pub max_length_acyclic: usize,
    #[serde(default = "default_true")]
    pub zero_rules_active: bool,
    #[serde(default)]
    pub exclude_ac2_rules: bool,
    #[serde(default = "default_epsilon")]
    pub epsilon: f64,
    #[serde(default = "default_annealing")]
    pub annealing: f64,
    #[serde(default = "default_policy")]
    pub policy: Policy,
    #[serde(default = "default_reward")]
    pub reward: Reward,
    #[serde(default = "default_threshold_correct_predictions")]
    pub threshold_correct_predictions: u32,
    #[serde(default = "default_threshold_correct_predictions_zero")]
    pub threshold_correct_predictions_zero: u32,
    #[serde(default = "default_threshold_confidence")]
    pub threshold_confidence: f64,
    /// Restrict path seeds to these relations.
    #[serde(default)]
    pub single_relations: Option<Vec<String>>,
}

fn default_snapshots_at() -> Vec<u64> {
    vec![10, 100, 200, 400]
}
fn default_batch_time_ms() -> u64 {
    5000
}
fn default_max_length_cyclic() -> usize {
    3
}
fn default_max_length_acyclic() -> usize {
    1
}
fn default_true() -> bool {
    true
}
fn default_epsilon() -> f64 {
    0.1
}
fn default_annealing() -> f64 {
    5.0
}
fn default_policy() -> Policy {
    Policy::Weighted
}
fn default_reward() -> Reward {
    Reward::CorrectAppliedLength
}
fn default_threshold_correct_predictions() -> u32 {
    2
}
fn default_threshold_correct_predictions_zero() -> u32 {
    100
}
fn default_threshold_confidence() -> f64 {
    0.0001
}

impl Default for LearnConfig {
    fn default() -> Self {
        Self {
            snapshots_at: default_snapshots_at(),
            batch_time_ms: default_batch_time_ms(),
            max_length_cyclic: default_max_length_cyclic(),
            max_length_acyclic: default_max_length_acyclic(),
            zero_rules_active: true,
            exclude_ac2_rules: false,
            epsilon: default_epsilon(),
            annealing: default_annealing(),
            policy: default_policy(),
            reward: default_reward(),
            threshold_correct_predictions: default_threshold_correct_predictions(),
            threshold_correct_predictions_zero: default_threshold_correct_predictions_zero(),
            threshold_confidence: default_threshold_confidence(),
            single_relations: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Scoring
// ---------------------------------------------------------------------------

/// How cyclic rule bodies are grounded while scoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CyclicGrounding {
    /// Bounded depth-first search over all matching edges.
    Dfs,
    /// Random walks started from random triples of the end atoms.
    BeamEdges,
    /// Random walks started from precomputed entity draws of the end atoms.
    BeamEntities,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringConfig {
    #[serde(default = "default_sample_size")]
    pub sample_size: usize,
    /// Forbid reusing an entity for two different variables of one grounding.
    #[serde(default = "default_true")]
    pub object_identity: bool,
    #[serde(default = "default_cyclic_grounding")]
    pub cyclic_grounding: CyclicGrounding,
    #[serde(default = "default_true")]
    pub dfs_sampling: bool,
    #[serde(default = "default_branching_factor_bound")]
    pub branching_factor_bound: usize,
    #[serde(default = "default_discrimination_bound")]
    pub discrimination_bound: usize,
    #[serde(default = "default_beam_max_groundings")]
    pub beam_max_groundings: usize,
    #[serde(default = "default_beam_max_attempts")]
    pub beam_max_attempts: usize,
    #[serde(default = "default_beam_max_repetitions")]
    pub beam_max_repetitions: usize,
    #[serde(default = "default_unseen_negative_examples")]
    pub unseen_negative_examples: f64,
    #[serde(default = "default_zero_weight")]
    pub zero_weight: f64,
    #[serde(default = "default_ac2_weight")]
    pub ac2_weight: f64,
    #[serde(default = "default_length_degrade")]
    pub length_degrade: f64,
}

fn default_sample_size() -> usize {
    2000
}
fn default_cyclic_grounding() -> CyclicGrounding {
    CyclicGrounding::BeamEntities
}
fn default_branching_factor_bound() -> usize {
    1000
}
fn default_discrimination_bound() -> usize {
    10_000
}
fn default_beam_max_groundings() -> usize {
    1000
}
fn default_beam_max_attempts() -> usize {
    100_000
}
fn default_beam_max_repetitions() -> usize {
    5
}
fn default_unseen_negative_examples() -> f64 {
    5.0
}
fn default_zero_weight() -> f64 {
    0.01
}
fn default_ac2_weight() -> f64 {
    0.1
}
fn default_length_degrade() -> f64 {
    1.0
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            sample_size: default_sample_size(),
            object_identity: true,
            cyclic_grounding: default_cyclic_grounding(),
            dfs_sampling: true,
            branching_factor_bound: default_branching_factor_bound(),
            discrimination_bound: default_discrimination_bound(),
            beam_max_groundings: default_beam_max_groundings(),
            beam_max_attempts: default_beam_max_attempts(),
            beam_max_repetitions: default_beam_max_repetitions(),
            unseen_negative_examples: default_unseen_negative_examples(),
            zero_weight: default_zero_weight(),
            ac2_weight: default_ac2_weight(),
            length_degrade: default_length_degrade(),
        }
    }
}

// ---------------------------------------------------------------------------
// Application
// ---------------------------------------------------------------------------

/// How the verdicts of several rules are combined into one candidate score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregation {
    MaxPlus,
    NoisyOr,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplyConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_aggregation")]
    pub aggregation: Aggregation,
    /// Rules considered per candidate under noisy-or; unlimited when absent.
    #[serde(default)]
    pub noisy_or_max_rules: Option<usize>,
    #[serde(default = "default_threshold_confidence")]
    pub read_threshold_confidence: f64,
    #[serde(default = "default_threshold_correct_predictions")]
    pub read_threshold_correct_predictions: u32,
    #[serde(default = "default_read_threshold_max_length")]
    pub read_threshold_max_length: usize,
    #[serde(default = "default_true")]
    pub read_cyclic: bool,
    #[serde(default = "default_true")]
    pub read_acyclic_anchored: bool,
    #[serde(default = "default_true")]
    pub read_acyclic_free: bool,
    #[serde(default = "default_true")]
    pub read_zero: bool,
    /// Add validation triples to the background graph instead of filtering with them.
    #[serde(default)]
    pub use_validation_as_background: bool,
}

fn default_top_k() -> usize {
    100
}
fn default_aggregation() -> Aggregation {
    Aggregation::MaxPlus
}
fn default_read_threshold_max_length() -> usize {
    10
}

impl Default for ApplyConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            aggregation: default_aggregation(),
            noisy_or_max_rules: None,
            read_threshold_confidence: default_threshold_confidence(),
            read_threshold_correct_predictions: default_threshold_correct_predictions(),
            read_threshold_max_length: default_read_threshold_max_length(),
            read_cyclic: true,
            read_acyclic_anchored: true,
            read_acyclic_free: true,
            read_zero: true,
            use_validation_as_background: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.worker_threads, 20);
        assert_eq!(config.learn.snapshots_at, vec![10, 100, 200, 400]);
        assert_eq!(config.scoring.cyclic_grounding, CyclicGrounding::BeamEntities);
        assert_eq!(config.learn.reward, Reward::CorrectAppliedLength);
        assert_eq!(config.apply.top_k, 100);
        config.validate().unwrap();
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config: Config = toml::from_str(
            r#"
            worker_threads = 4
            [learn]
            policy = "greedy"
            max_length_cyclic = 2
            [scoring]
            cyclic_grounding = "dfs"
            "#,
        )
        .unwrap();
        assert_eq!(config.worker_threads, 4);
        assert_eq!(config.learn.policy, Policy::Greedy);
        assert_eq!(config.learn.max_length_cyclic, 2);
        assert_eq!(config.learn.batch_time_ms, 5000);
        assert_eq!(config.scoring.cyclic_grounding, CyclicGrounding::Dfs);
        assert_eq!(config.scoring.sample_size, 2000);
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("nested/burl.toml");
        let mut config = Config::default();
        config.learn.snapshots_at = vec![1, 2];
        config.apply.aggregation = Aggregation::NoisyOr;
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.learn.snapshots_at, vec![1, 2]);
        assert_eq!(loaded.apply.aggregation, Aggregation::NoisyOr);
    }

    #[test]
    fn rejects_unordered_snapshots() {
        let mut config = Config::default();
        config.learn.snapshots_at = vec![10, 5];
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { .. })
        ));
    }

    #[test]
    fn rejects_overlong_cyclic_rules() {
        let mut config = Config::default();
        config.learn.max_length_cyclic = 4;
        assert!(config.validate().is_err());
    }
}
