//! Scorer workers: sample, generalize, score, store.

use std::sync::Arc;
use std::time::Duration;

use rand::SeedableRng;
use rand::rngs::StdRng;

use crate::config::{Config, LearnConfig, Reward, ScoringConfig};
use crate::graph::{RelationId, TripleSet};
use crate::rule::factory::generalize;
use crate::rule::{GroundingContext, Rule, RuleShape};
use crate::sampler::PathSampler;

use super::barrier::{BatchBarrier, CheckIn, WorkerReport};
use super::dice::Slot;
use super::store::RuleStore;

const IDLE: Duration = Duration::from_millis(10);

/// Reward a stored rule contributes to its slot.
pub fn reward(kind: Reward, rule: &Rule, scoring: &ScoringConfig) -> f64 {
    let stats = rule.stats();
    let correct = stats.correctly_predicted as f64;
    let applied = rule.applied_confidence(scoring);
    match kind {
        Reward::Correct => correct,
        Reward::CorrectConfidence => correct * stats.confidence,
        Reward::CorrectApplied => correct * applied,
        Reward::CorrectAppliedSquared => correct * applied * applied,
        Reward::CorrectAppliedLength => correct * applied / 2f64.powi(rule.len() as i32 - 1),
    }
}

/// Whether a scored rule is good enough to keep. Zero rules need strictly
/// more correct predictions than their own threshold.
pub fn accepts(rule: &Rule, learn: &LearnConfig) -> bool {
    let stats = rule.stats();
    stats.confidence >= learn.threshold_confidence
        && stats.correctly_predicted >= u64::from(learn.threshold_correct_predictions)
        && (rule.shape() != RuleShape::Zero
            || stats.correctly_predicted > u64::from(learn.threshold_correct_predictions_zero))
}

#[derive(Debug, Default, Clone, Copy)]
struct Tally {
    created: u64,
    stored: u64,
    produced: f64,
}

/// One mining worker.
pub struct Scorer {
    id: usize,
    triples: Arc<TripleSet>,
    config: Arc<Config>,
    store: Arc<RuleStore>,
    barrier: Arc<BatchBarrier>,
    seed_relations: Option<Vec<RelationId>>,
    rng: StdRng,
    tally: Tally,
}

impl Scorer {
    pub fn new(
        id: usize,
        triples: Arc<TripleSet>,
        config: Arc<Config>,
        store: Arc<RuleStore>,
        barrier: Arc<BatchBarrier>,
        seed_relations: Option<Vec<RelationId>>,
    ) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(id as u64)),
            None => StdRng::from_entropy(),
        };
        Self {
            id,
            triples,
            config,
            store,
            barrier,
            seed_relations,
            rng,
            tally: Tally::default(),
        }
    }

    /// Mine until the barrier shuts down.
    pub fn run(mut self) {
        tracing::debug!(worker = self.id, slot = %self.barrier.slot(self.id), "scorer started");
        while !self.barrier.is_shutdown() {
            let slot = self.barrier.slot(self.id);
            let tally = self.tally;
            let id = self.id;
            match self.barrier.check_in(id, || WorkerReport {
                worker: id,
                slot,
                created: tally.created,
                stored: tally.stored,
                produced: tally.produced,
            }) {
                CheckIn::Mine => {
                    self.step(slot);
                }
                CheckIn::Reported => {
                    tracing::debug!(
                        worker = id,
                        %slot,
                        created = tally.created,
                        stored = tally.stored,
                        produced = tally.produced,
                        "worker reported"
                    );
                    self.tally = Tally::default();
                    std::thread::sleep(IDLE);
                }
                CheckIn::Wait => std::thread::sleep(IDLE),
            }
        }
        tracing::debug!(worker = self.id, "scorer stopped");
    }

    /// One sample on `slot`: generalize the walk and keep every new rule that
    /// passes the thresholds. Returns the number of rules stored.
    pub fn step(&mut self, slot: Slot) -> usize {
        let sampler = PathSampler::new(&self.triples, self.seed_relations.clone());
        let cyclic = slot.is_cyclic();
        let Some(path) = sampler.sample(slot.steps(), cyclic, &mut self.rng) else {
            return 0;
        };
        if slot != Slot::Zero && !path.is_valid() {
            return 0;
        }

        let learn = &self.config.learn;
        let scoring = &self.config.scoring;
        let ctx = GroundingContext::learning(&self.triples, scoring);
        let mut stored = 0;
        for mut rule in generalize(&path, learn.exclude_ac2_rules) {
            self.tally.created += 1;
            if rule.is_trivial() || !self.store.is_novel(&rule) {
                continue;
            }
            rule.compute_scores(&ctx, &mut self.rng);
            if !accepts(&rule, learn) {
                continue;
            }
            let gain = reward(learn.reward, &rule, scoring);
            if self.store.insert(rule) {
                self.tally.produced += gain;
                self.tally.stored += 1;
                stored += 1;
            }
        }
        stored
    }
}
