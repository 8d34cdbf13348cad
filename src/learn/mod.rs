//! Rule mining.
//!
//! A [`Learner`] runs `worker_threads` [`scorer::Scorer`]s against the
//! training graph. Each worker mines one rule type (a [`dice::Slot`]) at a
//! time; every `batch_time_ms` the orchestrator pauses them through the
//! [`barrier::BatchBarrier`], feeds what they produced into the
//! [`dice::Dice`] bandit and hands out new slots. At each configured time a
//! snapshot of the [`store::RuleStore`] is written in the background; the
//! last snapshot ends the run.

pub mod barrier;
pub mod dice;
pub mod scorer;
pub mod store;
pub mod writer;

use std::path::PathBuf;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::config::{Config, CyclicGrounding};
use crate::error::LearnError;
use crate::graph::{IdRegistry, RelationId, TripleSet};

use barrier::BatchBarrier;
use dice::{Dice, Slot};
use scorer::Scorer;
use store::RuleStore;
use writer::{SnapshotWriter, snapshot_path};

/// Result type for mining.
pub type LearnResult<T> = std::result::Result<T, LearnError>;

const POLL: Duration = Duration::from_millis(10);
const REPORT_POLL: Duration = Duration::from_millis(1);

/// What a finished run produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LearnSummary {
    /// Rules in the store when the run ended.
    pub rules: usize,
    /// Completed bandit batches.
    pub batches: usize,
    /// Snapshot files, in the order they were taken.
    pub snapshots: Vec<PathBuf>,
}

/// The mining orchestrator.
pub struct Learner {
    config: Arc<Config>,
    registry: Arc<IdRegistry>,
    triples: Arc<TripleSet>,
    seed_relations: Option<Vec<RelationId>>,
    store: Arc<RuleStore>,
}

impl Learner {
    /// Prepare a run over `triples`.
    ///
    /// Fails on an empty graph and on `single_relations` entries that do not
    /// occur in it.
    pub fn new(config: Config, registry: Arc<IdRegistry>, mut triples: TripleSet) -> LearnResult<Self> {
        if triples.is_empty() {
            return Err(LearnError::EmptyGraph);
        }

        let seed_relations = match &config.learn.single_relations {
            Some(labels) => {
                let mut relations = Vec::with_capacity(labels.len());
                for label in labels {
                    let relation = registry
                        .lookup_relation(label)
                        .filter(|r| !triples.triples_by_relation(*r).is_empty())
                        .ok_or_else(|| LearnError::UnknownSingleRelation { label: label.clone() })?;
                    relations.push(relation);
                }
                tracing::info!(relations = ?labels, "restricting walk seeds");
                Some(relations)
            }
            None => None,
        };

        if config.scoring.cyclic_grounding == CyclicGrounding::BeamEntities {
            triples.precompute_start_samples(config.scoring.beam_max_attempts, config.seed);
        }

        Ok(Self {
            config: Arc::new(config),
            registry,
            triples: Arc::new(triples),
            seed_relations,
            store: Arc::new(RuleStore::new()),
        })
    }

    /// Rules mined so far.
    pub fn store(&self) -> &RuleStore {
        &self.store
    }

    /// Mine until the last snapshot is taken.
    pub fn run(&self) -> LearnResult<LearnSummary> {
        let learn = &self.config.learn;
        let workers = self.config.worker_threads;
        tracing::info!(
            workers,
            triples = self.triples.len(),
            snapshots_at = ?learn.snapshots_at,
            batch_time_ms = learn.batch_time_ms,
            "mining started"
        );

        let mut dice = Dice::new(learn, self.config.paths.dice.clone(), self.config.seed);
        dice.compute_relevant_scores();
        dice.save_scores();
        let initial = (0..workers)
            .map(|_| dice.ask(0))
            .collect::<LearnResult<Vec<Slot>>>()?;
        dice.reset_scores();

        let barrier = Arc::new(BatchBarrier::new(&initial));
        let mut handles = Vec::with_capacity(workers);
        let mut spawned = Ok(());
        for id in 0..workers {
            let scorer = Scorer::new(
                id,
                Arc::clone(&self.triples),
                Arc::clone(&self.config),
                Arc::clone(&self.store),
                Arc::clone(&barrier),
                self.seed_relations.clone(),
            );
            match std::thread::Builder::new()
                .name(format!("burl-scorer-{id}"))
                .spawn(move || scorer.run())
            {
                Ok(handle) => handles.push(handle),
                Err(source) => {
                    spawned = Err(LearnError::Spawn { what: "scorer", source });
                    break;
                }
            }
        }

        let mut writers = Vec::new();
        let outcome = spawned.and_then(|()| self.drive(&mut dice, &barrier, &handles, &mut writers));

        barrier.shutdown();
        let mut panicked = false;
        for handle in handles {
            panicked |= handle.join().is_err();
        }
        let (batches, snapshots, last) = outcome?;
        if panicked {
            return Err(LearnError::ThreadPanicked { what: "scorer" });
        }

        for writer in writers {
            let path = writer.path().to_path_buf();
            if let Err(e) = writer.join() {
                tracing::warn!(path = %path.display(), error = %e, "snapshot failed");
            }
        }
        last.join()?;

        let rules = self.store.len();
        tracing::info!(rules, batches, snapshots = snapshots.len(), "mining finished");
        Ok(LearnSummary {
            rules,
            batches,
            snapshots,
        })
    }

    /// The polling loop. Returns the batch count, the snapshot paths and the
    /// writer of the final snapshot; earlier writers are left in `writers`.
    fn drive(
        &self,
        dice: &mut Dice,
        barrier: &BatchBarrier,
        handles: &[JoinHandle<()>],
        writers: &mut Vec<SnapshotWriter>,
    ) -> LearnResult<(usize, Vec<PathBuf>, SnapshotWriter)> {
        let learn = &self.config.learn;
        let batch_time = Duration::from_millis(learn.batch_time_ms);
        let start = Instant::now();
        let mut batch_start = Instant::now();
        let mut batch = 0;
        let mut next_snapshot = 0;
        let mut snapshots = Vec::new();

        loop {
            std::thread::sleep(POLL);
            let elapsed = start.elapsed().as_secs();

            if learn.snapshots_at.get(next_snapshot).is_some_and(|at| elapsed >= *at) {
                let at = learn.snapshots_at[next_snapshot];
                self.pause(dice, barrier, handles)?;
                let path = snapshot_path(&self.config.paths.output, at);
                let writer = SnapshotWriter::spawn(
                    path.clone(),
                    self.store.snapshot(),
                    Arc::clone(&self.registry),
                    elapsed,
                )?;
                snapshots.push(path);
                dice.write(&at.to_string())?;
                next_snapshot += 1;
                reap(writers);
                if next_snapshot == learn.snapshots_at.len() {
                    return Ok((batch, snapshots, writer));
                }
                writers.push(writer);
                barrier.resume();
            }

            if batch_start.elapsed() >= batch_time {
                self.pause(dice, barrier, handles)?;
                dice.compute_relevant_scores();
                dice.save_scores();
                batch += 1;
                for worker in 0..barrier.workers() {
                    barrier.assign(worker, dice.ask(batch)?);
                }
                tracing::info!(
                    batch,
                    elapsed_secs = elapsed,
                    rules = self.store.len(),
                    scores = %dice,
                    "batch finished"
                );
                dice.reset_scores();
                barrier.resume();
                batch_start = Instant::now();
            }
        }
    }

    /// Stop the workers, wait for every report and feed them to the bandit.
    fn pause(&self, dice: &mut Dice, barrier: &BatchBarrier, handles: &[JoinHandle<()>]) -> LearnResult<()> {
        barrier.pause();
        while !barrier.all_reported() {
            if handles.iter().any(JoinHandle::is_finished) {
                return Err(LearnError::ThreadPanicked { what: "scorer" });
            }
            std::thread::sleep(REPORT_POLL);
        }
        for report in barrier.take_reports() {
            tracing::debug!(
                worker = report.worker,
                slot = %report.slot,
                created = report.created,
                stored = report.stored,
                produced = report.produced,
                "collected report"
            );
            dice.add_score(report.slot, report.produced);
        }
        Ok(())
    }
}

/// Join the writers that are done, logging failures.
fn reap(writers: &mut Vec<SnapshotWriter>) {
    let (done, pending): (Vec<_>, Vec<_>) = std::mem::take(writers)
        .into_iter()
        .partition(SnapshotWriter::is_finished);
    *writers = pending;
    for writer in done {
        let path = writer.path().to_path_buf();
        if let Err(e) = writer.join() {
            tracing::warn!(path = %path.display(), error = %e, "snapshot failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Triple;
    use crate::rule::RuleShape;
    use crate::rule::io::{RuleFilter, read_rules};

    fn couples(registry: &IdRegistry) -> TripleSet {
        let spouse = registry.relation("spouse").unwrap();
        let mut ts = TripleSet::new();
        for i in 0..20 {
            let a = registry.entity(&format!("p{}", 2 * i));
            let b = registry.entity(&format!("p{}", 2 * i + 1));
            ts.insert(Triple::new(a, spouse, b));
            ts.insert(Triple::new(b, spouse, a));
        }
        ts
    }

    fn config(output: PathBuf) -> Config {
        let mut config = Config {
            worker_threads: 2,
            seed: Some(7),
            ..Config::default()
        };
        config.paths.output = output;
        config.learn.snapshots_at = vec![1];
        config.learn.batch_time_ms = 200;
        config.learn.max_length_cyclic = 1;
        config.learn.max_length_acyclic = 0;
        config.learn.zero_rules_active = false;
        config
    }

    #[test]
    fn empty_graph_is_rejected() {
        let registry = Arc::new(IdRegistry::new());
        let err = Learner::new(Config::default(), registry, TripleSet::new()).err();
        assert!(matches!(err, Some(LearnError::EmptyGraph)));
    }

    #[test]
    fn unknown_single_relation_is_rejected() {
        let registry = Arc::new(IdRegistry::new());
        let triples = couples(&registry);
        let mut config = Config::default();
        config.learn.single_relations = Some(vec!["married".to_string()]);
        let err = Learner::new(config, registry, triples).err();
        assert!(matches!(err, Some(LearnError::UnknownSingleRelation { label }) if label == "married"));
    }

    #[test]
    fn short_run_writes_the_final_snapshot() {
        let dir = tempfile::TempDir::new().unwrap();
        let registry = Arc::new(IdRegistry::new());
        let triples = couples(&registry);
        let prefix = dir.path().join("rules");
        let learner = Learner::new(config(prefix.clone()), Arc::clone(&registry), triples).unwrap();

        let summary = learner.run().unwrap();
        assert_eq!(summary.snapshots, vec![dir.path().join("rules-1")]);
        assert!(summary.batches >= 1);
        assert_eq!(summary.rules, learner.store().len());

        let rules = read_rules(&summary.snapshots[0], &registry, &RuleFilter::all()).unwrap();
        assert_eq!(rules.len(), summary.rules);
        assert!(
            rules
                .iter()
                .any(|r| r.shape() == RuleShape::Cyclic && r.len() == 1 && r.stats().confidence == 1.0)
        );
    }
}
