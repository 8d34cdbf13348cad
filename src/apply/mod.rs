//! Rule application: top-k head and tail predictions for test triples.
//!
//! Rules are indexed by head relation in descending applied confidence. For
//! each query both sides are predicted independently, candidates already known
//! elsewhere are filtered out, and the surviving sets are aggregated either by
//! a [`score_tree::ScoreTree`] (max-plus) or by noisy-or.

pub mod score_tree;

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::fmt::Write as _;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use rayon::prelude::*;

use crate::config::{Aggregation, Config, LearnConfig, ScoringConfig};
use crate::error::ApplyError;
use crate::graph::{EntityId, IdRegistry, RelationId, Triple, TripleSet};
use crate::rule::{GroundingContext, Rule};

use score_tree::ScoreTree;

/// Result type for rule application.
pub type ApplyResult<T> = std::result::Result<T, ApplyError>;

/// Queries between two progress messages.
const PROGRESS_EVERY: usize = 100;

// ---------------------------------------------------------------------------
// Rule index
// ---------------------------------------------------------------------------

/// Rules grouped by head relation, best first.
#[derive(Debug, Default)]
pub struct RuleIndex {
    by_relation: HashMap<RelationId, Vec<Rule>>,
    len: usize,
}

impl RuleIndex {
    /// Index the rules that meet the mining thresholds.
    pub fn new(rules: Vec<Rule>, learn: &LearnConfig, scoring: &ScoringConfig) -> Self {
        let mut by_relation: HashMap<RelationId, Vec<Rule>> = HashMap::new();
        let mut len = 0;
        for rule in rules {
            let stats = rule.stats();
            if stats.correctly_predicted < u64::from(learn.threshold_correct_predictions)
                || stats.confidence < learn.threshold_confidence
            {
                continue;
            }
            by_relation.entry(rule.head().relation()).or_default().push(rule);
            len += 1;
        }
        by_relation.par_iter_mut().for_each(|(_, rules)| {
            rules.par_sort_by(|a, b| {
                b.applied_confidence(scoring)
                    .total_cmp(&a.applied_confidence(scoring))
            });
        });
        tracing::info!(rules = len, relations = by_relation.len(), "indexed rules for prediction");
        Self { by_relation, len }
    }

    /// Rules predicting `relation`, best first; `None` when no rule does.
    pub fn rules_for(&self, relation: RelationId) -> Option<&[Rule]> {
        self.by_relation.get(&relation).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn relations(&self) -> usize {
        self.by_relation.len()
    }
}

// ---------------------------------------------------------------------------
// Filtering
// ---------------------------------------------------------------------------

/// Which side of a query is predicted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Head,
    Tail,
}

/// The splits candidates are checked against.
pub struct FilterSets<'a> {
    pub training: &'a TripleSet,
    pub validation: &'a TripleSet,
    pub test: &'a TripleSet,
}

impl FilterSets<'_> {
    /// Drop candidates already true in any split, except the gold answer
    /// itself when it comes from the test split.
    pub fn filter(&self, query: &Triple, side: Side, candidates: impl IntoIterator<Item = EntityId>) -> BTreeSet<EntityId> {
        candidates
            .into_iter()
            .filter(|c| {
                let (h, t, gold) = match side {
                    Side::Head => (*c, query.tail, query.head),
                    Side::Tail => (query.head, *c, query.tail),
                };
                let r = query.relation;
                let in_test = self.test.is_true(h, r, t);
                let known = in_test || self.training.is_true(h, r, t) || self.validation.is_true(h, r, t);
                !known || (in_test && *c == gold)
            })
            .collect()
    }
}

fn candidates(rule: &Rule, query: &Triple, side: Side, ctx: &GroundingContext<'_>) -> Vec<EntityId> {
    match side {
        Side::Head => rule.head_results(query.tail, ctx).into_iter().collect(),
        Side::Tail => rule.tail_results(query.head, ctx).into_iter().collect(),
    }
}

// ---------------------------------------------------------------------------
// Aggregation
// ---------------------------------------------------------------------------

/// Max-plus aggregation: feed rules into a [`ScoreTree`] until it is fine.
pub fn predict_max<'r>(
    rules: &'r [Rule],
    query: &Triple,
    side: Side,
    sets: &FilterSets<'_>,
    ctx: &GroundingContext<'_>,
    k: usize,
) -> ScoreTree<'r> {
    max_plus(rules, ctx.scoring, k, |rule| sets.filter(query, side, candidates(rule, query, side, ctx)))
}

/// Rules are grounded in order, and none after the tree turns fine.
fn max_plus<'r>(
    rules: &'r [Rule],
    scoring: &ScoringConfig,
    k: usize,
    mut ground: impl FnMut(&Rule) -> BTreeSet<EntityId>,
) -> ScoreTree<'r> {
    let mut tree = ScoreTree::new(k);
    for rule in rules {
        if tree.fine() {
            break;
        }
        let mut found = ground(rule);
        if !found.is_empty() {
            tree.add_values(rule.applied_confidence(scoring), &mut found, Some(rule));
        }
    }
    tree
}

/// Noisy-or aggregation over at most `max_rules` rules per candidate, in
/// confidence order. Sorted by descending score.
pub fn predict_noisy_or(
    rules: &[Rule],
    query: &Triple,
    side: Side,
    sets: &FilterSets<'_>,
    ctx: &GroundingContext<'_>,
    max_rules: Option<usize>,
) -> Vec<(EntityId, f64)> {
    let mut votes: HashMap<EntityId, (usize, f64)> = HashMap::new();
    for rule in rules {
        let confidence = rule.applied_confidence(ctx.scoring);
        for c in sets.filter(query, side, candidates(rule, query, side, ctx)) {
            let (used, miss) = votes.entry(c).or_insert((0, 1.0));
            if max_rules.is_none_or(|m| *used < m) {
                *used += 1;
                *miss *= 1.0 - confidence;
            }
        }
    }
    let mut ranked: Vec<(EntityId, f64)> = votes.into_iter().map(|(c, (_, miss))| (c, 1.0 - miss)).collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
    ranked
}

// ---------------------------------------------------------------------------
// Prediction records
// ---------------------------------------------------------------------------

/// Ranked head and tail candidates of one query.
#[derive(Debug, Clone)]
pub struct Prediction {
    pub triple: Triple,
    pub heads: Vec<(EntityId, f64)>,
    pub tails: Vec<(EntityId, f64)>,
    /// Score-tree dump, when explanations are requested.
    pub explanation: Option<String>,
}

impl Prediction {
    /// The three lines of a prediction file. Candidates that are true in the
    /// test split are skipped unless they are the gold answer.
    pub fn render(&self, test: &TripleSet, k: usize, registry: &IdRegistry) -> String {
        let t = &self.triple;
        let mut out = t.display(registry);
        out.push('\n');
        out.push_str("Heads: ");
        for (c, score) in self
            .heads
            .iter()
            .filter(|(c, _)| *c == t.head || !test.is_true(*c, t.relation, t.tail))
            .take(k)
        {
            let _ = write!(out, "{}\t{score:?}\t", registry.entity_label(*c));
        }
        out.push('\n');
        out.push_str("Tails: ");
        for (c, score) in self
            .tails
            .iter()
            .filter(|(c, _)| *c == t.tail || !test.is_true(t.head, t.relation, *c))
            .take(k)
        {
            let _ = write!(out, "{}\t{score:?}\t", registry.entity_label(*c));
        }
        out.push('\n');
        out
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// What a prediction run did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplySummary {
    pub queries: usize,
    pub rules: usize,
}

/// Predicts every test triple with a pool of worker threads.
pub struct RuleEngine {
    config: Arc<Config>,
    registry: Arc<IdRegistry>,
    training: TripleSet,
    validation: TripleSet,
    test: TripleSet,
    index: RuleIndex,
}

impl RuleEngine {
    pub fn new(
        config: Arc<Config>,
        registry: Arc<IdRegistry>,
        mut training: TripleSet,
        mut validation: TripleSet,
        test: TripleSet,
        rules: Vec<Rule>,
    ) -> Self {
        if config.apply.use_validation_as_background {
            training.extend_from(&validation);
            validation = TripleSet::new();
            tracing::info!(triples = training.len(), "validation triples joined the background graph");
        }
        let index = RuleIndex::new(rules, &config.learn, &config.scoring);
        Self {
            config,
            registry,
            training,
            validation,
            test,
            index,
        }
    }

    pub fn index(&self) -> &RuleIndex {
        &self.index
    }

    fn sets(&self) -> FilterSets<'_> {
        FilterSets {
            training: &self.training,
            validation: &self.validation,
            test: &self.test,
        }
    }

    /// Predict both sides of one query.
    pub fn predict(&self, triple: Triple, explain: bool) -> Prediction {
        let apply = &self.config.apply;
        let ctx = GroundingContext::application(&self.training, &self.config.scoring);
        let sets = self.sets();
        let Some(rules) = self.index.rules_for(triple.relation) else {
            tracing::debug!(
                relation = %self.registry.relation_label(triple.relation),
                "no rules for relation"
            );
            return Prediction {
                triple,
                heads: Vec::new(),
                tails: Vec::new(),
                explanation: None,
            };
        };

        match apply.aggregation {
            Aggregation::MaxPlus => {
                let tail_tree = predict_max(rules, &triple, Side::Tail, &sets, &ctx, apply.top_k);
                let head_tree = predict_max(rules, &triple, Side::Head, &sets, &ctx, apply.top_k);
                let explanation = explain.then(|| {
                    format!(
                        "{}\nHeads:\n{}\nTails:\n{}\n",
                        triple.display(&self.registry),
                        head_tree.render(&self.registry),
                        tail_tree.render(&self.registry)
                    )
                });
                Prediction {
                    triple,
                    heads: head_tree.as_list(),
                    tails: tail_tree.as_list(),
                    explanation,
                }
            }
            Aggregation::NoisyOr => Prediction {
                triple,
                heads: predict_noisy_or(rules, &triple, Side::Head, &sets, &ctx, apply.noisy_or_max_rules),
                tails: predict_noisy_or(rules, &triple, Side::Tail, &sets, &ctx, apply.noisy_or_max_rules),
                explanation: None,
            },
        }
    }

    /// Predict every test triple, writing records to `output` and, when
    /// given, score-tree dumps to `explanation`.
    pub fn run(&self, output: &Path, explanation: Option<&Path>) -> ApplyResult<ApplySummary> {
        let start = Instant::now();
        let writer = Mutex::new(create(output)?);
        let explainer = explanation.map(create).transpose()?.map(Mutex::new);
        let queue: Mutex<VecDeque<Triple>> = Mutex::new(self.test.triples().iter().copied().collect());
        let done = AtomicUsize::new(0);
        let total = self.test.len();
        let workers = self.config.worker_threads.max(1);

        tracing::info!(
            queries = total,
            rules = self.index.len(),
            relations = self.index.relations(),
            workers,
            aggregation = ?self.config.apply.aggregation,
            "applying rules"
        );

        let results: Vec<std::thread::Result<ApplyResult<()>>> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..workers)
                .map(|_| {
                    scope.spawn(|| -> ApplyResult<()> {
                        loop {
                            let next = queue.lock().expect("prediction queue lock poisoned").pop_front();
                            let Some(triple) = next else {
                                return Ok(());
                            };
                            let prediction = self.predict(triple, explainer.is_some());
                            let record = prediction.render(&self.test, self.config.apply.top_k, &self.registry);
                            {
                                let mut out = writer.lock().expect("prediction writer lock poisoned");
                                out.write_all(record.as_bytes()).map_err(|e| write_err(output, e))?;
                            }
                            if let (Some(explainer), Some(text), Some(path)) =
                                (&explainer, &prediction.explanation, explanation)
                            {
                                let mut out = explainer.lock().expect("explanation writer lock poisoned");
                                out.write_all(text.as_bytes()).map_err(|e| write_err(path, e))?;
                            }
                            let n = done.fetch_add(1, Ordering::SeqCst) + 1;
                            if n % PROGRESS_EVERY == 0 {
                                tracing::info!(
                                    done = n,
                                    total,
                                    query = %triple.display(&self.registry),
                                    "predicting"
                                );
                                writer
                                    .lock()
                                    .expect("prediction writer lock poisoned")
                                    .flush()
                                    .map_err(|e| write_err(output, e))?;
                            }
                        }
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join()).collect()
        });

        for result in results {
            result.map_err(|_| ApplyError::WorkerPanicked)??;
        }
        writer
            .into_inner()
            .expect("prediction writer lock poisoned")
            .flush()
            .map_err(|e| write_err(output, e))?;
        if let (Some(explainer), Some(path)) = (explainer, explanation) {
            explainer
                .into_inner()
                .expect("explanation writer lock poisoned")
                .flush()
                .map_err(|e| write_err(path, e))?;
        }

        let queries = done.load(Ordering::SeqCst);
        tracing::info!(
            queries,
            path = %output.display(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "rule application finished"
        );
        Ok(ApplySummary {
            queries,
            rules: self.index.len(),
        })
    }
}

fn write_err(path: &Path, source: std::io::Error) -> ApplyError {
    ApplyError::Write {
        path: path.display().to_string(),
        source,
    }
}

fn create(path: &Path) -> ApplyResult<BufWriter<File>> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| write_err(parent, e))?;
    }
    File::create(path)
        .map(BufWriter::new)
        .map_err(|e| write_err(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::io::parse_rule;

    struct World {
        registry: Arc<IdRegistry>,
        training: TripleSet,
    }

    /// Cities in countries; `capital` mirrors `located` for a few of them.
    fn world() -> World {
        let registry = Arc::new(IdRegistry::new());
        let mut training = TripleSet::new();
        let facts = [
            ("berlin", "located", "germany"),
            ("hamburg", "located", "germany"),
            ("paris", "located", "france"),
            ("lyon", "located", "france"),
            ("berlin", "capital", "germany"),
            ("paris", "capital", "france"),
            ("rome", "located", "italy"),
        ];
        for (h, r, t) in facts {
            training.insert(Triple::new(
                registry.entity(h),
                registry.relation(r).unwrap(),
                registry.entity(t),
            ));
        }
        World { registry, training }
    }

    fn triple(reg: &IdRegistry, h: &str, r: &str, t: &str) -> Triple {
        Triple::new(reg.entity(h), reg.relation(r).unwrap(), reg.entity(t))
    }

    fn rules(reg: &IdRegistry, lines: &[&str]) -> Vec<Rule> {
        lines.iter().map(|l| parse_rule(l, reg).unwrap()).collect()
    }

    fn labels(reg: &IdRegistry, ranked: &[(EntityId, f64)]) -> Vec<String> {
        ranked.iter().map(|(c, _)| reg.entity_label(*c)).collect()
    }

    #[test]
    fn index_sorts_by_applied_confidence_and_drops_weak_rules() {
        let w = world();
        let index = RuleIndex::new(
            rules(
                &w.registry,
                &[
                    "10\t5\t0.5\tcapital(X,Y) <= located(X,Y)",
                    "10\t9\t0.9\tcapital(X,germany) <= located(X,germany)",
                    "10\t1\t0.1\tcapital(X,Y) <= capital(Y,X)",
                ],
            ),
            &LearnConfig::default(),
            &ScoringConfig::default(),
        );
        assert_eq!(index.len(), 2);
        let capital = w.registry.lookup_relation("capital").unwrap();
        let ranked = index.rules_for(capital).unwrap();
        assert_eq!(ranked[0].stats().correctly_predicted, 9);
        assert!(index.rules_for(w.registry.lookup_relation("located").unwrap()).is_none());
    }

    #[test]
    fn filter_keeps_gold_and_drops_known_answers() {
        let w = world();
        let reg = &w.registry;
        let mut test = TripleSet::new();
        let query = triple(reg, "lyon", "capital", "france");
        test.insert(query);
        test.insert(triple(reg, "hamburg", "capital", "germany"));
        let validation = TripleSet::new();
        let sets = FilterSets {
            training: &w.training,
            validation: &validation,
            test: &test,
        };
        let kept = sets.filter(
            &query,
            Side::Head,
            [reg.entity("lyon"), reg.entity("paris"), reg.entity("rome")],
        );
        assert_eq!(kept, BTreeSet::from([reg.entity("lyon"), reg.entity("rome")]));

        let other = triple(reg, "rome", "capital", "germany");
        let kept = sets.filter(&other, Side::Head, [reg.entity("hamburg"), reg.entity("rome")]);
        assert_eq!(kept, BTreeSet::from([reg.entity("rome")]));
    }

    #[test]
    fn max_plus_ranks_by_the_best_rule_first() {
        let w = world();
        let reg = &w.registry;
        let rules = rules(
            reg,
            &[
                "10\t8\t0.8\tcapital(X,Y) <= located(X,Y)",
                "100\t2\t0.02\tcapital(X,france) <= ",
            ],
        );
        let scoring = ScoringConfig::default();
        let ctx = GroundingContext::application(&w.training, &scoring);
        let test = TripleSet::new();
        let validation = TripleSet::new();
        let sets = FilterSets {
            training: &w.training,
            validation: &validation,
            test: &test,
        };
        let mut sorted = rules.clone();
        sorted.sort_by(|a, b| b.applied_confidence(&scoring).total_cmp(&a.applied_confidence(&scoring)));

        let query = triple(reg, "lyon", "capital", "france");
        let tree = predict_max(&sorted, &query, Side::Tail, &sets, &ctx, 10);
        assert_eq!(labels(reg, &tree.as_list()), vec!["france"]);

        let query = triple(reg, "rome", "capital", "italy");
        let tree = predict_max(&sorted, &query, Side::Tail, &sets, &ctx, 10);
        assert_eq!(labels(reg, &tree.as_list()), vec!["italy", "france"]);
    }

    #[test]
    fn max_plus_stops_grounding_once_the_top_k_is_settled() {
        let w = world();
        let reg = &w.registry;
        let rules = rules(
            reg,
            &[
                "10\t9\t0.9\tcapital(X,Y) <= located(X,Y)",
                "10\t5\t0.5\tcapital(X,Y) <= located(Y,X)",
                "10\t1\t0.1\tcapital(X,france) <= ",
            ],
        );
        let scoring = ScoringConfig::default();
        let italy = reg.entity("italy");
        let mut grounded = 0;
        let tree = max_plus(&rules, &scoring, 1, |_| {
            grounded += 1;
            BTreeSet::from([italy])
        });
        assert!(tree.fine());
        assert_eq!(grounded, 1);
        assert_eq!(labels(reg, &tree.as_list()), vec!["italy"]);

        let mut grounded = 0;
        let tree = max_plus(&rules, &scoring, 2, |_| {
            grounded += 1;
            BTreeSet::new()
        });
        assert_eq!(grounded, 3);
        assert!(tree.as_list().is_empty());
    }

    #[test]
    fn noisy_or_combines_independent_rules() {
        let w = world();
        let reg = &w.registry;
        let rules = rules(
            reg,
            &[
                "5\t5\t1.0\tcapital(X,Y) <= located(X,Y)",
                "5\t5\t1.0\tcapital(rome,Y) <= located(rome,Y)",
            ],
        );
        let scoring = ScoringConfig::default();
        let ctx = GroundingContext::application(&w.training, &scoring);
        let empty = TripleSet::new();
        let sets = FilterSets {
            training: &w.training,
            validation: &empty,
            test: &empty,
        };
        let query = triple(reg, "rome", "capital", "italy");
        let p = 5.0 / 10.0;

        let both = predict_noisy_or(&rules, &query, Side::Tail, &sets, &ctx, None);
        assert_eq!(labels(reg, &both), vec!["italy"]);
        assert!((both[0].1 - (1.0 - (1.0 - p) * (1.0 - p))).abs() < 1e-12);

        let capped = predict_noisy_or(&rules, &query, Side::Tail, &sets, &ctx, Some(1));
        assert!((capped[0].1 - p).abs() < 1e-12);
    }

    #[test]
    fn records_skip_test_answers_other_than_gold() {
        let w = world();
        let reg = &w.registry;
        let query = triple(reg, "lyon", "capital", "france");
        let mut test = TripleSet::new();
        test.insert(query);
        test.insert(triple(reg, "lyon", "capital", "italy"));
        let prediction = Prediction {
            triple: query,
            heads: vec![],
            tails: vec![(reg.entity("italy"), 0.5), (reg.entity("france"), 0.4), (reg.entity("spain"), 0.1)],
            explanation: None,
        };
        let text = prediction.render(&test, 1, reg);
        assert_eq!(text, "lyon capital france\nHeads: \nTails: france\t0.4\t\n");
    }

    #[test]
    fn engine_writes_one_record_per_test_triple() {
        let dir = tempfile::TempDir::new().unwrap();
        let w = world();
        let reg = Arc::clone(&w.registry);
        let mut test = TripleSet::new();
        test.insert(triple(&reg, "lyon", "capital", "france"));
        test.insert(triple(&reg, "rome", "capital", "italy"));
        test.insert(triple(&reg, "hamburg", "unknown", "germany"));
        let rules = rules(&reg, &["10\t8\t0.8\tcapital(X,Y) <= located(X,Y)"]);
        let mut config = Config {
            worker_threads: 2,
            ..Config::default()
        };
        config.apply.top_k = 5;

        let engine = RuleEngine::new(Arc::new(config), Arc::clone(&reg), w.training, TripleSet::new(), test, rules);
        let out = dir.path().join("out/predictions");
        let explain = dir.path().join("out/explanation");
        let summary = engine.run(&out, Some(&explain)).unwrap();
        assert_eq!(summary.queries, 3);
        assert_eq!(summary.rules, 1);

        let text = std::fs::read_to_string(&out).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 9);
        let at = lines.iter().position(|l| *l == "rome capital italy").unwrap();
        assert_eq!(lines[at + 2], "Tails: italy\t0.5333333333333333\t");
        let at = lines.iter().position(|l| *l == "hamburg unknown germany").unwrap();
        assert_eq!(lines[at + 1], "Heads: ");
        assert!(std::fs::read_to_string(&explain).unwrap().contains("with explanation: capital(X,Y) <= located(X,Y)"));
    }
}
