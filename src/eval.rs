//! Filtered hits@k and MRR over a prediction file.
//!
//! Ranks are filtered: a candidate ranked above the gold answer that is a
//! known fact in any filter split does not push the gold answer down.

use std::collections::HashMap;
use std::fmt;
use std::io::{BufRead, BufReader};
use std::path::Path;

use serde::Serialize;

use crate::error::EvalError;
use crate::graph::{EntityId, IdRegistry, Triple, TripleSet};

pub type EvalResult<T> = std::result::Result<T, EvalError>;

/// Deepest rank tracked.
pub const AT_K_MAX: usize = 10;

const HEADS: &str = "Heads:";
const TAILS: &str = "Tails:";
/// `Heads: ` and `Tails: ` share this length.
const PREFIX_LEN: usize = 7;

// ---------------------------------------------------------------------------
// Prediction files
// ---------------------------------------------------------------------------

/// Ranked candidate labels of one query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Completion {
    pub heads: Vec<(String, f64)>,
    pub tails: Vec<(String, f64)>,
}

/// A parsed prediction file, keyed by the query line `h r t`.
#[derive(Debug, Default)]
pub struct PredictionFile {
    completions: HashMap<String, Completion>,
}

impl PredictionFile {
    pub fn read(path: &Path) -> EvalResult<Self> {
        let read_err = |e| EvalError::Read {
            path: path.display().to_string(),
            source: e,
        };
        let parse_err = |line: usize, message: &str| EvalError::Parse {
            path: path.display().to_string(),
            line,
            message: message.to_string(),
        };

        let file = std::fs::File::open(path).map_err(read_err)?;
        let mut lines = BufReader::new(file).lines().enumerate();
        let mut completions = HashMap::new();
        while let Some((n, line)) = lines.next() {
            let line = line.map_err(read_err)?;
            if line.len() < 3 {
                continue;
            }
            let key = line.split('\t').next().unwrap_or_default().to_string();
            let mut next_line = |what: &str| -> EvalResult<(usize, String)> {
                match lines.next() {
                    Some((m, l)) => Ok((m + 1, l.map_err(read_err)?)),
                    None => Err(parse_err(n + 1, &format!("missing {what} line"))),
                }
            };
            let (mut head_no, mut head_line) = next_line("head")?;
            let (mut tail_no, mut tail_line) = next_line("tail")?;
            if head_line.starts_with(TAILS) {
                std::mem::swap(&mut head_line, &mut tail_line);
                std::mem::swap(&mut head_no, &mut tail_no);
            }
            if !head_line.starts_with(HEADS) {
                return Err(parse_err(head_no, "expected `Heads:`"));
            }
            if !tail_line.starts_with(TAILS) {
                return Err(parse_err(tail_no, "expected `Tails:`"));
            }
            let heads = parse_ranking(&head_line).ok_or_else(|| parse_err(head_no, "malformed candidate score"))?;
            let tails = parse_ranking(&tail_line).ok_or_else(|| parse_err(tail_no, "malformed candidate score"))?;
            completions.insert(key, Completion { heads, tails });
        }
        tracing::info!(path = %path.display(), queries = completions.len(), "read predictions");
        Ok(Self { completions })
    }

    pub fn get(&self, query: &str) -> Option<&Completion> {
        self.completions.get(query)
    }

    pub fn len(&self) -> usize {
        self.completions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.completions.is_empty()
    }
}

/// `cand<TAB>score<TAB>...` after the seven-character prefix.
fn parse_ranking(line: &str) -> Option<Vec<(String, f64)>> {
    let rest = line.get(PREFIX_LEN..).unwrap_or_default();
    let tokens: Vec<&str> = rest.split('\t').filter(|t| !t.is_empty()).collect();
    tokens
        .chunks(2)
        .map(|pair| match pair {
            [candidate, score] => score.parse().ok().map(|s| (candidate.to_string(), s)),
            _ => None,
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Hits@k
// ---------------------------------------------------------------------------

/// Filtered hits counters for both sides.
pub struct HitsAtK<'a> {
    filters: Vec<&'a TripleSet>,
    head_hits: [u64; AT_K_MAX],
    tail_hits: [u64; AT_K_MAX],
    head_queries: u64,
    tail_queries: u64,
    head_covered: u64,
    tail_covered: u64,
}

impl<'a> HitsAtK<'a> {
    pub fn new(filters: Vec<&'a TripleSet>) -> Self {
        Self {
            filters,
            head_hits: [0; AT_K_MAX],
            tail_hits: [0; AT_K_MAX],
            head_queries: 0,
            tail_queries: 0,
            head_covered: 0,
            tail_covered: 0,
        }
    }

    /// Score a head ranking. Returns the filtered rank of the gold head.
    pub fn evaluate_head(&mut self, candidates: &[Option<EntityId>], triple: &Triple) -> Option<usize> {
        self.head_queries += 1;
        if !candidates.is_empty() {
            self.head_covered += 1;
        }
        let filters = &self.filters;
        let known = |c: EntityId| filters.iter().any(|f| f.is_true(c, triple.relation, triple.tail));
        filtered_rank(candidates, triple.head, known).inspect(|rank| {
            for hits in &mut self.head_hits[*rank..] {
                *hits += 1;
            }
        })
    }

    /// Score a tail ranking. Returns the filtered rank of the gold tail.
    pub fn evaluate_tail(&mut self, candidates: &[Option<EntityId>], triple: &Triple) -> Option<usize> {
        self.tail_queries += 1;
        if !candidates.is_empty() {
            self.tail_covered += 1;
        }
        let filters = &self.filters;
        let known = |c: EntityId| filters.iter().any(|f| f.is_true(triple.head, triple.relation, c));
        filtered_rank(candidates, triple.tail, known).inspect(|rank| {
            for hits in &mut self.tail_hits[*rank..] {
                *hits += 1;
            }
        })
    }

    /// Share of queries answered within the top `k` (1-based).
    pub fn hits_at(&self, k: usize) -> f64 {
        let queries = self.head_queries + self.tail_queries;
        if queries == 0 || k == 0 {
            return 0.0;
        }
        let i = k.min(AT_K_MAX) - 1;
        (self.head_hits[i] + self.tail_hits[i]) as f64 / queries as f64
    }

    /// MRR over the tracked ranks; answers below [`AT_K_MAX`] contribute 0.
    pub fn mrr(&self) -> f64 {
        let mut mrr = 0.0;
        let mut previous = 0.0;
        for k in 1..=AT_K_MAX {
            let hk = self.hits_at(k);
            mrr += (hk - previous) / k as f64;
            previous = hk;
        }
        mrr
    }

    /// Share of queries with a non-empty ranking.
    pub fn coverage(&self) -> f64 {
        let queries = self.head_queries + self.tail_queries;
        if queries == 0 {
            return 0.0;
        }
        (self.head_covered + self.tail_covered) as f64 / queries as f64
    }

    pub fn report(&self, missing: usize) -> EvalReport {
        EvalReport {
            queries: (self.head_queries + self.tail_queries) as usize,
            missing,
            hits_at_1: self.hits_at(1),
            hits_at_3: self.hits_at(3),
            hits_at_10: self.hits_at(10),
            mrr: self.mrr(),
            coverage: self.coverage(),
            hits: (1..=AT_K_MAX).map(|k| self.hits_at(k)).collect(),
        }
    }
}

/// 0-based rank of `gold` among the first [`AT_K_MAX`] candidates, not
/// counting the known ones ranked above it.
fn filtered_rank(
    candidates: &[Option<EntityId>],
    gold: EntityId,
    known: impl Fn(EntityId) -> bool,
) -> Option<usize> {
    let mut skipped = 0;
    for (rank, candidate) in candidates.iter().take(AT_K_MAX).enumerate() {
        match candidate {
            Some(c) if *c == gold => return Some(rank - skipped),
            Some(c) if known(*c) => skipped += 1,
            _ => {}
        }
    }
    None
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

/// Evaluation summary; serialized for `--json`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvalReport {
    /// Head plus tail queries evaluated.
    pub queries: usize,
    /// Test triples without a record in the prediction file.
    pub missing: usize,
    pub hits_at_1: f64,
    pub hits_at_3: f64,
    pub hits_at_10: f64,
    pub mrr: f64,
    pub coverage: f64,
    /// hits@1 through hits@10.
    pub hits: Vec<f64>,
}

impl fmt::Display for EvalReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "hits@1   {:.4}", self.hits_at_1)?;
        writeln!(f, "hits@3   {:.4}", self.hits_at_3)?;
        writeln!(f, "hits@10  {:.4}", self.hits_at_10)?;
        writeln!(f, "mrr      {:.4}", self.mrr)?;
        writeln!(f, "coverage {:.4}", self.coverage)?;
        write!(f, "queries  {} ({} test triples missing)", self.queries, self.missing)
    }
}

/// Evaluate `predictions` on every triple of `test`, filtering with `filters`.
pub fn evaluate(
    predictions: &PredictionFile,
    test: &TripleSet,
    filters: Vec<&TripleSet>,
    registry: &IdRegistry,
) -> EvalReport {
    let mut hits = HitsAtK::new(filters);
    let mut missing = 0;
    let ids = |ranking: &[(String, f64)]| -> Vec<Option<EntityId>> {
        ranking.iter().map(|(label, _)| registry.lookup_entity(label)).collect()
    };
    for triple in test.triples() {
        let key = triple.display(registry);
        let Some(completion) = predictions.get(&key) else {
            if missing < 5 {
                tracing::warn!(query = %key, "no predictions for test triple");
            }
            missing += 1;
            continue;
        };
        hits.evaluate_head(&ids(&completion.heads), triple);
        hits.evaluate_tail(&ids(&completion.tails), triple);
    }
    let report = hits.report(missing);
    tracing::info!(
        hits_at_1 = report.hits_at_1,
        hits_at_10 = report.hits_at_10,
        mrr = report.mrr,
        missing,
        "evaluation finished"
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &tempfile::TempDir, name: &str, text: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, text).unwrap();
        path
    }

    #[test]
    fn reads_records_in_either_order() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = write(
            &dir,
            "p",
            "a r b\nHeads: a\t0.5\tc\t0.25\t\nTails: b\t0.9\t\nc r d\nTails: \nHeads: x\t1.0\t\n",
        );
        let file = PredictionFile::read(&path).unwrap();
        assert_eq!(file.len(), 2);
        let first = file.get("a r b").unwrap();
        assert_eq!(first.heads, vec![("a".to_string(), 0.5), ("c".to_string(), 0.25)]);
        let second = file.get("c r d").unwrap();
        assert!(second.tails.is_empty());
        assert_eq!(second.heads[0].0, "x");
    }

    #[test]
    fn truncated_records_are_errors() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = write(&dir, "p", "a r b\nHeads: a\t0.5\t\n");
        assert!(matches!(PredictionFile::read(&path), Err(EvalError::Parse { line: 1, .. })));
        let path = write(&dir, "q", "a r b\nHeads: a\tnope\t\nTails: \n");
        assert!(matches!(PredictionFile::read(&path), Err(EvalError::Parse { line: 2, .. })));
    }

    #[test]
    fn known_facts_above_gold_do_not_count() {
        let reg = IdRegistry::new();
        let (a, b, c, d) = (reg.entity("a"), reg.entity("b"), reg.entity("c"), reg.entity("d"));
        let r = reg.relation("r").unwrap();
        let mut train = TripleSet::new();
        train.insert(Triple::new(a, r, c));
        let query = Triple::new(a, r, b);

        let mut hits = HitsAtK::new(vec![&train]);
        // c is a known tail of (a, r), d is not
        assert_eq!(hits.evaluate_tail(&[Some(c), Some(b)], &query), Some(0));
        assert_eq!(hits.evaluate_tail(&[Some(d), Some(c), Some(b)], &query), Some(1));
        assert_eq!(hits.evaluate_head(&[None, Some(d)], &query), None);
        assert_eq!(hits.evaluate_head(&[], &query), None);

        assert_eq!(hits.hits_at(1), 1.0 / 4.0);
        assert_eq!(hits.hits_at(3), 2.0 / 4.0);
        assert!((hits.mrr() - (1.0 + 0.5) / 4.0).abs() < 1e-12);
        assert_eq!(hits.coverage(), 3.0 / 4.0);
    }

    #[test]
    fn evaluate_reads_through_the_registry() {
        let dir = tempfile::TempDir::new().unwrap();
        let reg = IdRegistry::new();
        let r = reg.relation("r").unwrap();
        let mut test = TripleSet::new();
        test.insert(Triple::new(reg.entity("a"), r, reg.entity("b")));
        test.insert(Triple::new(reg.entity("x"), r, reg.entity("y")));
        let path = write(&dir, "p", "a r b\nHeads: a\t0.5\t\nTails: z\t0.9\tb\t0.4\t\n");

        let file = PredictionFile::read(&path).unwrap();
        let report = evaluate(&file, &test, vec![&test], &reg);
        assert_eq!(report.queries, 2);
        assert_eq!(report.missing, 1);
        assert_eq!(report.hits_at_1, 0.5);
        assert_eq!(report.hits_at_3, 1.0);
        assert_eq!(report.hits.len(), AT_K_MAX);
        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains("\"hits_at_10\":1.0"));
    }
}
