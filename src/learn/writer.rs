//! Snapshot writer running on its own thread.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use crate::error::{LearnError, RuleError};
use crate::graph::IdRegistry;
use crate::learn::dice::{MAX_ACYCLIC_LENGTH, MAX_CYCLIC_LENGTH};
use crate::rule::io::write_rules;
use crate::rule::{Rule, RuleShape};

use super::LearnResult;

/// Rules of a snapshot by shape and body length.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShapeCounts {
    pub zero: usize,
    /// Index `i` holds rules with `i + 1` body atoms.
    pub cyclic: Vec<usize>,
    pub acyclic: Vec<usize>,
}

impl ShapeCounts {
    pub fn of(rules: &[Rule]) -> Self {
        let mut counts = Self {
            zero: 0,
            cyclic: vec![0; MAX_CYCLIC_LENGTH],
            acyclic: vec![0; MAX_ACYCLIC_LENGTH],
        };
        for rule in rules {
            let bucket = rule.len().saturating_sub(1);
            match rule.shape() {
                RuleShape::Zero => counts.zero += 1,
                RuleShape::Cyclic => {
                    if let Some(c) = counts.cyclic.get_mut(bucket) {
                        *c += 1;
                    }
                }
                RuleShape::AcyclicAnchored | RuleShape::AcyclicFree => {
                    if let Some(c) = counts.acyclic.get_mut(bucket) {
                        *c += 1;
                    }
                }
            }
        }
        counts
    }

    /// `a | b | c` up to the last non-empty length.
    fn render(counts: &[usize]) -> String {
        let used = counts.iter().rposition(|c| *c > 0).map_or(0, |i| i + 1);
        counts[..used]
            .iter()
            .map(|c| c.to_string())
            .collect::<Vec<_>>()
            .join(" | ")
    }
}

/// Where the snapshot taken at `seconds` goes: `<prefix>-<seconds>`.
pub fn snapshot_path(prefix: &Path, seconds: u64) -> PathBuf {
    PathBuf::from(format!("{}-{seconds}", prefix.display()))
}

/// A snapshot being written in the background.
pub struct SnapshotWriter {
    path: PathBuf,
    handle: JoinHandle<Result<usize, RuleError>>,
}

impl SnapshotWriter {
    /// Start writing `rules` to `path`.
    pub fn spawn(path: PathBuf, rules: Vec<Rule>, registry: Arc<IdRegistry>, elapsed_secs: u64) -> LearnResult<Self> {
        let target = path.clone();
        let handle = std::thread::Builder::new()
            .name("burl-snapshot".to_string())
            .spawn(move || {
                let start = Instant::now();
                let counts = ShapeCounts::of(&rules);
                let written = write_rules(&target, &rules, &registry)?;
                tracing::info!(
                    path = %target.display(),
                    rules = written,
                    zero = counts.zero,
                    cyclic = %ShapeCounts::render(&counts.cyclic),
                    acyclic = %ShapeCounts::render(&counts.acyclic),
                    elapsed_secs,
                    write_ms = start.elapsed().as_millis() as u64,
                    "stored snapshot"
                );
                Ok(written)
            })
            .map_err(|source| LearnError::Spawn {
                what: "snapshot writer",
                source,
            })?;
        Ok(Self { path, handle })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the write; the number of rules written.
    pub fn join(self) -> LearnResult<usize> {
        match self.handle.join() {
            Ok(result) => result.map_err(|source| LearnError::Snapshot { source }),
            Err(_) => Err(LearnError::ThreadPanicked { what: "snapshot writer" }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{EntityId, RelationId};
    use crate::rule::{Atom, Body, RuleStats};

    fn r(raw: u64) -> RelationId {
        RelationId::from_raw(raw)
    }

    fn sample_rules() -> Vec<Rule> {
        let c = EntityId::from_raw(5);
        let a = EntityId::variable_for('A');
        vec![
            Rule::new(Atom::new(EntityId::X, r(1), c), Body::default(), RuleShape::Zero)
                .with_stats(RuleStats::new(200, 150)),
            Rule::new(
                Atom::new(EntityId::X, r(1), EntityId::Y),
                Body::new(vec![Atom::new(EntityId::X, r(2), EntityId::Y)]),
                RuleShape::Cyclic,
            )
            .with_stats(RuleStats::new(10, 5)),
            Rule::new(
                Atom::new(EntityId::X, r(1), EntityId::Y),
                Body::new(vec![Atom::new(EntityId::X, r(2), a), Atom::new(a, r(3), EntityId::Y)]),
                RuleShape::Cyclic,
            )
            .with_stats(RuleStats::new(10, 4)),
            Rule::new(
                Atom::new(EntityId::X, r(1), c),
                Body::new(vec![Atom::new(EntityId::X, r(2), c)]),
                RuleShape::AcyclicAnchored,
            )
            .with_stats(RuleStats::new(10, 3)),
        ]
    }

    #[test]
    fn counts_by_shape_and_length() {
        let counts = ShapeCounts::of(&sample_rules());
        assert_eq!(counts.zero, 1);
        assert_eq!(&counts.cyclic[..2], &[1, 1]);
        assert_eq!(counts.acyclic[0], 1);
        assert_eq!(ShapeCounts::render(&counts.cyclic), "1 | 1");
        assert_eq!(ShapeCounts::render(&[0, 0]), "");
    }

    #[test]
    fn snapshot_lands_next_to_the_prefix() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = snapshot_path(&dir.path().join("rules"), 10);
        assert_eq!(path, dir.path().join("rules-10"));

        let registry = Arc::new(IdRegistry::new());
        let writer = SnapshotWriter::spawn(path.clone(), sample_rules(), registry, 10).unwrap();
        assert_eq!(writer.path(), path.as_path());
        assert_eq!(writer.join().unwrap(), 4);
        assert_eq!(std::fs::read_to_string(&path).unwrap().lines().count(), 4);
    }
}
