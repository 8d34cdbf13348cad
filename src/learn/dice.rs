//! Multi-armed bandit over rule types.
//!
//! Each of the [`SLOTS`] slots is one (shape, length) combination. Workers
//! report the reward they produced on their slot; between batches the
//! averages are frozen into relevant scores that drive the next assignment.

use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::{LearnConfig, Policy};
use crate::error::LearnError;

use super::LearnResult;

/// Zero slot, ten cyclic lengths, three acyclic lengths.
pub const SLOTS: usize = 14;
pub const MAX_CYCLIC_LENGTH: usize = 10;
pub const MAX_ACYCLIC_LENGTH: usize = 3;

/// Score recorded for a slot that was tried but produced nothing, so it stays
/// distinguishable from an untried one.
const GAMMA: f64 = 0.0001;
const INITIAL_SCORE: f64 = f64::MAX / (SLOTS as f64 + 1.0);

/// One bandit arm: the kind of rule a worker mines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
    Zero,
    /// Cyclic rules with this many body atoms.
    Cyclic(usize),
    /// Acyclic rules with this many body atoms.
    Acyclic(usize),
}

impl Slot {
    pub fn index(self) -> usize {
        match self {
            Slot::Zero => 0,
            Slot::Cyclic(len) => len,
            Slot::Acyclic(len) => MAX_CYCLIC_LENGTH + len,
        }
    }

    pub fn from_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(Slot::Zero),
            i if i <= MAX_CYCLIC_LENGTH => Some(Slot::Cyclic(i)),
            i if i < SLOTS => Some(Slot::Acyclic(i - MAX_CYCLIC_LENGTH)),
            _ => None,
        }
    }

    /// Body length of the rules mined on this slot.
    pub fn length(self) -> usize {
        match self {
            Slot::Zero => 0,
            Slot::Cyclic(len) | Slot::Acyclic(len) => len,
        }
    }

    /// Hops of the walk to sample: the head edge plus the body.
    pub fn steps(self) -> usize {
        self.length() + 1
    }

    pub fn is_cyclic(self) -> bool {
        matches!(self, Slot::Cyclic(_))
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Slot::Zero => write!(f, "zero"),
            Slot::Cyclic(len) => write!(f, "cyclic-{len}"),
            Slot::Acyclic(len) => write!(f, "acyclic-{len}"),
        }
    }
}

/// Per-batch averages as saved by [`Dice::save_scores`].
#[derive(Debug, Clone)]
struct HistoryRow {
    timestamp_ms: u128,
    averages: [f64; SLOTS],
    counts: [u64; SLOTS],
}

/// The bandit.
pub struct Dice {
    current_scores: [f64; SLOTS],
    current_counts: [u64; SLOTS],
    relevant_scores: [f64; SLOTS],
    relevant_ready: bool,
    history: Vec<HistoryRow>,
    policy: Policy,
    epsilon: f64,
    annealing: f64,
    output: Option<PathBuf>,
    rng: StdRng,
}

impl Dice {
    /// Slots beyond the configured lengths, and the zero slot when zero rules
    /// are off, start at score 0 and are never drawn.
    pub fn new(config: &LearnConfig, output: Option<PathBuf>, seed: Option<u64>) -> Self {
        let mut current_scores = [INITIAL_SCORE; SLOTS];
        if !config.zero_rules_active {
            current_scores[Slot::Zero.index()] = 0.0;
        }
        for len in config.max_length_cyclic + 1..=MAX_CYCLIC_LENGTH {
            current_scores[Slot::Cyclic(len).index()] = 0.0;
        }
        for len in config.max_length_acyclic + 1..=MAX_ACYCLIC_LENGTH {
            current_scores[Slot::Acyclic(len).index()] = 0.0;
        }
        Self {
            current_scores,
            current_counts: [1; SLOTS],
            relevant_scores: [0.0; SLOTS],
            relevant_ready: false,
            history: Vec::new(),
            policy: config.policy,
            epsilon: config.epsilon,
            annealing: config.annealing,
            output,
            rng: seed.map_or_else(StdRng::from_entropy, StdRng::seed_from_u64),
        }
    }

    /// Draw a slot for the next batch.
    ///
    /// Explores uniformly over the slots enabled at start with probability
    /// `max(epsilon, (annealing - batch) / annealing)`, otherwise follows the
    /// configured policy.
    pub fn ask(&mut self, batch: usize) -> LearnResult<Slot> {
        if !self.relevant_ready {
            return Err(LearnError::DiceNotReady);
        }
        let explore = ((self.annealing - batch as f64) / self.annealing).max(self.epsilon);
        if self.rng.gen_bool(explore.clamp(0.0, 1.0)) {
            let enabled: Vec<usize> = match self.history.first() {
                Some(first) => (0..SLOTS).filter(|i| first.averages[*i] != 0.0).collect(),
                None => Vec::new(),
            };
            if !enabled.is_empty() {
                let i = enabled[self.rng.gen_range(0..enabled.len())];
                return Ok(self.slot(i));
            }
        }

        let index = match self.policy {
            Policy::Greedy => self.greedy(),
            Policy::Weighted => {
                let total: f64 = self.relevant_scores.iter().sum();
                if total > 0.0 && total.is_finite() {
                    let mut d = self.rng.gen_range(0.0..total);
                    let mut chosen = self.greedy();
                    for (i, score) in self.relevant_scores.iter().enumerate() {
                        if d < *score {
                            chosen = i;
                            break;
                        }
                        d -= score;
                    }
                    chosen
                } else {
                    self.greedy()
                }
            }
        };
        Ok(self.slot(index))
    }

    fn greedy(&self) -> usize {
        let mut best = 0;
        for i in 1..SLOTS {
            if self.relevant_scores[i] > self.relevant_scores[best] {
                best = i;
            }
        }
        best
    }

    fn slot(&self, index: usize) -> Slot {
        Slot::from_index(index).unwrap_or(Slot::Zero)
    }

    /// Accumulate the reward a worker produced on `slot`.
    pub fn add_score(&mut self, slot: Slot, score: f64) {
        let i = slot.index();
        self.current_scores[i] += score;
        self.current_counts[i] += 1;
        if score == 0.0 {
            self.current_scores[i] += GAMMA;
        }
    }

    /// Freeze the averages of the window that just closed. Slots without any
    /// score keep their previous relevant score.
    pub fn compute_relevant_scores(&mut self) {
        for i in 0..SLOTS {
            if self.current_scores[i] > 0.0 {
                self.relevant_scores[i] = self.current_scores[i] / self.current_counts[i] as f64;
            }
        }
        self.relevant_ready = true;
    }

    /// Open a new collection window.
    pub fn reset_scores(&mut self) {
        self.current_scores = [0.0; SLOTS];
        self.current_counts = [0; SLOTS];
        self.relevant_ready = false;
    }

    /// Append the current window's averages to the history.
    pub fn save_scores(&mut self) {
        let mut averages = [0.0; SLOTS];
        for (i, avg) in averages.iter_mut().enumerate() {
            *avg = self.current_scores[i] / self.current_counts[i].max(1) as f64;
        }
        let timestamp_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();
        self.history.push(HistoryRow {
            timestamp_ms,
            averages,
            counts: self.current_counts,
        });
    }

    pub fn relevant_scores(&self) -> &[f64; SLOTS] {
        &self.relevant_scores
    }

    /// Dump the history as TSV to `<output>_<suffix>`; a no-op without an
    /// output prefix.
    pub fn write(&self, suffix: &str) -> LearnResult<Option<PathBuf>> {
        let Some(prefix) = &self.output else {
            return Ok(None);
        };
        let path = PathBuf::from(format!("{}_{suffix}", prefix.display()));
        self.write_to(&path)?;
        Ok(Some(path))
    }

    fn write_to(&self, path: &Path) -> LearnResult<()> {
        let write_err = |e| LearnError::Write {
            what: "bandit history",
            path: path.display().to_string(),
            source: e,
        };
        let mut out = std::io::BufWriter::new(std::fs::File::create(path).map_err(write_err)?);
        for row in &self.history {
            let mut line = row.timestamp_ms.to_string();
            for avg in &row.averages {
                line.push('\t');
                line.push_str(&format!("{avg:?}"));
            }
            for count in &row.counts {
                line.push('\t');
                line.push_str(&count.to_string());
            }
            writeln!(out, "{line}").map_err(write_err)?;
        }
        out.flush().map_err(write_err)
    }
}

/// Relevant scores of the enabled slots, `zero | cyclic ... | acyclic ...`.
impl fmt::Display for Dice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let enabled = |i: usize| self.history.first().is_none_or(|h| h.averages[i] != 0.0);
        for i in 0..SLOTS {
            if i == 1 || i == MAX_CYCLIC_LENGTH + 1 {
                write!(f, " |")?;
            }
            if !enabled(i) {
                continue;
            }
            let s = self.relevant_scores[i];
            if s > 999_999.0 {
                write!(f, "  >999k")?;
            } else {
                write!(f, " {s:06.0}")?;
            }
        }
        Ok(())
    }
}
