//! Horn rules: representation, scoring and application.
//!
//! A rule `head <= body` is one of four shapes:
//!
//! - **Cyclic**: `r(X,Y) <= ...` where the body connects `X` to `Y`
//! - **Anchored acyclic**: one head side is a constant and the last body atom
//!   ends in a constant
//! - **Free acyclic**: one head side is a constant and the body ends in a
//!   variable that occurs nowhere else
//! - **Zero**: empty body, `r(X,c) <=`
//!
//! Each shape grounds its body differently; see [`cyclic`], [`acyclic`] and
//! [`zero`]. Rules are produced from sampled walks by [`factory`] and
//! serialized by [`io`].

pub mod acyclic;
pub mod atom;
pub mod body;
pub mod cyclic;
pub mod factory;
pub mod io;
pub mod zero;

use std::collections::HashSet;
use std::hash::{Hash, Hasher};

use rand::Rng;

use crate::config::ScoringConfig;
use crate::graph::{EntityId, IdRegistry, TripleSet};

pub use atom::Atom;
pub use body::Body;

/// The four rule families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuleShape {
    Cyclic,
    AcyclicAnchored,
    AcyclicFree,
    Zero,
}

/// Scores measured on the training graph.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RuleStats {
    pub predicted: u64,
    pub correctly_predicted: u64,
    pub confidence: f64,
}

impl RuleStats {
    pub fn new(predicted: u64, correctly_predicted: u64) -> Self {
        let confidence = if predicted == 0 {
            0.0
        } else {
            correctly_predicted as f64 / predicted as f64
        };
        Self {
            predicted,
            correctly_predicted,
            confidence,
        }
    }
}

// ---------------------------------------------------------------------------
// Grounding context
// ---------------------------------------------------------------------------

/// Whether a rule is being scored or applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Scoring: groundings are sampled up to the sample bounds.
    Learning,
    /// Prediction: a candidate set reaching the discrimination bound is dropped.
    Application,
}

/// What every grounder reads: the graph, the bounds, and the mode.
#[derive(Clone, Copy)]
pub struct GroundingContext<'a> {
    pub triples: &'a TripleSet,
    pub scoring: &'a ScoringConfig,
    pub mode: Mode,
}

impl<'a> GroundingContext<'a> {
    pub fn learning(triples: &'a TripleSet, scoring: &'a ScoringConfig) -> Self {
        Self {
            triples,
            scoring,
            mode: Mode::Learning,
        }
    }

    pub fn application(triples: &'a TripleSet, scoring: &'a ScoringConfig) -> Self {
        Self {
            triples,
            scoring,
            mode: Mode::Application,
        }
    }

    pub fn is_application(&self) -> bool {
        self.mode == Mode::Application
    }

    /// Whether a candidate set has grown too large to discriminate.
    pub(crate) fn overflows(&self, candidates: usize) -> bool {
        self.is_application() && candidates >= self.scoring.discrimination_bound
    }
}

// ---------------------------------------------------------------------------
// Rule
// ---------------------------------------------------------------------------

/// A scored rule. Identity is `head` plus `body`; shape and scores ride along.
#[derive(Debug, Clone)]
pub struct Rule {
    head: Atom,
    body: Body,
    shape: RuleShape,
    stats: RuleStats,
}

impl Rule {
    /// Build a rule; cyclic rules are brought into canonical form.
    pub fn new(head: Atom, body: Body, shape: RuleShape) -> Self {
        let mut rule = Self {
            head,
            body,
            shape,
            stats: RuleStats::default(),
        };
        if shape == RuleShape::Cyclic {
            cyclic::canonicalize(&mut rule.body);
        }
        rule
    }

    pub fn with_stats(mut self, stats: RuleStats) -> Self {
        self.stats = stats;
        self
    }

    pub fn head(&self) -> &Atom {
        &self.head
    }

    pub fn body(&self) -> &Body {
        &self.body
    }

    pub fn shape(&self) -> RuleShape {
        self.shape
    }

    pub fn stats(&self) -> RuleStats {
        self.stats
    }

    /// Number of body atoms.
    pub fn len(&self) -> usize {
        self.body.len()
    }

    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }

    /// `r(X,c) <= ...`: the constant sits on the right.
    pub fn is_x_rule(&self) -> bool {
        self.head.left().is_variable() && self.head.right().is_constant()
    }

    /// `r(c,Y) <= ...`: the constant sits on the left.
    pub fn is_y_rule(&self) -> bool {
        self.head.left().is_constant() && self.head.right().is_variable()
    }

    /// The head's constant, for acyclic and zero rules.
    pub fn head_constant(&self) -> Option<EntityId> {
        self.head.constant()
    }

    /// A single body atom identical to the head.
    pub fn is_trivial(&self) -> bool {
        self.body.len() == 1 && self.body.first() == Some(&self.head)
    }

    /// Confidence used to rank rules at prediction time, with the unseen
    /// negative examples and the per-shape weights applied.
    pub fn applied_confidence(&self, scoring: &ScoringConfig) -> f64 {
        let base = self.stats.correctly_predicted as f64
            / (self.stats.predicted as f64 + scoring.unseen_negative_examples);
        match self.shape {
            RuleShape::Cyclic => {
                let exponent = self.body.len().saturating_sub(1) as i32;
                base * scoring.length_degrade.powi(exponent)
            }
            RuleShape::AcyclicAnchored => base,
            RuleShape::AcyclicFree => scoring.ac2_weight * base,
            RuleShape::Zero => scoring.zero_weight * base,
        }
    }

    /// Measure `predicted` and `correctly_predicted` on the graph and store them.
    pub fn compute_scores(&mut self, ctx: &GroundingContext<'_>, rng: &mut impl Rng) {
        let (predicted, correct) = match self.shape {
            RuleShape::Cyclic => cyclic::score(self, ctx, rng),
            RuleShape::AcyclicAnchored | RuleShape::AcyclicFree => acyclic::score(self, ctx),
            RuleShape::Zero => zero::score(self, ctx),
        };
        self.stats = RuleStats::new(predicted, correct);
    }

    /// Candidate tails for the query `(head, r, ?)`.
    pub fn tail_results(&self, head: EntityId, ctx: &GroundingContext<'_>) -> HashSet<EntityId> {
        match self.shape {
            RuleShape::Cyclic => cyclic::tail_results(self, head, ctx),
            RuleShape::AcyclicAnchored | RuleShape::AcyclicFree => acyclic::tail_results(self, head, ctx),
            RuleShape::Zero => zero::tail_results(self),
        }
    }

    /// Candidate heads for the query `(?, r, tail)`.
    pub fn head_results(&self, tail: EntityId, ctx: &GroundingContext<'_>) -> HashSet<EntityId> {
        match self.shape {
            RuleShape::Cyclic => cyclic::head_results(self, tail, ctx),
            RuleShape::AcyclicAnchored | RuleShape::AcyclicFree => acyclic::head_results(self, tail, ctx),
            RuleShape::Zero => zero::head_results(self),
        }
    }

    /// `head <= body` with registry labels.
    pub fn display(&self, registry: &IdRegistry) -> String {
        format!("{} <= {}", self.head.display(registry), self.body.display(registry))
    }
}

impl PartialEq for Rule {
    fn eq(&self, other: &Self) -> bool {
        self.head == other.head && self.body == other.body
    }
}

impl Eq for Rule {}

impl Hash for Rule {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.head.hash(state);
        self.body.hash(state);
    }
}
