//! Generalizing grounded walks into rules.
//!
//! The walk's head edge becomes the rule head and every further hop a body
//! atom. Constants are then replaced by variables:
//!
//! - both head entities → `X`/`Y`, everything else → fresh variables: cyclic
//! - one head entity → `X` (or `Y`), body constants except those of the last
//!   atom → fresh variables: anchored acyclic
//! - as above, but every body constant replaced: free acyclic
//! - one head entity of an empty body: zero
//!
//! A head entity is only replaced if it occurs at least twice in the rule, so
//! the variable actually connects head and body.

use crate::graph::EntityId;
use crate::sampler::Path;

use super::{Atom, Body, Rule, RuleShape};

/// A rule under construction: literal atoms plus the fresh variable counter.
#[derive(Debug, Clone)]
struct Draft {
    head: Atom,
    body: Vec<Atom>,
    next_free: usize,
}

impl Draft {
    fn from_path(path: &Path) -> Option<Self> {
        let (h, r, t) = path.hop(0)?;
        let body = (1..path.hops())
            .filter_map(|i| path.hop(i))
            .map(|(from, relation, to)| Atom::new(from, relation, to))
            .collect();
        Some(Self {
            head: Atom::new(h, r, t),
            body,
            next_free: 0,
        })
    }

    /// Replace `constant` everywhere; the number of replaced occurrences.
    fn replace(&mut self, constant: EntityId, variable: EntityId) -> usize {
        let mut count = self.head.replace(constant, variable);
        for atom in &mut self.body {
            count += atom.replace(constant, variable);
        }
        count
    }

    /// Replace body constants by fresh variables, atom by atom. The head's own
    /// constant stays; with `keep_last` the last atom is left untouched.
    fn generalize_body(&mut self, keep_last: bool) {
        let keep = self.head.constant();
        let end = if keep_last {
            self.body.len().saturating_sub(1)
        } else {
            self.body.len()
        };
        for i in 0..end {
            for left in [true, false] {
                let term = self.body[i].term(left);
                if term.is_constant() && Some(term) != keep {
                    let fresh = EntityId::fresh_variable(self.next_free);
                    self.next_free += 1;
                    self.replace(term, fresh);
                }
            }
        }
    }

    fn into_rule(self, shape: RuleShape) -> Rule {
        Rule::new(self.head, Body::new(self.body), shape)
    }
}

/// All rules a walk generalizes to, in order: cyclic, then left-side and
/// right-side acyclic (free before anchored) or zero rules.
///
/// A successful cyclic generalization is returned alone.
pub fn generalize(path: &Path, exclude_free: bool) -> Vec<Rule> {
    let Some(raw) = Draft::from_path(path) else {
        return Vec::new();
    };

    let mut both = raw.clone();
    let x_count = both.replace(raw.head.left(), EntityId::X);
    let y_count = both.replace(both.head.right(), EntityId::Y);
    if x_count >= 2 && y_count >= 2 {
        both.generalize_body(false);
        return vec![both.into_rule(RuleShape::Cyclic)];
    }

    let mut rules = Vec::new();
    for (left, variable) in [(true, EntityId::X), (false, EntityId::Y)] {
        let mut draft = raw.clone();
        let count = draft.replace(raw.head.term(left), variable);
        if draft.body.is_empty() {
            rules.push(draft.into_rule(RuleShape::Zero));
            continue;
        }
        if count < 2 {
            continue;
        }
        if !exclude_free {
            let mut free = draft.clone();
            free.generalize_body(false);
            rules.push(free.into_rule(RuleShape::AcyclicFree));
        }
        draft.generalize_body(true);
        rules.push(draft.into_rule(RuleShape::AcyclicAnchored));
    }
    rules
}
