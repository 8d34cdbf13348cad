//! Grounding of acyclic rules `r(X,c) <= ...` and `r(c,Y) <= ...`.
//!
//! The body is grounded backwards, from its last atom towards the head
//! variable. Anchored rules start from the constant of the last atom; free
//! rules start from every triple of the last atom's relation.

use std::collections::{HashMap, HashSet};

use crate::graph::EntityId;

use super::{GroundingContext, Rule, RuleShape};

/// The fresh variable that occurs exactly once in the body, if any.
pub fn free_variable(rule: &Rule) -> Option<EntityId> {
    let mut order = Vec::new();
    let mut counts: HashMap<EntityId, usize> = HashMap::new();
    for atom in rule.body().iter() {
        for term in [atom.left(), atom.right()] {
            if term.is_variable() && term != EntityId::X && term != EntityId::Y {
                let count = counts.entry(term).or_insert(0);
                if *count == 0 {
                    order.push(term);
                }
                *count += 1;
            }
        }
    }
    order.into_iter().find(|v| counts.get(v) == Some(&1))
}

/// Walk from `value` bound to `variable` at atom `index` down to atom 0 and
/// collect the values of the head variable.
fn walk_back(
    rule: &Rule,
    variable: EntityId,
    value: EntityId,
    index: Option<usize>,
    ctx: &GroundingContext<'_>,
    previous: &HashSet<EntityId>,
    values: &mut HashSet<EntityId>,
) {
    if previous.contains(&value) {
        return;
    }
    let Some(index) = index else {
        values.insert(value);
        return;
    };
    if !ctx.is_application() && values.len() >= ctx.scoring.sample_size {
        return;
    }
    let Some(atom) = rule.body().get(index) else {
        return;
    };
    let mut current = previous.clone();
    current.insert(value);
    let value_is_left = atom.left() == variable;
    let next_variable = atom.term(!value_is_left);
    for next in ctx.triples.entities(atom.relation(), value, value_is_left).iter() {
        walk_back(rule, next_variable, next, index.checked_sub(1), ctx, &current, values);
    }
}

/// All values of the head variable for which the body holds.
///
/// While learning, stops at `sample_size` values or after `beam_max_attempts`
/// start points. While applying, a set reaching the discrimination bound is
/// returned empty.
pub fn values_reversed(rule: &Rule, ctx: &GroundingContext<'_>) -> HashSet<EntityId> {
    let mut values = HashSet::new();
    let Some(last) = rule.body().last() else {
        return values;
    };
    let last_index = rule.len() - 1;
    let head_constant = rule.head_constant().unwrap_or(EntityId::EXISTENTIAL);

    let exhausted = |counter: usize, values: &HashSet<EntityId>| -> bool {
        if ctx.is_application() {
            values.len() >= ctx.scoring.discrimination_bound
        } else {
            values.len() >= ctx.scoring.sample_size || counter >= ctx.scoring.beam_max_attempts
        }
    };

    let starts: Vec<(EntityId, EntityId, EntityId)> = match free_variable(rule) {
        Some(unbound) if rule.shape() == RuleShape::AcyclicFree => {
            let next_is_left = last.left() != unbound;
            let next_variable = last.term(next_is_left);
            ctx.triples
                .triples_by_relation(last.relation())
                .iter()
                .map(|t| (next_variable, t.value(next_is_left), t.value(!next_is_left)))
                .collect()
        }
        _ => {
            let constant_is_left = last.is_left_constant();
            let constant = last.term(constant_is_left);
            let next_variable = last.term(!constant_is_left);
            ctx.triples
                .entities(last.relation(), constant, constant_is_left)
                .iter()
                .map(|v| (next_variable, v, constant))
                .collect()
        }
    };

    for (counter, (variable, value, other)) in starts.into_iter().enumerate() {
        let previous = HashSet::from([other, head_constant]);
        walk_back(rule, variable, value, last_index.checked_sub(1), ctx, &previous, &mut values);
        if exhausted(counter, &values) {
            if ctx.is_application() {
                values.clear();
            }
            break;
        }
    }
    values
}

/// Whether the body holds with the head variable bound to `value`.
fn body_holds(
    rule: &Rule,
    variable: EntityId,
    value: EntityId,
    index: usize,
    ctx: &GroundingContext<'_>,
    previous: &mut HashSet<EntityId>,
) -> bool {
    let Some(atom) = rule.body().get(index) else {
        return false;
    };
    let value_is_left = atom.left() == variable;
    let other = atom.term(!value_is_left);

    if index + 1 == rule.len() {
        if other.is_constant() {
            if previous.contains(&other) && Some(other) != rule.head_constant() {
                return false;
            }
            return if value_is_left {
                ctx.triples.is_true(value, atom.relation(), other)
            } else {
                ctx.triples.is_true(other, atom.relation(), value)
            };
        }
        return ctx
            .triples
            .entities(atom.relation(), value, value_is_left)
            .iter()
            .any(|v| !previous.contains(&v));
    }

    for next in ctx.triples.entities(atom.relation(), value, value_is_left).iter() {
        if previous.contains(&next) {
            continue;
        }
        previous.insert(next);
        let holds = body_holds(rule, other, next, index + 1, ctx, previous);
        previous.remove(&next);
        if holds {
            return true;
        }
    }
    false
}

/// `(predicted, correctly_predicted)` over the reachable head-variable values.
pub(super) fn score(rule: &Rule, ctx: &GroundingContext<'_>) -> (u64, u64) {
    let Some(constant) = rule.head_constant() else {
        return (0, 0);
    };
    let values = values_reversed(rule, ctx);
    let relation = rule.head().relation();
    let correct = values
        .iter()
        .filter(|v| {
            if rule.is_x_rule() {
                ctx.triples.is_true(**v, relation, constant)
            } else {
                ctx.triples.is_true(constant, relation, **v)
            }
        })
        .count();
    (values.len() as u64, correct as u64)
}

pub(super) fn tail_results(rule: &Rule, head: EntityId, ctx: &GroundingContext<'_>) -> HashSet<EntityId> {
    let rule_head = rule.head();
    if rule.is_x_rule() {
        let constant = rule_head.right();
        if constant == head {
            return HashSet::new();
        }
        let mut previous = HashSet::from([head, constant]);
        if body_holds(rule, EntityId::X, head, 0, ctx, &mut previous) {
            return HashSet::from([constant]);
        }
        return HashSet::new();
    }
    if rule_head.left() == head {
        return values_reversed(rule, ctx);
    }
    HashSet::new()
}

pub(super) fn head_results(rule: &Rule, tail: EntityId, ctx: &GroundingContext<'_>) -> HashSet<EntityId> {
    let rule_head = rule.head();
    if rule.is_y_rule() {
        let constant = rule_head.left();
        if constant == tail {
            return HashSet::new();
        }
        let mut previous = HashSet::from([tail, constant]);
        if body_holds(rule, EntityId::Y, tail, 0, ctx, &mut previous) {
            return HashSet::from([constant]);
        }
        return HashSet::new();
    }
    if rule.is_x_rule() && rule_head.right() == tail {
        return values_reversed(rule, ctx);
    }
    HashSet::new()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScoringConfig;
    use crate::graph::{RelationId, Triple, TripleSet};
    use crate::rule::{Atom, Body};

    fn e(raw: i32) -> EntityId {
        EntityId::from_raw(raw)
    }
    fn r(raw: u64) -> RelationId {
        RelationId::from_raw(raw)
    }
    const A: EntityId = EntityId::variable_for('A');

    const LIVES_IN: u64 = 1;
    const CITIZEN_OF: u64 = 2;
    const BERLIN: i32 = 100;
    const GERMANY: i32 = 200;

    /// People 1..=4 live in Berlin, 1..=3 are German citizens, 5 is German
    /// without living in Berlin.
    fn cities() -> TripleSet {
        let mut ts = TripleSet::new();
        for p in 1..=4 {
            ts.insert(Triple::new(e(p), r(LIVES_IN), e(BERLIN)));
        }
        for p in [1, 2, 3, 5] {
            ts.insert(Triple::new(e(p), r(CITIZEN_OF), e(GERMANY)));
        }
        ts
    }

    /// citizen_of(X,germany) <= lives_in(X,berlin)
    fn anchored() -> Rule {
        Rule::new(
            Atom::new(EntityId::X, r(CITIZEN_OF), e(GERMANY)),
            Body::new(vec![Atom::new(EntityId::X, r(LIVES_IN), e(BERLIN))]),
            RuleShape::AcyclicAnchored,
        )
    }

    /// citizen_of(X,germany) <= lives_in(X,A)
    fn free() -> Rule {
        Rule::new(
            Atom::new(EntityId::X, r(CITIZEN_OF), e(GERMANY)),
            Body::new(vec![Atom::new(EntityId::X, r(LIVES_IN), A)]),
            RuleShape::AcyclicFree,
        )
    }

    #[test]
    fn free_variable_occurs_once() {
        assert_eq!(free_variable(&free()), Some(A));
        assert_eq!(free_variable(&anchored()), None);
    }

    #[test]
    fn anchored_scores_count_body_values() {
        let ts = cities();
        let scoring = ScoringConfig::default();
        let ctx = GroundingContext::learning(&ts, &scoring);
        let mut rule = anchored();
        rule.compute_scores(&ctx, &mut rand::thread_rng());
        assert_eq!(rule.stats().predicted, 4);
        assert_eq!(rule.stats().correctly_predicted, 3);
        assert!((rule.stats().confidence - 0.75).abs() < 1e-12);
    }

    #[test]
    fn free_scores_start_from_every_triple() {
        let ts = cities();
        let scoring = ScoringConfig::default();
        let ctx = GroundingContext::learning(&ts, &scoring);
        let mut rule = free();
        rule.compute_scores(&ctx, &mut rand::thread_rng());
        assert_eq!(rule.stats().predicted, 4);
        assert_eq!(rule.stats().correctly_predicted, 3);
    }

    #[test]
    fn tail_prediction_returns_the_head_constant() {
        let ts = cities();
        let scoring = ScoringConfig::default();
        let ctx = GroundingContext::application(&ts, &scoring);
        let rule = anchored();
        assert_eq!(rule.tail_results(e(4), &ctx), HashSet::from([e(GERMANY)]));
        assert!(rule.tail_results(e(5), &ctx).is_empty());
        assert!(rule.tail_results(e(GERMANY), &ctx).is_empty());
    }

    #[test]
    fn head_prediction_enumerates_body_values() {
        let ts = cities();
        let scoring = ScoringConfig::default();
        let ctx = GroundingContext::application(&ts, &scoring);
        let rule = anchored();
        let heads = rule.head_results(e(GERMANY), &ctx);
        assert_eq!(heads, (1..=4).map(e).collect::<HashSet<_>>());
        assert!(rule.head_results(e(BERLIN), &ctx).is_empty());
    }

    #[test]
    fn unspecific_rules_are_dropped_when_applied() {
        let ts = cities();
        let scoring = ScoringConfig {
            discrimination_bound: 3,
            ..ScoringConfig::default()
        };
        let ctx = GroundingContext::application(&ts, &scoring);
        assert!(anchored().head_results(e(GERMANY), &ctx).is_empty());
    }
}
