//! Grounding of cyclic rules `r(X,Y) <= b1, ..., bn`.
//!
//! Scoring collects `(x, y)` pairs for which the body holds, either by a
//! bounded depth-first search or by random walks sampled from both ends of the
//! body. Application runs the depth-first search from the query entity.

use std::collections::HashSet;

use rand::Rng;

use crate::config::CyclicGrounding;
use crate::graph::EntityId;

use super::body::Body;
use super::{GroundingContext, Rule};

/// `(x, y)` pairs keyed by the head variables.
type Pairs = HashSet<(EntityId, EntityId)>;

/// Bring a cyclic body into canonical form: the first atom mentions `X`.
pub(super) fn canonicalize(body: &mut Body) {
    let starts_with_y = body.first().is_some_and(|a| a.contains(EntityId::Y));
    if starts_with_y && body.len() > 1 {
        body.reverse();
        body.normalize_variables();
    }
}

/// The head variable grounded by the first body atom, and the other one.
fn end_variables(rule: &Rule) -> (EntityId, EntityId) {
    if rule.body().first().is_some_and(|a| a.contains(EntityId::X)) {
        (EntityId::X, EntityId::Y)
    } else {
        (EntityId::Y, EntityId::X)
    }
}

fn is_last(body: &Body, index: usize, forward: bool) -> bool {
    if forward { index + 1 == body.len() } else { index == 0 }
}

fn step(index: usize, forward: bool) -> usize {
    if forward { index + 1 } else { index.wrapping_sub(1) }
}

// ---------------------------------------------------------------------------
// Depth-first grounding
// ---------------------------------------------------------------------------

/// Collect every value of the far end variable reachable from `value` bound
/// to `current` at atom `index`. Returns `false` once the result set reached
/// the discrimination bound.
#[allow(clippy::too_many_arguments)]
fn dfs(
    body: &Body,
    current: EntityId,
    value: EntityId,
    index: usize,
    forward: bool,
    ctx: &GroundingContext<'_>,
    previous: &HashSet<EntityId>,
    results: &mut HashSet<EntityId>,
) -> bool {
    if ctx.overflows(results.len()) {
        return false;
    }
    if previous.contains(&value) {
        return true;
    }
    let Some(atom) = body.get(index) else {
        return true;
    };
    let value_is_head = atom.left() == current;
    let next_values = ctx.triples.entities(atom.relation(), value, value_is_head);

    if is_last(body, index, forward) {
        results.extend(next_values.iter().filter(|v| !previous.contains(v) && *v != value));
        return !ctx.overflows(results.len());
    }

    if next_values.len() > ctx.scoring.branching_factor_bound && ctx.scoring.dfs_sampling {
        return true;
    }
    let next_variable = if value_is_head { atom.right() } else { atom.left() };
    let mut current_values = previous.clone();
    if ctx.scoring.object_identity {
        current_values.insert(value);
    }
    for next in next_values.iter() {
        let next_index = step(index, forward);
        if !dfs(body, next_variable, next, next_index, forward, ctx, &current_values, results) {
            return false;
        }
    }
    true
}

/// Depth-first grounding from the start variable `from` at atom `index`.
fn dfs_from(
    rule: &Rule,
    from: EntityId,
    value: EntityId,
    index: usize,
    forward: bool,
    ctx: &GroundingContext<'_>,
) -> HashSet<EntityId> {
    let mut results = HashSet::new();
    if !dfs(rule.body(), from, value, index, forward, ctx, &HashSet::new(), &mut results) {
        results.clear();
    }
    results
}

/// Ground the body for every triple of the first atom's relation, within the
/// sample bounds when sampling is on.
fn ground_dfs(rule: &Rule, first: EntityId, ctx: &GroundingContext<'_>) -> Pairs {
    let mut pairs = Pairs::new();
    let Some(atom) = rule.body().first() else {
        return pairs;
    };
    let value_is_head = atom.left() == first;
    let sample_size = ctx.scoring.sample_size;
    for (i, triple) in ctx.triples.triples_by_relation(atom.relation()).iter().enumerate() {
        let start = triple.value(value_is_head);
        let ends = dfs_from(rule, first, start, 0, true, ctx);
        for end in ends {
            pairs.insert(if first == EntityId::X { (start, end) } else { (end, start) });
        }
        let counter = i + 1;
        if (counter > sample_size || pairs.len() > sample_size) && ctx.scoring.dfs_sampling {
            break;
        }
    }
    pairs
}

// ---------------------------------------------------------------------------
// Beam grounding
// ---------------------------------------------------------------------------

/// One random walk through the body; the grounding of the far end variable.
fn random_walk(
    body: &Body,
    mut current: EntityId,
    mut value: EntityId,
    mut index: usize,
    forward: bool,
    ctx: &GroundingContext<'_>,
    rng: &mut impl Rng,
) -> Option<EntityId> {
    let mut previous: HashSet<EntityId> = HashSet::new();
    loop {
        if previous.contains(&value) {
            return None;
        }
        let atom = body.get(index)?;
        let value_is_head = atom.left() == current;
        let next = ctx.triples.random_entity(atom.relation(), value, value_is_head, rng)?;
        if is_last(body, index, forward) {
            if previous.contains(&next) || next == value {
                return None;
            }
            return Some(next);
        }
        current = if value_is_head { atom.right() } else { atom.left() };
        if ctx.scoring.object_identity {
            previous.insert(value);
        }
        index = step(index, forward);
        value = next;
    }
}

/// Where beam walks start.
enum Starts {
    /// Random triples, up to the attempt bound.
    Edges,
    /// Precomputed entity draws.
    Entities,
}

/// Sample walks from one end of the body. `forward` walks start at the first
/// atom with `first`; backward walks start at the last atom with the other
/// head variable.
fn beam(
    rule: &Rule,
    (first, last): (EntityId, EntityId),
    forward: bool,
    starts: Starts,
    ctx: &GroundingContext<'_>,
    rng: &mut impl Rng,
) -> Pairs {
    let mut pairs = Pairs::new();
    let body = rule.body();
    let (atom, start_variable, index) = if forward {
        (body.first(), first, 0)
    } else {
        (body.last(), last, body.len().saturating_sub(1))
    };
    let Some(atom) = atom else {
        return pairs;
    };
    let value_is_head = atom.left() == start_variable;
    let scoring = ctx.scoring;

    let record = |start: EntityId, end: EntityId, pairs: &mut Pairs| -> bool {
        // (first-variable value, last-variable value) oriented as (x, y)
        let (first_value, last_value) = if forward { (start, end) } else { (end, start) };
        let pair = if first == EntityId::X {
            (first_value, last_value)
        } else {
            (last_value, first_value)
        };
        pairs.insert(pair)
    };

    let mut repetitions = 0usize;
    match starts {
        Starts::Edges => {
            let mut attempts = 0usize;
            while let Some(triple) = ctx.triples.random_triple_by_relation(atom.relation(), rng) {
                attempts += 1;
                let start = triple.value(value_is_head);
                if let Some(end) = random_walk(body, start_variable, start, index, forward, ctx, rng) {
                    if record(start, end, &mut pairs) {
                        repetitions = 0;
                    } else {
                        repetitions += 1;
                    }
                }
                if repetitions >= scoring.beam_max_repetitions
                    || attempts >= scoring.beam_max_attempts
                    || pairs.len() >= scoring.beam_max_groundings
                {
                    break;
                }
            }
        }
        Starts::Entities => {
            let draws = ctx
                .triples
                .random_entities_by_relation(atom.relation(), value_is_head, scoring.beam_max_attempts, rng);
            for start in draws {
                if let Some(end) = random_walk(body, start_variable, start, index, forward, ctx, rng) {
                    if record(start, end, &mut pairs) {
                        repetitions = 0;
                    } else {
                        repetitions += 1;
                    }
                }
                if repetitions >= scoring.beam_max_repetitions || pairs.len() >= scoring.beam_max_groundings {
                    break;
                }
            }
        }
    }
    pairs
}

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

/// `(predicted, correctly_predicted)` over the sampled body groundings.
pub(super) fn score(rule: &Rule, ctx: &GroundingContext<'_>, rng: &mut impl Rng) -> (u64, u64) {
    let (first, last) = end_variables(rule);
    let (forward, backward) = match ctx.scoring.cyclic_grounding {
        CyclicGrounding::Dfs => (ground_dfs(rule, first, ctx), Pairs::new()),
        CyclicGrounding::BeamEdges => (
            beam(rule, (first, last), true, Starts::Edges, ctx, rng),
            beam(rule, (first, last), false, Starts::Edges, ctx, rng),
        ),
        CyclicGrounding::BeamEntities => (
            beam(rule, (first, last), true, Starts::Entities, ctx, rng),
            beam(rule, (first, last), false, Starts::Entities, ctx, rng),
        ),
    };

    let relation = rule.head().relation();
    let mut predicted = 0u64;
    let mut correct = 0u64;
    for (x, y) in forward.iter().chain(backward.iter()) {
        predicted += 1;
        if ctx.triples.is_true(*x, relation, *y) {
            correct += 1;
        }
    }
    (predicted, correct)
}

pub(super) fn tail_results(rule: &Rule, head: EntityId, ctx: &GroundingContext<'_>) -> HashSet<EntityId> {
    dfs_from(rule, EntityId::X, head, 0, true, ctx)
}

pub(super) fn head_results(rule: &Rule, tail: EntityId, ctx: &GroundingContext<'_>) -> HashSet<EntityId> {
    let last = rule.len().saturating_sub(1);
    dfs_from(rule, EntityId::Y, tail, last, false, ctx)
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use super::*;
    use crate::config::ScoringConfig;
    use crate::graph::{RelationId, Triple, TripleSet};
    use crate::rule::{Atom, RuleShape};

    fn e(raw: i32) -> EntityId {
        EntityId::from_raw(raw)
    }
    fn r(raw: u64) -> RelationId {
        RelationId::from_raw(raw)
    }
    const A: EntityId = EntityId::variable_for('A');

    /// Family graph: parent(p, c) and married(p, q); child_of(c, p) for some.
    fn family() -> TripleSet {
        let mut ts = TripleSet::new();
        let (parent, married, child_of) = (r(1), r(2), r(3));
        ts.insert(Triple::new(e(1), parent, e(10)));
        ts.insert(Triple::new(e(2), parent, e(20)));
        ts.insert(Triple::new(e(3), parent, e(30)));
        ts.insert(Triple::new(e(1), married, e(4)));
        ts.insert(Triple::new(e(10), child_of, e(1)));
        ts.insert(Triple::new(e(20), child_of, e(2)));
        ts
    }

    /// child_of(X,Y) <= parent(Y,X)
    fn inverse_rule() -> Rule {
        Rule::new(
            Atom::new(EntityId::X, r(3), EntityId::Y),
            Body::new(vec![Atom::new(EntityId::Y, r(1), EntityId::X)]),
            RuleShape::Cyclic,
        )
    }

    #[test]
    fn canonical_form_starts_with_x() {
        let rule = Rule::new(
            Atom::new(EntityId::X, r(1), EntityId::Y),
            Body::new(vec![
                Atom::new(EntityId::Y, r(2), EntityId::variable_for('C')),
                Atom::new(EntityId::variable_for('C'), r(3), EntityId::X),
            ]),
            RuleShape::Cyclic,
        );
        let first = rule.body().first().unwrap();
        assert_eq!(first.relation(), r(3));
        assert!(first.contains(EntityId::X));
        assert!(first.contains(A));
    }

    #[test]
    fn dfs_scores_count_every_grounding() {
        let ts = family();
        let mut scoring = ScoringConfig::default();
        scoring.cyclic_grounding = CyclicGrounding::Dfs;
        let ctx = GroundingContext::learning(&ts, &scoring);
        let mut rule = inverse_rule();
        rule.compute_scores(&ctx, &mut StdRng::seed_from_u64(0));
        // three parent edges, two of them mirrored by child_of
        assert_eq!(rule.stats().predicted, 3);
        assert_eq!(rule.stats().correctly_predicted, 2);
    }

    #[test]
    fn beam_scores_stay_within_the_groundings() {
        let ts = family();
        let scoring = ScoringConfig {
            cyclic_grounding: CyclicGrounding::BeamEdges,
            beam_max_attempts: 200,
            ..ScoringConfig::default()
        };
        let ctx = GroundingContext::learning(&ts, &scoring);
        let mut rule = inverse_rule();
        rule.compute_scores(&ctx, &mut StdRng::seed_from_u64(4));
        let stats = rule.stats();
        // forward and backward pair sets each hold at most the three groundings
        assert!(stats.predicted >= 1 && stats.predicted <= 6);
        assert!(stats.correctly_predicted <= stats.predicted);
    }

    #[test]
    fn application_follows_the_body_both_ways() {
        let ts = family();
        let scoring = ScoringConfig::default();
        let ctx = GroundingContext::application(&ts, &scoring);
        let rule = inverse_rule();
        assert_eq!(rule.tail_results(e(30), &ctx), HashSet::from([e(3)]));
        assert_eq!(rule.head_results(e(1), &ctx), HashSet::from([e(10)]));
        assert!(rule.tail_results(e(1), &ctx).is_empty());
    }

    #[test]
    fn two_hop_paths_respect_object_identity() {
        // married(X,A), married(Y,A) can only bounce back to X
        let ts = family();
        let scoring = ScoringConfig::default();
        let ctx = GroundingContext::application(&ts, &scoring);
        let bounce = Rule::new(
            Atom::new(EntityId::X, r(9), EntityId::Y),
            Body::new(vec![Atom::new(EntityId::X, r(2), A), Atom::new(EntityId::Y, r(2), A)]),
            RuleShape::Cyclic,
        );
        assert!(bounce.tail_results(e(1), &ctx).is_empty());
    }

    #[test]
    fn oversized_candidate_sets_are_dropped() {
        let mut ts = TripleSet::new();
        for i in 0..20 {
            ts.insert(Triple::new(e(1), r(1), e(100 + i)));
        }
        let scoring = ScoringConfig {
            discrimination_bound: 5,
            ..ScoringConfig::default()
        };
        let rule = Rule::new(
            Atom::new(EntityId::X, r(2), EntityId::Y),
            Body::new(vec![Atom::new(EntityId::X, r(1), EntityId::Y)]),
            RuleShape::Cyclic,
        );
        let learning = GroundingContext::learning(&ts, &scoring);
        assert_eq!(rule.tail_results(e(1), &learning).len(), 20);
        let applying = GroundingContext::application(&ts, &scoring);
        assert!(rule.tail_results(e(1), &applying).is_empty());
    }
}
