//! Zero rules `r(X,c) <=`: the base rate of a constant under a relation.

use std::collections::HashSet;

use crate::graph::EntityId;

use super::{GroundingContext, Rule};

/// `predicted` is every triple of the head relation, `correctly_predicted`
/// those that carry the head constant on its side.
pub(super) fn score(rule: &Rule, ctx: &GroundingContext<'_>) -> (u64, u64) {
    let head = rule.head();
    let Some(constant) = head.constant() else {
        return (0, 0);
    };
    let relation = head.relation();
    let predicted = ctx.triples.triples_by_relation(relation).len();
    let correct = ctx
        .triples
        .entities(relation, constant, head.is_left_constant())
        .len();
    (predicted as u64, correct as u64)
}

pub(super) fn tail_results(rule: &Rule) -> HashSet<EntityId> {
    let head = rule.head();
    if head.is_right_constant() {
        HashSet::from([head.right()])
    } else {
        HashSet::new()
    }
}

pub(super) fn head_results(rule: &Rule) -> HashSet<EntityId> {
    let head = rule.head();
    if head.is_left_constant() {
        HashSet::from([head.left()])
    } else {
        HashSet::new()
    }
}
