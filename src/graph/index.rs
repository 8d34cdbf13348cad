//! In-memory triple index with inverse relations baked in.
//!
//! Every triple `(h, r, t)` is stored twice in the adjacency map: as
//! `h -r-> t` and as `t -inverse(r)-> h`. Following an edge backwards is then
//! just following the inverse relation forwards, which keeps samplers and
//! grounders free of direction special cases.

use std::collections::{HashMap, HashSet};

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

use super::ids::{EntityId, RelationId};
use super::Triple;

/// Neighbours of one entity under one relation: a set for membership and a
/// list for uniform random access.
#[derive(Debug, Default, Clone)]
pub struct Neighbors {
    set: HashSet<EntityId>,
    list: Vec<EntityId>,
}

impl Neighbors {
    fn insert(&mut self, entity: EntityId) -> bool {
        if self.set.insert(entity) {
            self.list.push(entity);
            true
        } else {
            false
        }
    }

    pub fn contains(&self, entity: EntityId) -> bool {
        self.set.contains(&entity)
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    pub fn as_slice(&self) -> &[EntityId] {
        &self.list
    }

    pub fn iter(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.list.iter().copied()
    }

    pub fn choose(&self, rng: &mut impl Rng) -> Option<EntityId> {
        self.list.choose(rng).copied()
    }
}

static NO_NEIGHBORS: std::sync::LazyLock<Neighbors> = std::sync::LazyLock::new(Neighbors::default);

/// Indexed set of triples.
///
/// Built once (single-threaded) and then shared read-only behind an `Arc`.
#[derive(Debug, Default, Clone)]
pub struct TripleSet {
    triples: Vec<Triple>,
    /// entity → relation (original or inverse) → neighbours.
    adjacency: HashMap<EntityId, HashMap<RelationId, Neighbors>>,
    /// original relation → its triples.
    by_relation: HashMap<RelationId, Vec<Triple>>,
    /// (relation, head side?) → precomputed uniform entity draws.
    start_samples: HashMap<(RelationId, bool), Vec<EntityId>>,
}

impl TripleSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a triple. Returns `false` if it was already present.
    ///
    /// Triples are stored with their original relation; an inverse relation
    /// is flipped first.
    pub fn insert(&mut self, triple: Triple) -> bool {
        let triple = triple.normalized();
        let fresh = self
            .adjacency
            .entry(triple.head)
            .or_default()
            .entry(triple.relation)
            .or_default()
            .insert(triple.tail);
        if !fresh {
            return false;
        }
        self.adjacency
            .entry(triple.tail)
            .or_default()
            .entry(triple.relation.inverse())
            .or_default()
            .insert(triple.head);
        self.by_relation.entry(triple.relation).or_default().push(triple);
        self.triples.push(triple);
        true
    }

    /// Insert every triple of another set.
    pub fn extend_from(&mut self, other: &TripleSet) {
        for t in other.triples() {
            self.insert(*t);
        }
    }

    pub fn len(&self) -> usize {
        self.triples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.triples.is_empty()
    }

    /// All triples in insertion order.
    pub fn triples(&self) -> &[Triple] {
        &self.triples
    }

    /// Original relations present in the set.
    pub fn relations(&self) -> impl Iterator<Item = RelationId> + '_ {
        self.by_relation.keys().copied()
    }

    /// Triples of an original relation; empty for unknown or inverse ids.
    pub fn triples_by_relation(&self, relation: RelationId) -> &[Triple] {
        self.by_relation
            .get(&relation)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// Entities reachable from `entity` over `relation` (original or inverse).
    pub fn neighbors(&self, entity: EntityId, relation: RelationId) -> &Neighbors {
        self.adjacency
            .get(&entity)
            .and_then(|m| m.get(&relation))
            .unwrap_or(&NO_NEIGHBORS)
    }

    /// Outgoing edges of an entity, over original and inverse relations.
    pub fn edges_from(&self, entity: EntityId) -> impl Iterator<Item = (RelationId, &Neighbors)> {
        self.adjacency
            .get(&entity)
            .into_iter()
            .flat_map(|m| m.iter().map(|(r, n)| (*r, n)))
    }

    /// Tails of `(value, relation, ·)` when `value_is_head`, else heads of
    /// `(·, relation, value)`.
    pub fn entities(&self, relation: RelationId, value: EntityId, value_is_head: bool) -> &Neighbors {
        if value_is_head {
            self.neighbors(value, relation)
        } else {
            self.neighbors(value, relation.inverse())
        }
    }

    pub fn is_true(&self, head: EntityId, relation: RelationId, tail: EntityId) -> bool {
        self.neighbors(head, relation).contains(tail)
    }

    pub fn contains(&self, triple: &Triple) -> bool {
        self.is_true(triple.head, triple.relation, triple.tail)
    }

    /// A uniformly chosen neighbour, see [`entities`](Self::entities).
    pub fn random_entity(
        &self,
        relation: RelationId,
        value: EntityId,
        value_is_head: bool,
        rng: &mut impl Rng,
    ) -> Option<EntityId> {
        self.entities(relation, value, value_is_head).choose(rng)
    }

    pub fn random_triple(&self, rng: &mut impl Rng) -> Option<Triple> {
        self.triples.choose(rng).copied()
    }

    pub fn random_triple_by_relation(&self, relation: RelationId, rng: &mut impl Rng) -> Option<Triple> {
        self.triples_by_relation(relation).choose(rng).copied()
    }

    /// Distinct heads (or tails) of a relation, in first-seen order.
    fn distinct_side(&self, relation: RelationId, head_side: bool) -> Vec<EntityId> {
        let mut seen = HashSet::new();
        self.triples_by_relation(relation)
            .iter()
            .map(|t| if head_side { t.head } else { t.tail })
            .filter(|e| seen.insert(*e))
            .collect()
    }

    fn draw_entities(&self, relation: RelationId, head_side: bool, n: usize, rng: &mut impl Rng) -> Vec<EntityId> {
        let distinct = self.distinct_side(relation, head_side);
        if distinct.is_empty() {
            return Vec::new();
        }
        (0..n).filter_map(|_| distinct.choose(rng).copied()).collect()
    }

    /// Precompute `n` uniform draws of distinct heads and tails per relation,
    /// consumed by the entity-sampling beam.
    ///
    /// With a seed, each (relation, side) draws from its own generator, so the
    /// table does not depend on how rayon schedules the keys.
    pub fn precompute_start_samples(&mut self, n: usize, seed: Option<u64>) {
        let keys: Vec<(RelationId, bool)> = self
            .relations()
            .flat_map(|r| [(r, true), (r, false)])
            .collect();
        let samples: Vec<_> = keys
            .into_par_iter()
            .map(|(r, head_side)| {
                let mut rng = match seed {
                    Some(seed) => StdRng::seed_from_u64(seed ^ start_sample_key(r, head_side)),
                    None => StdRng::from_entropy(),
                };
                ((r, head_side), self.draw_entities(r, head_side, n, &mut rng))
            })
            .collect();
        self.start_samples = samples.into_iter().collect();
        tracing::debug!(relations = self.by_relation.len(), draws = n, "precomputed beam start samples");
    }

    /// `n` uniform draws from the distinct heads (or tails) of a relation.
    ///
    /// Served from the precomputed table when available.
    pub fn random_entities_by_relation(
        &self,
        relation: RelationId,
        head_side: bool,
        n: usize,
        rng: &mut impl Rng,
    ) -> Vec<EntityId> {
        match self.start_samples.get(&(relation, head_side)) {
            Some(samples) => samples.iter().take(n).copied().collect(),
            None => self.draw_entities(relation, head_side, n, rng),
        }
    }
}

/// Spreads a relation id and side over the seed's bits (splitmix64 finalizer).
fn start_sample_key(relation: RelationId, head_side: bool) -> u64 {
    let mut z = ((relation.get() << 1) | u64::from(head_side)).wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}
