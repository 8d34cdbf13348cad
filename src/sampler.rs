//! Random walks over the training graph.
//!
//! A [`Path`] is a grounded walk: a seed triple followed by further hops, each
//! taken forward (along a relation) or backward (along its inverse). Rules are
//! generalized from these walks by the factory in [`crate::rule::factory`].

use rand::Rng;
use rand::seq::SliceRandom;

use crate::graph::path::MAX_HOPS;
use crate::graph::{EntityId, RelationId, RelationPath, Triple, TripleSet};
use crate::rule::Rule;

/// A grounded walk `n0 -r0-> n1 -r1-> ... -> nk`.
///
/// Hop `i` connects `nodes[i]` to `nodes[i + 1]`; an inverse relation marks a
/// hop walked against the edge direction. Hop 0 is the head edge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Path {
    nodes: Vec<EntityId>,
    relations: RelationPath,
}

impl Path {
    pub fn new(nodes: Vec<EntityId>, relations: RelationPath) -> Self {
        debug_assert_eq!(nodes.len(), relations.len() + 1);
        Self { nodes, relations }
    }

    pub fn nodes(&self) -> &[EntityId] {
        &self.nodes
    }

    pub fn relations(&self) -> RelationPath {
        self.relations
    }

    /// Number of hops, head edge included.
    pub fn hops(&self) -> usize {
        self.relations.len()
    }

    /// The hop from `nodes[i]` to `nodes[i + 1]`.
    pub fn hop(&self, i: usize) -> Option<(EntityId, RelationId, EntityId)> {
        let relation = self.relations.hop(i)?;
        Some((self.nodes[i], relation, self.nodes[i + 1]))
    }

    /// `+` for a forward hop, `-` for a backward one.
    pub fn marker(&self, i: usize) -> Option<char> {
        self.relations
            .hop(i)
            .map(|r| if r.is_inverse() { '-' } else { '+' })
    }

    /// Whether the walk can be generalized under object identity: the head
    /// entities do not reappear strictly inside the body, and no entity repeats
    /// from the head's second node on.
    pub fn is_valid(&self) -> bool {
        let (Some(&x), Some(&y)) = (self.nodes.first(), self.nodes.get(1)) else {
            return false;
        };
        let last = self.nodes.len() - 1;
        let inner = self.nodes.get(2..last).unwrap_or(&[]);
        if inner.iter().any(|n| *n == x || *n == y) {
            return false;
        }
        let mut seen = std::collections::HashSet::new();
        self.nodes[1..].iter().all(|n| seen.insert(*n))
    }

    /// Whether the walk returns to one of the head entities.
    pub fn is_cyclic(&self) -> bool {
        match (self.nodes.first(), self.nodes.get(1), self.nodes.last()) {
            (Some(x), Some(y), Some(last)) if self.nodes.len() > 2 => last == x || last == y,
            _ => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Sampler
// ---------------------------------------------------------------------------

/// Samples walks of a given length from a [`TripleSet`].
pub struct PathSampler<'a> {
    triples: &'a TripleSet,
    /// Relations whose triples seed walks; every triple when `None`.
    seed_relations: Option<Vec<RelationId>>,
}

impl<'a> PathSampler<'a> {
    pub fn new(triples: &'a TripleSet, seed_relations: Option<Vec<RelationId>>) -> Self {
        Self {
            triples,
            seed_relations,
        }
    }

    fn seed_triple(&self, rng: &mut impl Rng) -> Option<Triple> {
        match &self.seed_relations {
            Some(relations) => {
                let relation = *relations.choose(rng)?;
                self.triples.random_triple_by_relation(relation, rng)
            }
            None => self.triples.random_triple(rng),
        }
    }

    /// Sample a walk of `steps` hops. With `cyclic`, the last hop must return
    /// to the seed's first node; without it, a walk that closes a cycle is
    /// rejected.
    pub fn sample(&self, steps: usize, cyclic: bool, rng: &mut impl Rng) -> Option<Path> {
        self.sample_with(steps, cyclic, None, None, rng)
    }

    /// Sample a walk whose head edge is oriented for extending `rule`: the
    /// head's variable side of an X-rule (or Y-rule) is where the walk grows.
    pub fn sample_extending(&self, rule: &Rule, steps: usize, cyclic: bool, rng: &mut impl Rng) -> Option<Path> {
        self.sample_with(steps, cyclic, None, Some(rule), rng)
    }

    /// Like [`sample`](Self::sample) with a fixed seed triple.
    pub fn sample_from(&self, seed: Triple, steps: usize, cyclic: bool, rng: &mut impl Rng) -> Option<Path> {
        self.sample_with(steps, cyclic, Some(seed), None, rng)
    }

    fn sample_with(
        &self,
        steps: usize,
        cyclic: bool,
        seed: Option<Triple>,
        extending: Option<&Rule>,
        rng: &mut impl Rng,
    ) -> Option<Path> {
        if steps == 0 || steps > MAX_HOPS {
            return None;
        }
        let seed = match seed {
            Some(seed) => seed,
            None => self.seed_triple(rng)?,
        };
        if seed.head == seed.tail {
            return None;
        }

        let forward = match extending {
            Some(rule) if rule.is_x_rule() => false,
            Some(rule) if rule.is_y_rule() => true,
            _ => rng.gen_bool(0.5),
        };
        let mut nodes = Vec::with_capacity(steps + 1);
        let mut hops = Vec::with_capacity(steps);
        if forward {
            nodes.extend([seed.head, seed.tail]);
            hops.push(seed.relation);
        } else {
            nodes.extend([seed.tail, seed.head]);
            hops.push(seed.relation.inverse());
        }

        for index in 1..steps {
            let forward = rng.gen_bool(0.5);
            let from = nodes[index];
            let closing = cyclic && index + 1 == steps;
            let candidates: Vec<(RelationId, EntityId)> = self
                .triples
                .edges_from(from)
                .filter(|(r, _)| r.is_inverse() != forward)
                .flat_map(|(r, n)| n.iter().map(move |e| (r, e)))
                .filter(|(_, e)| !closing || *e == nodes[0])
                .collect();
            let (relation, next) = *candidates.choose(rng)?;
            hops.push(relation);
            nodes.push(next);
        }

        let path = Path::new(nodes, RelationPath::encode(&hops).ok()?);
        if steps == 1 {
            return Some(path);
        }
        if !path.is_valid() || (!cyclic && path.is_cyclic()) {
            return None;
        }
        Some(path)
    }
}
