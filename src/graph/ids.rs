//! Entity and relation identifiers, and the label registry.
//!
//! Entities are positive integers. Logic variables share the same integer
//! space with negative values (`A` = -1 ... `Z` = -26), so an atom's terms are
//! plain [`EntityId`]s. Zero is reserved as the existential sentinel and never
//! names a graph entity.
//!
//! Relations are numbered from 1. Every relation `r` has an inverse
//! `r + RELATION_OFFSET`, so original and inverse ids both fit one 15-bit slot
//! of a [`RelationPath`](super::path::RelationPath).

use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::error::GraphError;

use super::GraphResult;

/// Fixed capacity of original relations; inverse ids start here.
pub const RELATION_OFFSET: u64 = 1 << 14;

/// An entity, a logic variable (negative), or the existential sentinel (zero).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct EntityId(i32);

impl EntityId {
    /// The existential sentinel.
    pub const EXISTENTIAL: EntityId = EntityId(0);
    /// Head variable on the left.
    pub const X: EntityId = EntityId::variable_for('X');
    /// Head variable on the right.
    pub const Y: EntityId = EntityId::variable_for('Y');

    /// Letters handed out for fresh body variables, in order.
    const FRESH: [char; 16] = [
        'A', 'B', 'C', 'D', 'E', 'F', 'G', 'H', 'I', 'J', 'K', 'L', 'M', 'N', 'O', 'P',
    ];

    /// Wrap a raw value.
    pub const fn from_raw(raw: i32) -> Self {
        EntityId(raw)
    }

    /// The raw integer.
    pub const fn get(self) -> i32 {
        self.0
    }

    /// The variable named by an uppercase letter.
    pub const fn variable_for(letter: char) -> Self {
        EntityId(-((letter as i32) - ('A' as i32) + 1))
    }

    /// The `n`-th fresh body variable (`A`, `B`, ...).
    ///
    /// Bodies hold at most four atoms, so sixteen letters always suffice.
    pub fn fresh_variable(n: usize) -> Self {
        Self::variable_for(Self::FRESH[n % Self::FRESH.len()])
    }

    pub fn is_variable(self) -> bool {
        self.0 < 0
    }

    pub fn is_constant(self) -> bool {
        self.0 > 0
    }

    /// Letter of a variable, `None` for entities.
    pub fn variable_letter(self) -> Option<char> {
        if (-26..0).contains(&self.0) {
            char::from_u32(('A' as i32 - self.0 - 1) as u32)
        } else {
            None
        }
    }
}

/// A relation id. Ids above [`RELATION_OFFSET`] are inverses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct RelationId(u64);

impl RelationId {
    pub const fn from_raw(raw: u64) -> Self {
        RelationId(raw)
    }

    pub const fn get(self) -> u64 {
        self.0
    }

    /// Whether this id is a generated inverse.
    pub fn is_inverse(self) -> bool {
        self.0 > RELATION_OFFSET
    }

    /// `inverse(r) = r ± RELATION_OFFSET`.
    pub fn inverse(self) -> Self {
        if self.is_inverse() {
            RelationId(self.0 - RELATION_OFFSET)
        } else {
            RelationId(self.0 + RELATION_OFFSET)
        }
    }

    /// The original (non-inverse) relation of this id.
    pub fn original(self) -> Self {
        if self.is_inverse() { self.inverse() } else { self }
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Bidirectional label ↔ id mapping for entities and relations.
///
/// Lookups and registration are lock-free per shard, so loaders and workers
/// can share one registry behind an `Arc`.
pub struct IdRegistry {
    entity_to_id: DashMap<String, EntityId>,
    id_to_entity: DashMap<EntityId, String>,
    next_entity: AtomicI32,
    relation_to_id: DashMap<String, RelationId>,
    id_to_relation: DashMap<RelationId, String>,
    next_relation: AtomicU64,
}

impl IdRegistry {
    pub fn new() -> Self {
        Self {
            entity_to_id: DashMap::new(),
            id_to_entity: DashMap::new(),
            next_entity: AtomicI32::new(1),
            relation_to_id: DashMap::new(),
            id_to_relation: DashMap::new(),
            next_relation: AtomicU64::new(1),
        }
    }

    /// Id of an entity label, registering it on first sight.
    pub fn entity(&self, label: &str) -> EntityId {
        if let Some(id) = self.entity_to_id.get(label) {
            return *id.value();
        }
        match self.entity_to_id.entry(label.to_string()) {
            Entry::Occupied(e) => *e.get(),
            Entry::Vacant(v) => {
                let id = EntityId(self.next_entity.fetch_add(1, Ordering::Relaxed));
                self.id_to_entity.insert(id, label.to_string());
                v.insert(id);
                id
            }
        }
    }

    /// Like [`entity`](Self::entity), but single uppercase letters are variables.
    pub fn term(&self, label: &str) -> EntityId {
        let mut chars = label.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) if c.is_ascii_uppercase() => EntityId::variable_for(c),
            _ => self.entity(label),
        }
    }

    /// Id of a relation label, registering it on first sight.
    pub fn relation(&self, label: &str) -> GraphResult<RelationId> {
        if let Some(id) = self.relation_to_id.get(label) {
            return Ok(*id.value());
        }
        match self.relation_to_id.entry(label.to_string()) {
            Entry::Occupied(e) => Ok(*e.get()),
            Entry::Vacant(v) => {
                let raw = self
                    .next_relation
                    .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| {
                        (n < RELATION_OFFSET).then_some(n + 1)
                    })
                    .map_err(|_| GraphError::RelationCapacity {
                        label: label.to_string(),
                        capacity: RELATION_OFFSET - 1,
                    })?;
                let id = RelationId(raw);
                self.id_to_relation.insert(id, label.to_string());
                v.insert(id);
                Ok(id)
            }
        }
    }

    pub fn lookup_entity(&self, label: &str) -> Option<EntityId> {
        self.entity_to_id.get(label).map(|r| *r.value())
    }

    pub fn lookup_relation(&self, label: &str) -> Option<RelationId> {
        self.relation_to_id.get(label).map(|r| *r.value())
    }

    /// Label of a term: the letter for variables, the registered label for
    /// entities, `e:<id>` as a fallback.
    pub fn entity_label(&self, id: EntityId) -> String {
        if let Some(letter) = id.variable_letter() {
            return letter.to_string();
        }
        self.id_to_entity
            .get(&id)
            .map(|r| r.value().clone())
            .unwrap_or_else(|| format!("e:{}", id.get()))
    }

    /// Label of a relation; inverses render as `label^-1`.
    pub fn relation_label(&self, id: RelationId) -> String {
        let base = self
            .id_to_relation
            .get(&id.original())
            .map(|r| r.value().clone())
            .unwrap_or_else(|| format!("r:{}", id.original().get()));
        if id.is_inverse() {
            format!("{base}^-1")
        } else {
            base
        }
    }

    pub fn entity_count(&self) -> usize {
        self.id_to_entity.len()
    }

    pub fn relation_count(&self) -> usize {
        self.id_to_relation.len()
    }
}

impl Default for IdRegistry {
    fn default() -> Self {
        Self::new()
    }
}
