//! Atoms: `relation(left, right)` over entities and variables.

use crate::graph::{EntityId, IdRegistry, RelationId};

/// One literal of a rule.
///
/// Atoms are stored with the original relation: `inverse(r)(a, b)` is built as
/// `r(b, a)`, so equality and hashing never depend on the walk direction that
/// produced an atom.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Atom {
    relation: RelationId,
    left: EntityId,
    right: EntityId,
}

impl Atom {
    pub fn new(left: EntityId, relation: RelationId, right: EntityId) -> Self {
        if relation.is_inverse() {
            Self {
                relation: relation.inverse(),
                left: right,
                right: left,
            }
        } else {
            Self {
                relation,
                left,
                right,
            }
        }
    }

    pub fn relation(&self) -> RelationId {
        self.relation
    }

    pub fn left(&self) -> EntityId {
        self.left
    }

    pub fn right(&self) -> EntityId {
        self.right
    }

    /// The left term when `left`, else the right one.
    pub fn term(&self, left: bool) -> EntityId {
        if left { self.left } else { self.right }
    }

    /// Given one term, the other one.
    pub fn other(&self, term: EntityId) -> EntityId {
        if self.left == term { self.right } else { self.left }
    }

    pub fn contains(&self, term: EntityId) -> bool {
        self.left == term || self.right == term
    }

    pub fn is_left_constant(&self) -> bool {
        self.left.is_constant()
    }

    pub fn is_right_constant(&self) -> bool {
        self.right.is_constant()
    }

    /// The constant of this atom, left side first.
    pub fn constant(&self) -> Option<EntityId> {
        [self.left, self.right].into_iter().find(|t| t.is_constant())
    }

    /// Replace every occurrence of `old`, returning how many were replaced.
    pub fn replace(&mut self, old: EntityId, new: EntityId) -> usize {
        let mut count = 0;
        if self.left == old {
            self.left = new;
            count += 1;
        }
        if self.right == old {
            self.right = new;
            count += 1;
        }
        count
    }

    /// `relation(left,right)` with registry labels.
    pub fn display(&self, registry: &IdRegistry) -> String {
        format!(
            "{}({},{})",
            registry.relation_label(self.relation),
            registry.entity_label(self.left),
            registry.entity_label(self.right)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inverse_relations_are_normalized() {
        let r = RelationId::from_raw(3);
        let a = EntityId::from_raw(1);
        let b = EntityId::from_raw(2);
        let forward = Atom::new(a, r, b);
        let backward = Atom::new(b, r.inverse(), a);
        assert_eq!(forward, backward);
        assert_eq!(backward.relation(), r);
        assert_eq!(backward.left(), a);
    }

    #[test]
    fn replace_counts_occurrences() {
        let c = EntityId::from_raw(5);
        let mut atom = Atom::new(c, RelationId::from_raw(1), c);
        assert_eq!(atom.replace(c, EntityId::X), 2);
        assert_eq!(atom.left(), EntityId::X);
        assert_eq!(atom.constant(), None);
    }

    #[test]
    fn renders_with_labels() {
        let reg = IdRegistry::new();
        let r = reg.relation("likes").unwrap();
        let anna = reg.entity("anna");
        let atom = Atom::new(EntityId::X, r, anna);
        assert_eq!(atom.display(&reg), "likes(X,anna)");
    }
}
