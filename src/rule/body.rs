//! Rule bodies: ordered atom lists compared up to variable renaming.

use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use crate::graph::{EntityId, IdRegistry, RelationPath};

use super::atom::Atom;

/// Ordered conjunction of atoms.
///
/// Two bodies are equal when they agree atom by atom on relations and
/// constants, on the head variables `X`/`Y`, and on their fresh variables up
/// to a consistent one-to-one renaming. Hashing uses a canonical numbering of
/// fresh variables, so it agrees with equality.
#[derive(Debug, Clone, Default)]
pub struct Body {
    atoms: Vec<Atom>,
}

impl Body {
    pub fn new(atoms: Vec<Atom>) -> Self {
        Self { atoms }
    }

    pub fn len(&self) -> usize {
        self.atoms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.atoms.is_empty()
    }

    pub fn atoms(&self) -> &[Atom] {
        &self.atoms
    }

    pub fn get(&self, index: usize) -> Option<&Atom> {
        self.atoms.get(index)
    }

    pub fn first(&self) -> Option<&Atom> {
        self.atoms.first()
    }

    pub fn last(&self) -> Option<&Atom> {
        self.atoms.last()
    }

    pub fn push(&mut self, atom: Atom) {
        self.atoms.push(atom);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Atom> {
        self.atoms.iter()
    }

    pub(crate) fn atoms_mut(&mut self) -> &mut [Atom] {
        &mut self.atoms
    }

    /// Relations of the body in order.
    pub fn relation_path(&self) -> Option<RelationPath> {
        let relations: Vec<_> = self.atoms.iter().map(|a| a.relation()).collect();
        RelationPath::encode(&relations).ok()
    }

    /// Reverse the atom order.
    pub fn reverse(&mut self) {
        self.atoms.reverse();
    }

    /// Rename fresh variables to `A`, `B`, ... in order of first appearance.
    pub fn normalize_variables(&mut self) {
        let mut renaming: HashMap<EntityId, EntityId> = HashMap::new();
        for atom in &self.atoms {
            for term in [atom.left(), atom.right()] {
                if is_fresh(term) && !renaming.contains_key(&term) {
                    let next = EntityId::fresh_variable(renaming.len());
                    renaming.insert(term, next);
                }
            }
        }
        for atom in &mut self.atoms {
            let (left, right) = (atom.left(), atom.right());
            *atom = Atom::new(
                renaming.get(&left).copied().unwrap_or(left),
                atom.relation(),
                renaming.get(&right).copied().unwrap_or(right),
            );
        }
    }

    /// Label rendering: atoms joined by `, `.
    pub fn display(&self, registry: &IdRegistry) -> String {
        self.atoms
            .iter()
            .map(|a| a.display(registry))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// A body variable other than the head variables.
fn is_fresh(term: EntityId) -> bool {
    term.is_variable() && term != EntityId::X && term != EntityId::Y
}

impl PartialEq for Body {
    fn eq(&self, other: &Self) -> bool {
        if self.atoms.len() != other.atoms.len() {
            return false;
        }
        let mut this_to_that: HashMap<EntityId, EntityId> = HashMap::new();
        let mut that_to_this: HashMap<EntityId, EntityId> = HashMap::new();
        for (a, b) in self.atoms.iter().zip(&other.atoms) {
            if a.relation() != b.relation() {
                return false;
            }
            for (s, t) in [(a.left(), b.left()), (a.right(), b.right())] {
                if !is_fresh(s) || !is_fresh(t) {
                    if s != t {
                        return false;
                    }
                    continue;
                }
                match (this_to_that.get(&s), that_to_this.get(&t)) {
                    (Some(mapped), _) if *mapped != t => return false,
                    (_, Some(mapped)) if *mapped != s => return false,
                    _ => {
                        this_to_that.insert(s, t);
                        that_to_this.insert(t, s);
                    }
                }
            }
        }
        true
    }
}

impl Eq for Body {}

impl Hash for Body {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self.relation_path() {
            Some(path) => path.hash(state),
            None => {
                for atom in &self.atoms {
                    atom.relation().hash(state);
                }
            }
        }
        let mut numbering: HashMap<EntityId, usize> = HashMap::new();
        for atom in &self.atoms {
            for term in [atom.left(), atom.right()] {
                if is_fresh(term) {
                    let next = numbering.len();
                    let n = *numbering.entry(term).or_insert(next);
                    (1u8, n).hash(state);
                } else {
                    (0u8, term.get()).hash(state);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::hash_map::DefaultHasher;

    use super::*;
    use crate::graph::RelationId;

    fn r(raw: u64) -> RelationId {
        RelationId::from_raw(raw)
    }
    fn v(letter: char) -> EntityId {
        EntityId::variable_for(letter)
    }
    fn hash_of(body: &Body) -> u64 {
        let mut h = DefaultHasher::new();
        body.hash(&mut h);
        h.finish()
    }

    #[test]
    fn renamed_bodies_are_equal_and_hash_alike() {
        let a = Body::new(vec![Atom::new(EntityId::X, r(1), v('A')), Atom::new(v('A'), r(2), EntityId::Y)]);
        let b = Body::new(vec![Atom::new(EntityId::X, r(1), v('C')), Atom::new(v('C'), r(2), EntityId::Y)]);
        assert_eq!(a, b);
        assert_eq!(hash_of(&a), hash_of(&b));
    }

    #[test]
    fn renaming_must_be_consistent() {
        let a = Body::new(vec![Atom::new(v('A'), r(1), v('B')), Atom::new(v('A'), r(2), EntityId::Y)]);
        let b = Body::new(vec![Atom::new(v('A'), r(1), v('B')), Atom::new(v('B'), r(2), EntityId::Y)]);
        assert_ne!(a, b);
    }

    #[test]
    fn renaming_must_be_one_to_one() {
        let a = Body::new(vec![Atom::new(v('A'), r(1), v('B'))]);
        let b = Body::new(vec![Atom::new(v('A'), r(1), v('A'))]);
        assert_ne!(a, b);
        assert_ne!(b, a);
    }

    #[test]
    fn head_variables_and_constants_are_fixed() {
        let c = EntityId::from_raw(7);
        let a = Body::new(vec![Atom::new(EntityId::X, r(1), c)]);
        let b = Body::new(vec![Atom::new(v('A'), r(1), c)]);
        let d = Body::new(vec![Atom::new(EntityId::X, r(1), v('A'))]);
        assert_ne!(a, b);
        assert_ne!(a, d);
        assert_eq!(a, a.clone());
    }

    #[test]
    fn normalization_orders_by_first_appearance() {
        let mut body = Body::new(vec![Atom::new(EntityId::X, r(1), v('C')), Atom::new(v('C'), r(2), v('B'))]);
        body.normalize_variables();
        assert_eq!(body.atoms()[0].right(), v('A'));
        assert_eq!(body.atoms()[1].left(), v('A'));
        assert_eq!(body.atoms()[1].right(), v('B'));
    }
}
