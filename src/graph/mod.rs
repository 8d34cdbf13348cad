//! Knowledge graph: identifiers, relation paths, the triple index and loading.
//!
//! - [`ids`]: entity/relation ids and the label registry
//! - [`path`]: bit-packed relation paths
//! - [`index`]: [`TripleSet`], the adjacency index every grounder reads
//! - [`loader`]: triple file parsing

pub mod ids;
pub mod index;
pub mod loader;
pub mod path;

use crate::error::GraphError;

pub use ids::{EntityId, IdRegistry, RelationId};
pub use index::TripleSet;
pub use path::RelationPath;

/// Result type for graph operations.
pub type GraphResult<T> = std::result::Result<T, GraphError>;

/// A triple `(head, relation, tail)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Triple {
    pub head: EntityId,
    pub relation: RelationId,
    pub tail: EntityId,
}

impl Triple {
    pub fn new(head: EntityId, relation: RelationId, tail: EntityId) -> Self {
        Self {
            head,
            relation,
            tail,
        }
    }

    /// The same fact expressed with the original relation.
    pub fn normalized(self) -> Self {
        if self.relation.is_inverse() {
            Self::new(self.tail, self.relation.inverse(), self.head)
        } else {
            self
        }
    }

    /// The head when `head_side`, else the tail.
    pub fn value(&self, head_side: bool) -> EntityId {
        if head_side { self.head } else { self.tail }
    }

    /// `head relation tail`, space separated, as written in prediction files.
    pub fn display(&self, registry: &IdRegistry) -> String {
        format!(
            "{} {} {}",
            registry.entity_label(self.head),
            registry.relation_label(self.relation),
            registry.entity_label(self.tail)
        )
    }
}
