//! Bit-packed relation paths.
//!
//! A path of up to four hops lives in one `u64`, 15 bits per hop. Slot 0 (the
//! lowest bits) is the first hop; an empty slot is zero, which no relation id
//! uses. A one-hop path has exactly the bits of its relation id.

use crate::error::GraphError;

use super::GraphResult;
use super::ids::RelationId;

/// Bits per hop.
pub const BITS_PER_HOP: u32 = 15;
/// Maximum number of hops.
pub const MAX_HOPS: usize = 4;

const SLOT_MASK: u64 = (1 << BITS_PER_HOP) - 1;

/// An ordered sequence of at most [`MAX_HOPS`] relations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[repr(transparent)]
pub struct RelationPath(u64);

impl RelationPath {
    /// The empty path.
    pub const EMPTY: RelationPath = RelationPath(0);

    /// Pack hops in order; the first hop lands in slot 0.
    pub fn encode(hops: &[RelationId]) -> GraphResult<Self> {
        if hops.len() > MAX_HOPS {
            return Err(GraphError::PathTooLong {
                hops: hops.len(),
                max: MAX_HOPS,
            });
        }
        let mut bits = 0u64;
        for (slot, hop) in hops.iter().enumerate() {
            let id = hop.get();
            if id == 0 || id > SLOT_MASK {
                return Err(GraphError::RelationOutOfRange { id });
            }
            bits |= id << (slot as u32 * BITS_PER_HOP);
        }
        Ok(RelationPath(bits))
    }

    /// A one-hop path.
    pub fn single(relation: RelationId) -> GraphResult<Self> {
        Self::encode(&[relation])
    }

    pub const fn from_bits(bits: u64) -> Self {
        RelationPath(bits)
    }

    pub const fn bits(self) -> u64 {
        self.0
    }

    /// Number of hops.
    pub fn len(self) -> usize {
        (0..MAX_HOPS)
            .take_while(|slot| self.slot(*slot) != 0)
            .count()
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    fn slot(self, slot: usize) -> u64 {
        (self.0 >> (slot as u32 * BITS_PER_HOP)) & SLOT_MASK
    }

    /// The hop at `index`, if present.
    pub fn hop(self, index: usize) -> Option<RelationId> {
        if index >= MAX_HOPS {
            return None;
        }
        match self.slot(index) {
            0 => None,
            id => Some(RelationId::from_raw(id)),
        }
    }

    /// Hops in traversal order.
    pub fn decode(self) -> Vec<RelationId> {
        (0..self.len()).filter_map(|i| self.hop(i)).collect()
    }

    /// Append one hop.
    pub fn push(self, relation: RelationId) -> GraphResult<Self> {
        let mut hops = self.decode();
        hops.push(relation);
        Self::encode(&hops)
    }

    /// The path walked backwards: hop order reversed and every hop inverted.
    pub fn inverse(self) -> Self {
        let hops: Vec<RelationId> = self.decode().into_iter().rev().map(|r| r.inverse()).collect();
        let mut bits = 0u64;
        for (slot, hop) in hops.iter().enumerate() {
            bits |= hop.get() << (slot as u32 * BITS_PER_HOP);
        }
        RelationPath(bits)
    }
}

impl From<RelationId> for RelationPath {
    fn from(relation: RelationId) -> Self {
        RelationPath(relation.get() & SLOT_MASK)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn r(raw: u64) -> RelationId {
        RelationId::from_raw(raw)
    }

    #[test]
    fn first_hop_is_lowest_slot() {
        let p = RelationPath::encode(&[r(3), r(5)]).unwrap();
        assert_eq!(p.bits(), 3 | (5 << 15));
        assert_eq!(p.len(), 2);
        assert_eq!(p.hop(0), Some(r(3)));
        assert_eq!(p.hop(1), Some(r(5)));
        assert_eq!(p.hop(2), None);
        assert_eq!(p.decode(), vec![r(3), r(5)]);
    }

    #[test]
    fn single_hop_equals_relation_bits() {
        let rel = r(42);
        assert_eq!(RelationPath::single(rel).unwrap().bits(), 42);
        assert_eq!(RelationPath::from(rel).bits(), 42);
    }

    #[test]
    fn inverse_reverses_and_inverts() {
        let p = RelationPath::encode(&[r(1), r(2), r(3)]).unwrap();
        let inv = p.inverse();
        assert_eq!(inv.decode(), vec![r(3).inverse(), r(2).inverse(), r(1).inverse()]);
        assert_eq!(inv.inverse(), p);
    }

    #[test]
    fn rejects_five_hops_and_oversized_ids() {
        let hops = [r(1), r(2), r(3), r(4), r(5)];
        assert!(matches!(
            RelationPath::encode(&hops),
            Err(GraphError::PathTooLong { hops: 5, .. })
        ));
        assert!(RelationPath::encode(&[r(1 << 15)]).is_err());
        assert!(RelationPath::encode(&[r(0)]).is_err());
    }

    #[test]
    fn push_extends_until_full() {
        let mut p = RelationPath::EMPTY;
        for i in 1..=4 {
            p = p.push(r(i)).unwrap();
        }
        assert_eq!(p.len(), 4);
        assert!(p.push(r(9)).is_err());
        assert!(RelationPath::EMPTY.is_empty());
    }
}
