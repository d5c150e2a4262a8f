//! Free extents and their best-fit ordering

use crate::error::Result;
use crate::scalar::{Operator, Position, Size};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// A free contiguous run of pages
///
/// Holes compare by size first and start second. An index sorted this way is a
/// best-fit free list: the first hole not smaller than a request is the
/// tightest fit, and equal sizes resolve to the lowest address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Hole {
    /// First page of the hole
    pub start: Position,
    /// Number of pages
    pub size: Size,
}

impl Hole {
    pub fn new(start: Position, size: Size) -> Self {
        Hole { start, size }
    }

    /// Smallest key among holes of `size` pages, used as a search target
    pub fn probe(size: Size) -> Self {
        Hole {
            start: Position::NULL,
            size,
        }
    }

    /// First page past the hole
    pub fn end(&self) -> Position {
        self.start + self.size
    }

    /// Check if this hole covers a page
    pub fn contains(&self, pos: Position) -> bool {
        pos >= self.start && pos < self.end()
    }

    /// Check if this hole touches another (can be coalesced)
    pub fn is_adjacent(&self, other: &Hole) -> bool {
        self.end() == other.start || other.end() == self.start
    }

    /// Merge two touching holes
    pub fn coalesce(&self, other: &Hole) -> Option<Hole> {
        if !self.is_adjacent(other) {
            return None;
        }

        let start = self.start.min(other.start);
        let end = self.end().max(other.end());

        Some(Hole {
            start,
            size: end.distance_from(start),
        })
    }

    /// Append `{start, size}` as two fixed-width fields
    pub fn encode(&self, op: &Operator, out: &mut Vec<u8>) -> Result<()> {
        op.push(self.start.get(), out)?;
        op.push(self.size.get(), out)
    }

    pub fn decode(op: &Operator, bytes: &[u8]) -> Hole {
        let w = op.len();
        Hole {
            start: Position(op.decode_raw(&bytes[..w])),
            size: Size(op.decode_raw(&bytes[w..2 * w])),
        }
    }

    /// Encoded length of one hole
    pub fn encoded_len(op: &Operator) -> usize {
        2 * op.len()
    }
}

impl Ord for Hole {
    fn cmp(&self, other: &Self) -> Ordering {
        self.size
            .cmp(&other.size)
            .then_with(|| self.start.cmp(&other.start))
    }
}

impl PartialOrd for Hole {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hole(start: u64, size: u64) -> Hole {
        Hole::new(Position(start), Size(size))
    }

    #[test]
    fn test_hole_ordering() {
        let mut holes = vec![hole(30, 8), hole(20, 5), hole(10, 5), hole(1, 9)];
        holes.sort();
        assert_eq!(holes, vec![hole(10, 5), hole(20, 5), hole(30, 8), hole(1, 9)]);
    }

    #[test]
    fn test_probe_precedes_same_size() {
        assert!(Hole::probe(Size(5)) < hole(1, 5));
        assert!(Hole::probe(Size(5)) > hole(100, 4));
    }

    #[test]
    fn test_hole_contains() {
        let h = hole(10, 5);
        assert!(!h.contains(Position(9)));
        assert!(h.contains(Position(10)));
        assert!(h.contains(Position(14)));
        assert!(!h.contains(Position(15)));
    }

    #[test]
    fn test_hole_adjacency() {
        let a = hole(10, 5);
        assert!(a.is_adjacent(&hole(15, 5)));
        assert!(a.is_adjacent(&hole(5, 5)));
        assert!(!a.is_adjacent(&hole(16, 5)));
    }

    #[test]
    fn test_hole_coalesce() {
        assert_eq!(hole(10, 5).coalesce(&hole(15, 3)), Some(hole(10, 8)));
        assert_eq!(hole(15, 3).coalesce(&hole(10, 5)), Some(hole(10, 8)));
        assert_eq!(hole(10, 5).coalesce(&hole(20, 3)), None);
    }

    #[test]
    fn test_hole_encoding() {
        let op = Operator::new(2).unwrap();
        let mut out = Vec::new();
        hole(0x0102, 7).encode(&op, &mut out).unwrap();
        assert_eq!(out, vec![1, 2, 0, 7]);
        assert_eq!(Hole::encoded_len(&op), 4);
        assert_eq!(Hole::decode(&op, &out), hole(0x0102, 7));
    }
}
