//! Flat-indexed top tier
//!
//! The root section is small enough that its hole index is a sorted `Vec`
//! persisted wholesale in the root record next to the global header. It also
//! carries the root node positions of every B-tree section.

use super::{Section, TierAudit};
use crate::error::{Result, SpaceError};
use crate::header::RootRecord;
use crate::hole::Hole;
use crate::io::PagedStream;
use crate::scalar::{Position, Size};
use std::io::{Read, Seek, Write};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct RootSection {
    section: Section,
    /// Sorted by `(size, start)`
    holes: Vec<Hole>,
    btree_roots: Vec<Position>,
    capacity: usize,
    dirty: bool,
}

impl RootSection {
    /// Format the region and start with an index holding one hole
    pub fn format<S: Read + Write + Seek>(
        io: &mut PagedStream<S>,
        section: Section,
        capacity: usize,
        tier_count: usize,
    ) -> Result<Self> {
        let hole = section.format(io)?;
        Ok(RootSection {
            section,
            holes: vec![hole],
            btree_roots: vec![Position::NULL; tier_count],
            capacity,
            dirty: true,
        })
    }

    /// Rebuild from a decoded root record
    pub fn from_record(section: Section, record: RootRecord, capacity: usize) -> Result<Self> {
        let RootRecord { btree_roots, holes } = record;
        if holes.len() > capacity {
            return Err(SpaceError::RootOverflow {
                holes: holes.len(),
                capacity,
            });
        }
        if holes.windows(2).any(|pair| pair[0] >= pair[1]) {
            return Err(SpaceError::BadSection(
                "root hole index is not sorted".to_string(),
            ));
        }
        let region = section.region();
        if let Some(stray) = holes
            .iter()
            .find(|h| h.size.is_zero() || h.start < region.start || h.end() > region.end())
        {
            return Err(SpaceError::BadSection(format!(
                "root hole {}+{} lies outside the root region",
                stray.start, stray.size
            )));
        }
        Ok(RootSection {
            section,
            holes,
            btree_roots,
            capacity,
            dirty: false,
        })
    }

    pub fn to_record(&self) -> RootRecord {
        RootRecord {
            btree_roots: self.btree_roots.clone(),
            holes: self.holes.clone(),
        }
    }

    pub fn section(&self) -> &Section {
        &self.section
    }

    pub fn holes(&self) -> &[Hole] {
        &self.holes
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn btree_roots(&self) -> &[Position] {
        &self.btree_roots
    }

    pub fn set_btree_root(&mut self, index: usize, pos: Position) -> Result<()> {
        let slot = self.btree_roots.get_mut(index).ok_or_else(|| {
            SpaceError::structure(format!("no B-tree section with index {}", index))
        })?;
        if *slot != pos {
            *slot = pos;
            self.dirty = true;
        }
        Ok(())
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }

    pub fn free_pages(&self) -> u64 {
        self.holes.iter().map(|h| h.size.get()).sum()
    }

    /// Index of the smallest hole holding at least `size` pages
    fn best_fit(&self, size: Size) -> Option<usize> {
        let index = self.holes.partition_point(|h| h.size < size);
        (index < self.holes.len()).then_some(index)
    }

    fn insert_hole(&mut self, hole: Hole) -> Result<()> {
        match self.holes.binary_search(&hole) {
            Ok(_) => Err(SpaceError::structure(format!(
                "hole {}+{} indexed twice",
                hole.start, hole.size
            ))),
            Err(index) => {
                self.holes.insert(index, hole);
                if self.holes.len() > self.capacity {
                    return Err(SpaceError::RootOverflow {
                        holes: self.holes.len(),
                        capacity: self.capacity,
                    });
                }
                self.dirty = true;
                Ok(())
            }
        }
    }

    fn remove_hole(&mut self, hole: Hole) -> Result<()> {
        match self.holes.binary_search(&hole) {
            Ok(index) => {
                self.holes.remove(index);
                self.dirty = true;
                Ok(())
            }
            Err(_) => Err(SpaceError::BadSection(format!(
                "hole {}+{} missing from the root index",
                hole.start, hole.size
            ))),
        }
    }

    /// Best-fit allocation of `size` pages
    pub fn allocate<S: Read + Write + Seek>(
        &mut self,
        io: &mut PagedStream<S>,
        size: Size,
    ) -> Result<Option<Position>> {
        let Some(index) = self.best_fit(size) else {
            return Ok(None);
        };
        let hole = self.holes.remove(index);
        self.dirty = true;
        if let Some(rest) = self.section.allocate(io, hole, size)? {
            self.insert_hole(rest)?;
        }
        Ok(Some(hole.start))
    }

    /// Carve `count` one-page lumps for an inferior tier's nodes
    pub fn allocate_for_nodes<S: Read + Write + Seek>(
        &mut self,
        io: &mut PagedStream<S>,
        count: usize,
    ) -> Result<Vec<Position>> {
        let available = self.free_pages();
        if (count as u64) > available {
            return Err(SpaceError::NodeSpaceExhausted {
                needed: count as u64,
                available,
            });
        }

        let mut pages = Vec::with_capacity(count);
        while pages.len() < count {
            let outstanding = count - pages.len();
            let index = self
                .best_fit(Size(outstanding as u64))
                .unwrap_or(self.holes.len() - 1);
            let hole = self.holes.remove(index);
            self.dirty = true;
            let take = outstanding.min(hole.size.get() as usize);
            let (carved, rest) = self.section.allocate_pages(io, hole, take)?;
            if let Some(rest) = rest {
                self.insert_hole(rest)?;
            }
            pages.extend(carved);
        }
        debug!(count, "root section supplied node pages");
        Ok(pages)
    }

    pub fn deallocate<S: Read + Write + Seek>(
        &mut self,
        io: &mut PagedStream<S>,
        pos: Position,
    ) -> Result<()> {
        let release = self.section.deallocate(io, pos)?;
        for hole in release.obsolete() {
            self.remove_hole(hole)?;
        }
        self.insert_hole(release.merged)
    }

    /// Compare the index with a walk of the region
    pub fn audit<S: Read + Write + Seek>(&self, io: &mut PagedStream<S>) -> Result<TierAudit> {
        let (holes, lumps) = self.section.survey(io)?;
        if holes != self.holes {
            return Err(SpaceError::BadSection(format!(
                "root index lists {} holes, region holds {}",
                self.holes.len(),
                holes.len()
            )));
        }
        Ok(TierAudit {
            holes,
            lumps,
            node_pages: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::ChunkDescriptorEncoder;
    use crate::scalar::{Operator, Paginator, Region};
    use std::io::Cursor;

    fn root(len: u64) -> (RootSection, PagedStream<Cursor<Vec<u8>>>) {
        let encoder = ChunkDescriptorEncoder::new(Operator::default(), Paginator::new(64));
        let section = Section::new(Region::new(Position(1), Size(len)), encoder);
        let mut io = PagedStream::new(Cursor::new(vec![0u8; 64 * (len as usize + 1)]));
        let root = RootSection::format(&mut io, section, 16, 2).unwrap();
        (root, io)
    }

    fn hole(start: u64, size: u64) -> Hole {
        Hole::new(Position(start), Size(size))
    }

    #[test]
    fn test_best_fit_prefers_lowest_address() {
        // Holes of 5, 5 and 8 pages
        let (mut root, mut io) = root(21);
        let a = root.allocate(&mut io, Size(5)).unwrap().unwrap();
        let b = root.allocate(&mut io, Size(1)).unwrap().unwrap();
        let c = root.allocate(&mut io, Size(5)).unwrap().unwrap();
        let d = root.allocate(&mut io, Size(1)).unwrap().unwrap();
        assert_eq!((a, b, c, d), (Position(1), Position(6), Position(7), Position(12)));
        root.deallocate(&mut io, a).unwrap();
        root.deallocate(&mut io, c).unwrap();
        assert_eq!(root.holes(), &[hole(1, 5), hole(7, 5), hole(13, 9)]);

        assert_eq!(root.allocate(&mut io, Size(5)).unwrap(), Some(Position(1)));
        assert_eq!(root.allocate(&mut io, Size(6)).unwrap(), Some(Position(13)));
        assert_eq!(root.allocate(&mut io, Size(6)).unwrap(), None);
        root.audit(&mut io).unwrap();
    }

    #[test]
    fn test_nodes_spill_across_holes() {
        let (mut root, mut io) = root(10);
        let a = root.allocate(&mut io, Size(2)).unwrap().unwrap();
        root.allocate(&mut io, Size(1)).unwrap().unwrap();
        root.deallocate(&mut io, a).unwrap();
        // Holes: 1+2 and 4+7
        let pages = root.allocate_for_nodes(&mut io, 8).unwrap();
        assert_eq!(pages.len(), 8);
        assert_eq!(&pages[..7], &[4, 5, 6, 7, 8, 9, 10].map(Position));
        assert_eq!(pages[7], Position(1));
        assert_eq!(root.holes(), &[hole(2, 1)]);

        let err = root.allocate_for_nodes(&mut io, 2).unwrap_err();
        assert!(matches!(
            err,
            SpaceError::NodeSpaceExhausted {
                needed: 2,
                available: 1
            }
        ));
        root.audit(&mut io).unwrap();
    }

    #[test]
    fn test_record_round_trip() {
        let (mut root, mut io) = root(12);
        root.allocate(&mut io, Size(3)).unwrap();
        root.set_btree_root(1, Position(4)).unwrap();
        assert!(root.set_btree_root(2, Position(4)).is_err());

        let rebuilt =
            RootSection::from_record(*root.section(), root.to_record(), root.capacity()).unwrap();
        assert_eq!(rebuilt.holes(), root.holes());
        assert_eq!(rebuilt.btree_roots(), &[Position::NULL, Position(4)]);
        assert!(!rebuilt.is_dirty());
    }

    #[test]
    fn test_from_record_rejects_bad_index() {
        let (root, _) = root(12);
        let unsorted = RootRecord {
            btree_roots: vec![],
            holes: vec![hole(5, 3), hole(1, 2)],
        };
        assert!(matches!(
            RootSection::from_record(*root.section(), unsorted, 16),
            Err(SpaceError::BadSection(_))
        ));
        let outside = RootRecord {
            btree_roots: vec![],
            holes: vec![hole(12, 5)],
        };
        assert!(RootSection::from_record(*root.section(), outside, 16).is_err());
    }

    #[test]
    fn test_audit_catches_stale_index() {
        let (mut root, mut io) = root(12);
        root.allocate(&mut io, Size(3)).unwrap();
        root.holes.push(hole(20, 1));
        assert!(matches!(
            root.audit(&mut io),
            Err(SpaceError::BadSection(_))
        ));
    }
}
