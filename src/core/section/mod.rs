//! Allocation authority over one region
//!
//! A [`Section`] knows nothing about how its holes are indexed. It frames
//! chunks with boundary tags, carves lumps out of holes handed to it, and
//! coalesces freed lumps with their free neighbours. The hole index lives
//! one level up, in [`RootSection`] (flat, sorted) or [`BTreeSection`]
//! (B-tree whose nodes are stored in the superior section).

mod root;
mod tree;

pub use root::RootSection;
pub use tree::{BTreeSection, Upstream};

use crate::chunk::{ChunkDescriptor, ChunkDescriptorEncoder, ChunkKind};
use crate::error::{Result, SpaceError};
use crate::hole::Hole;
use crate::io::PagedStream;
use crate::scalar::{Position, Region, Size};
use std::io::{Read, Seek, Write};

/// Holes that disappeared and the hole that replaced them after a release
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Release {
    pub left: Option<Hole>,
    pub right: Option<Hole>,
    pub merged: Hole,
}

impl Release {
    /// Holes the index must forget
    pub fn obsolete(&self) -> impl Iterator<Item = Hole> {
        self.left.into_iter().chain(self.right)
    }
}

/// Result of auditing one tier
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TierAudit {
    /// Free extents, in index order
    pub holes: Vec<Hole>,
    /// Occupied chunks, in address order
    pub lumps: Vec<(Position, Size)>,
    /// Pages of the superior section holding this tier's index nodes
    pub node_pages: Vec<Position>,
}

#[derive(Debug, Clone, Copy)]
pub struct Section {
    region: Region,
    encoder: ChunkDescriptorEncoder,
}

impl Section {
    pub fn new(region: Region, encoder: ChunkDescriptorEncoder) -> Self {
        Section { region, encoder }
    }

    pub fn region(&self) -> Region {
        self.region
    }

    pub fn encoder(&self) -> &ChunkDescriptorEncoder {
        &self.encoder
    }

    /// Frame the whole region as a single hole
    pub fn format<S: Read + Write + Seek>(&self, io: &mut PagedStream<S>) -> Result<Hole> {
        let hole = Hole::new(self.region.start, self.region.len);
        self.encoder
            .write_tags(io, hole.start, ChunkDescriptor::hole(hole.size))?;
        Ok(hole)
    }

    /// Confirm that the tags on disk describe `hole`
    fn expect_hole<S: Read + Write + Seek>(
        &self,
        io: &mut PagedStream<S>,
        hole: Hole,
    ) -> Result<()> {
        let header = self.encoder.read_header(io, hole.start)?;
        if header != Some(ChunkDescriptor::hole(hole.size)) {
            return Err(SpaceError::BadSection(format!(
                "indexed hole {}+{} does not match its tags",
                hole.start, hole.size
            )));
        }
        Ok(())
    }

    /// Carve a lump of `size` pages from the front of `hole`
    ///
    /// Returns what is left of the hole.
    pub fn allocate<S: Read + Write + Seek>(
        &self,
        io: &mut PagedStream<S>,
        hole: Hole,
        size: Size,
    ) -> Result<Option<Hole>> {
        if size.is_zero() {
            return Err(SpaceError::ZeroSize);
        }
        if size > hole.size {
            return Err(SpaceError::structure(format!(
                "request of {} pages carved from a hole of {}",
                size, hole.size
            )));
        }
        self.expect_hole(io, hole)?;

        self.encoder
            .write_tags(io, hole.start, ChunkDescriptor::lump(size))?;
        self.frame_remainder(io, hole, size)
    }

    /// Carve `count` one-page lumps from the front of `hole`
    pub fn allocate_pages<S: Read + Write + Seek>(
        &self,
        io: &mut PagedStream<S>,
        hole: Hole,
        count: usize,
    ) -> Result<(Vec<Position>, Option<Hole>)> {
        let used = Size(count as u64);
        if used > hole.size {
            return Err(SpaceError::structure(format!(
                "{} node pages carved from a hole of {}",
                count, hole.size
            )));
        }
        self.expect_hole(io, hole)?;

        let mut pages = Vec::with_capacity(count);
        let mut pos = hole.start;
        for _ in 0..count {
            self.encoder
                .write_tags(io, pos, ChunkDescriptor::lump(Size(1)))?;
            pages.push(pos);
            pos += Size(1);
        }
        let remainder = self.frame_remainder(io, hole, used)?;
        Ok((pages, remainder))
    }

    fn frame_remainder<S: Read + Write + Seek>(
        &self,
        io: &mut PagedStream<S>,
        hole: Hole,
        used: Size,
    ) -> Result<Option<Hole>> {
        if used == hole.size {
            return Ok(None);
        }
        let rest = Hole::new(hole.start + used, hole.size - used);
        self.encoder
            .write_tags(io, rest.start, ChunkDescriptor::hole(rest.size))?;
        Ok(Some(rest))
    }

    /// Validated occupied chunk starting at `pos`
    pub fn read_lump<S: Read + Write + Seek>(
        &self,
        io: &mut PagedStream<S>,
        pos: Position,
    ) -> Result<ChunkDescriptor> {
        if !self.region.contains(pos) {
            return Err(SpaceError::OutOfRegion(pos.get()));
        }
        let header = match self.encoder.read_header(io, pos)? {
            Some(desc) if desc.is_lump() => desc,
            _ => return Err(SpaceError::NotAllocated(pos.get())),
        };
        let end = pos + header.size;
        if end > self.region.end() {
            return Err(SpaceError::BoundaryMismatch(pos.get()));
        }
        if self.encoder.read_footer(io, end)? != Some(header) {
            return Err(SpaceError::BoundaryMismatch(pos.get()));
        }
        Ok(header)
    }

    /// Free the lump at `pos`, merging it with free neighbours
    pub fn deallocate<S: Read + Write + Seek>(
        &self,
        io: &mut PagedStream<S>,
        pos: Position,
    ) -> Result<Release> {
        let lump = self.read_lump(io, pos)?;
        let end = pos + lump.size;

        let left = if pos > self.region.start {
            match self.encoder.read_footer(io, pos)? {
                Some(desc) if desc.is_hole() => {
                    if desc.size > pos.distance_from(self.region.start) {
                        return Err(SpaceError::BoundaryMismatch(pos.get()));
                    }
                    let hole = Hole::new(pos - desc.size, desc.size);
                    self.expect_neighbour(io, hole)?;
                    Some(hole)
                }
                Some(_) => None,
                None => return Err(SpaceError::BoundaryMismatch(pos.get())),
            }
        } else {
            None
        };

        let right = if end < self.region.end() {
            match self.encoder.read_header(io, end)? {
                Some(desc) if desc.is_hole() => {
                    let hole = Hole::new(end, desc.size);
                    if hole.end() > self.region.end() {
                        return Err(SpaceError::BoundaryMismatch(end.get()));
                    }
                    self.expect_neighbour(io, hole)?;
                    Some(hole)
                }
                Some(_) => None,
                None => return Err(SpaceError::BoundaryMismatch(end.get())),
            }
        } else {
            None
        };

        let start = left.map_or(pos, |h| h.start);
        let size = left.map_or(Size::ZERO, |h| h.size)
            + lump.size
            + right.map_or(Size::ZERO, |h| h.size);
        let merged = Hole::new(start, size);
        self.encoder
            .write_tags(io, merged.start, ChunkDescriptor::hole(merged.size))?;

        Ok(Release {
            left,
            right,
            merged,
        })
    }

    /// Both tags of a neighbouring hole must agree
    fn expect_neighbour<S: Read + Write + Seek>(
        &self,
        io: &mut PagedStream<S>,
        hole: Hole,
    ) -> Result<()> {
        let tag = ChunkDescriptor::hole(hole.size);
        if self.encoder.read_header(io, hole.start)? != Some(tag)
            || self.encoder.read_footer(io, hole.end())? != Some(tag)
        {
            return Err(SpaceError::BoundaryMismatch(hole.start.get()));
        }
        Ok(())
    }

    /// Scan the region chunk by chunk
    ///
    /// Fails unless the chunks exactly partition the region, every header
    /// matches its footer and no two holes touch.
    pub fn walk<S: Read + Write + Seek>(
        &self,
        io: &mut PagedStream<S>,
    ) -> Result<Vec<(Position, ChunkDescriptor)>> {
        let mut chunks = Vec::new();
        let mut pos = self.region.start;
        let mut previous: Option<ChunkKind> = None;

        while pos < self.region.end() {
            let header = self
                .encoder
                .read_header(io, pos)?
                .ok_or(SpaceError::BoundaryMismatch(pos.get()))?;
            let next = pos + header.size;
            if next > self.region.end() {
                return Err(SpaceError::BoundaryMismatch(pos.get()));
            }
            if self.encoder.read_footer(io, next)? != Some(header) {
                return Err(SpaceError::BoundaryMismatch(pos.get()));
            }
            if header.is_hole() && previous == Some(ChunkKind::Hole) {
                return Err(SpaceError::BadSection(format!(
                    "uncoalesced holes meet at page {}",
                    pos
                )));
            }
            previous = Some(header.kind);
            chunks.push((pos, header));
            pos = next;
        }
        Ok(chunks)
    }

    /// Walk the region and split it into sorted holes and lumps
    pub fn survey<S: Read + Write + Seek>(
        &self,
        io: &mut PagedStream<S>,
    ) -> Result<(Vec<Hole>, Vec<(Position, Size)>)> {
        let mut holes = Vec::new();
        let mut lumps = Vec::new();
        for (pos, desc) in self.walk(io)? {
            match desc.kind {
                ChunkKind::Hole => holes.push(Hole::new(pos, desc.size)),
                ChunkKind::Lump => lumps.push((pos, desc.size)),
            }
        }
        holes.sort();
        Ok((holes, lumps))
    }
}
