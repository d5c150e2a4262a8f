//! B-tree indexed tiers
//!
//! A [`BTreeSection`] indexes the holes of its region with a B-tree whose
//! nodes occupy one-page lumps in the superior section. Each public operation
//! runs in its own [`NodeCache`]: the tree is searched and mutated in the
//! cache, new nodes are given pages by [`BTreeSection::finalize`] (recycled
//! pages first, then fresh pages from upstream), and the cache is flushed.

use super::{RootSection, Section, TierAudit};
use crate::btree::{BTreeWorker, Link, NodeBody, NodeId, NodeSource, NodeStore};
use crate::error::{Result, SpaceError};
use crate::hole::Hole;
use crate::io::PagedStream;
use crate::node::{NodeCache, NodeLayout};
use crate::scalar::{Position, Size};
use std::io::{Read, Seek, Write};
use tracing::{debug, trace};

/// The sections above a B-tree section, supplying its node pages
///
/// `tiers` are the B-tree sections between the root section and the caller,
/// outermost first; the last one is the immediate superior.
pub struct Upstream<'a> {
    root: &'a mut RootSection,
    tiers: &'a mut [BTreeSection],
}

impl<'a> Upstream<'a> {
    pub fn new(root: &'a mut RootSection, tiers: &'a mut [BTreeSection]) -> Self {
        Upstream { root, tiers }
    }

    /// Carve `count` one-page lumps for node storage
    pub fn allocate_pages<S: Read + Write + Seek>(
        &mut self,
        io: &mut PagedStream<S>,
        count: usize,
    ) -> Result<Vec<Position>> {
        match self.tiers.split_last_mut() {
            None => self.root.allocate_for_nodes(io, count),
            Some((superior, rest)) => {
                let mut upstream = Upstream {
                    root: &mut *self.root,
                    tiers: rest,
                };
                superior.allocate_for_nodes(io, count, &mut upstream)
            }
        }
    }

    /// Give back a page that no longer holds a node
    pub fn release_page<S: Read + Write + Seek>(
        &mut self,
        io: &mut PagedStream<S>,
        pos: Position,
    ) -> Result<()> {
        match self.tiers.split_last_mut() {
            None => self.root.deallocate(io, pos),
            Some((superior, rest)) => {
                let mut upstream = Upstream {
                    root: &mut *self.root,
                    tiers: rest,
                };
                superior.deallocate(io, pos, &mut upstream)
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct BTreeSection {
    index: usize,
    section: Section,
    layout: NodeLayout,
    worker: BTreeWorker,
    root: Position,
    /// Free pages in the region, counted on first use and kept current after.
    /// Cleared when an operation fails part way.
    free_pages: Option<u64>,
}

impl BTreeSection {
    /// Format the region and build a one-node tree holding its single hole
    pub fn format<S: Read + Write + Seek>(
        io: &mut PagedStream<S>,
        index: usize,
        section: Section,
        worker: BTreeWorker,
        layout: NodeLayout,
        upstream: &mut Upstream<'_>,
    ) -> Result<Self> {
        let hole = section.format(io)?;
        let mut tier = BTreeSection {
            index,
            section,
            layout,
            worker,
            root: Position::NULL,
            free_pages: None,
        };

        let mut cache = tier.cache();
        let root = cache.bind(io).create(NodeBody::leaf_with(vec![hole]))?;
        tier.finalize(&mut cache, io, root, upstream)?;
        cache.close(io)?;
        tier.free_pages = Some(hole.size.get());

        debug!(
            tier = index,
            root = tier.root.get(),
            pages = hole.size.get(),
            "formatted B-tree section"
        );
        Ok(tier)
    }

    pub fn open(
        index: usize,
        section: Section,
        worker: BTreeWorker,
        layout: NodeLayout,
        root: Position,
    ) -> Self {
        BTreeSection {
            index,
            section,
            layout,
            worker,
            root,
            free_pages: None,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn section(&self) -> &Section {
        &self.section
    }

    /// Position of the root node
    pub fn root_position(&self) -> Position {
        self.root
    }

    /// Free pages of the region
    pub fn free_pages<S: Read + Write + Seek>(&mut self, io: &mut PagedStream<S>) -> Result<u64> {
        if let Some(free) = self.free_pages {
            return Ok(free);
        }
        let free = self.holes(io)?.iter().map(|h| h.size.get()).sum();
        self.free_pages = Some(free);
        Ok(free)
    }

    fn cache(&self) -> NodeCache {
        NodeCache::new(self.layout, *self.section.encoder())
    }

    /// Take the smallest indexed hole of at least `size` pages out of the tree
    fn take_best_fit<S: Read + Write + Seek>(
        &self,
        cache: &mut NodeCache,
        io: &mut PagedStream<S>,
        size: Size,
        or_largest: bool,
    ) -> Result<Option<(Hole, NodeId)>> {
        let mut store = cache.bind(io);
        let root = store.load(Link::Stored(self.root))?;
        let hit = self.worker.search(&mut store, root, &Hole::probe(size))?;
        let found = match self.worker.resolve_inorder(&mut store, hit.cursor())? {
            Some(at) => Some(at),
            None if or_largest => self.worker.last_inorder(&mut store, root)?,
            None => None,
        };
        let Some(at) = found else {
            return Ok(None);
        };
        let hole = self.worker.entry(&store, at)?;
        let (_, root) = self.worker.remove(&mut store, root, at.node, at.index)?;
        Ok(Some((hole, root)))
    }

    fn insert_hole<S: Read + Write + Seek>(
        &self,
        cache: &mut NodeCache,
        io: &mut PagedStream<S>,
        root: NodeId,
        hole: Hole,
    ) -> Result<NodeId> {
        let mut store = cache.bind(io);
        let hit = self.worker.search(&mut store, root, &hole)?;
        if hit.found {
            return Err(SpaceError::structure(format!(
                "hole {}+{} indexed twice in tier {}",
                hole.start, hole.size, self.index
            )));
        }
        self.worker
            .insert(&mut store, root, hit.node, hit.index, hole)
    }

    fn remove_hole<S: Read + Write + Seek>(
        &self,
        cache: &mut NodeCache,
        io: &mut PagedStream<S>,
        root: NodeId,
        hole: Hole,
    ) -> Result<NodeId> {
        let mut store = cache.bind(io);
        let hit = self.worker.search(&mut store, root, &hole)?;
        if !hit.found {
            return Err(SpaceError::BadSection(format!(
                "hole {}+{} missing from the index of tier {}",
                hole.start, hole.size, self.index
            )));
        }
        let (_, root) = self.worker.remove(&mut store, root, hit.node, hit.index)?;
        Ok(root)
    }

    /// Best-fit allocation of `size` pages
    pub fn allocate<S: Read + Write + Seek>(
        &mut self,
        io: &mut PagedStream<S>,
        size: Size,
        upstream: &mut Upstream<'_>,
    ) -> Result<Option<Position>> {
        let known = self.free_pages.take();
        let mut cache = self.cache();
        let Some((hole, mut root)) = self.take_best_fit(&mut cache, io, size, false)? else {
            self.free_pages = known;
            return Ok(None);
        };
        if let Some(rest) = self.section.allocate(io, hole, size)? {
            root = self.insert_hole(&mut cache, io, root, rest)?;
        }
        self.finalize(&mut cache, io, root, upstream)?;
        cache.close(io)?;
        self.free_pages = known.map(|free| free.saturating_sub(size.get()));
        Ok(Some(hole.start))
    }

    /// Carve `count` one-page lumps for the nodes of the inferior tier
    ///
    /// Prefers one hole large enough for everything that is still needed;
    /// otherwise drains the largest hole and tries again.
    pub fn allocate_for_nodes<S: Read + Write + Seek>(
        &mut self,
        io: &mut PagedStream<S>,
        count: usize,
        upstream: &mut Upstream<'_>,
    ) -> Result<Vec<Position>> {
        let available = self.free_pages(io)?;
        if count as u64 > available {
            return Err(SpaceError::NodeSpaceExhausted {
                needed: count as u64,
                available,
            });
        }
        self.free_pages = None;

        let mut pages = Vec::with_capacity(count);
        while pages.len() < count {
            let outstanding = count - pages.len();
            let mut cache = self.cache();
            let (hole, mut root) = self
                .take_best_fit(&mut cache, io, Size(outstanding as u64), true)?
                .ok_or(SpaceError::NodeSpaceExhausted {
                    needed: outstanding as u64,
                    available: 0,
                })?;
            let take = outstanding.min(hole.size.get() as usize);
            let (carved, rest) = self.section.allocate_pages(io, hole, take)?;
            if let Some(rest) = rest {
                root = self.insert_hole(&mut cache, io, root, rest)?;
            }
            self.finalize(&mut cache, io, root, upstream)?;
            cache.close(io)?;
            pages.extend(carved);
        }
        self.free_pages = Some(available - count as u64);
        trace!(tier = self.index, count, "supplied node pages");
        Ok(pages)
    }

    /// Free the lump at `pos` and index the merged hole
    pub fn deallocate<S: Read + Write + Seek>(
        &mut self,
        io: &mut PagedStream<S>,
        pos: Position,
        upstream: &mut Upstream<'_>,
    ) -> Result<()> {
        let known = self.free_pages.take();
        let release = self.section.deallocate(io, pos)?;
        let absorbed: u64 = release.obsolete().map(|h| h.size.get()).sum();
        let freed = release.merged.size.get().saturating_sub(absorbed);

        let mut cache = self.cache();
        let mut root = cache.bind(io).load(Link::Stored(self.root))?;
        for hole in release.obsolete() {
            root = self.remove_hole(&mut cache, io, root, hole)?;
        }
        root = self.insert_hole(&mut cache, io, root, release.merged)?;
        self.finalize(&mut cache, io, root, upstream)?;
        cache.close(io)?;
        self.free_pages = known.map(|free| free + freed);
        Ok(())
    }

    /// Give every positionless node a page and record the root position
    ///
    /// Pages vacated during the operation are reused first. The shortfall is
    /// requested from upstream in one call; surplus vacated pages go back.
    pub fn finalize<S: Read + Write + Seek>(
        &mut self,
        cache: &mut NodeCache,
        io: &mut PagedStream<S>,
        root: NodeId,
        upstream: &mut Upstream<'_>,
    ) -> Result<()> {
        let mut shortfall = Vec::new();
        for id in cache.pending() {
            match cache.pop_vacated() {
                Some(pos) => cache.set_node_position(id, pos)?,
                None => shortfall.push(id),
            }
        }

        if !shortfall.is_empty() {
            let pages = upstream.allocate_pages(io, shortfall.len())?;
            if pages.len() != shortfall.len() {
                return Err(SpaceError::structure(format!(
                    "asked for {} node pages, got {}",
                    shortfall.len(),
                    pages.len()
                )));
            }
            for (id, pos) in shortfall.into_iter().zip(pages) {
                cache.set_node_position(id, pos)?;
            }
        }

        let surplus = cache.drain_vacated();
        for pos in &surplus {
            upstream.release_page(io, *pos)?;
        }

        self.root = cache
            .position_of(root)
            .ok_or_else(|| SpaceError::structure("root node left without a position"))?;
        if !surplus.is_empty() {
            trace!(tier = self.index, released = surplus.len(), "released node pages");
        }
        Ok(())
    }

    /// Every indexed hole in `(size, start)` order
    pub fn holes<S: Read + Write + Seek>(&self, io: &mut PagedStream<S>) -> Result<Vec<Hole>> {
        let mut cache = self.cache();
        let mut store = cache.bind(io);
        let root = store.load(Link::Stored(self.root))?;
        self.worker.collect_inorder(&mut store, root)
    }

    /// Check the tree, then compare its holes with a walk of the region
    pub fn audit<S: Read + Write + Seek>(&self, io: &mut PagedStream<S>) -> Result<TierAudit> {
        let mut cache = self.cache();
        let holes = {
            let mut store = cache.bind(io);
            let root = store.load(Link::Stored(self.root))?;
            self.worker.check(&mut store, root)?;
            self.worker.collect_inorder(&mut store, root)?
        };
        let mut node_pages = cache.loaded_positions();
        node_pages.sort();

        let (walked, lumps) = self.section.survey(io)?;
        if walked != holes {
            return Err(SpaceError::BadSection(format!(
                "tier {} indexes {} holes, region holds {}",
                self.index,
                holes.len(),
                walked.len()
            )));
        }
        Ok(TierAudit {
            holes,
            lumps,
            node_pages,
        })
    }
}
