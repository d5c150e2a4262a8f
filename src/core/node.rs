//! Persistent B-tree nodes and the per-operation node cache
//!
//! A node lives in a one-page lump of the superior section, right after the
//! lump's header tag:
//!
//! ```text
//! child_count (u32) | entries: (child_count-1) x {start, size} | parent | children: child_count x position
//! ```
//!
//! The parent follows the last entry, so its offset depends on the child
//! count. Bytes past the last child up to the worst case (`order` children)
//! are zero. A zero position stands for "none".
//!
//! A [`NodeCache`] lives for one public operation. Nodes are decoded on first
//! load, mutated only through `node_mut` (which marks them dirty) and written
//! back by [`NodeCache::close`]. Nodes created during the operation have no
//! position until [`NodeCache::set_node_position`] gives them one, so links
//! between cached nodes are slot based and resolved at flush time.

use crate::btree::{Link, NodeBody, NodeId, NodeSource, NodeStore};
use crate::chunk::{ChunkDescriptor, ChunkDescriptorEncoder};
use crate::error::{Result, SpaceError};
use crate::hole::Hole;
use crate::io::PagedStream;
use crate::scalar::{Operator, Position, Size};
use ahash::AHashMap;
use std::collections::VecDeque;
use std::io::{Read, Seek, Write};
use tracing::trace;

const CHILD_COUNT_LEN: usize = 4;

/// Fixed-size node encoding for one order and field width
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeLayout {
    op: Operator,
    order: usize,
}

impl NodeLayout {
    pub fn new(op: Operator, order: usize) -> Self {
        NodeLayout { op, order }
    }

    pub fn order(&self) -> usize {
        self.order
    }

    fn entries_offset(&self) -> usize {
        CHILD_COUNT_LEN
    }

    fn parent_offset(&self, child_count: usize) -> usize {
        self.entries_offset() + child_count.saturating_sub(1) * Hole::encoded_len(&self.op)
    }

    fn children_offset(&self, child_count: usize) -> usize {
        self.parent_offset(child_count) + self.op.len()
    }

    fn packed_len(&self, child_count: usize) -> usize {
        self.children_offset(child_count) + child_count * self.op.len()
    }

    /// Size of a full node, the most a page must hold
    pub fn encoded_len(&self) -> usize {
        self.packed_len(self.order)
    }

    /// Encode `body`, turning links into positions with `resolve`
    pub fn encode<F>(&self, body: &NodeBody<Hole>, resolve: F) -> Result<Vec<u8>>
    where
        F: Fn(Link) -> Result<Position>,
    {
        if body.entries.len() >= self.order || body.children.len() != body.entries.len() + 1 {
            return Err(SpaceError::structure(format!(
                "cannot encode node with {} entries and {} children at order {}",
                body.entries.len(),
                body.children.len(),
                self.order
            )));
        }

        let mut out = Vec::with_capacity(self.encoded_len());
        out.extend_from_slice(&(body.children.len() as u32).to_be_bytes());

        for hole in &body.entries {
            hole.encode(&self.op, &mut out)?;
        }

        let parent = body.parent.map(&resolve).transpose()?;
        self.op.encode_position(parent, &mut out)?;

        for child in &body.children {
            let pos = child.map(&resolve).transpose()?;
            self.op.encode_position(pos, &mut out)?;
        }
        out.resize(self.encoded_len(), 0);
        Ok(out)
    }

    /// Decode a node; `None` for anything malformed
    pub fn decode(&self, bytes: &[u8]) -> Option<NodeBody<Hole>> {
        if bytes.len() < CHILD_COUNT_LEN {
            return None;
        }
        let mut count = [0u8; CHILD_COUNT_LEN];
        count.copy_from_slice(&bytes[..CHILD_COUNT_LEN]);
        let child_count = u32::from_be_bytes(count) as usize;
        if child_count == 0 || child_count > self.order || bytes.len() < self.packed_len(child_count)
        {
            return None;
        }

        let w = self.op.len();
        let hole_len = Hole::encoded_len(&self.op);
        let mut entries = Vec::with_capacity(child_count - 1);
        for i in 0..child_count - 1 {
            let at = self.entries_offset() + i * hole_len;
            let hole = Hole::decode(&self.op, &bytes[at..at + hole_len]);
            if hole.size.is_zero() || hole.start.is_null() {
                return None;
            }
            entries.push(hole);
        }

        let parent = self
            .op
            .decode_position(&bytes[self.parent_offset(child_count)..])
            .map(Link::Stored);

        let children: Vec<Option<Link>> = (0..child_count)
            .map(|i| {
                let at = self.children_offset(child_count) + i * w;
                self.op.decode_position(&bytes[at..at + w]).map(Link::Stored)
            })
            .collect();
        let linked = children.iter().filter(|c| c.is_some()).count();
        if linked != 0 && linked != children.len() {
            return None;
        }

        Some(NodeBody {
            entries,
            children,
            parent,
        })
    }
}

#[derive(Debug)]
enum SlotState {
    Decoded { body: NodeBody<Hole>, dirty: bool },
    Disposed,
}

#[derive(Debug)]
struct NodeSlot {
    /// Set once, never changed
    position: Option<Position>,
    state: SlotState,
}

/// Nodes touched by one operation on a B-tree section
#[derive(Debug)]
pub struct NodeCache {
    layout: NodeLayout,
    encoder: ChunkDescriptorEncoder,
    slots: Vec<NodeSlot>,
    by_position: AHashMap<Position, NodeId>,
    vacated: VecDeque<Position>,
}

impl NodeCache {
    pub fn new(layout: NodeLayout, encoder: ChunkDescriptorEncoder) -> Self {
        NodeCache {
            layout,
            encoder,
            slots: Vec::new(),
            by_position: AHashMap::new(),
            vacated: VecDeque::new(),
        }
    }

    /// Attach the stream for node reads
    pub fn bind<'a, S>(&'a mut self, io: &'a mut PagedStream<S>) -> BoundCache<'a, S> {
        BoundCache { cache: self, io }
    }

    fn slot(&self, id: NodeId) -> Result<&NodeSlot> {
        self.slots
            .get(id)
            .ok_or_else(|| SpaceError::structure(format!("unknown cached node {}", id)))
    }

    pub fn position_of(&self, id: NodeId) -> Option<Position> {
        self.slots.get(id).and_then(|slot| slot.position)
    }

    /// Live nodes that still need a position
    pub fn pending(&self) -> Vec<NodeId> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| {
                slot.position.is_none() && matches!(slot.state, SlotState::Decoded { .. })
            })
            .map(|(id, _)| id)
            .collect()
    }

    /// Take the next position freed by a disposed node
    pub fn pop_vacated(&mut self) -> Option<Position> {
        self.vacated.pop_front()
    }

    pub fn drain_vacated(&mut self) -> Vec<Position> {
        self.vacated.drain(..).collect()
    }

    pub fn set_node_position(&mut self, id: NodeId, pos: Position) -> Result<()> {
        if let Some(&other) = self.by_position.get(&pos) {
            if matches!(self.slots[other].state, SlotState::Decoded { .. }) {
                return Err(SpaceError::structure(format!(
                    "position {} is held by a live node",
                    pos
                )));
            }
        }

        let slot = self
            .slots
            .get_mut(id)
            .ok_or_else(|| SpaceError::structure(format!("unknown cached node {}", id)))?;
        if slot.position.is_some() {
            return Err(SpaceError::structure(format!(
                "node {} already has a position",
                id
            )));
        }
        match &mut slot.state {
            SlotState::Decoded { dirty, .. } => *dirty = true,
            SlotState::Disposed => {
                return Err(SpaceError::structure("position given to a disposed node"))
            }
        }
        slot.position = Some(pos);
        self.by_position.insert(pos, id);
        Ok(())
    }

    /// Positions of every live node with a position
    pub fn loaded_positions(&self) -> Vec<Position> {
        self.slots
            .iter()
            .filter(|slot| matches!(slot.state, SlotState::Decoded { .. }))
            .filter_map(|slot| slot.position)
            .collect()
    }

    fn resolve(&self, link: Link) -> Result<Position> {
        match link {
            Link::Stored(pos) => Ok(pos),
            Link::Cached(id) => {
                let slot = self.slot(id)?;
                if matches!(slot.state, SlotState::Disposed) {
                    return Err(SpaceError::structure(format!(
                        "link to disposed node {}",
                        id
                    )));
                }
                slot.position.ok_or_else(|| {
                    SpaceError::structure(format!("node {} was never given a position", id))
                })
            }
        }
    }

    /// Write every dirty node back, returning how many were written
    pub fn close<S: Read + Write + Seek>(&mut self, io: &mut PagedStream<S>) -> Result<usize> {
        let mut written = 0;
        for id in 0..self.slots.len() {
            let (pos, bytes) = match &self.slots[id] {
                NodeSlot {
                    position,
                    state: SlotState::Decoded { body, dirty: true },
                } => {
                    let pos = position.ok_or_else(|| {
                        SpaceError::structure(format!("dirty node {} has no position", id))
                    })?;
                    (pos, self.layout.encode(body, |link| self.resolve(link))?)
                }
                _ => continue,
            };
            let offset = self.encoder.header_offset(pos) + self.encoder.tag_width() as u64;
            trace!(position = pos.get(), "flushing node");
            io.write_at(offset, &bytes)?;
            if let SlotState::Decoded { dirty, .. } = &mut self.slots[id].state {
                *dirty = false;
            }
            written += 1;
        }
        Ok(written)
    }
}

/// A node cache joined with the stream it reads from
pub struct BoundCache<'a, S> {
    cache: &'a mut NodeCache,
    io: &'a mut PagedStream<S>,
}

impl<'a, S: Read + Write + Seek> BoundCache<'a, S> {
    fn read_node(&mut self, pos: Position) -> Result<NodeBody<Hole>> {
        let tag_width = self.cache.encoder.tag_width();
        let bytes = self.io.read_vec(
            self.cache.encoder.header_offset(pos),
            tag_width + self.cache.layout.encoded_len(),
        )?;
        if self.cache.encoder.decode(&bytes[..tag_width]) != Some(ChunkDescriptor::lump(Size(1))) {
            return Err(SpaceError::CorruptNode(pos.get()));
        }
        self.cache
            .layout
            .decode(&bytes[tag_width..])
            .ok_or(SpaceError::CorruptNode(pos.get()))
    }
}

impl<'a, S: Read + Write + Seek> NodeSource<Hole> for BoundCache<'a, S> {
    fn load(&mut self, link: Link) -> Result<NodeId> {
        let id = match link {
            Link::Cached(id) => id,
            Link::Stored(pos) => match self.cache.by_position.get(&pos) {
                Some(&id) => id,
                None => {
                    let body = self.read_node(pos)?;
                    let id = self.cache.slots.len();
                    self.cache.slots.push(NodeSlot {
                        position: Some(pos),
                        state: SlotState::Decoded { body, dirty: false },
                    });
                    self.cache.by_position.insert(pos, id);
                    return Ok(id);
                }
            },
        };
        match self.cache.slot(id)?.state {
            SlotState::Decoded { .. } => Ok(id),
            SlotState::Disposed => Err(SpaceError::structure(format!(
                "link to disposed node {}",
                id
            ))),
        }
    }

    fn node(&self, id: NodeId) -> Result<&NodeBody<Hole>> {
        match &self.cache.slot(id)?.state {
            SlotState::Decoded { body, .. } => Ok(body),
            SlotState::Disposed => Err(SpaceError::structure(format!(
                "access to disposed node {}",
                id
            ))),
        }
    }

    fn links_to(&self, link: Link, id: NodeId) -> bool {
        match link {
            Link::Cached(other) => other == id,
            Link::Stored(pos) => self.cache.position_of(id) == Some(pos),
        }
    }
}

impl<'a, S: Read + Write + Seek> NodeStore<Hole> for BoundCache<'a, S> {
    fn node_mut(&mut self, id: NodeId) -> Result<&mut NodeBody<Hole>> {
        let slot = self
            .cache
            .slots
            .get_mut(id)
            .ok_or_else(|| SpaceError::structure(format!("unknown cached node {}", id)))?;
        match &mut slot.state {
            SlotState::Decoded { body, dirty } => {
                *dirty = true;
                Ok(body)
            }
            SlotState::Disposed => Err(SpaceError::structure(format!(
                "access to disposed node {}",
                id
            ))),
        }
    }

    fn create(&mut self, body: NodeBody<Hole>) -> Result<NodeId> {
        self.cache.slots.push(NodeSlot {
            position: None,
            state: SlotState::Decoded { body, dirty: true },
        });
        Ok(self.cache.slots.len() - 1)
    }

    fn dispose(&mut self, id: NodeId) -> Result<()> {
        let slot = self
            .cache
            .slots
            .get_mut(id)
            .ok_or_else(|| SpaceError::structure(format!("unknown cached node {}", id)))?;
        if matches!(slot.state, SlotState::Disposed) {
            return Err(SpaceError::structure(format!("node {} disposed twice", id)));
        }
        slot.state = SlotState::Disposed;
        if let Some(pos) = slot.position {
            self.cache.vacated.push_back(pos);
        }
        Ok(())
    }
}
