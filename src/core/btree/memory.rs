//! In-memory B-tree built on the shared engine

use super::{BTreeWorker, Link, NodeBody, NodeId, NodeSource, NodeStore, TreeCursor};
use crate::error::{Result, SpaceError};
use std::fmt::Debug;

/// Slot arena holding every node of a [`MemoryTree`]
#[derive(Debug, Clone)]
struct Arena<T> {
    slots: Vec<Option<NodeBody<T>>>,
    free: Vec<NodeId>,
}

impl<T> Arena<T> {
    fn get(&self, id: NodeId) -> Result<&NodeBody<T>> {
        self.slots
            .get(id)
            .and_then(Option::as_ref)
            .ok_or_else(|| SpaceError::structure(format!("node {} is not live", id)))
    }

    fn resolve(&self, link: Link) -> Result<NodeId> {
        match link {
            Link::Cached(id) => {
                self.get(id)?;
                Ok(id)
            }
            Link::Stored(pos) => Err(SpaceError::structure(format!(
                "in-memory tree cannot follow stored link {}",
                pos
            ))),
        }
    }
}

impl<T> NodeSource<T> for Arena<T> {
    fn load(&mut self, link: Link) -> Result<NodeId> {
        self.resolve(link)
    }

    fn node(&self, id: NodeId) -> Result<&NodeBody<T>> {
        self.get(id)
    }

    fn links_to(&self, link: Link, id: NodeId) -> bool {
        link == Link::Cached(id)
    }
}

/// Shared view used by the read-only tree operations
impl<T> NodeSource<T> for &Arena<T> {
    fn load(&mut self, link: Link) -> Result<NodeId> {
        self.resolve(link)
    }

    fn node(&self, id: NodeId) -> Result<&NodeBody<T>> {
        self.get(id)
    }

    fn links_to(&self, link: Link, id: NodeId) -> bool {
        link == Link::Cached(id)
    }
}

impl<T> NodeStore<T> for Arena<T> {
    fn node_mut(&mut self, id: NodeId) -> Result<&mut NodeBody<T>> {
        self.slots
            .get_mut(id)
            .and_then(Option::as_mut)
            .ok_or_else(|| SpaceError::structure(format!("node {} is not live", id)))
    }

    fn create(&mut self, body: NodeBody<T>) -> Result<NodeId> {
        match self.free.pop() {
            Some(id) => {
                self.slots[id] = Some(body);
                Ok(id)
            }
            None => {
                self.slots.push(Some(body));
                Ok(self.slots.len() - 1)
            }
        }
    }

    fn dispose(&mut self, id: NodeId) -> Result<()> {
        match self.slots.get_mut(id) {
            Some(slot) if slot.is_some() => {
                *slot = None;
                self.free.push(id);
                Ok(())
            }
            _ => Err(SpaceError::structure(format!(
                "dispose of dead node {}",
                id
            ))),
        }
    }
}

/// An ordered set kept in a B-tree of configurable order
///
/// Mostly useful to exercise the engine without any I/O; the persistent hole
/// indices run the same [`BTreeWorker`] code.
#[derive(Debug, Clone)]
pub struct MemoryTree<T> {
    worker: BTreeWorker,
    arena: Arena<T>,
    root: NodeId,
    len: usize,
}

impl<T: Ord + Clone + Debug> MemoryTree<T> {
    pub fn new(order: usize) -> Result<Self> {
        let worker = BTreeWorker::new(order)?;
        let mut arena = Arena {
            slots: Vec::new(),
            free: Vec::new(),
        };
        let root = arena.create(NodeBody::leaf())?;
        Ok(MemoryTree {
            worker,
            arena,
            root,
            len: 0,
        })
    }

    pub fn order(&self) -> usize {
        self.worker.order()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Insert `value`; returns false if it was already present
    pub fn insert(&mut self, value: T) -> Result<bool> {
        let hit = self.worker.search(&mut self.arena, self.root, &value)?;
        if hit.found {
            return Ok(false);
        }
        self.root = self
            .worker
            .insert(&mut self.arena, self.root, hit.node, hit.index, value)?;
        self.len += 1;
        Ok(true)
    }

    /// Remove `value`; returns false if it was absent
    pub fn remove(&mut self, value: &T) -> Result<bool> {
        let hit = self.worker.search(&mut self.arena, self.root, value)?;
        if !hit.found {
            return Ok(false);
        }
        let (_, root) = self
            .worker
            .remove(&mut self.arena, self.root, hit.node, hit.index)?;
        self.root = root;
        self.len -= 1;
        Ok(true)
    }

    pub fn contains(&self, value: &T) -> Result<bool> {
        let mut view = &self.arena;
        Ok(self.worker.search(&mut view, self.root, value)?.found)
    }

    /// Smallest element not less than `value`
    pub fn ceiling(&self, value: &T) -> Result<Option<T>> {
        let mut view = &self.arena;
        let hit = self.worker.search(&mut view, self.root, value)?;
        match self.worker.resolve_inorder(&mut view, hit.cursor())? {
            Some(at) => Ok(Some(self.worker.entry(&view, at)?)),
            None => Ok(None),
        }
    }

    pub fn first(&self) -> Result<Option<T>> {
        let mut view = &self.arena;
        match self.worker.first_inorder(&mut view, self.root)? {
            Some(at) => Ok(Some(self.worker.entry(&view, at)?)),
            None => Ok(None),
        }
    }

    pub fn last(&self) -> Result<Option<T>> {
        match self.last_cursor()? {
            Some(at) => Ok(Some(self.entry_at(at)?)),
            None => Ok(None),
        }
    }

    pub fn first_cursor(&self) -> Result<Option<TreeCursor>> {
        let mut view = &self.arena;
        self.worker.first_inorder(&mut view, self.root)
    }

    pub fn last_cursor(&self) -> Result<Option<TreeCursor>> {
        let mut view = &self.arena;
        self.worker.last_inorder(&mut view, self.root)
    }

    pub fn next_cursor(&self, at: TreeCursor) -> Result<Option<TreeCursor>> {
        let mut view = &self.arena;
        self.worker.next_inorder(&mut view, at)
    }

    pub fn prev_cursor(&self, at: TreeCursor) -> Result<Option<TreeCursor>> {
        let mut view = &self.arena;
        self.worker.prev_inorder(&mut view, at)
    }

    pub fn entry_at(&self, at: TreeCursor) -> Result<T> {
        self.worker.entry(&&self.arena, at)
    }

    /// All elements in ascending order
    pub fn iter(&self) -> Result<std::vec::IntoIter<T>> {
        let mut view = &self.arena;
        Ok(self.worker.collect_inorder(&mut view, self.root)?.into_iter())
    }

    /// Entries of the root node
    pub fn root_entries(&self) -> Result<Vec<T>> {
        Ok(self.arena.get(self.root)?.entries.clone())
    }

    /// Number of levels, 1 for a lone leaf
    pub fn height(&self) -> Result<usize> {
        let mut height = 1;
        let mut node = self.arena.get(self.root)?;
        while let Some(Some(link)) = node.children.first() {
            node = self.arena.get(self.arena.resolve(*link)?)?;
            height += 1;
        }
        Ok(height)
    }

    /// Verify the structure and the element count
    pub fn check(&self) -> Result<usize> {
        let mut view = &self.arena;
        let count = self.worker.check(&mut view, self.root)?;
        if count != self.len {
            return Err(SpaceError::structure(format!(
                "tree holds {} entries, expected {}",
                count, self.len
            )));
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::seq::SliceRandom;
    use rand::{rngs::StdRng, SeedableRng};
    use std::collections::BTreeSet;

    #[test]
    fn test_empty_tree() {
        let tree: MemoryTree<u64> = MemoryTree::new(3).unwrap();
        assert!(tree.is_empty());
        assert_eq!(tree.first().unwrap(), None);
        assert_eq!(tree.last().unwrap(), None);
        assert_eq!(tree.ceiling(&1).unwrap(), None);
        assert_eq!(tree.check().unwrap(), 0);
        assert_eq!(tree.height().unwrap(), 1);
    }

    #[test]
    fn test_arena_reuses_disposed_slots() {
        let mut tree = MemoryTree::new(3).unwrap();
        for v in 0..50u64 {
            tree.insert(v).unwrap();
        }
        let peak = tree.arena.slots.len();
        for v in 0..50u64 {
            tree.remove(&v).unwrap();
        }
        for v in 0..50u64 {
            tree.insert(v).unwrap();
        }
        assert_eq!(tree.arena.slots.len(), peak);
        tree.check().unwrap();
    }

    #[test]
    fn test_random_workload_matches_btreeset() {
        let mut rng = StdRng::seed_from_u64(0x5eed);
        for order in [3, 4, 5, 8, 16] {
            let mut tree = MemoryTree::new(order).unwrap();
            let mut model = BTreeSet::new();
            let mut values: Vec<u32> = (0..500).collect();
            values.shuffle(&mut rng);

            for &v in &values {
                assert_eq!(tree.insert(v).unwrap(), model.insert(v));
            }
            values.shuffle(&mut rng);
            for &v in values.iter().take(350) {
                assert_eq!(tree.remove(&v).unwrap(), model.remove(&v));
                tree.check().unwrap();
            }

            let items: Vec<u32> = tree.iter().unwrap().collect();
            assert_eq!(items, model.iter().copied().collect::<Vec<_>>());
            assert_eq!(tree.first().unwrap(), model.first().copied());
            assert_eq!(tree.last().unwrap(), model.last().copied());
        }
    }

    #[test]
    fn test_cursor_walk_forward() {
        let mut tree = MemoryTree::new(4).unwrap();
        for v in (0..100u32).rev() {
            tree.insert(v).unwrap();
        }
        let mut seen = Vec::new();
        let mut cursor = tree.first_cursor().unwrap();
        while let Some(at) = cursor {
            seen.push(tree.entry_at(at).unwrap());
            cursor = tree.next_cursor(at).unwrap();
        }
        assert_eq!(seen, (0..100).collect::<Vec<_>>());
    }
}
