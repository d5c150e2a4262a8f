//! B-tree algorithms over an abstract node store

use super::{Link, NodeBody, NodeId, NodeSource, NodeStore, SearchHit, TreeCursor};
use crate::error::{Result, SpaceError};
use std::fmt::Debug;

/// Stateless B-tree algorithms for a fixed order
///
/// Every operation that may replace the root returns the new root instead of
/// updating it in place; the caller owns the root pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BTreeWorker {
    order: usize,
}

/// Deepest walk any operation takes
///
/// Every node below the root has at least two children, so a real tree this
/// tall would hold more than 2^63 entries. Hitting it means a link cycle.
pub const MAX_HEIGHT: usize = 64;

fn step_down(depth: &mut usize) -> Result<()> {
    *depth += 1;
    if *depth > MAX_HEIGHT {
        return Err(SpaceError::structure(format!(
            "walk exceeded {} levels, node links form a cycle",
            MAX_HEIGHT
        )));
    }
    Ok(())
}

fn child_link<T>(body: &NodeBody<T>, index: usize) -> Result<Link> {
    match body.children.get(index) {
        Some(Some(link)) => Ok(*link),
        Some(None) => Err(SpaceError::structure(format!(
            "missing child {} in internal node",
            index
        ))),
        None => Err(SpaceError::structure(format!(
            "child index {} out of range ({} children)",
            index,
            body.children.len()
        ))),
    }
}

impl BTreeWorker {
    pub fn new(order: usize) -> Result<Self> {
        if order < 3 {
            return Err(SpaceError::InvalidConfig(format!(
                "B-tree order must be at least 3, got {}",
                order
            )));
        }
        Ok(BTreeWorker { order })
    }

    pub fn order(&self) -> usize {
        self.order
    }

    pub fn maximal_entry_count(&self) -> usize {
        self.order - 1
    }

    pub fn minimal_child_count(&self) -> usize {
        (self.order + 1) / 2
    }

    pub fn minimal_entry_count(&self) -> usize {
        self.minimal_child_count() - 1
    }

    /// Find `target`, or the leaf position where it belongs
    pub fn search<T: Ord, S: NodeSource<T>>(
        &self,
        store: &mut S,
        root: NodeId,
        target: &T,
    ) -> Result<SearchHit> {
        let mut node = root;
        let mut depth = 0;
        loop {
            step_down(&mut depth)?;
            let body = store.node(node)?;
            let next = match body.entries.binary_search(target) {
                Ok(index) => {
                    return Ok(SearchHit {
                        found: true,
                        node,
                        index,
                    })
                }
                Err(index) => match body.children.get(index) {
                    Some(Some(link)) => *link,
                    Some(None) => {
                        return Ok(SearchHit {
                            found: false,
                            node,
                            index,
                        })
                    }
                    None => {
                        return Err(SpaceError::structure(
                            "node has fewer children than entries",
                        ))
                    }
                },
            };
            node = store.load(next)?;
        }
    }

    /// Clone the entry under a cursor
    pub fn entry<T: Clone, S: NodeSource<T>>(&self, store: &S, at: TreeCursor) -> Result<T> {
        store
            .node(at.node)?
            .entries
            .get(at.index)
            .cloned()
            .ok_or_else(|| SpaceError::structure("cursor past the end of its node"))
    }

    /// Insert `entry` at a leaf position returned by a missed search
    pub fn insert<T: Ord + Clone, S: NodeStore<T>>(
        &self,
        store: &mut S,
        root: NodeId,
        node: NodeId,
        index: usize,
        entry: T,
    ) -> Result<NodeId> {
        {
            let body = store.node_mut(node)?;
            if !body.is_leaf() {
                return Err(SpaceError::structure("insertion target is not a leaf"));
            }
            if index > body.entries.len() {
                return Err(SpaceError::structure("insertion index out of range"));
            }
            body.entries.insert(index, entry);
            body.children.push(None);
        }
        self.split_overflow(store, root, node)
    }

    fn split_overflow<T: Ord + Clone, S: NodeStore<T>>(
        &self,
        store: &mut S,
        root: NodeId,
        mut node: NodeId,
    ) -> Result<NodeId> {
        let mut depth = 0;
        loop {
            step_down(&mut depth)?;
            let (len, parent_link) = {
                let body = store.node(node)?;
                (body.entries.len(), body.parent)
            };
            if len <= self.maximal_entry_count() {
                return Ok(root);
            }

            let slot = match parent_link {
                Some(link) => {
                    let parent = store.load(link)?;
                    Some((parent, self.child_index(store, parent, node)?))
                }
                None => None,
            };

            // Left keeps len/2 entries, the next one moves up
            let mid = len / 2;
            let (median, right_body) = {
                let body = store.node_mut(node)?;
                let entries = body.entries.split_off(mid + 1);
                let children = body.children.split_off(mid + 1);
                let median = body
                    .entries
                    .pop()
                    .ok_or_else(|| SpaceError::structure("split of an empty node"))?;
                let parent = body.parent;
                (
                    median,
                    NodeBody {
                        entries,
                        children,
                        parent,
                    },
                )
            };
            let moved: Vec<Link> = right_body.children.iter().flatten().copied().collect();
            let right = store.create(right_body)?;
            self.adopt(store, right, &moved)?;

            match slot {
                Some((parent, index)) => {
                    let body = store.node_mut(parent)?;
                    body.entries.insert(index, median);
                    body.children.insert(index + 1, Some(Link::Cached(right)));
                    node = parent;
                }
                None => {
                    let new_root = store.create(NodeBody {
                        entries: vec![median],
                        children: vec![Some(Link::Cached(node)), Some(Link::Cached(right))],
                        parent: None,
                    })?;
                    store.node_mut(node)?.parent = Some(Link::Cached(new_root));
                    store.node_mut(right)?.parent = Some(Link::Cached(new_root));
                    return Ok(new_root);
                }
            }
        }
    }

    /// Point every linked child at a new parent
    fn adopt<T, S: NodeStore<T>>(&self, store: &mut S, parent: NodeId, links: &[Link]) -> Result<()> {
        for link in links {
            let child = store.load(*link)?;
            store.node_mut(child)?.parent = Some(Link::Cached(parent));
        }
        Ok(())
    }

    /// Remove the entry at `(node, index)`
    ///
    /// Returns the removed entry and the new root.
    pub fn remove<T: Ord + Clone, S: NodeStore<T>>(
        &self,
        store: &mut S,
        root: NodeId,
        node: NodeId,
        index: usize,
    ) -> Result<(T, NodeId)> {
        let (is_leaf, len) = {
            let body = store.node(node)?;
            (body.is_leaf(), body.entries.len())
        };
        if index >= len {
            return Err(SpaceError::structure("removal index out of range"));
        }

        let (removed, underflow) = if is_leaf {
            let body = store.node_mut(node)?;
            body.children.pop();
            (body.entries.remove(index), node)
        } else {
            // Lift the in-order successor into the vacated slot
            let right = child_link(store.node(node)?, index + 1)?;
            let mut leaf = store.load(right)?;
            let mut depth = 0;
            loop {
                step_down(&mut depth)?;
                let body = store.node(leaf)?;
                if body.is_leaf() {
                    break;
                }
                let link = child_link(body, 0)?;
                leaf = store.load(link)?;
            }
            let successor = {
                let body = store.node_mut(leaf)?;
                if body.entries.is_empty() {
                    return Err(SpaceError::structure("empty leaf below an internal node"));
                }
                body.children.pop();
                body.entries.remove(0)
            };
            let removed = std::mem::replace(&mut store.node_mut(node)?.entries[index], successor);
            (removed, leaf)
        };

        let root = self.rebalance(store, root, underflow)?;
        Ok((removed, root))
    }

    fn rebalance<T: Ord + Clone, S: NodeStore<T>>(
        &self,
        store: &mut S,
        root: NodeId,
        mut node: NodeId,
    ) -> Result<NodeId> {
        let mut depth = 0;
        loop {
            step_down(&mut depth)?;
            if node == root {
                let body = store.node(root)?;
                if body.entries.is_empty() && !body.is_leaf() {
                    let link = child_link(body, 0)?;
                    let child = store.load(link)?;
                    store.node_mut(child)?.parent = None;
                    store.dispose(root)?;
                    return Ok(child);
                }
                return Ok(root);
            }

            let (children, parent_link) = {
                let body = store.node(node)?;
                (body.children.len(), body.parent)
            };
            if children >= self.minimal_child_count() {
                return Ok(root);
            }

            let parent_link =
                parent_link.ok_or_else(|| SpaceError::structure("non-root node without parent"))?;
            let parent = store.load(parent_link)?;
            let index = self.child_index(store, parent, node)?;

            if self.borrow_from_left(store, parent, index)?
                || self.borrow_from_right(store, parent, index)?
            {
                return Ok(root);
            }

            let left = if index > 0 { index - 1 } else { index };
            self.merge(store, parent, left)?;
            node = parent;
        }
    }

    /// Rotate the last entry of the left sibling through the parent
    fn borrow_from_left<T: Ord + Clone, S: NodeStore<T>>(
        &self,
        store: &mut S,
        parent: NodeId,
        index: usize,
    ) -> Result<bool> {
        if index == 0 {
            return Ok(false);
        }
        let (left_link, node_link) = {
            let body = store.node(parent)?;
            (child_link(body, index - 1)?, child_link(body, index)?)
        };
        let left = store.load(left_link)?;
        if store.node(left)?.entries.len() <= self.minimal_entry_count() {
            return Ok(false);
        }
        let node = store.load(node_link)?;

        let (entry, child) = {
            let body = store.node_mut(left)?;
            let entry = body
                .entries
                .pop()
                .ok_or_else(|| SpaceError::structure("borrow from empty sibling"))?;
            let child = body
                .children
                .pop()
                .ok_or_else(|| SpaceError::structure("sibling without children"))?;
            (entry, child)
        };
        let separator = std::mem::replace(&mut store.node_mut(parent)?.entries[index - 1], entry);
        {
            let body = store.node_mut(node)?;
            body.entries.insert(0, separator);
            body.children.insert(0, child);
        }
        if let Some(link) = child {
            self.adopt(store, node, &[link])?;
        }
        Ok(true)
    }

    /// Rotate the first entry of the right sibling through the parent
    fn borrow_from_right<T: Ord + Clone, S: NodeStore<T>>(
        &self,
        store: &mut S,
        parent: NodeId,
        index: usize,
    ) -> Result<bool> {
        let (node_link, right_link) = {
            let body = store.node(parent)?;
            if index + 1 >= body.children.len() {
                return Ok(false);
            }
            (child_link(body, index)?, child_link(body, index + 1)?)
        };
        let right = store.load(right_link)?;
        if store.node(right)?.entries.len() <= self.minimal_entry_count() {
            return Ok(false);
        }
        let node = store.load(node_link)?;

        let (entry, child) = {
            let body = store.node_mut(right)?;
            if body.entries.is_empty() || body.children.is_empty() {
                return Err(SpaceError::structure("borrow from empty sibling"));
            }
            (body.entries.remove(0), body.children.remove(0))
        };
        let separator = std::mem::replace(&mut store.node_mut(parent)?.entries[index], entry);
        {
            let body = store.node_mut(node)?;
            body.entries.push(separator);
            body.children.push(child);
        }
        if let Some(link) = child {
            self.adopt(store, node, &[link])?;
        }
        Ok(true)
    }

    /// Fold child `left + 1` and the separator between them into child `left`
    fn merge<T: Ord + Clone, S: NodeStore<T>>(
        &self,
        store: &mut S,
        parent: NodeId,
        left: usize,
    ) -> Result<()> {
        let (left_link, right_link) = {
            let body = store.node(parent)?;
            (child_link(body, left)?, child_link(body, left + 1)?)
        };
        let left_id = store.load(left_link)?;
        let right_id = store.load(right_link)?;

        let separator = {
            let body = store.node_mut(parent)?;
            body.children.remove(left + 1);
            body.entries.remove(left)
        };
        let (entries, children) = {
            let body = store.node_mut(right_id)?;
            (
                std::mem::take(&mut body.entries),
                std::mem::take(&mut body.children),
            )
        };
        store.dispose(right_id)?;

        let moved: Vec<Link> = children.iter().flatten().copied().collect();
        {
            let body = store.node_mut(left_id)?;
            body.entries.push(separator);
            body.entries.extend(entries);
            body.children.extend(children);
        }
        self.adopt(store, left_id, &moved)
    }

    /// Index of `child` among the children of `parent`
    pub fn child_index<T: Ord, S: NodeSource<T>>(
        &self,
        store: &S,
        parent: NodeId,
        child: NodeId,
    ) -> Result<usize> {
        let body = store.node(parent)?;
        let index = match store.node(child)?.entries.first() {
            Some(first) => match body.entries.binary_search(first) {
                Ok(_) => {
                    return Err(SpaceError::structure(
                        "child entry duplicates a parent separator",
                    ))
                }
                Err(index) => index,
            },
            None => body
                .children
                .iter()
                .position(|c| c.is_some_and(|link| store.links_to(link, child)))
                .ok_or_else(|| SpaceError::structure("child not linked from its parent"))?,
        };
        match body.children.get(index) {
            Some(Some(link)) if store.links_to(*link, child) => Ok(index),
            _ => Err(SpaceError::structure(
                "parent does not link back to its child",
            )),
        }
    }

    fn descend<T, S: NodeSource<T>>(
        &self,
        store: &mut S,
        mut node: NodeId,
        rightmost: bool,
    ) -> Result<NodeId> {
        let mut depth = 0;
        loop {
            step_down(&mut depth)?;
            let body = store.node(node)?;
            if body.is_leaf() {
                return Ok(node);
            }
            let index = if rightmost { body.children.len() - 1 } else { 0 };
            let link = child_link(body, index)?;
            node = store.load(link)?;
        }
    }

    /// Smallest entry of the tree
    pub fn first_inorder<T, S: NodeSource<T>>(
        &self,
        store: &mut S,
        root: NodeId,
    ) -> Result<Option<TreeCursor>> {
        let node = self.descend(store, root, false)?;
        if store.node(node)?.entries.is_empty() {
            return Ok(None);
        }
        Ok(Some(TreeCursor { node, index: 0 }))
    }

    /// Largest entry of the tree
    pub fn last_inorder<T, S: NodeSource<T>>(
        &self,
        store: &mut S,
        root: NodeId,
    ) -> Result<Option<TreeCursor>> {
        let node = self.descend(store, root, true)?;
        let len = store.node(node)?.entries.len();
        if len == 0 {
            return Ok(None);
        }
        Ok(Some(TreeCursor {
            node,
            index: len - 1,
        }))
    }

    /// Entry at a leaf position, or the first one after it
    ///
    /// Turns the insertion point of a missed search into the smallest entry
    /// greater than the target.
    pub fn resolve_inorder<T: Ord, S: NodeSource<T>>(
        &self,
        store: &mut S,
        at: TreeCursor,
    ) -> Result<Option<TreeCursor>> {
        if at.index < store.node(at.node)?.entries.len() {
            return Ok(Some(at));
        }
        self.climb(store, at.node, true)
    }

    pub fn next_inorder<T: Ord, S: NodeSource<T>>(
        &self,
        store: &mut S,
        at: TreeCursor,
    ) -> Result<Option<TreeCursor>> {
        let body = store.node(at.node)?;
        if body.is_leaf() {
            return self.resolve_inorder(
                store,
                TreeCursor {
                    node: at.node,
                    index: at.index + 1,
                },
            );
        }
        let link = child_link(body, at.index + 1)?;
        let subtree = store.load(link)?;
        let node = self.descend(store, subtree, false)?;
        Ok(Some(TreeCursor { node, index: 0 }))
    }

    pub fn prev_inorder<T: Ord, S: NodeSource<T>>(
        &self,
        store: &mut S,
        at: TreeCursor,
    ) -> Result<Option<TreeCursor>> {
        let body = store.node(at.node)?;
        if body.is_leaf() {
            if at.index > 0 {
                return Ok(Some(TreeCursor {
                    node: at.node,
                    index: at.index - 1,
                }));
            }
            return self.climb(store, at.node, false);
        }
        let link = child_link(body, at.index)?;
        let subtree = store.load(link)?;
        let node = self.descend(store, subtree, true)?;
        let len = store.node(node)?.entries.len();
        if len == 0 {
            return Err(SpaceError::structure("empty leaf below an internal node"));
        }
        Ok(Some(TreeCursor {
            node,
            index: len - 1,
        }))
    }

    /// Walk up until an ancestor separator lies after (or before) `node`
    fn climb<T: Ord, S: NodeSource<T>>(
        &self,
        store: &mut S,
        mut node: NodeId,
        forward: bool,
    ) -> Result<Option<TreeCursor>> {
        let mut depth = 0;
        loop {
            step_down(&mut depth)?;
            let Some(link) = store.node(node)?.parent else {
                return Ok(None);
            };
            let parent = store.load(link)?;
            let index = self.child_index(store, parent, node)?;
            if forward {
                if index < store.node(parent)?.entries.len() {
                    return Ok(Some(TreeCursor {
                        node: parent,
                        index,
                    }));
                }
            } else if index > 0 {
                return Ok(Some(TreeCursor {
                    node: parent,
                    index: index - 1,
                }));
            }
            node = parent;
        }
    }

    /// Every entry in ascending order
    pub fn collect_inorder<T: Clone, S: NodeSource<T>>(
        &self,
        store: &mut S,
        root: NodeId,
    ) -> Result<Vec<T>> {
        let mut out = Vec::new();
        self.collect_into(store, root, 0, &mut out)?;
        Ok(out)
    }

    fn collect_into<T: Clone, S: NodeSource<T>>(
        &self,
        store: &mut S,
        node: NodeId,
        mut depth: usize,
        out: &mut Vec<T>,
    ) -> Result<()> {
        step_down(&mut depth)?;
        let body = store.node(node)?.clone();
        if body.is_leaf() {
            out.extend(body.entries);
            return Ok(());
        }
        for (i, child) in body.children.iter().enumerate() {
            let link = child.ok_or_else(|| SpaceError::structure("missing child in internal node"))?;
            let id = store.load(link)?;
            self.collect_into(store, id, depth, out)?;
            if let Some(entry) = body.entries.get(i) {
                out.push(entry.clone());
            }
        }
        Ok(())
    }

    /// Verify the whole tree, returning the number of entries
    ///
    /// Checks entry-count bounds, child-vector shape, parent back-links,
    /// equal leaf depth and strict global ordering.
    pub fn check<T: Ord + Clone + Debug, S: NodeSource<T>>(
        &self,
        store: &mut S,
        root: NodeId,
    ) -> Result<usize> {
        let mut leaf_depth = None;
        self.check_node(store, root, None, None, None, 0, &mut leaf_depth)
    }

    #[allow(clippy::too_many_arguments)]
    fn check_node<T: Ord + Clone + Debug, S: NodeSource<T>>(
        &self,
        store: &mut S,
        id: NodeId,
        parent: Option<NodeId>,
        lower: Option<&T>,
        upper: Option<&T>,
        depth: usize,
        leaf_depth: &mut Option<usize>,
    ) -> Result<usize> {
        if depth >= MAX_HEIGHT {
            return Err(SpaceError::structure(format!(
                "tree deeper than {} levels, node links form a cycle",
                MAX_HEIGHT
            )));
        }
        let body = store.node(id)?.clone();
        let len = body.entries.len();
        let is_root = parent.is_none();

        if len > self.maximal_entry_count() {
            return Err(SpaceError::structure(format!(
                "node holds {} entries, order {} allows {}",
                len,
                self.order,
                self.maximal_entry_count()
            )));
        }
        if !is_root && len < self.minimal_entry_count() {
            return Err(SpaceError::structure(format!(
                "non-root node holds {} entries, minimum is {}",
                len,
                self.minimal_entry_count()
            )));
        }
        if body.children.len() != len + 1 {
            return Err(SpaceError::structure(format!(
                "node with {} entries has {} children",
                len,
                body.children.len()
            )));
        }

        let leaf = body.is_leaf();
        if leaf && body.children.iter().any(Option::is_some) {
            return Err(SpaceError::structure("leaf with a child link"));
        }
        if !leaf && body.children.iter().any(Option::is_none) {
            return Err(SpaceError::structure("internal node with a missing child"));
        }
        if is_root && !leaf && len == 0 {
            return Err(SpaceError::structure("internal root without entries"));
        }

        match (parent, body.parent) {
            (None, None) => {}
            (Some(p), Some(link)) if store.links_to(link, p) => {}
            _ => return Err(SpaceError::structure("parent link does not match")),
        }

        for pair in body.entries.windows(2) {
            if pair[0] >= pair[1] {
                return Err(SpaceError::structure(format!(
                    "entries out of order: {:?} >= {:?}",
                    pair[0], pair[1]
                )));
            }
        }
        if let (Some(lo), Some(first)) = (lower, body.entries.first()) {
            if first <= lo {
                return Err(SpaceError::structure(format!(
                    "entry {:?} not above separator {:?}",
                    first, lo
                )));
            }
        }
        if let (Some(hi), Some(last)) = (upper, body.entries.last()) {
            if last >= hi {
                return Err(SpaceError::structure(format!(
                    "entry {:?} not below separator {:?}",
                    last, hi
                )));
            }
        }

        if leaf {
            match *leaf_depth {
                None => *leaf_depth = Some(depth),
                Some(d) if d == depth => {}
                Some(d) => {
                    return Err(SpaceError::structure(format!(
                        "leaves at depths {} and {}",
                        d, depth
                    )))
                }
            }
            return Ok(len);
        }

        let mut count = len;
        for (i, child) in body.children.iter().enumerate() {
            let link = child.ok_or_else(|| SpaceError::structure("missing child"))?;
            let child_id = store.load(link)?;
            let lo = if i == 0 { lower } else { body.entries.get(i - 1) };
            let hi = if i == len { upper } else { body.entries.get(i) };
            count += self.check_node(store, child_id, Some(id), lo, hi, depth + 1, leaf_depth)?;
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::btree::MemoryTree;

    #[test]
    fn test_counts() {
        let w = BTreeWorker::new(3).unwrap();
        assert_eq!(w.maximal_entry_count(), 2);
        assert_eq!(w.minimal_child_count(), 2);
        assert_eq!(w.minimal_entry_count(), 1);

        let w = BTreeWorker::new(4).unwrap();
        assert_eq!(w.maximal_entry_count(), 3);
        assert_eq!(w.minimal_child_count(), 2);
        assert_eq!(w.minimal_entry_count(), 1);

        let w = BTreeWorker::new(7).unwrap();
        assert_eq!(w.minimal_child_count(), 4);
        assert_eq!(w.minimal_entry_count(), 3);

        assert!(BTreeWorker::new(2).is_err());
    }

    #[test]
    fn test_split_promotes_median() {
        let mut tree = MemoryTree::new(4).unwrap();
        for v in [10, 20, 30, 40] {
            tree.insert(v).unwrap();
        }
        // 4 entries overflow order 4: left keeps 2, 30 moves up
        assert_eq!(tree.height().unwrap(), 2);
        assert_eq!(tree.root_entries().unwrap(), vec![30]);
        assert_eq!(tree.check().unwrap(), 4);
    }

    #[test]
    fn test_sequential_growth_and_shrink() {
        for order in 3..=8 {
            let mut tree = MemoryTree::new(order).unwrap();
            for v in 0..200u32 {
                assert!(tree.insert(v).unwrap());
                tree.check().unwrap();
            }
            assert_eq!(tree.len(), 200);
            assert!(tree.height().unwrap() > 1);

            for v in (0..200u32).rev().step_by(2) {
                assert!(tree.remove(&v).unwrap());
                tree.check().unwrap();
            }
            for v in (0..200u32).filter(|v| v % 2 == 0) {
                assert!(tree.remove(&v).unwrap());
                tree.check().unwrap();
            }
            assert!(tree.is_empty());
            assert_eq!(tree.height().unwrap(), 1);
        }
    }

    #[test]
    fn test_internal_removal_lifts_successor() {
        let mut tree = MemoryTree::new(3).unwrap();
        for v in 1..=15 {
            tree.insert(v).unwrap();
        }
        let root = tree.root_entries().unwrap();
        assert!(tree.remove(&root[0]).unwrap());
        tree.check().unwrap();
        assert!(!tree.contains(&root[0]).unwrap());
        assert_eq!(tree.len(), 14);
    }

    #[test]
    fn test_navigation() {
        let mut tree = MemoryTree::new(3).unwrap();
        for v in (1..=40u32).map(|v| v * 5) {
            tree.insert(v).unwrap();
        }
        let forward: Vec<u32> = tree.iter().unwrap().collect();
        assert_eq!(forward, (1..=40u32).map(|v| v * 5).collect::<Vec<_>>());

        let mut backward = Vec::new();
        let mut cursor = tree.last_cursor().unwrap();
        while let Some(at) = cursor {
            backward.push(tree.entry_at(at).unwrap());
            cursor = tree.prev_cursor(at).unwrap();
        }
        backward.reverse();
        assert_eq!(backward, forward);

        // Smallest entry not below a missing target
        assert_eq!(tree.ceiling(&42).unwrap(), Some(45));
        assert_eq!(tree.ceiling(&45).unwrap(), Some(45));
        assert_eq!(tree.ceiling(&201).unwrap(), None);
        assert_eq!(tree.first().unwrap(), Some(5));
        assert_eq!(tree.last().unwrap(), Some(200));
    }

    /// Fixed nodes addressed by index, for hand-built link shapes
    struct FixedStore(Vec<NodeBody<u32>>);

    impl NodeSource<u32> for FixedStore {
        fn load(&mut self, link: Link) -> Result<NodeId> {
            match link {
                Link::Cached(id) if id < self.0.len() => Ok(id),
                _ => Err(SpaceError::structure("unknown link")),
            }
        }

        fn node(&self, id: NodeId) -> Result<&NodeBody<u32>> {
            self.0
                .get(id)
                .ok_or_else(|| SpaceError::structure("unknown node"))
        }

        fn links_to(&self, link: Link, id: NodeId) -> bool {
            link == Link::Cached(id)
        }
    }

    #[test]
    fn test_cyclic_links_fail_instead_of_looping() {
        // Root whose first child is the root itself
        let root = NodeBody {
            entries: vec![50],
            children: vec![Some(Link::Cached(0)), Some(Link::Cached(1))],
            parent: None,
        };
        let mut leaf = NodeBody::leaf_with(vec![60]);
        leaf.parent = Some(Link::Cached(0));
        let mut store = FixedStore(vec![root, leaf]);
        let worker = BTreeWorker::new(4).unwrap();

        let structural = |err: SpaceError| err.is_structural();
        assert!(structural(worker.search(&mut store, 0, &10).unwrap_err()));
        assert!(structural(worker.first_inorder(&mut store, 0).unwrap_err()));
        assert!(structural(worker.collect_inorder(&mut store, 0).unwrap_err()));
        assert!(worker.check(&mut store, 0).is_err());

        // A node that names itself as parent
        let mut looped = NodeBody::leaf_with(vec![5]);
        looped.parent = Some(Link::Cached(0));
        let mut store = FixedStore(vec![looped]);
        let at = TreeCursor { node: 0, index: 0 };
        assert!(structural(worker.prev_inorder(&mut store, at).unwrap_err()));
    }

    #[test]
    fn test_duplicate_insert_rejected() {
        let mut tree = MemoryTree::new(5).unwrap();
        assert!(tree.insert(7).unwrap());
        assert!(!tree.insert(7).unwrap());
        assert!(!tree.remove(&8).unwrap());
        assert_eq!(tree.len(), 1);
    }
}
