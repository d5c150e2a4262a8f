//! Generic B-tree engine
//!
//! The engine is split from node storage. [`BTreeWorker`] implements the
//! algorithms (search, insert with split, remove with borrow and merge, in-order
//! navigation, structural checks) against the [`NodeSource`] / [`NodeStore`]
//! traits, so the same code drives both the in-memory [`MemoryTree`] and the
//! page-backed node cache of a B-tree section.
//!
//! Nodes refer to each other through [`Link`] values, never references. A
//! store hands out [`NodeId`]s for nodes it has loaded or created; the worker
//! always writes `Link::Cached(id)` when it relinks nodes, and the store
//! resolves those to persistent positions when it flushes.
//!
//! Counts for order `m`:
//! - at most `m - 1` entries per node
//! - non-root nodes keep at least `(m + 1) / 2` children
//! - a node with `k` entries has `k + 1` children (all `None` in a leaf)

mod memory;
mod worker;

pub use memory::MemoryTree;
pub use worker::BTreeWorker;

use crate::error::Result;
use crate::scalar::Position;

/// Handle to a node inside one store
pub type NodeId = usize;

/// Reference from one node to another
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Link {
    /// Persisted node at a page position
    Stored(Position),
    /// Node held by the current store, possibly without a position yet
    Cached(NodeId),
}

/// Contents of one node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeBody<T> {
    pub entries: Vec<T>,
    /// Always `entries.len() + 1` long
    pub children: Vec<Option<Link>>,
    pub parent: Option<Link>,
}

impl<T> NodeBody<T> {
    /// An empty leaf, the shape of a fresh tree's root
    pub fn leaf() -> Self {
        NodeBody {
            entries: Vec::new(),
            children: vec![None],
            parent: None,
        }
    }

    pub fn leaf_with(entries: Vec<T>) -> Self {
        let children = vec![None; entries.len() + 1];
        NodeBody {
            entries,
            children,
            parent: None,
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self.children.first(), None | Some(None))
    }
}

/// Location of an entry: node and index within it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeCursor {
    pub node: NodeId,
    pub index: usize,
}

/// Outcome of a search
///
/// On a miss, `node` is the leaf where the target would be inserted and
/// `index` the insertion point within it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchHit {
    pub found: bool,
    pub node: NodeId,
    pub index: usize,
}

impl SearchHit {
    pub fn cursor(&self) -> TreeCursor {
        TreeCursor {
            node: self.node,
            index: self.index,
        }
    }
}

/// Read access to nodes
pub trait NodeSource<T> {
    /// Resolve a link to a loaded node, reading it on first touch
    fn load(&mut self, link: Link) -> Result<NodeId>;

    /// A node previously returned by `load` or `create`
    fn node(&self, id: NodeId) -> Result<&NodeBody<T>>;

    /// Whether `link` refers to node `id`
    fn links_to(&self, link: Link, id: NodeId) -> bool;
}

/// Write access to nodes
pub trait NodeStore<T>: NodeSource<T> {
    fn node_mut(&mut self, id: NodeId) -> Result<&mut NodeBody<T>>;

    fn create(&mut self, body: NodeBody<T>) -> Result<NodeId>;

    /// Drop a node that is no longer linked from the tree
    fn dispose(&mut self, id: NodeId) -> Result<()>;
}
