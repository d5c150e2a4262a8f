//! # hbspace - Persistent Paginated Free-Space Allocator
//!
//! `hbspace` manages the free space of a fixed-size, page-addressed stream.
//! Clients ask for runs of whole pages and get back the page position of the
//! run; freed runs are coalesced with their neighbours.
//!
//! - **Boundary tags** at both ends of every chunk make coalescing local
//! - **Best fit** over a hole index ordered by `(size, start)`
//! - **Self-hosting tiers**: each B-tree index stores its nodes in one-page
//!   lumps of a smaller section above it, down to a flat root index kept next
//!   to the header
//! - **Persistent**: close the stream, reopen it, keep allocating
//!
//! ## Quick Start
//!
//! ```rust
//! use hbspace::{HbSpaceManager, Result, Size, SpaceConfig};
//! use std::io::Cursor;
//!
//! # fn main() -> Result<()> {
//! let config = SpaceConfig::new(1000, 512, 16, 4);
//! let mut space = HbSpaceManager::create_new(Cursor::new(Vec::new()), config)?;
//!
//! let pos = space.allocate(Size(10))?.expect("fresh space has room");
//! space.write_payload(pos, 0, b"payload")?;
//! space.deallocate(pos)?;
//! assert!(space.check()?);
//!
//! // Reopen from the same bytes
//! let stream = space.close()?;
//! let space = HbSpaceManager::open(stream)?;
//! assert_eq!(space.client_region().len, Size(1000));
//! # Ok(())
//! # }
//! ```
//!
//! ## Standalone B-tree
//!
//! The B-tree engine is generic over its node storage. [`MemoryTree`] runs it
//! over an in-memory arena:
//!
//! ```rust
//! use hbspace::{MemoryTree, Result};
//!
//! # fn main() -> Result<()> {
//! let mut tree = MemoryTree::new(4)?;
//! for key in [5, 1, 9, 3] {
//!     tree.insert(key)?;
//! }
//! assert_eq!(tree.ceiling(&4)?, Some(5));
//! assert_eq!(tree.iter()?.collect::<Vec<_>>(), vec![1, 3, 5, 9]);
//! # Ok(())
//! # }
//! ```

pub mod core;

// Re-export core modules internally so crate:: paths in core still work
#[allow(unused_imports)]
pub(crate) use core::{
    allotter, btree, chunk, config, error, header, hole, io, manager, node, scalar, section,
};

pub use crate::core::{
    allotter::{Allotment, Allotter, SpaceLayout},
    btree::{BTreeWorker, Link, MemoryTree, NodeBody, NodeId, NodeSource, NodeStore, TreeCursor},
    chunk::{ChunkDescriptor, ChunkDescriptorEncoder, ChunkKind},
    config::SpaceConfig,
    error::{Result, SpaceError},
    header::{GlobalHeader, RootRecord},
    hole::Hole,
    io::PagedStream,
    manager::{HbSpaceManager, SpaceStats},
    scalar::{Operator, Paginator, Position, Region, Size},
};
