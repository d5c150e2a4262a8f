//! Allocator internals
//!
//! Bottom to top: scalar arithmetic and field codecs, positioned I/O, chunk
//! framing, the generic B-tree engine, persistent nodes, sections, tier
//! sizing and the manager that ties them together.

pub mod allotter;
pub mod btree;
pub mod chunk;
pub mod config;
pub mod error;
pub mod header;
pub mod hole;
pub mod io;
pub mod manager;
pub mod node;
pub mod scalar;
pub mod section;

pub use manager::{HbSpaceManager, SpaceStats};
