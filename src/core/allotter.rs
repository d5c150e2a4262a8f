//! Tier sizing and stream layout
//!
//! Every B-tree section stores its nodes in one-page lumps of the section
//! above it. Working outward from the client region, each step asks how many
//! node pages the worst case needs, and that becomes the size of the next
//! region. The chain stops once a region is small enough for the flat root
//! index.
//!
//! Worst case for a region of `n` pages: holes never touch, so there are at
//! most `ceil(n / 2)` of them. Every non-root node holds at least
//! `minimal_entry_count` entries, so indexing `k` holes takes at most
//! `ceil(k / minimal_entry_count) + 1` nodes.

use crate::btree::BTreeWorker;
use crate::config::SpaceConfig;
use crate::error::{Result, SpaceError};
use crate::header::{RootRecord, HEADER_LEN};
use crate::scalar::{Paginator, Position, Region, Size};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Region lengths chosen for a target client page count
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allotment {
    /// Pages in the root region
    pub root_len: u64,
    /// Pages managed by each B-tree section, outermost first; the last one is
    /// the client region
    pub tier_lengths: Vec<u64>,
}

impl Allotment {
    pub fn tier_count(&self) -> usize {
        self.tier_lengths.len()
    }
}

pub struct Allotter;

impl Allotter {
    /// Upper bound on node pages needed to index a region of `pages` pages
    pub fn node_pages_for(pages: u64, minimal_entry_count: u64) -> u64 {
        let holes = pages.div_ceil(2);
        holes.div_ceil(minimal_entry_count) + 1
    }

    pub fn allot(target_page_count: u64, max_root_len: u64, order: usize) -> Result<Allotment> {
        let worker = BTreeWorker::new(order)?;
        if target_page_count == 0 {
            return Err(SpaceError::InvalidConfig(
                "cannot allot an empty client region".to_string(),
            ));
        }
        let minimal_entries = worker.minimal_entry_count() as u64;

        let mut regions = vec![target_page_count];
        let mut current = target_page_count;
        while current > max_root_len {
            let next = Self::node_pages_for(current, minimal_entries);
            if next >= current {
                return Err(SpaceError::Unallottable {
                    pages: target_page_count,
                    max_root_len,
                    order,
                });
            }
            regions.push(next);
            current = next;
        }

        regions.pop();
        regions.reverse();
        debug!(
            root_len = current,
            tiers = regions.len(),
            "allotted tiers for {} pages",
            target_page_count
        );
        Ok(Allotment {
            root_len: current,
            tier_lengths: regions,
        })
    }
}

/// Page map of a managed stream
///
/// ```text
/// | header + root record | root region | tier 0 | tier 1 | ... | client region |
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpaceLayout {
    pub page_size: u64,
    /// Pages reserved for the header and the root record
    pub meta_pages: u64,
    /// Bytes reserved for the root record
    pub record_capacity: usize,
    pub root: Region,
    /// One region per B-tree section, outermost first
    pub tiers: Vec<Region>,
    pub total_pages: u64,
}

impl SpaceLayout {
    pub fn plan(config: &SpaceConfig) -> Result<Self> {
        config.check()?;
        let op = config.operator()?;
        let allotment = Allotter::allot(
            config.page_count as u64,
            config.max_root_len as u64,
            config.order(),
        )?;

        let page_size = config.page_size as u64;
        let record_capacity = RootRecord::capacity(
            &op,
            allotment.tier_count(),
            config.max_root_len as usize,
        );
        let pager = Paginator::new(page_size);
        let meta_pages = pager
            .size_to_paginated((HEADER_LEN + record_capacity) as u64)
            .get();

        let root = Region::new(Position(meta_pages), Size(allotment.root_len));
        let mut next = root.end();
        let mut tiers = Vec::with_capacity(allotment.tier_count());
        for &len in &allotment.tier_lengths {
            let region = Region::new(next, Size(len));
            next = region.end();
            tiers.push(region);
        }

        let total_pages = next.get();
        if total_pages > op.max_value() {
            return Err(SpaceError::InvalidConfig(format!(
                "{} pages do not fit {}-byte positions",
                total_pages, config.width
            )));
        }

        Ok(SpaceLayout {
            page_size,
            meta_pages,
            record_capacity,
            root,
            tiers,
            total_pages,
        })
    }

    /// Region served to clients
    pub fn client_region(&self) -> Region {
        self.tiers.last().copied().unwrap_or(self.root)
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_pages * self.page_size
    }

    /// Number of B-tree sections
    pub fn tier_count(&self) -> usize {
        self.tiers.len()
    }
}
