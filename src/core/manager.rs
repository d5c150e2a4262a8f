//! Space manager
//!
//! [`HbSpaceManager`] owns the stream and the whole tier stack: the root
//! section, then one B-tree section per tier, outermost first. The last
//! section (or the root section when there are no tiers) serves clients.

use crate::allotter::SpaceLayout;
use crate::btree::BTreeWorker;
use crate::chunk::ChunkDescriptorEncoder;
use crate::config::SpaceConfig;
use crate::error::{Result, SpaceError};
use crate::header::{GlobalHeader, RootRecord, HEADER_LEN};
use crate::hole::Hole;
use crate::io::PagedStream;
use crate::node::NodeLayout;
use crate::scalar::{Paginator, Position, Region, Size, DEFAULT_WIDTH};
use crate::section::{BTreeSection, RootSection, Section, Upstream};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{Read, Seek, Write};
use std::path::Path;
use tracing::{debug, info, warn};

/// Snapshot of the client region's free space
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpaceStats {
    pub client_pages: u64,
    pub free_pages: u64,
    pub hole_count: usize,
    pub largest_hole: u64,
    /// 0.0 when the free space is one hole, approaching 1.0 when every free
    /// page is its own hole
    pub fragmentation: f64,
}

pub struct HbSpaceManager<S> {
    io: PagedStream<S>,
    config: SpaceConfig,
    layout: SpaceLayout,
    root: RootSection,
    tiers: Vec<BTreeSection>,
}

impl<S: Read + Write + Seek> HbSpaceManager<S> {
    /// Format `stream` for `config`, overwriting whatever it held
    pub fn create_new(stream: S, config: SpaceConfig) -> Result<Self> {
        Self::format(PagedStream::new(stream), config)
    }

    /// Open a stream formatted with the default field width
    pub fn open(stream: S) -> Result<Self> {
        Self::load(PagedStream::new(stream), DEFAULT_WIDTH)
    }

    /// Open a stream formatted with `width`-byte fields
    ///
    /// The header does not record the width, so it has to match the one used
    /// at creation.
    pub fn open_with_width(stream: S, width: u8) -> Result<Self> {
        Self::load(PagedStream::new(stream), width)
    }

    fn format(mut io: PagedStream<S>, config: SpaceConfig) -> Result<Self> {
        let layout = SpaceLayout::plan(&config)?;
        info!(
            page_count = config.page_count,
            page_size = config.page_size,
            tiers = layout.tier_count(),
            total_pages = layout.total_pages,
            "creating space"
        );

        let encoder = Self::encoder(&config)?;
        let worker = BTreeWorker::new(config.order())?;
        let node_layout = NodeLayout::new(config.operator()?, config.order());

        io.extend_to(layout.total_bytes())?;
        io.write_at(0, &GlobalHeader::from_config(&config).to_bytes())?;

        let mut root = RootSection::format(
            &mut io,
            Section::new(layout.root, encoder),
            config.max_root_len as usize,
            layout.tier_count(),
        )?;
        let mut tiers: Vec<BTreeSection> = Vec::with_capacity(layout.tier_count());
        for (index, region) in layout.tiers.iter().enumerate() {
            let tier = BTreeSection::format(
                &mut io,
                index,
                Section::new(*region, encoder),
                worker,
                node_layout,
                &mut Upstream::new(&mut root, &mut tiers[..]),
            )?;
            tiers.push(tier);
        }

        let mut manager = HbSpaceManager {
            io,
            config,
            layout,
            root,
            tiers,
        };
        manager.flush()?;
        Ok(manager)
    }

    fn load(mut io: PagedStream<S>, width: u8) -> Result<Self> {
        let header = GlobalHeader::from_bytes(&io.read_vec(0, HEADER_LEN)?)?;
        let config = header.to_config(width);
        let layout = SpaceLayout::plan(&config)?;

        let len = io.len()?;
        if len < layout.total_bytes() {
            return Err(SpaceError::InvalidHeader(format!(
                "stream holds {} bytes, geometry needs {}",
                len,
                layout.total_bytes()
            )));
        }

        let op = config.operator()?;
        let encoder = Self::encoder(&config)?;
        let worker = BTreeWorker::new(config.order())?;
        let node_layout = NodeLayout::new(op, config.order());

        let bytes = io.read_vec(HEADER_LEN as u64, layout.record_capacity)?;
        let capacity = config.max_root_len as usize;
        let record = RootRecord::decode(&op, &bytes, layout.tier_count(), capacity)?;
        let root = RootSection::from_record(Section::new(layout.root, encoder), record, capacity)?;

        let tiers = layout
            .tiers
            .iter()
            .zip(root.btree_roots())
            .enumerate()
            .map(|(index, (region, root_pos))| {
                BTreeSection::open(
                    index,
                    Section::new(*region, encoder),
                    worker,
                    node_layout,
                    *root_pos,
                )
            })
            .collect();

        info!(
            page_count = config.page_count,
            tiers = layout.tier_count(),
            "opened space"
        );
        Ok(HbSpaceManager {
            io,
            config,
            layout,
            root,
            tiers,
        })
    }

    fn encoder(config: &SpaceConfig) -> Result<ChunkDescriptorEncoder> {
        Ok(ChunkDescriptorEncoder::new(
            config.operator()?,
            Paginator::new(config.page_size as u64),
        ))
    }

    /// Persist the root record and flush, handing back the stream
    pub fn close(mut self) -> Result<S> {
        self.flush()?;
        info!("closed space");
        Ok(self.io.into_inner())
    }

    /// Persist the root record if it changed, then flush the stream
    pub fn flush(&mut self) -> Result<()> {
        self.sync_root()?;
        self.io.flush()
    }

    fn sync_root(&mut self) -> Result<()> {
        for (index, tier) in self.tiers.iter().enumerate() {
            self.root.set_btree_root(index, tier.root_position())?;
        }
        if !self.root.is_dirty() {
            return Ok(());
        }
        let op = self.config.operator()?;
        let bytes = self.root.to_record().encode(&op, self.layout.record_capacity)?;
        self.io.write_at(HEADER_LEN as u64, &bytes)?;
        self.root.mark_clean();
        Ok(())
    }

    /// Best-fit allocation of `size` client pages
    ///
    /// `None` when no hole is large enough.
    pub fn allocate(&mut self, size: Size) -> Result<Option<Position>> {
        if size.is_zero() {
            return Err(SpaceError::ZeroSize);
        }
        let pos = match self.tiers.split_last_mut() {
            None => self.root.allocate(&mut self.io, size)?,
            Some((terminal, rest)) => terminal.allocate(
                &mut self.io,
                size,
                &mut Upstream::new(&mut self.root, rest),
            )?,
        };
        self.sync_root()?;
        match pos {
            Some(pos) => debug!(position = pos.get(), pages = size.get(), "allocated"),
            None => debug!(pages = size.get(), "no hole large enough"),
        }
        Ok(pos)
    }

    /// Release the lump starting at `pos`
    pub fn deallocate(&mut self, pos: Position) -> Result<()> {
        match self.tiers.split_last_mut() {
            None => self.root.deallocate(&mut self.io, pos)?,
            Some((terminal, rest)) => terminal.deallocate(
                &mut self.io,
                pos,
                &mut Upstream::new(&mut self.root, rest),
            )?,
        }
        self.sync_root()?;
        debug!(position = pos.get(), "deallocated");
        Ok(())
    }

    /// Full structural audit
    ///
    /// Every region must be exactly partitioned into framed chunks, every
    /// index must agree with its region, and the lumps of each superior
    /// section must be exactly the one-page node pages of its inferior tier.
    pub fn verify(&mut self) -> Result<()> {
        let root_audit = self.root.audit(&mut self.io)?;
        let mut superior = root_audit.lumps;

        for (index, tier) in self.tiers.iter().enumerate() {
            let recorded = self.root.btree_roots().get(index).copied();
            if recorded != Some(tier.root_position()) {
                return Err(SpaceError::structure(format!(
                    "root record disagrees with the root of tier {}",
                    index
                )));
            }

            let audit = tier.audit(&mut self.io)?;
            if let Some((pos, size)) = superior.iter().find(|(_, size)| *size != Size(1)) {
                return Err(SpaceError::BadSection(format!(
                    "lump {}+{} above tier {} is not a node page",
                    pos, size, index
                )));
            }
            let pages: Vec<Position> = superior.iter().map(|(pos, _)| *pos).collect();
            if pages != audit.node_pages {
                return Err(SpaceError::BadSection(format!(
                    "tier {} has {} nodes but its superior holds {} node pages",
                    index,
                    audit.node_pages.len(),
                    pages.len()
                )));
            }
            superior = audit.lumps;
        }
        Ok(())
    }

    /// `verify`, with structural damage reported as `false`
    pub fn check(&mut self) -> Result<bool> {
        match self.verify() {
            Ok(()) => Ok(true),
            Err(e) if e.is_structural() => {
                warn!(error = %e, "space check failed");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    fn client_section(&self) -> Section {
        self.tiers
            .last()
            .map(|tier| *tier.section())
            .unwrap_or(*self.root.section())
    }

    /// Byte range between the boundary tags of the lump at `pos`: `(offset, len)`
    pub fn payload_range(&mut self, pos: Position) -> Result<(u64, u64)> {
        let section = self.client_section();
        let lump = section.read_lump(&mut self.io, pos)?;
        Ok(section.encoder().payload(pos, lump.size))
    }

    fn payload_span(&mut self, pos: Position, offset: u64, len: usize) -> Result<u64> {
        let (start, capacity) = self.payload_range(pos)?;
        let len = len as u64;
        match offset.checked_add(len) {
            Some(end) if end <= capacity => Ok(start + offset),
            _ => Err(SpaceError::PayloadOverflow {
                offset,
                len,
                capacity,
            }),
        }
    }

    /// Fill `buf` from the payload of the lump at `pos`, starting `offset` bytes in
    pub fn read_payload(&mut self, pos: Position, offset: u64, buf: &mut [u8]) -> Result<()> {
        let at = self.payload_span(pos, offset, buf.len())?;
        self.io.read_at(at, buf)
    }

    pub fn write_payload(&mut self, pos: Position, offset: u64, data: &[u8]) -> Result<()> {
        let at = self.payload_span(pos, offset, data.len())?;
        self.io.write_at(at, data)
    }

    /// Free holes of the client region, smallest first
    pub fn free_holes(&mut self) -> Result<Vec<Hole>> {
        match self.tiers.last() {
            Some(terminal) => terminal.holes(&mut self.io),
            None => Ok(self.root.holes().to_vec()),
        }
    }

    pub fn stats(&mut self) -> Result<SpaceStats> {
        let holes = self.free_holes()?;
        let free_pages: u64 = holes.iter().map(|h| h.size.get()).sum();
        let fragmentation = if free_pages == 0 {
            0.0
        } else {
            (holes.len() as f64 - 1.0) / free_pages as f64
        };
        Ok(SpaceStats {
            client_pages: self.client_region().len.get(),
            free_pages,
            hole_count: holes.len(),
            largest_hole: holes.last().map_or(0, |h| h.size.get()),
            fragmentation,
        })
    }

    pub fn config(&self) -> &SpaceConfig {
        &self.config
    }

    pub fn layout(&self) -> &SpaceLayout {
        &self.layout
    }

    pub fn client_region(&self) -> Region {
        self.layout.client_region()
    }

    pub fn get_ref(&self) -> &S {
        self.io.get_ref()
    }
}

impl HbSpaceManager<File> {
    /// Create (or truncate) the file at `path` and format it
    pub fn create_file<P: AsRef<Path>>(path: P, config: SpaceConfig) -> Result<Self> {
        info!("Creating space file at {:?}", path.as_ref());
        Self::format(PagedStream::create(path)?, config)
    }

    pub fn open_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        info!("Opening space file at {:?}", path.as_ref());
        Self::load(PagedStream::open(path)?, DEFAULT_WIDTH)
    }

    /// Flush and fsync
    pub fn sync(&mut self) -> Result<()> {
        self.flush()?;
        self.io.sync()
    }
}
