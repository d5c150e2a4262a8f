//! Global header and root record
//!
//! Both live at the start of the stream, before the root region:
//!
//! ```text
//! offset 0   page_count u32 | page_size u32 | max_root_len u16 | btree_order u16
//! offset 12  btree_count u32 | roots: btree_count x position
//!            | hole_count u32 | holes: hole_count x {start, size}
//! ```
//!
//! All integers are big-endian. The root record reserves room for
//! `max_root_len` holes so it never moves.

use crate::config::SpaceConfig;
use crate::error::{Result, SpaceError};
use crate::hole::Hole;
use crate::scalar::{Operator, Position};

/// Length of the encoded global header
pub const HEADER_LEN: usize = 12;

const COUNT_LEN: usize = 4;

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

fn read_u16(bytes: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([bytes[offset], bytes[offset + 1]])
}

/// Stream geometry fixed at creation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlobalHeader {
    pub page_count: u32,
    pub page_size: u32,
    pub max_root_len: u16,
    pub btree_order: u16,
}

impl GlobalHeader {
    pub fn from_config(config: &SpaceConfig) -> Self {
        GlobalHeader {
            page_count: config.page_count,
            page_size: config.page_size,
            max_root_len: config.max_root_len,
            btree_order: config.btree_order,
        }
    }

    /// The header does not record the field width, so the caller supplies it
    pub fn to_config(&self, width: u8) -> SpaceConfig {
        SpaceConfig::new(
            self.page_count,
            self.page_size,
            self.max_root_len,
            self.btree_order,
        )
        .with_width(width)
    }

    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut bytes = [0u8; HEADER_LEN];
        bytes[0..4].copy_from_slice(&self.page_count.to_be_bytes());
        bytes[4..8].copy_from_slice(&self.page_size.to_be_bytes());
        bytes[8..10].copy_from_slice(&self.max_root_len.to_be_bytes());
        bytes[10..12].copy_from_slice(&self.btree_order.to_be_bytes());
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(SpaceError::InvalidHeader(format!(
                "need {} bytes, got {}",
                HEADER_LEN,
                bytes.len()
            )));
        }
        let header = GlobalHeader {
            page_count: read_u32(bytes, 0),
            page_size: read_u32(bytes, 4),
            max_root_len: read_u16(bytes, 8),
            btree_order: read_u16(bytes, 10),
        };
        if header.page_count == 0 || header.page_size == 0 || header.btree_order < 3 {
            return Err(SpaceError::InvalidHeader(format!(
                "implausible geometry: {} pages of {} bytes, order {}",
                header.page_count, header.page_size, header.btree_order
            )));
        }
        Ok(header)
    }
}

/// Persistent state of the root section
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootRecord {
    /// Root node position of each B-tree section, outermost first
    pub btree_roots: Vec<Position>,
    /// Root hole index, sorted by `(size, start)`
    pub holes: Vec<Hole>,
}

impl RootRecord {
    /// Bytes reserved for a record with `tiers` roots and up to `max_holes` holes
    pub fn capacity(op: &Operator, tiers: usize, max_holes: usize) -> usize {
        COUNT_LEN + tiers * op.len() + COUNT_LEN + max_holes * Hole::encoded_len(op)
    }

    pub fn encode(&self, op: &Operator, capacity: usize) -> Result<Vec<u8>> {
        let fixed = 2 * COUNT_LEN + self.btree_roots.len() * op.len();
        let max_holes = capacity.saturating_sub(fixed) / Hole::encoded_len(op);
        if self.holes.len() > max_holes {
            return Err(SpaceError::RootOverflow {
                holes: self.holes.len(),
                capacity: max_holes,
            });
        }

        let mut out = Vec::with_capacity(capacity);
        out.extend_from_slice(&(self.btree_roots.len() as u32).to_be_bytes());
        for root in &self.btree_roots {
            op.push(root.get(), &mut out)?;
        }
        out.extend_from_slice(&(self.holes.len() as u32).to_be_bytes());
        for hole in &self.holes {
            hole.encode(op, &mut out)?;
        }
        out.resize(capacity, 0);
        Ok(out)
    }

    pub fn decode(op: &Operator, bytes: &[u8], tiers: usize, max_holes: usize) -> Result<Self> {
        let invalid = |what: String| SpaceError::InvalidHeader(format!("root record: {}", what));
        if bytes.len() < Self::capacity(op, tiers, max_holes) {
            return Err(invalid(format!("truncated to {} bytes", bytes.len())));
        }

        let btree_count = read_u32(bytes, 0) as usize;
        if btree_count != tiers {
            return Err(invalid(format!(
                "{} B-tree roots recorded, geometry needs {}",
                btree_count, tiers
            )));
        }
        let w = op.len();
        let mut offset = COUNT_LEN;
        let mut btree_roots = Vec::with_capacity(tiers);
        for _ in 0..tiers {
            let root = op
                .decode_position(&bytes[offset..offset + w])
                .ok_or_else(|| invalid("null B-tree root".to_string()))?;
            btree_roots.push(root);
            offset += w;
        }

        let hole_count = read_u32(bytes, offset) as usize;
        offset += COUNT_LEN;
        if hole_count > max_holes {
            return Err(SpaceError::RootOverflow {
                holes: hole_count,
                capacity: max_holes,
            });
        }
        let hole_len = Hole::encoded_len(op);
        let holes = (0..hole_count)
            .map(|i| Hole::decode(op, &bytes[offset + i * hole_len..]))
            .collect();

        Ok(RootRecord { btree_roots, holes })
    }
}
