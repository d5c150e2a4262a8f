//! Scalar quantities used throughout the allocator
//!
//! Positions and sizes are plain `u64` newtypes. Most of the crate works in
//! *paginated* units (whole pages); the [`Paginator`] converts those to byte
//! offsets in the underlying stream, and the [`Operator`] encodes them into the
//! fixed-width big-endian fields of the on-disk format.

use crate::error::{Result, SpaceError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign, Sub, SubAssign};

/// Default width in bytes of encoded positions and sizes
pub const DEFAULT_WIDTH: u8 = 4;

/// An address in scalar or paginated coordinate space
///
/// `Position(0)` is the null sentinel of the on-disk format. The first page of
/// every stream holds the global header, so no chunk or node ever lives there.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct Position(pub u64);

impl Position {
    pub const NULL: Position = Position(0);

    pub fn new(value: u64) -> Self {
        Position(value)
    }

    pub fn get(self) -> u64 {
        self.0
    }

    pub fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Map the null sentinel to `None`
    pub fn non_null(self) -> Option<Position> {
        if self.is_null() {
            None
        } else {
            Some(self)
        }
    }

    /// Distance from `earlier` to `self`
    pub fn distance_from(self, earlier: Position) -> Size {
        Size(self.0 - earlier.0)
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An extent, scalar or paginated
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct Size(pub u64);

impl Size {
    pub const ZERO: Size = Size(0);

    pub fn new(value: u64) -> Self {
        Size(value)
    }

    pub fn get(self) -> u64 {
        self.0
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Add<Size> for Position {
    type Output = Position;

    fn add(self, rhs: Size) -> Position {
        Position(self.0 + rhs.0)
    }
}

impl AddAssign<Size> for Position {
    fn add_assign(&mut self, rhs: Size) {
        self.0 += rhs.0;
    }
}

impl Sub<Size> for Position {
    type Output = Position;

    fn sub(self, rhs: Size) -> Position {
        Position(self.0 - rhs.0)
    }
}

impl Add for Size {
    type Output = Size;

    fn add(self, rhs: Size) -> Size {
        Size(self.0 + rhs.0)
    }
}

impl AddAssign for Size {
    fn add_assign(&mut self, rhs: Size) {
        self.0 += rhs.0;
    }
}

impl Sub for Size {
    type Output = Size;

    fn sub(self, rhs: Size) -> Size {
        Size(self.0 - rhs.0)
    }
}

impl SubAssign for Size {
    fn sub_assign(&mut self, rhs: Size) {
        self.0 -= rhs.0;
    }
}

/// A contiguous paginated range `[start, start + len)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub start: Position,
    pub len: Size,
}

impl Region {
    pub fn new(start: Position, len: Size) -> Self {
        Region { start, len }
    }

    /// First position past the region
    pub fn end(&self) -> Position {
        self.start + self.len
    }

    pub fn contains(&self, pos: Position) -> bool {
        pos >= self.start && pos < self.end()
    }
}

/// Converts between scalar (byte) and paginated (page) coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Paginator {
    page_size: u64,
}

impl Paginator {
    pub fn new(page_size: u64) -> Self {
        debug_assert!(page_size > 0, "page size must be non-zero");
        Paginator { page_size }
    }

    pub fn page_size(&self) -> u64 {
        self.page_size
    }

    /// Byte offset of the first byte of page `pos`
    pub fn to_scalar(&self, pos: Position) -> u64 {
        pos.0 * self.page_size
    }

    /// Page containing byte `offset`
    pub fn to_paginated(&self, offset: u64) -> Position {
        Position(offset / self.page_size)
    }

    /// Byte length of `size` pages
    pub fn size_to_scalar(&self, size: Size) -> u64 {
        size.0 * self.page_size
    }

    /// Number of pages needed to hold `bytes` bytes
    pub fn size_to_paginated(&self, bytes: u64) -> Size {
        Size(bytes.div_ceil(self.page_size))
    }
}

/// Fixed-width big-endian codec for positions, sizes and boundary tags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Operator {
    width: u8,
}

impl Operator {
    pub fn new(width: u8) -> Result<Self> {
        if !(2..=8).contains(&width) {
            return Err(SpaceError::InvalidConfig(format!(
                "encoding width must be between 2 and 8 bytes, got {}",
                width
            )));
        }
        Ok(Operator { width })
    }

    pub fn width(&self) -> u8 {
        self.width
    }

    pub fn len(&self) -> usize {
        self.width as usize
    }

    /// Top bit of an encoded field, reserved for the boundary-tag flag
    pub fn flag_bit(&self) -> u64 {
        1u64 << (self.width as u32 * 8 - 1)
    }

    /// Largest value a field can carry without touching the flag bit
    pub fn max_value(&self) -> u64 {
        self.flag_bit() - 1
    }

    /// Largest raw value the field can carry, flag bit included
    fn raw_max(&self) -> u64 {
        if self.width == 8 {
            u64::MAX
        } else {
            (1u64 << (self.width as u32 * 8)) - 1
        }
    }

    pub fn encode_raw(&self, value: u64, out: &mut [u8]) -> Result<()> {
        if value > self.raw_max() {
            return Err(SpaceError::Overflow {
                value,
                width: self.width,
            });
        }
        let bytes = value.to_be_bytes();
        out[..self.len()].copy_from_slice(&bytes[8 - self.len()..]);
        Ok(())
    }

    pub fn decode_raw(&self, bytes: &[u8]) -> u64 {
        let mut buf = [0u8; 8];
        buf[8 - self.len()..].copy_from_slice(&bytes[..self.len()]);
        u64::from_be_bytes(buf)
    }

    /// Encode a plain value, refusing anything that would set the flag bit
    pub fn encode(&self, value: u64, out: &mut [u8]) -> Result<()> {
        if value > self.max_value() {
            return Err(SpaceError::Overflow {
                value,
                width: self.width,
            });
        }
        self.encode_raw(value, out)
    }

    pub fn push(&self, value: u64, out: &mut Vec<u8>) -> Result<()> {
        let at = out.len();
        out.resize(at + self.len(), 0);
        self.encode(value, &mut out[at..])
    }

    pub fn encode_position(&self, pos: Option<Position>, out: &mut Vec<u8>) -> Result<()> {
        self.push(pos.map_or(0, Position::get), out)
    }

    pub fn decode_position(&self, bytes: &[u8]) -> Option<Position> {
        Position(self.decode_raw(bytes)).non_null()
    }
}

impl Default for Operator {
    fn default() -> Self {
        Operator {
            width: DEFAULT_WIDTH,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_position_arithmetic() {
        let p = Position::new(10);
        assert_eq!(p + Size(5), Position(15));
        assert_eq!(p - Size(3), Position(7));
        assert_eq!(Position(15).distance_from(p), Size(5));
        assert!(Position::NULL.is_null());
        assert_eq!(Position(0).non_null(), None);
        assert_eq!(Position(3).non_null(), Some(Position(3)));
    }

    #[test]
    fn test_size_arithmetic() {
        let mut s = Size(4) + Size(6);
        assert_eq!(s, Size(10));
        s -= Size(10);
        assert!(s.is_zero());
    }

    #[test]
    fn test_region_bounds() {
        let region = Region::new(Position(4), Size(6));
        assert_eq!(region.end(), Position(10));
        assert!(!region.contains(Position(3)));
        assert!(region.contains(Position(4)));
        assert!(region.contains(Position(9)));
        assert!(!region.contains(Position(10)));
    }

    #[test]
    fn test_paginator_conversions() {
        let pager = Paginator::new(512);
        assert_eq!(pager.to_scalar(Position(3)), 1536);
        assert_eq!(pager.to_paginated(1537), Position(3));
        assert_eq!(pager.size_to_scalar(Size(2)), 1024);
        assert_eq!(pager.size_to_paginated(1025), Size(3));
        assert_eq!(pager.size_to_paginated(1024), Size(2));
    }

    #[test]
    fn test_operator_big_endian() {
        let op = Operator::new(4).unwrap();
        let mut buf = [0u8; 4];
        op.encode(0x0102_0304, &mut buf).unwrap();
        assert_eq!(buf, [1, 2, 3, 4]);
        assert_eq!(op.decode_raw(&buf), 0x0102_0304);
    }

    #[test]
    fn test_operator_rejects_flag_bit() {
        let op = Operator::new(2).unwrap();
        let mut buf = [0u8; 2];
        assert_eq!(op.max_value(), 0x7FFF);
        assert!(op.encode(0x7FFF, &mut buf).is_ok());
        assert!(matches!(
            op.encode(0x8000, &mut buf),
            Err(SpaceError::Overflow { width: 2, .. })
        ));
        assert!(op.encode_raw(0x8000, &mut buf).is_ok());
        assert!(op.encode_raw(0x1_0000, &mut buf).is_err());
    }

    #[test]
    fn test_operator_width_bounds() {
        assert!(Operator::new(1).is_err());
        assert!(Operator::new(9).is_err());
        let op = Operator::new(8).unwrap();
        let mut out = Vec::new();
        op.push(op.max_value(), &mut out).unwrap();
        assert_eq!(out.len(), 8);
        assert_eq!(op.decode_raw(&out), i64::MAX as u64);
    }

    #[test]
    fn test_operator_null_positions() {
        let op = Operator::default();
        let mut out = Vec::new();
        op.encode_position(None, &mut out).unwrap();
        op.encode_position(Some(Position(42)), &mut out).unwrap();
        assert_eq!(op.decode_position(&out[0..4]), None);
        assert_eq!(op.decode_position(&out[4..8]), Some(Position(42)));
    }
}
