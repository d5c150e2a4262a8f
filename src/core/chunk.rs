//! Boundary-tag framing of chunks
//!
//! Every chunk (hole or lump) carries the same tag at its first byte and in its
//! last `width` bytes. The tag holds the chunk size in pages, with the top bit
//! set when the chunk is occupied. Reading the footer just before a chunk, or
//! the header just after it, finds the neighbours in constant time.

use crate::error::{Result, SpaceError};
use crate::io::PagedStream;
use crate::scalar::{Operator, Paginator, Position, Size};
use std::io::{Read, Seek, Write};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChunkKind {
    Hole,
    Lump,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkDescriptor {
    pub kind: ChunkKind,
    pub size: Size,
}

impl ChunkDescriptor {
    pub fn hole(size: Size) -> Self {
        ChunkDescriptor {
            kind: ChunkKind::Hole,
            size,
        }
    }

    pub fn lump(size: Size) -> Self {
        ChunkDescriptor {
            kind: ChunkKind::Lump,
            size,
        }
    }

    pub fn is_hole(&self) -> bool {
        self.kind == ChunkKind::Hole
    }

    pub fn is_lump(&self) -> bool {
        self.kind == ChunkKind::Lump
    }
}

/// Encodes chunk descriptors as boundary tags and places them in the stream
#[derive(Debug, Clone, Copy)]
pub struct ChunkDescriptorEncoder {
    op: Operator,
    pager: Paginator,
}

impl ChunkDescriptorEncoder {
    pub fn new(op: Operator, pager: Paginator) -> Self {
        ChunkDescriptorEncoder { op, pager }
    }

    pub fn tag_width(&self) -> usize {
        self.op.len()
    }

    pub fn operator(&self) -> Operator {
        self.op
    }

    pub fn paginator(&self) -> Paginator {
        self.pager
    }

    pub fn encode(&self, descriptor: ChunkDescriptor, out: &mut [u8]) -> Result<()> {
        if descriptor.size.is_zero() {
            return Err(SpaceError::ZeroSize);
        }
        if descriptor.size.get() > self.op.max_value() {
            return Err(SpaceError::Overflow {
                value: descriptor.size.get(),
                width: self.op.width(),
            });
        }
        let mut value = descriptor.size.get();
        if descriptor.is_lump() {
            value |= self.op.flag_bit();
        }
        self.op.encode_raw(value, out)
    }

    /// Decode a tag; zeroed or otherwise empty tags yield `None`
    pub fn decode(&self, bytes: &[u8]) -> Option<ChunkDescriptor> {
        let raw = self.op.decode_raw(bytes);
        let flag = self.op.flag_bit();
        let size = Size(raw & !flag);
        if size.is_zero() {
            return None;
        }
        let kind = if raw & flag != 0 {
            ChunkKind::Lump
        } else {
            ChunkKind::Hole
        };
        Some(ChunkDescriptor { kind, size })
    }

    /// Byte offset of the header tag of a chunk starting at `pos`
    pub fn header_offset(&self, pos: Position) -> u64 {
        self.pager.to_scalar(pos)
    }

    /// Byte offset of the footer tag of a chunk ending just before `end`
    pub fn footer_offset(&self, end: Position) -> u64 {
        self.pager.to_scalar(end) - self.op.len() as u64
    }

    /// Write both tags of the chunk at `pos`
    pub fn write_tags<S: Read + Write + Seek>(
        &self,
        io: &mut PagedStream<S>,
        pos: Position,
        descriptor: ChunkDescriptor,
    ) -> Result<()> {
        let mut tag = vec![0u8; self.tag_width()];
        self.encode(descriptor, &mut tag)?;
        io.write_at(self.header_offset(pos), &tag)?;
        io.write_at(self.footer_offset(pos + descriptor.size), &tag)?;
        Ok(())
    }

    pub fn read_header<S: Read + Write + Seek>(
        &self,
        io: &mut PagedStream<S>,
        pos: Position,
    ) -> Result<Option<ChunkDescriptor>> {
        let tag = io.read_vec(self.header_offset(pos), self.tag_width())?;
        Ok(self.decode(&tag))
    }

    /// Read the footer of the chunk that ends just before `end`
    pub fn read_footer<S: Read + Write + Seek>(
        &self,
        io: &mut PagedStream<S>,
        end: Position,
    ) -> Result<Option<ChunkDescriptor>> {
        let tag = io.read_vec(self.footer_offset(end), self.tag_width())?;
        Ok(self.decode(&tag))
    }

    /// Byte range between the tags of a chunk: `(offset, len)`
    pub fn payload(&self, pos: Position, size: Size) -> (u64, u64) {
        let start = self.pager.to_scalar(pos) + self.op.len() as u64;
        let end = self.footer_offset(pos + size);
        (start, end - start)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn encoder() -> ChunkDescriptorEncoder {
        ChunkDescriptorEncoder::new(Operator::default(), Paginator::new(64))
    }

    #[test]
    fn test_tag_flag_bit() {
        let enc = encoder();
        let mut buf = [0u8; 4];

        enc.encode(ChunkDescriptor::lump(Size(3)), &mut buf).unwrap();
        assert_eq!(buf, [0x80, 0, 0, 3]);
        assert_eq!(enc.decode(&buf), Some(ChunkDescriptor::lump(Size(3))));

        enc.encode(ChunkDescriptor::hole(Size(3)), &mut buf).unwrap();
        assert_eq!(buf, [0, 0, 0, 3]);
        assert_eq!(enc.decode(&buf), Some(ChunkDescriptor::hole(Size(3))));
    }

    #[test]
    fn test_rejects_bad_sizes() {
        let enc = encoder();
        let mut buf = [0u8; 4];
        assert!(matches!(
            enc.encode(ChunkDescriptor::hole(Size(0)), &mut buf),
            Err(SpaceError::ZeroSize)
        ));
        assert!(matches!(
            enc.encode(ChunkDescriptor::lump(Size(0x8000_0000)), &mut buf),
            Err(SpaceError::Overflow { .. })
        ));
        assert_eq!(enc.decode(&[0, 0, 0, 0]), None);
        assert_eq!(enc.decode(&[0x80, 0, 0, 0]), None);
    }

    #[test]
    fn test_tags_frame_chunk() {
        let enc = encoder();
        let mut io = PagedStream::new(Cursor::new(vec![0u8; 64 * 8]));

        enc.write_tags(&mut io, Position(2), ChunkDescriptor::lump(Size(3)))
            .unwrap();

        assert_eq!(
            enc.read_header(&mut io, Position(2)).unwrap(),
            Some(ChunkDescriptor::lump(Size(3)))
        );
        assert_eq!(
            enc.read_footer(&mut io, Position(5)).unwrap(),
            Some(ChunkDescriptor::lump(Size(3)))
        );
        // Footer sits in the last tag-width bytes of page 4
        assert_eq!(enc.footer_offset(Position(5)), 5 * 64 - 4);
        assert_eq!(enc.read_header(&mut io, Position(5)).unwrap(), None);
    }

    #[test]
    fn test_payload_range() {
        let enc = encoder();
        assert_eq!(enc.payload(Position(2), Size(1)), (132, 56));
        assert_eq!(enc.payload(Position(2), Size(3)), (132, 184));
    }
}
