// Copyright 2025 the Strike Cache Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Little-endian, 4-byte aligned buffers for flattening descriptors and strike data.
//!
//! Reading never trusts its input: every read is bounds checked and reports the offset at
//! which decoding failed.

use core::fmt;

use crate::descriptor::DescriptorError;
use crate::kurbo::{BezPath, PathEl, Point};

const VERB_MOVE: u32 = 0;
const VERB_LINE: u32 = 1;
const VERB_QUAD: u32 = 2;
const VERB_CUBIC: u32 = 3;
const VERB_CLOSE: u32 = 4;

/// An append-only buffer that values are flattened into.
#[derive(Clone, Debug, Default)]
pub struct WriteBuffer {
    data: Vec<u8>,
}

impl WriteBuffer {
    /// Creates an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// The bytes written so far.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Consumes the buffer, returning the written bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    /// Number of bytes written so far.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether nothing has been written yet.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Writes a `u32`.
    pub fn write_u32(&mut self, value: u32) {
        self.data.extend_from_slice(&value.to_le_bytes());
    }

    /// Writes an `i32`.
    pub fn write_i32(&mut self, value: i32) {
        self.data.extend_from_slice(&value.to_le_bytes());
    }

    /// Writes an `f32` bit pattern.
    pub fn write_f32(&mut self, value: f32) {
        self.write_u32(value.to_bits());
    }

    /// Writes a boolean as a full 32-bit word.
    pub fn write_bool(&mut self, value: bool) {
        self.write_u32(u32::from(value));
    }

    /// Writes an element count, read back with [`ReadBuffer::read_count`].
    pub fn write_count(&mut self, count: usize) {
        self.write_u32(len_u32(count));
    }

    /// Writes a length-prefixed byte array, padded to a multiple of four bytes.
    pub fn write_byte_array(&mut self, bytes: &[u8]) {
        self.write_u32(len_u32(bytes.len()));
        self.write_pad32(bytes);
    }

    /// Writes raw bytes followed by zero padding up to the next multiple of four.
    pub(crate) fn write_pad32(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
        let padded = pad4(bytes.len());
        self.data.resize(self.data.len() + (padded - bytes.len()), 0);
    }

    /// Writes a point as two `f32`s.
    #[expect(
        clippy::cast_possible_truncation,
        reason = "glyph geometry is generated in f32 and only widened by kurbo"
    )]
    pub fn write_point(&mut self, point: Point) {
        self.write_f32(point.x as f32);
        self.write_f32(point.y as f32);
    }

    /// Writes a path as a verb count followed by verbs and their points.
    pub fn write_path(&mut self, path: &BezPath) {
        let elements = path.elements();
        self.write_u32(len_u32(elements.len()));
        for element in elements {
            match *element {
                PathEl::MoveTo(p) => {
                    self.write_u32(VERB_MOVE);
                    self.write_point(p);
                }
                PathEl::LineTo(p) => {
                    self.write_u32(VERB_LINE);
                    self.write_point(p);
                }
                PathEl::QuadTo(p0, p1) => {
                    self.write_u32(VERB_QUAD);
                    self.write_point(p0);
                    self.write_point(p1);
                }
                PathEl::CurveTo(p0, p1, p2) => {
                    self.write_u32(VERB_CUBIC);
                    self.write_point(p0);
                    self.write_point(p1);
                    self.write_point(p2);
                }
                PathEl::ClosePath => self.write_u32(VERB_CLOSE),
            }
        }
    }
}

/// A cursor over untrusted, flattened bytes.
#[derive(Clone, Debug)]
pub struct ReadBuffer<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> ReadBuffer<'a> {
    /// Creates a reader positioned at the start of `data`.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    /// Current read position in bytes.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Number of unread bytes.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.offset
    }

    /// Whether every byte has been consumed.
    pub fn is_at_end(&self) -> bool {
        self.remaining() == 0
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], ReadError> {
        if len > self.remaining() {
            return Err(ReadError::UnexpectedEnd {
                offset: self.offset,
            });
        }
        let bytes = &self.data[self.offset..self.offset + len];
        self.offset += len;
        Ok(bytes)
    }

    /// Reads a `u32`.
    pub fn read_u32(&mut self) -> Result<u32, ReadError> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Reads an `i32`.
    pub fn read_i32(&mut self) -> Result<i32, ReadError> {
        let bytes = self.take(4)?;
        Ok(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Reads an `f32`, rejecting non-finite values.
    pub fn read_f32(&mut self) -> Result<f32, ReadError> {
        let offset = self.offset;
        let value = f32::from_bits(self.read_u32()?);
        if value.is_finite() {
            Ok(value)
        } else {
            Err(ReadError::Invalid {
                offset,
                what: "non-finite float",
            })
        }
    }

    /// Reads a boolean written by [`WriteBuffer::write_bool`].
    pub fn read_bool(&mut self) -> Result<bool, ReadError> {
        let offset = self.offset;
        match self.read_u32()? {
            0 => Ok(false),
            1 => Ok(true),
            _ => Err(ReadError::Invalid {
                offset,
                what: "boolean",
            }),
        }
    }

    /// Reads a length-prefixed byte array.
    pub fn read_byte_array(&mut self) -> Result<&'a [u8], ReadError> {
        let len = self.read_u32()? as usize;
        self.read_pad32(len)
    }

    /// Reads `len` bytes and skips the padding that follows them.
    pub(crate) fn read_pad32(&mut self, len: usize) -> Result<&'a [u8], ReadError> {
        let offset = self.offset;
        let padded = self
            .take(pad4(len))
            .map_err(|_| ReadError::UnexpectedEnd { offset })?;
        Ok(&padded[..len])
    }

    /// Reads a count and checks that at least `min_item_size` bytes per item remain, so that a
    /// corrupt count can't trigger a huge allocation.
    pub fn read_count(&mut self, min_item_size: usize) -> Result<usize, ReadError> {
        let offset = self.offset;
        let count = self.read_u32()? as usize;
        if count.saturating_mul(min_item_size) > self.remaining() {
            return Err(ReadError::Invalid {
                offset,
                what: "element count",
            });
        }
        Ok(count)
    }

    /// Reads a point written by [`WriteBuffer::write_point`].
    pub fn read_point(&mut self) -> Result<Point, ReadError> {
        let x = self.read_f32()?;
        let y = self.read_f32()?;
        Ok(Point::new(f64::from(x), f64::from(y)))
    }

    /// Reads a path written by [`WriteBuffer::write_path`].
    pub fn read_path(&mut self) -> Result<BezPath, ReadError> {
        let count = self.read_count(4)?;
        let mut path = BezPath::new();
        for _ in 0..count {
            let offset = self.offset;
            match self.read_u32()? {
                VERB_MOVE => path.move_to(self.read_point()?),
                VERB_LINE => path.line_to(self.read_point()?),
                VERB_QUAD => {
                    let p0 = self.read_point()?;
                    path.quad_to(p0, self.read_point()?);
                }
                VERB_CUBIC => {
                    let p0 = self.read_point()?;
                    let p1 = self.read_point()?;
                    path.curve_to(p0, p1, self.read_point()?);
                }
                VERB_CLOSE => path.close_path(),
                _ => {
                    return Err(ReadError::Invalid {
                        offset,
                        what: "path verb",
                    });
                }
            }
        }
        Ok(path)
    }
}

/// An error produced while decoding flattened data.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReadError {
    /// The input ended before the value starting at `offset` was complete.
    UnexpectedEnd {
        /// Byte offset of the incomplete value.
        offset: usize,
    },
    /// The value at `offset` was present but not valid.
    Invalid {
        /// Byte offset of the invalid value.
        offset: usize,
        /// What was being decoded.
        what: &'static str,
    },
    /// A flattened descriptor was malformed.
    Descriptor(DescriptorError),
}

impl fmt::Display for ReadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnexpectedEnd { offset } => write!(f, "unexpected end of data at byte {offset}"),
            Self::Invalid { offset, what } => write!(f, "invalid {what} at byte {offset}"),
            Self::Descriptor(err) => write!(f, "malformed descriptor: {err}"),
        }
    }
}

impl core::error::Error for ReadError {}

impl From<DescriptorError> for ReadError {
    fn from(err: DescriptorError) -> Self {
        Self::Descriptor(err)
    }
}

#[inline]
pub(crate) const fn pad4(len: usize) -> usize {
    (len + 3) & !3
}

#[expect(
    clippy::cast_possible_truncation,
    reason = "flattened objects are far smaller than 4 GiB"
)]
#[inline]
fn len_u32(len: usize) -> u32 {
    debug_assert!(u32::try_from(len).is_ok(), "flattened length overflows u32");
    len as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_arrays_are_padded() {
        let mut buffer = WriteBuffer::new();
        buffer.write_byte_array(&[1, 2, 3, 4, 5]);
        buffer.write_u32(7);
        assert_eq!(buffer.len(), 4 + 8 + 4);

        let mut reader = ReadBuffer::new(buffer.as_bytes());
        assert_eq!(reader.read_byte_array().unwrap(), &[1, 2, 3, 4, 5]);
        assert_eq!(reader.read_u32().unwrap(), 7);
        assert!(reader.is_at_end());
    }

    #[test]
    fn truncated_input_reports_offset() {
        let mut buffer = WriteBuffer::new();
        buffer.write_u32(1);
        let bytes = &buffer.as_bytes()[..3];
        let mut reader = ReadBuffer::new(bytes);
        assert_eq!(
            reader.read_u32(),
            Err(ReadError::UnexpectedEnd { offset: 0 })
        );
    }

    #[test]
    fn bogus_bool_and_count_are_rejected() {
        let mut buffer = WriteBuffer::new();
        buffer.write_u32(2);
        buffer.write_u32(u32::MAX);
        let mut reader = ReadBuffer::new(buffer.as_bytes());
        assert!(matches!(
            reader.read_bool(),
            Err(ReadError::Invalid { what: "boolean", .. })
        ));
        assert!(matches!(
            reader.read_count(4),
            Err(ReadError::Invalid { offset: 4, .. })
        ));
    }

    #[test]
    fn paths_survive_flattening() {
        let mut path = BezPath::new();
        path.move_to((1.0, 2.0));
        path.line_to((3.0, 4.0));
        path.quad_to((5.0, 6.0), (7.0, 8.0));
        path.curve_to((9.0, 10.0), (11.0, 12.0), (13.0, 14.0));
        path.close_path();

        let mut buffer = WriteBuffer::new();
        buffer.write_path(&path);
        let mut reader = ReadBuffer::new(buffer.as_bytes());
        assert_eq!(reader.read_path().unwrap(), path);
        assert!(reader.is_at_end());
    }
}
