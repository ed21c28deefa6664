// Copyright 2025 the Strike Cache Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Checksummed, self-describing strike keys.
//!
//! A descriptor is a little-endian blob:
//!
//! ```text
//! header:  length u32 | checksum u32 | entry_count u32
//! entry:   tag u32 | length u32 | payload (padded to 4 bytes)
//! ```
//!
//! The checksum covers every byte after the checksum field, so it is stable across
//! processes and is what descriptors hash by.

use core::fmt;
use core::hash::{Hash, Hasher};
use std::sync::Arc;

use smallvec::SmallVec;

use crate::buffer::{pad4, ReadBuffer, ReadError, WriteBuffer};
use crate::font::{Effect, StrikeEffects};
use crate::scaler::ScalerContextRec;

const HEADER_SIZE: usize = 12;
const ENTRY_HEADER_SIZE: usize = 8;

/// Tag of the entry holding the [`ScalerContextRec`].
pub const REC_TAG: u32 = u32::from_be_bytes(*b"srec");
/// Tag of the entry holding a flattened path effect.
pub const PATH_EFFECT_TAG: u32 = u32::from_be_bytes(*b"pthe");
/// Tag of the entry holding a flattened mask filter.
pub const MASK_FILTER_TAG: u32 = u32::from_be_bytes(*b"mskf");

/// The canonical key of a strike.
///
/// Equality compares bytes; hashing uses only the checksum. Cloning is cheap.
#[derive(Clone)]
pub struct Descriptor {
    bytes: Arc<[u8]>,
    checksum: u32,
    rec: ScalerContextRec,
}

impl Descriptor {
    /// Builds a descriptor from a rec and the effects that shape its glyphs.
    pub fn new(rec: &ScalerContextRec, effects: &StrikeEffects) -> Self {
        let mut entries: SmallVec<[(u32, Vec<u8>); 3]> = SmallVec::new();
        entries.push((REC_TAG, bytemuck::bytes_of(rec).to_vec()));
        if let Some(effect) = &effects.path_effect {
            entries.push((PATH_EFFECT_TAG, flatten_effect(effect.as_ref())));
        }
        if let Some(effect) = &effects.mask_filter {
            entries.push((MASK_FILTER_TAG, flatten_effect(effect.as_ref())));
        }
        Self::from_entries(entries.iter().map(|(tag, payload)| (*tag, payload.as_slice())), *rec)
    }

    fn from_entries<'a>(
        entries: impl Iterator<Item = (u32, &'a [u8])> + Clone,
        rec: ScalerContextRec,
    ) -> Self {
        let mut buffer = WriteBuffer::new();
        buffer.write_u32(0);
        buffer.write_u32(0);
        buffer.write_u32(len_u32(entries.clone().count()));
        for (tag, payload) in entries {
            buffer.write_u32(tag);
            buffer.write_u32(len_u32(payload.len()));
            buffer.write_pad32(payload);
        }
        let mut bytes = buffer.into_bytes();
        let len = len_u32(bytes.len());
        bytes[0..4].copy_from_slice(&len.to_le_bytes());
        let checksum = compute_checksum(&bytes);
        bytes[4..8].copy_from_slice(&checksum.to_le_bytes());
        Self {
            bytes: bytes.into(),
            checksum,
            rec,
        }
    }

    /// Validates and wraps bytes produced by [`Descriptor::as_bytes`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DescriptorError> {
        if bytes.len() < HEADER_SIZE {
            return Err(DescriptorError::Truncated);
        }
        let length = read_le(bytes, 0) as usize;
        if length != bytes.len() || length % 4 != 0 {
            return Err(DescriptorError::LengthMismatch {
                declared: length,
                actual: bytes.len(),
            });
        }
        let checksum = read_le(bytes, 4);
        if checksum != compute_checksum(bytes) {
            return Err(DescriptorError::ChecksumMismatch);
        }
        let mut rec = None;
        for entry in EntryIter::new(bytes) {
            let (tag, payload) = entry?;
            if tag == REC_TAG {
                rec = Some(
                    bytemuck::try_pod_read_unaligned::<ScalerContextRec>(payload)
                        .map_err(|_| DescriptorError::MissingRec)?,
                );
            }
        }
        let rec = rec.ok_or(DescriptorError::MissingRec)?;
        Ok(Self {
            bytes: bytes.into(),
            checksum,
            rec,
        })
    }

    /// The scaler context rec this descriptor was built from.
    pub fn rec(&self) -> &ScalerContextRec {
        &self.rec
    }

    /// Returns a copy of this descriptor with its rec replaced and its checksum recomputed.
    pub fn with_rec(&self, rec: &ScalerContextRec) -> Self {
        let rec_bytes = bytemuck::bytes_of(rec);
        let entries = EntryIter::new(&self.bytes)
            .filter_map(Result::ok)
            .map(|(tag, payload)| (tag, if tag == REC_TAG { rec_bytes } else { payload }));
        Self::from_entries(entries, *rec)
    }

    /// The checksum of the descriptor's contents.
    pub fn checksum(&self) -> u32 {
        self.checksum
    }

    /// The raw descriptor bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Total size of the descriptor in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Always false; a descriptor holds at least a header and a rec.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Number of entries.
    pub fn entry_count(&self) -> u32 {
        read_le(&self.bytes, 8)
    }

    /// Finds the payload of the entry with `tag`.
    pub fn find_entry(&self, tag: u32) -> Option<&[u8]> {
        EntryIter::new(&self.bytes)
            .filter_map(Result::ok)
            .find_map(|(t, payload)| (t == tag).then_some(payload))
    }

    /// Writes the descriptor as a byte array.
    pub fn flatten(&self, buffer: &mut WriteBuffer) {
        buffer.write_byte_array(&self.bytes);
    }

    /// Reads and validates a descriptor written by [`Descriptor::flatten`].
    pub fn from_buffer(buffer: &mut ReadBuffer<'_>) -> Result<Self, ReadError> {
        let bytes = buffer.read_byte_array()?;
        Ok(Self::from_bytes(bytes)?)
    }

    /// Human-readable summary of the rec, for logs.
    pub fn dump_rec(&self) -> String {
        self.rec.dump()
    }
}

impl PartialEq for Descriptor {
    fn eq(&self, other: &Self) -> bool {
        self.checksum == other.checksum && self.bytes == other.bytes
    }
}

impl Eq for Descriptor {}

impl Hash for Descriptor {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u32(self.checksum);
    }
}

impl fmt::Debug for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Descriptor")
            .field("checksum", &format_args!("{:#010x}", self.checksum))
            .field("len", &self.bytes.len())
            .field("rec", &self.rec)
            .finish_non_exhaustive()
    }
}

/// An error produced while validating descriptor bytes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DescriptorError {
    /// Fewer bytes than a header.
    Truncated,
    /// The declared length disagrees with the data.
    LengthMismatch {
        /// Length stored in the header.
        declared: usize,
        /// Length of the data.
        actual: usize,
    },
    /// The stored checksum disagrees with the contents.
    ChecksumMismatch,
    /// An entry overruns the descriptor or the entry count is wrong.
    MalformedEntry {
        /// Index of the offending entry.
        index: usize,
    },
    /// No rec entry of the expected size.
    MissingRec,
}

impl fmt::Display for DescriptorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Truncated => f.write_str("descriptor is shorter than its header"),
            Self::LengthMismatch { declared, actual } => {
                write!(f, "descriptor declares {declared} bytes but has {actual}")
            }
            Self::ChecksumMismatch => f.write_str("descriptor checksum does not match"),
            Self::MalformedEntry { index } => write!(f, "descriptor entry {index} is malformed"),
            Self::MissingRec => f.write_str("descriptor has no valid scaler context rec"),
        }
    }
}

impl core::error::Error for DescriptorError {}

/// Walks entries, checking framing as it goes.
#[derive(Clone)]
struct EntryIter<'a> {
    bytes: &'a [u8],
    offset: usize,
    index: usize,
    count: usize,
    failed: bool,
}

impl<'a> EntryIter<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self {
            bytes,
            offset: HEADER_SIZE,
            index: 0,
            count: read_le(bytes, 8) as usize,
            failed: false,
        }
    }
}

impl<'a> Iterator for EntryIter<'a> {
    type Item = Result<(u32, &'a [u8]), DescriptorError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let malformed = DescriptorError::MalformedEntry { index: self.index };
        if self.index == self.count {
            if self.offset == self.bytes.len() {
                return None;
            }
            self.failed = true;
            return Some(Err(malformed));
        }
        if self.bytes.len() - self.offset < ENTRY_HEADER_SIZE {
            self.failed = true;
            return Some(Err(malformed));
        }
        let tag = read_le(self.bytes, self.offset);
        let len = read_le(self.bytes, self.offset + 4) as usize;
        let start = self.offset + ENTRY_HEADER_SIZE;
        if pad4(len) > self.bytes.len() - start {
            self.failed = true;
            return Some(Err(malformed));
        }
        self.offset = start + pad4(len);
        self.index += 1;
        Some(Ok((tag, &self.bytes[start..start + len])))
    }
}

fn flatten_effect(effect: &dyn Effect) -> Vec<u8> {
    let mut buffer = WriteBuffer::new();
    buffer.write_byte_array(effect.type_name().as_bytes());
    effect.flatten(&mut buffer);
    buffer.into_bytes()
}

fn read_le(bytes: &[u8], offset: usize) -> u32 {
    let mut word = [0_u8; 4];
    if let Some(src) = bytes.get(offset..offset + 4) {
        word.copy_from_slice(src);
    }
    u32::from_le_bytes(word)
}

#[expect(
    clippy::cast_possible_truncation,
    reason = "descriptors are a few hundred bytes at most"
)]
fn len_u32(len: usize) -> u32 {
    len as u32
}

/// 32-bit Murmur3 over everything after the checksum field.
fn compute_checksum(bytes: &[u8]) -> u32 {
    const C1: u32 = 0xcc9e_2d51;
    const C2: u32 = 0x1b87_3593;

    let data = &bytes[8..];
    let mut hash: u32 = 0;
    let mut words = data.chunks_exact(4);
    for word in &mut words {
        let mut k = u32::from_le_bytes([word[0], word[1], word[2], word[3]]);
        k = k.wrapping_mul(C1).rotate_left(15).wrapping_mul(C2);
        hash ^= k;
        hash = hash.rotate_left(13).wrapping_mul(5).wrapping_add(0xe654_6b64);
    }
    let tail = words.remainder();
    if !tail.is_empty() {
        let mut k = 0_u32;
        for (i, byte) in tail.iter().enumerate() {
            k |= u32::from(*byte) << (8 * i);
        }
        k = k.wrapping_mul(C1).rotate_left(15).wrapping_mul(C2);
        hash ^= k;
    }
    hash ^= len_u32(data.len());
    hash ^= hash >> 16;
    hash = hash.wrapping_mul(0x85eb_ca6b);
    hash ^= hash >> 13;
    hash = hash.wrapping_mul(0xc2b2_ae35);
    hash ^ (hash >> 16)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scaler::MaskFormat;

    #[derive(Debug)]
    struct Dash(u32);

    impl Effect for Dash {
        fn type_name(&self) -> &str {
            "Dash"
        }

        fn flatten(&self, buffer: &mut WriteBuffer) {
            buffer.write_u32(self.0);
        }
    }

    fn rec(size: f32) -> ScalerContextRec {
        ScalerContextRec {
            typeface_id: 7,
            text_size: size,
            pre_scale_x: 1.0,
            post_2x2: [1.0, 0.0, 0.0, 1.0],
            frame_width: -1.0,
            mask_format: MaskFormat::A8 as u8,
            ..ScalerContextRec::default()
        }
    }

    #[test]
    fn equal_recs_make_equal_descriptors() {
        let a = Descriptor::new(&rec(12.0), &StrikeEffects::default());
        let b = Descriptor::new(&rec(12.0), &StrikeEffects::default());
        let c = Descriptor::new(&rec(13.0), &StrikeEffects::default());
        assert_eq!(a, b);
        assert_eq!(a.checksum(), b.checksum());
        assert_ne!(a, c);
        assert_eq!(a.entry_count(), 1);
    }

    #[test]
    fn effects_are_part_of_the_key() {
        let plain = Descriptor::new(&rec(12.0), &StrikeEffects::default());
        let effects = |n| StrikeEffects {
            path_effect: Some(Arc::new(Dash(n))),
            mask_filter: None,
        };
        let dashed = Descriptor::new(&rec(12.0), &effects(3));
        assert_ne!(plain, dashed);
        assert_eq!(dashed, Descriptor::new(&rec(12.0), &effects(3)));
        assert_ne!(dashed, Descriptor::new(&rec(12.0), &effects(4)));
        assert!(dashed.find_entry(PATH_EFFECT_TAG).is_some());
        assert!(dashed.find_entry(MASK_FILTER_TAG).is_none());
    }

    #[test]
    fn with_rec_recomputes_checksum() {
        let original = Descriptor::new(&rec(12.0), &StrikeEffects::default());
        let mut changed = *original.rec();
        changed.typeface_id = 99;
        let rewritten = original.with_rec(&changed);
        assert_eq!(rewritten.rec().typeface_id, 99);
        assert_ne!(rewritten.checksum(), original.checksum());
        assert_eq!(rewritten, Descriptor::new(&changed, &StrikeEffects::default()));
    }

    #[test]
    fn flattened_descriptor_is_validated() {
        let original = Descriptor::new(&rec(12.0), &StrikeEffects::default());
        let mut buffer = WriteBuffer::new();
        original.flatten(&mut buffer);
        let read = Descriptor::from_buffer(&mut ReadBuffer::new(buffer.as_bytes())).unwrap();
        assert_eq!(read, original);

        let mut corrupt = original.as_bytes().to_vec();
        corrupt[HEADER_SIZE + ENTRY_HEADER_SIZE + 4] ^= 0xFF;
        assert_eq!(
            Descriptor::from_bytes(&corrupt).unwrap_err(),
            DescriptorError::ChecksumMismatch
        );
        assert_eq!(
            Descriptor::from_bytes(&corrupt[..HEADER_SIZE - 1]).unwrap_err(),
            DescriptorError::Truncated
        );
        assert!(matches!(
            Descriptor::from_bytes(&corrupt[..HEADER_SIZE + 4]).unwrap_err(),
            DescriptorError::LengthMismatch { .. }
        ));
    }

    #[test]
    fn overrunning_entry_is_rejected() {
        let original = Descriptor::new(&rec(12.0), &StrikeEffects::default());
        let mut bytes = original.as_bytes().to_vec();
        bytes[HEADER_SIZE + 4..HEADER_SIZE + 8].copy_from_slice(&1000_u32.to_le_bytes());
        let checksum = compute_checksum(&bytes);
        bytes[4..8].copy_from_slice(&checksum.to_le_bytes());
        assert_eq!(
            Descriptor::from_bytes(&bytes).unwrap_err(),
            DescriptorError::MalformedEntry { index: 0 }
        );
    }
}
