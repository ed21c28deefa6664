// Copyright 2025 the Strike Cache Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Per-glyph records and the compact digests used to look them up.

use core::fmt;
use std::sync::Arc;

use crate::buffer::{ReadBuffer, ReadError, WriteBuffer};
use crate::kurbo::{BezPath, Point, Rect};
use crate::scaler::{GlyphDrawable, GlyphPath, MaskFormat, ScalerContext, ScalerContextRec};

/// Number of subpixel positions per axis.
pub const SUBPIXEL_BUCKETS: u8 = 4;

/// Glyphs wider or taller than this never go into an atlas.
pub const MAX_ATLAS_GLYPH_DIMENSION: u16 = 256;

const SUBPIXEL_BITS: u32 = 2;
const SUBPIXEL_MASK: u32 = (1 << SUBPIXEL_BITS) - 1;
const Y_SHIFT: u32 = SUBPIXEL_BITS;
const GLYPH_SHIFT: u32 = 2 * SUBPIXEL_BITS;

/// A glyph index plus its quantized subpixel position.
///
/// Layout: bits 0-1 hold the x bucket, bits 2-3 the y bucket and bits 4-19 the glyph index.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct PackedGlyphId(u32);

impl PackedGlyphId {
    /// A glyph at an integral position.
    pub const fn new(glyph_id: u16) -> Self {
        Self((glyph_id as u32) << GLYPH_SHIFT)
    }

    /// A glyph in the given subpixel buckets. Buckets wrap at [`SUBPIXEL_BUCKETS`].
    pub const fn with_subpixel(glyph_id: u16, x_bucket: u8, y_bucket: u8) -> Self {
        Self(
            ((glyph_id as u32) << GLYPH_SHIFT)
                | ((y_bucket as u32 & SUBPIXEL_MASK) << Y_SHIFT)
                | (x_bucket as u32 & SUBPIXEL_MASK),
        )
    }

    /// Rebuilds an id from [`PackedGlyphId::to_u32`]. Bits outside the layout are dropped.
    pub const fn from_u32(value: u32) -> Self {
        Self(value & 0x000F_FFFF)
    }

    /// The raw packed value.
    pub const fn to_u32(self) -> u32 {
        self.0
    }

    /// The glyph index.
    #[expect(clippy::cast_possible_truncation, reason = "the glyph field is 16 bits")]
    pub const fn glyph_id(self) -> u16 {
        (self.0 >> GLYPH_SHIFT) as u16
    }

    /// Horizontal subpixel bucket.
    pub const fn sub_x(self) -> u8 {
        (self.0 & SUBPIXEL_MASK) as u8
    }

    /// Vertical subpixel bucket.
    pub const fn sub_y(self) -> u8 {
        ((self.0 >> Y_SHIFT) & SUBPIXEL_MASK) as u8
    }

    /// The subpixel offset this id was rendered at, in pixels.
    pub fn subpixel_offset(self) -> Point {
        Point::new(
            f64::from(subpixel_offset(self.sub_x())),
            f64::from(subpixel_offset(self.sub_y())),
        )
    }
}

impl fmt::Debug for PackedGlyphId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PackedGlyphId({}, {}, {})", self.glyph_id(), self.sub_x(), self.sub_y())
    }
}

/// Splits a position into a whole pixel and one of [`SUBPIXEL_BUCKETS`] buckets.
///
/// Positions round to the nearest bucket, so one just short of a pixel lands on that pixel
/// in bucket 0.
#[expect(
    clippy::cast_possible_truncation,
    reason = "rem_euclid keeps the bucket below SUBPIXEL_BUCKETS"
)]
#[inline]
fn quantize_subpixel(position: f64) -> (f64, u8) {
    let buckets = f64::from(SUBPIXEL_BUCKETS);
    let steps = (position * buckets).round();
    ((steps / buckets).floor(), steps.rem_euclid(buckets) as u8)
}

#[inline]
fn subpixel_offset(bucket: u8) -> f32 {
    f32::from(bucket) / f32::from(SUBPIXEL_BUCKETS)
}

/// The axis along which horizontal text advances in device space.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum AxisAlignment {
    /// Rotated or skewed; both axes are quantized.
    #[default]
    None,
    /// Text advances along x.
    X,
    /// Text advances along y.
    Y,
}

/// How glyph positions of a strike are snapped and quantized.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct RoundingSpec {
    is_subpixel: bool,
    axis_alignment: AxisAlignment,
}

impl RoundingSpec {
    /// Creates a rounding spec.
    pub fn new(is_subpixel: bool, axis_alignment: AxisAlignment) -> Self {
        Self {
            is_subpixel,
            axis_alignment: if is_subpixel {
                axis_alignment
            } else {
                AxisAlignment::None
            },
        }
    }

    /// Derives the rounding spec from a rec's flags and matrix.
    pub fn from_rec(rec: &ScalerContextRec) -> Self {
        let [a, b, _, _, _, _] = rec.matrix().as_coeffs();
        let alignment = if b == 0.0 {
            AxisAlignment::X
        } else if a == 0.0 {
            AxisAlignment::Y
        } else {
            AxisAlignment::None
        };
        Self::new(rec.is_subpixel(), alignment)
    }

    /// Whether positions keep a fractional part.
    pub fn is_subpixel(&self) -> bool {
        self.is_subpixel
    }

    /// The axis text advances along.
    pub fn axis_alignment(&self) -> AxisAlignment {
        self.axis_alignment
    }

    /// Which axes keep subpixel buckets, as `(x, y)`.
    pub fn subpixel_axes(&self) -> (bool, bool) {
        if !self.is_subpixel {
            return (false, false);
        }
        match self.axis_alignment {
            AxisAlignment::None => (true, true),
            AxisAlignment::X => (true, false),
            AxisAlignment::Y => (false, true),
        }
    }

    /// Packs a glyph drawn at a device `position` into the id it is cached under.
    pub fn packed_glyph_id(&self, glyph_id: u16, position: Point) -> PackedGlyphId {
        let (keep_x, keep_y) = self.subpixel_axes();
        let bucket = |v: f64, keep: bool| if keep { quantize_subpixel(v).1 } else { 0 };
        let (x, y) = (bucket(position.x, keep_x), bucket(position.y, keep_y));
        PackedGlyphId::with_subpixel(glyph_id, x, y)
    }

    /// The integral device position a glyph image is placed at. Together with the buckets of
    /// [`RoundingSpec::packed_glyph_id`] it reproduces `position` to the nearest bucket.
    pub fn integral_position(&self, position: Point) -> Point {
        let (keep_x, keep_y) = self.subpixel_axes();
        let snap = |v: f64, keep: bool| if keep { quantize_subpixel(v).0 } else { v.round() };
        Point::new(snap(position.x, keep_x), snap(position.y, keep_y))
    }
}

/// Metrics of one glyph in a strike, in device pixels relative to the glyph origin.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct GlyphMetrics {
    /// Horizontal advance.
    pub advance_x: f32,
    /// Vertical advance.
    pub advance_y: f32,
    /// Left edge of the image.
    pub left: i16,
    /// Top edge of the image.
    pub top: i16,
    /// Image width in pixels.
    pub width: u16,
    /// Image height in pixels.
    pub height: u16,
    /// Format of the glyph's image.
    pub mask_format: MaskFormat,
}

impl GlyphMetrics {
    /// Metrics of a glyph that draws nothing.
    pub fn empty(mask_format: MaskFormat) -> Self {
        Self {
            mask_format,
            ..Self::default()
        }
    }

    /// Computes integral image bounds from fractional outline bounds.
    #[expect(clippy::cast_possible_truncation, reason = "values are clamped first")]
    pub fn from_bounds(
        advance_x: f32,
        advance_y: f32,
        bounds: Rect,
        mask_format: MaskFormat,
    ) -> Self {
        let bounds = bounds.expand();
        if bounds.is_zero_area() || !bounds.is_finite() {
            return Self {
                advance_x,
                advance_y,
                ..Self::empty(mask_format)
            };
        }
        let clamp_i16 = |v: f64| v.clamp(f64::from(i16::MIN), f64::from(i16::MAX)) as i16;
        let clamp_u16 = |v: f64| v.clamp(0.0, f64::from(u16::MAX)) as u16;
        Self {
            advance_x,
            advance_y,
            left: clamp_i16(bounds.x0),
            top: clamp_i16(bounds.y0),
            width: clamp_u16(bounds.width()),
            height: clamp_u16(bounds.height()),
            mask_format,
        }
    }

    /// Whether the glyph has no pixels.
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// The larger of width and height.
    pub fn max_dimension(&self) -> u16 {
        self.width.max(self.height)
    }

    /// Bytes in one row of the glyph's image.
    pub fn row_bytes(&self) -> usize {
        self.mask_format.row_bytes(usize::from(self.width))
    }

    /// Bytes in the glyph's image.
    pub fn image_size(&self) -> usize {
        self.row_bytes() * usize::from(self.height)
    }

    /// Image bounds in device pixels.
    pub fn bounds(&self) -> Rect {
        Rect::new(
            f64::from(self.left),
            f64::from(self.top),
            f64::from(self.left) + f64::from(self.width),
            f64::from(self.top) + f64::from(self.height),
        )
    }

    /// Writes the metrics.
    pub fn flatten(&self, buffer: &mut WriteBuffer) {
        buffer.write_f32(self.advance_x);
        buffer.write_f32(self.advance_y);
        buffer.write_i32(i32::from(self.left));
        buffer.write_i32(i32::from(self.top));
        buffer.write_u32(u32::from(self.width));
        buffer.write_u32(u32::from(self.height));
        buffer.write_u32(self.mask_format as u32);
    }

    /// Reads metrics written by [`GlyphMetrics::flatten`].
    pub fn read(buffer: &mut ReadBuffer<'_>) -> Result<Self, ReadError> {
        let advance_x = buffer.read_f32()?;
        let advance_y = buffer.read_f32()?;
        let offset = buffer.offset();
        let invalid = |what| ReadError::Invalid { offset, what };
        let left = i16::try_from(buffer.read_i32()?).map_err(|_| invalid("glyph left"))?;
        let top = i16::try_from(buffer.read_i32()?).map_err(|_| invalid("glyph top"))?;
        let width = u16::try_from(buffer.read_u32()?).map_err(|_| invalid("glyph width"))?;
        let height = u16::try_from(buffer.read_u32()?).map_err(|_| invalid("glyph height"))?;
        let mask_format = u8::try_from(buffer.read_u32()?)
            .ok()
            .and_then(MaskFormat::from_u8)
            .ok_or_else(|| invalid("mask format"))?;
        Ok(Self {
            advance_x,
            advance_y,
            left,
            top,
            width,
            height,
            mask_format,
        })
    }
}

/// Lazily generated glyph data.
#[derive(Clone, Debug, Default)]
pub enum Payload<T> {
    /// Generation has not been tried.
    #[default]
    NotAttempted,
    /// Generation was tried and produced nothing.
    Absent,
    /// Generation produced a value.
    Present(T),
}

impl<T> Payload<T> {
    /// Whether generation has been tried.
    pub fn is_attempted(&self) -> bool {
        !matches!(self, Self::NotAttempted)
    }

    /// The value, if generation produced one.
    pub fn get(&self) -> Option<&T> {
        match self {
            Self::Present(value) => Some(value),
            _ => None,
        }
    }

    fn from_option(value: Option<T>) -> Self {
        value.map_or(Self::Absent, Self::Present)
    }
}

/// Everything a strike knows about one glyph.
#[derive(Clone, Debug)]
pub struct Glyph {
    id: PackedGlyphId,
    metrics: GlyphMetrics,
    image: Payload<Arc<[u8]>>,
    path: Payload<GlyphPath>,
    drawable: Payload<Arc<dyn GlyphDrawable>>,
}

impl Glyph {
    /// Creates a glyph with metrics and no payloads.
    pub fn new(id: PackedGlyphId, metrics: GlyphMetrics) -> Self {
        Self {
            id,
            metrics,
            image: Payload::NotAttempted,
            path: Payload::NotAttempted,
            drawable: Payload::NotAttempted,
        }
    }

    /// The packed id.
    pub fn id(&self) -> PackedGlyphId {
        self.id
    }

    /// The metrics.
    pub fn metrics(&self) -> &GlyphMetrics {
        &self.metrics
    }

    /// Horizontal advance.
    pub fn advance_x(&self) -> f32 {
        self.metrics.advance_x
    }

    /// Whether the glyph has no pixels.
    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    /// Image format.
    pub fn mask_format(&self) -> MaskFormat {
        self.metrics.mask_format
    }

    /// Whether an image has been requested.
    pub fn image_attempted(&self) -> bool {
        self.image.is_attempted()
    }

    /// Whether a path has been requested.
    pub fn path_attempted(&self) -> bool {
        self.path.is_attempted()
    }

    /// Whether a drawable has been requested.
    pub fn drawable_attempted(&self) -> bool {
        self.drawable.is_attempted()
    }

    /// The image, if one was generated.
    pub fn image(&self) -> Option<&[u8]> {
        self.image.get().map(AsRef::as_ref)
    }

    /// The outline, if one was generated.
    pub fn path(&self) -> Option<&BezPath> {
        self.path.get().map(|p| &p.path)
    }

    /// Whether the outline must be drawn as a hairline.
    pub fn path_is_hairline(&self) -> bool {
        self.path.get().is_some_and(|p| p.is_hairline)
    }

    /// The drawable, if one was generated.
    pub fn drawable(&self) -> Option<&Arc<dyn GlyphDrawable>> {
        self.drawable.get()
    }

    /// Generates the image on first call. Returns the bytes added.
    pub(crate) fn set_image(&mut self, scaler: &mut dyn ScalerContext) -> usize {
        if self.image.is_attempted() {
            return 0;
        }
        let image = if self.is_empty() {
            None
        } else {
            scaler.generate_image(self.id, &self.metrics)
        };
        self.set_image_from(image)
    }

    /// Stores an image produced elsewhere unless one was already attempted.
    pub(crate) fn set_image_from(&mut self, image: Option<Vec<u8>>) -> usize {
        if self.image.is_attempted() {
            return 0;
        }
        let expected = self.metrics.image_size();
        let image = image.filter(|bytes| {
            let matches = bytes.len() == expected;
            if !matches {
                log::warn!(
                    "discarding image for {:?}: {} bytes, metrics need {expected}",
                    self.id,
                    bytes.len()
                );
            }
            matches
        });
        let added = image.as_ref().map_or(0, Vec::len);
        self.image = Payload::from_option(image.map(Arc::from));
        added
    }

    /// Generates the outline on first call. Returns the bytes added.
    pub(crate) fn set_path(&mut self, scaler: &mut dyn ScalerContext) -> usize {
        if self.path.is_attempted() {
            return 0;
        }
        let path = scaler.generate_path(self.id);
        self.set_path_from(path)
    }

    /// Stores an outline produced elsewhere unless one was already attempted.
    pub(crate) fn set_path_from(&mut self, path: Option<GlyphPath>) -> usize {
        if self.path.is_attempted() {
            return 0;
        }
        let added = path.as_ref().map_or(0, |p| path_bytes(&p.path));
        self.path = Payload::from_option(path);
        added
    }

    /// Generates the drawable on first call. Returns the bytes added.
    pub(crate) fn set_drawable(&mut self, scaler: &mut dyn ScalerContext) -> usize {
        if self.drawable.is_attempted() {
            return 0;
        }
        let drawable = scaler.generate_drawable(self.id);
        self.set_drawable_from(drawable)
    }

    /// Stores a drawable produced elsewhere unless one was already attempted.
    pub(crate) fn set_drawable_from(&mut self, drawable: Option<Arc<dyn GlyphDrawable>>) -> usize {
        if self.drawable.is_attempted() {
            return 0;
        }
        let added = drawable.as_ref().map_or(0, |d| d.approximate_bytes_used());
        self.drawable = Payload::from_option(drawable);
        added
    }
}

fn path_bytes(path: &BezPath) -> usize {
    path.elements().len() * size_of::<crate::kurbo::PathEl>()
}

/// What a renderer intends to do with a glyph.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ActionType {
    /// Draw the mask from a GPU atlas at device resolution.
    DirectMask = 0,
    /// Draw the mask on the CPU at device resolution.
    DirectMaskCpu = 1,
    /// Draw a transformed mask.
    Mask = 2,
    /// Draw from a signed distance field.
    Sdft = 3,
    /// Fill the outline.
    Path = 4,
    /// Replay the drawable.
    Drawable = 5,
}

/// The verdict for a glyph and an [`ActionType`].
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum GlyphAction {
    /// Not yet decided.
    #[default]
    Unset = 0,
    /// The glyph can be drawn this way.
    Accept = 1,
    /// The glyph must be drawn some other way.
    Reject = 2,
    /// The glyph draws nothing and can be skipped.
    Drop = 3,
}

impl GlyphAction {
    fn from_bits(bits: u16) -> Self {
        match bits & 0b11 {
            1 => Self::Accept,
            2 => Self::Reject,
            3 => Self::Drop,
            _ => Self::Unset,
        }
    }
}

const DIGEST_EMPTY: u8 = 1 << 0;
const DIGEST_TOO_BIG_FOR_ATLAS: u8 = 1 << 1;
const DIGEST_COLOR: u8 = 1 << 2;
const DIGEST_IMAGE_ATTEMPTED: u8 = 1 << 3;
const DIGEST_PATH_ATTEMPTED: u8 = 1 << 4;
const DIGEST_DRAWABLE_ATTEMPTED: u8 = 1 << 5;

/// A small summary of a [`Glyph`], kept in the strike's lookup table.
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct GlyphDigest {
    index: u32,
    packed_id: PackedGlyphId,
    flags: u8,
    actions: u16,
    mask_format: MaskFormat,
    left: i16,
    top: i16,
    width: u16,
    height: u16,
}

impl GlyphDigest {
    /// Summarizes `glyph`, stored at `index` in its strike.
    #[expect(
        clippy::cast_possible_truncation,
        reason = "a strike holds at most 2^20 distinct packed ids"
    )]
    pub fn new(index: usize, glyph: &Glyph) -> Self {
        let metrics = glyph.metrics();
        let mut flags = 0;
        if metrics.is_empty() {
            flags |= DIGEST_EMPTY;
        }
        if metrics.max_dimension() > MAX_ATLAS_GLYPH_DIMENSION {
            flags |= DIGEST_TOO_BIG_FOR_ATLAS;
        }
        if metrics.mask_format.is_color() {
            flags |= DIGEST_COLOR;
        }
        let mut digest = Self {
            index: index as u32,
            packed_id: glyph.id(),
            flags,
            actions: 0,
            mask_format: metrics.mask_format,
            left: metrics.left,
            top: metrics.top,
            width: metrics.width,
            height: metrics.height,
        };
        digest.sync_attempts(glyph);
        digest
    }

    /// Dense index of the glyph record within its strike.
    pub fn index(&self) -> usize {
        self.index as usize
    }

    /// The packed id.
    pub fn packed_glyph_id(&self) -> PackedGlyphId {
        self.packed_id
    }

    /// Whether the glyph has no pixels.
    pub fn is_empty(&self) -> bool {
        self.flags & DIGEST_EMPTY != 0
    }

    /// Whether the glyph's image carries color.
    pub fn is_color(&self) -> bool {
        self.flags & DIGEST_COLOR != 0
    }

    /// Whether the glyph is small enough for an atlas.
    pub fn fits_in_atlas(&self) -> bool {
        self.flags & DIGEST_TOO_BIG_FOR_ATLAS == 0
    }

    /// The larger of width and height.
    pub fn max_dimension(&self) -> u16 {
        self.width.max(self.height)
    }

    /// Image format.
    pub fn mask_format(&self) -> MaskFormat {
        self.mask_format
    }

    /// Image bounds in device pixels.
    pub fn bounds(&self) -> Rect {
        Rect::new(
            f64::from(self.left),
            f64::from(self.top),
            f64::from(self.left) + f64::from(self.width),
            f64::from(self.top) + f64::from(self.height),
        )
    }

    /// Whether an image has been requested.
    pub fn image_attempted(&self) -> bool {
        self.flags & DIGEST_IMAGE_ATTEMPTED != 0
    }

    /// Whether a path has been requested.
    pub fn path_attempted(&self) -> bool {
        self.flags & DIGEST_PATH_ATTEMPTED != 0
    }

    /// Whether a drawable has been requested.
    pub fn drawable_attempted(&self) -> bool {
        self.flags & DIGEST_DRAWABLE_ATTEMPTED != 0
    }

    /// The verdict recorded for `action`.
    pub fn action_for(&self, action: ActionType) -> GlyphAction {
        GlyphAction::from_bits(self.actions >> (2 * action as u16))
    }

    pub(crate) fn set_action(&mut self, action: ActionType, verdict: GlyphAction) {
        let shift = 2 * action as u16;
        self.actions = (self.actions & !(0b11 << shift)) | ((verdict as u16) << shift);
    }

    pub(crate) fn sync_attempts(&mut self, glyph: &Glyph) {
        let mut set = |flag: u8, on: bool| {
            if on {
                self.flags |= flag;
            }
        };
        set(DIGEST_IMAGE_ATTEMPTED, glyph.image_attempted());
        set(DIGEST_PATH_ATTEMPTED, glyph.path_attempted());
        set(DIGEST_DRAWABLE_ATTEMPTED, glyph.drawable_attempted());
    }
}

impl fmt::Debug for GlyphDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GlyphDigest")
            .field("index", &self.index)
            .field("packed_id", &self.packed_id)
            .field("flags", &format_args!("{:#04x}", self.flags))
            .field("actions", &format_args!("{:#06x}", self.actions))
            .field("mask_format", &self.mask_format)
            .field("bounds", &self.bounds())
            .finish_non_exhaustive()
    }
}
