// Copyright 2025 the Strike Cache Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The boundary to glyph scalers.
//!
//! A [`Typeface`] builds a [`ScalerContext`] for a [`Descriptor`]; the context turns packed
//! glyph ids into metrics, images, paths and drawables. The [`ScalerContextRec`] is the
//! normalized, byte-comparable request that sits at the heart of every descriptor.

use core::fmt;
use core::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use bytemuck::{Pod, Zeroable};

use crate::descriptor::Descriptor;
use crate::font::{
    Edging, Font, Hinting, Paint, PaintStyle, ScalerContextFlags, StrikeEffects, SurfaceProps,
};
use crate::glyph::{GlyphMetrics, PackedGlyphId};
use crate::kurbo::{Affine, BezPath, Cap, Join, Rect};
use crate::math::FloatExt;
use crate::peniko::Color;

/// Identifies a typeface within a process.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
#[repr(transparent)]
pub struct TypefaceId(u32);

impl TypefaceId {
    /// Creates a new unique identifier.
    #[expect(clippy::new_without_default, reason = "every call returns a distinct id")]
    pub fn new() -> Self {
        // Zero is reserved for "no typeface".
        static ID_COUNTER: AtomicU32 = AtomicU32::new(1);
        Self(ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Wraps a raw id, such as one received from another process.
    pub fn from_u32(id: u32) -> Self {
        Self(id)
    }

    /// Returns the underlying integer value.
    pub fn to_u32(self) -> u32 {
        self.0
    }
}

/// Pixel format of a glyph image.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MaskFormat {
    /// One bit per pixel, rows padded to whole bytes.
    Bw = 0,
    /// Eight bits of coverage per pixel.
    #[default]
    A8 = 1,
    /// 16-bit 565 per-channel coverage.
    Lcd16 = 2,
    /// Premultiplied 32-bit color.
    Argb32 = 3,
    /// Signed distance field.
    Sdf = 4,
}

impl MaskFormat {
    /// Decodes a format stored in a scaler context rec or flattened glyph.
    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0 => Self::Bw,
            1 => Self::A8,
            2 => Self::Lcd16,
            3 => Self::Argb32,
            4 => Self::Sdf,
            _ => return None,
        })
    }

    /// Bytes needed for one row of an image `width` pixels wide.
    pub fn row_bytes(self, width: usize) -> usize {
        match self {
            Self::Bw => width.div_ceil(8),
            Self::A8 | Self::Sdf => width,
            Self::Lcd16 => width * 2,
            Self::Argb32 => width * 4,
        }
    }

    /// Whether images in this format carry their own color.
    pub fn is_color(self) -> bool {
        self == Self::Argb32
    }
}

/// Flag bits of a [`ScalerContextRec`].
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Pod, Zeroable)]
#[repr(transparent)]
pub struct RecFlags(u32);

impl RecFlags {
    /// Glyphs are generated at subpixel offsets.
    pub const SUBPIXEL: Self = Self(1 << 0);
    /// Advances come from unhinted outlines.
    pub const LINEAR_METRICS: Self = Self(1 << 1);
    /// Outlines are synthetically emboldened.
    pub const EMBOLDEN: Self = Self(1 << 2);
    /// Embedded bitmap strikes may be used.
    pub const EMBEDDED_BITMAPS: Self = Self(1 << 3);
    /// The autohinter is preferred.
    pub const FORCE_AUTOHINT: Self = Self(1 << 4);
    /// LCD subpixels are ordered blue, green, red.
    pub const LCD_BGR: Self = Self(1 << 5);
    /// LCD subpixels are stacked vertically.
    pub const LCD_VERTICAL: Self = Self(1 << 6);
    /// Coverage is gamma-adjusted.
    pub const FAKE_GAMMA: Self = Self(1 << 7);
    /// Coverage contrast is boosted.
    pub const BOOST_CONTRAST: Self = Self(1 << 8);
    /// Metrics don't depend on the device.
    pub const DEVICE_INDEPENDENT: Self = Self(1 << 9);

    /// No flags.
    pub const fn empty() -> Self {
        Self(0)
    }

    /// The raw bits.
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Whether every flag in `other` is set.
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Sets or clears the flags in `other`.
    pub fn set(&mut self, other: Self, value: bool) {
        if value {
            self.0 |= other.0;
        } else {
            self.0 &= !other.0;
        }
    }
}

/// The normalized description of how glyphs of a strike are generated.
///
/// The rec is stored byte-for-byte in a [`Descriptor`], so every field that can hold
/// equivalent values in more than one way is canonicalized before it is sealed.
#[derive(Copy, Clone, Debug, Default, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct ScalerContextRec {
    /// Raw [`TypefaceId`].
    pub typeface_id: u32,
    /// Text size in points.
    pub text_size: f32,
    /// Horizontal scale applied before `post_2x2`.
    pub pre_scale_x: f32,
    /// Horizontal skew applied before `post_2x2`.
    pub pre_skew_x: f32,
    /// Linear part of the device matrix as `[a, b, c, d]`.
    pub post_2x2: [f32; 4],
    /// Stroke width; negative for fills, zero for hairlines.
    pub frame_width: f32,
    /// Stroke miter limit.
    pub miter_limit: f32,
    /// Reduced paint luminance used for gamma selection.
    pub luminance_color: u32,
    /// See [`RecFlags`].
    pub flags: RecFlags,
    /// Raw [`MaskFormat`].
    pub mask_format: u8,
    /// Raw [`Hinting`].
    pub hinting: u8,
    /// Stroke join, see [`ScalerContextRec::stroke_join`].
    pub stroke_join: u8,
    /// Stroke cap, see [`ScalerContextRec::stroke_cap`].
    pub stroke_cap: u8,
}

impl ScalerContextRec {
    /// Builds a sealed rec for drawing `font` with `paint` through `device_matrix`.
    ///
    /// The typeface may adjust the rec through [`Typeface::filter_rec`] before it is
    /// canonicalized.
    pub fn new(
        font: &Font,
        paint: &Paint,
        surface_props: &SurfaceProps,
        scaler_flags: ScalerContextFlags,
        device_matrix: Affine,
    ) -> Self {
        let [a, b, c, d, _, _] = device_matrix.as_coeffs();
        let mut rec = Self {
            typeface_id: font.typeface().id().to_u32(),
            text_size: font.size(),
            pre_scale_x: font.scale_x(),
            pre_skew_x: font.skew_x(),
            post_2x2: [a, b, c, d].map(narrow),
            ..Self::default()
        };

        if paint.style == PaintStyle::Fill {
            rec.frame_width = -1.0;
        } else {
            rec.frame_width = narrow(paint.stroke.width);
            rec.miter_limit = narrow(paint.stroke.miter_limit);
            rec.stroke_join = match paint.stroke.join {
                Join::Bevel => 0,
                Join::Miter => 1,
                Join::Round => 2,
            };
            rec.stroke_cap = match paint.stroke.start_cap {
                Cap::Butt => 0,
                Cap::Square => 1,
                Cap::Round => 2,
            };
        }

        let mut flags = RecFlags::empty();
        flags.set(RecFlags::SUBPIXEL, font.is_subpixel());
        flags.set(RecFlags::LINEAR_METRICS, font.is_linear_metrics());
        flags.set(RecFlags::EMBOLDEN, font.is_embolden());
        flags.set(RecFlags::EMBEDDED_BITMAPS, font.is_embedded_bitmaps());
        flags.set(RecFlags::FORCE_AUTOHINT, font.is_force_auto_hinting());
        flags.set(
            RecFlags::FAKE_GAMMA,
            scaler_flags.contains(ScalerContextFlags::FAKE_GAMMA),
        );
        flags.set(
            RecFlags::BOOST_CONTRAST,
            scaler_flags.contains(ScalerContextFlags::BOOST_CONTRAST),
        );
        flags.set(
            RecFlags::DEVICE_INDEPENDENT,
            surface_props.use_device_independent_fonts,
        );

        let mut format = match font.edging() {
            Edging::Alias => MaskFormat::Bw,
            Edging::AntiAlias => MaskFormat::A8,
            Edging::SubpixelAntiAlias => MaskFormat::Lcd16,
        };
        if format == MaskFormat::Lcd16 {
            let geometry = surface_props.pixel_geometry;
            if geometry == crate::font::PixelGeometry::Unknown
                || surface_props.use_device_independent_fonts
                || !rec.is_axis_aligned()
            {
                format = MaskFormat::A8;
            } else {
                flags.set(RecFlags::LCD_BGR, geometry.is_bgr());
                flags.set(RecFlags::LCD_VERTICAL, geometry.is_vertical());
            }
        }
        rec.flags = flags;
        rec.mask_format = format as u8;
        rec.hinting = font.hinting() as u8;
        rec.luminance_color = reduced_luminance(paint.color, format);

        font.typeface().filter_rec(&mut rec);
        rec.canonicalize();
        rec
    }

    /// Relaxes matrix and stroke values so that nearly identical requests share a strike.
    pub fn canonicalize(&mut self) {
        self.text_size = self.text_size.relax();
        self.pre_scale_x = self.pre_scale_x.relax();
        self.pre_skew_x = self.pre_skew_x.relax();
        for value in &mut self.post_2x2 {
            *value = value.relax();
        }
        if self.frame_width < 0.0 {
            self.frame_width = -1.0;
            self.miter_limit = 0.0;
            self.stroke_join = 0;
            self.stroke_cap = 0;
        } else {
            self.frame_width = self.frame_width.relax();
            self.miter_limit = self.miter_limit.relax();
        }
        if !matches!(self.mask_format(), MaskFormat::Lcd16) {
            self.flags.set(RecFlags::LCD_BGR | RecFlags::LCD_VERTICAL, false);
        }
    }

    /// The typeface this rec was built for.
    pub fn typeface_id(&self) -> TypefaceId {
        TypefaceId(self.typeface_id)
    }

    /// The mask format, falling back to A8 for unknown values.
    pub fn mask_format(&self) -> MaskFormat {
        MaskFormat::from_u8(self.mask_format).unwrap_or_default()
    }

    /// The hinting level, falling back to none for unknown values.
    pub fn hinting(&self) -> Hinting {
        Hinting::from_u8(self.hinting).unwrap_or(Hinting::None)
    }

    /// Whether glyphs are generated at subpixel offsets.
    pub fn is_subpixel(&self) -> bool {
        self.flags.contains(RecFlags::SUBPIXEL)
    }

    /// The full glyph-to-device transform, without translation.
    pub fn matrix(&self) -> Affine {
        let [a, b, c, d] = self.post_2x2.map(f64::from);
        let size = f64::from(self.text_size);
        let text = Affine::new([
            size * f64::from(self.pre_scale_x),
            0.0,
            size * f64::from(self.pre_skew_x),
            size,
            0.0,
            0.0,
        ]);
        Affine::new([a, b, c, d, 0.0, 0.0]) * text
    }

    /// The device matrix with the text size factored out.
    pub fn post_matrix(&self) -> Affine {
        let [a, b, c, d] = self.post_2x2.map(f64::from);
        Affine::new([a, b, c, d, 0.0, 0.0])
    }

    fn is_axis_aligned(&self) -> bool {
        let [a, b, c, d] = self.post_2x2;
        (b.is_nearly_zero() && c.is_nearly_zero()) || (a.is_nearly_zero() && d.is_nearly_zero())
    }

    /// Clears luminance for strikes whose output doesn't depend on it.
    pub fn ignore_luminance(&mut self) {
        self.luminance_color = 0;
    }

    /// Human-readable summary used in logs.
    pub fn dump(&self) -> String {
        format!(
            "typeface {} size {} scale_x {} skew_x {} post [{}, {}, {}, {}] frame {} \
             miter {} lum {:#010x} flags {:#x} format {:?} hinting {:?} join {} cap {}",
            self.typeface_id,
            self.text_size,
            self.pre_scale_x,
            self.pre_skew_x,
            self.post_2x2[0],
            self.post_2x2[1],
            self.post_2x2[2],
            self.post_2x2[3],
            self.frame_width,
            self.miter_limit,
            self.luminance_color,
            self.flags.bits(),
            self.mask_format(),
            self.hinting(),
            self.stroke_join,
            self.stroke_cap,
        )
    }
}

impl core::ops::BitOr for RecFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

#[expect(
    clippy::cast_possible_truncation,
    reason = "recs store f32 matrices; precision beyond that is relaxed away"
)]
fn narrow(value: f64) -> f32 {
    value as f32
}

/// Luminance reduced to three bits per channel, so that similar colors share masks.
fn reduced_luminance(color: Color, format: MaskFormat) -> u32 {
    const KEEP: u8 = 0xE0;
    let rgba = color.to_rgba8();
    match format {
        MaskFormat::A8 => {
            let luma = (u32::from(rgba.r) * 54 + u32::from(rgba.g) * 183 + u32::from(rgba.b) * 19)
                >> 8;
            let luma = luma & u32::from(KEEP);
            0xFF00_0000 | (luma << 16) | (luma << 8) | luma
        }
        MaskFormat::Lcd16 => {
            0xFF00_0000
                | (u32::from(rgba.r & KEEP) << 16)
                | (u32::from(rgba.g & KEEP) << 8)
                | u32::from(rgba.b & KEEP)
        }
        MaskFormat::Bw | MaskFormat::Argb32 | MaskFormat::Sdf => 0,
    }
}

/// Vertical metrics of a strike, in device pixels. Y grows downward.
#[derive(Copy, Clone, Debug, Default, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct FontMetrics {
    /// Distance from the baseline to the top of the tallest glyph (negative).
    pub top: f32,
    /// Recommended distance above the baseline (negative).
    pub ascent: f32,
    /// Recommended distance below the baseline (positive).
    pub descent: f32,
    /// Distance from the baseline to the bottom of the lowest glyph.
    pub bottom: f32,
    /// Recommended gap between lines.
    pub leading: f32,
    /// Average glyph advance.
    pub average_width: f32,
    /// Leftmost extent of any glyph.
    pub x_min: f32,
    /// Rightmost extent of any glyph.
    pub x_max: f32,
    /// Height of a lowercase x.
    pub x_height: f32,
    /// Height of an uppercase letter.
    pub cap_height: f32,
    /// Underline position below the baseline.
    pub underline_position: f32,
    /// Underline thickness.
    pub underline_thickness: f32,
}

/// A glyph outline produced by a scaler.
#[derive(Clone, Debug, PartialEq)]
pub struct GlyphPath {
    /// The outline in device space, relative to the glyph origin.
    pub path: BezPath,
    /// Whether the outline must be stroked as a hairline instead of filled.
    pub is_hairline: bool,
}

/// A glyph that is drawn by replaying recorded commands rather than from an outline or mask.
pub trait GlyphDrawable: Send + Sync + fmt::Debug {
    /// Bounds of the drawing in device space.
    fn bounds(&self) -> Rect;

    /// Approximate memory held by the drawable.
    fn approximate_bytes_used(&self) -> usize;

    /// Serializes the drawable for another process.
    fn to_bytes(&self) -> Vec<u8>;
}

/// A drawable known only by its serialized form, as received from another process.
#[derive(Clone, Debug, PartialEq)]
pub struct SerializedDrawable {
    bounds: Rect,
    bytes: Arc<[u8]>,
}

impl SerializedDrawable {
    /// Wraps serialized drawing commands.
    pub fn new(bounds: Rect, bytes: impl Into<Arc<[u8]>>) -> Self {
        Self {
            bounds,
            bytes: bytes.into(),
        }
    }

    /// The serialized commands.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl GlyphDrawable for SerializedDrawable {
    fn bounds(&self) -> Rect {
        self.bounds
    }

    fn approximate_bytes_used(&self) -> usize {
        size_of::<Self>() + self.bytes.len()
    }

    fn to_bytes(&self) -> Vec<u8> {
        self.bytes.to_vec()
    }
}

/// A source of glyphs.
pub trait Typeface: Send + Sync + fmt::Debug {
    /// The process-unique id of this typeface.
    fn id(&self) -> TypefaceId;

    /// Number of glyphs in the typeface.
    fn glyph_count(&self) -> u32;

    /// Adjusts a rec to what the typeface can actually produce, e.g. downgrading LCD.
    fn filter_rec(&self, rec: &mut ScalerContextRec) {
        let _ = rec;
    }

    /// Creates a scaler context for the rec stored in `descriptor`.
    fn create_scaler_context(
        &self,
        effects: &StrikeEffects,
        descriptor: &Descriptor,
    ) -> Result<Box<dyn ScalerContext>, ScalerError>;
}

/// Generates glyph data for a single strike.
///
/// A context is only ever used by one thread at a time, under its strike's lock.
pub trait ScalerContext: Send {
    /// Vertical metrics of the strike.
    fn font_metrics(&self) -> FontMetrics;

    /// Computes the metrics of a glyph. Unknown glyphs produce empty metrics.
    fn make_glyph(&mut self, id: PackedGlyphId) -> GlyphMetrics;

    /// Renders a glyph into an image matching `metrics`.
    fn generate_image(&mut self, id: PackedGlyphId, metrics: &GlyphMetrics) -> Option<Vec<u8>>;

    /// Produces a glyph's outline.
    fn generate_path(&mut self, id: PackedGlyphId) -> Option<GlyphPath>;

    /// Produces a glyph's drawable, for glyphs that are not plain outlines.
    fn generate_drawable(&mut self, id: PackedGlyphId) -> Option<Arc<dyn GlyphDrawable>> {
        let _ = id;
        None
    }
}

/// An error produced while creating a scaler context.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ScalerError {
    /// The font data could not be parsed.
    InvalidFont,
    /// The descriptor holds no usable rec.
    MissingRec,
    /// The request needs something the scaler does not implement.
    Unsupported(&'static str),
}

impl fmt::Display for ScalerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidFont => f.write_str("font data could not be parsed"),
            Self::MissingRec => f.write_str("descriptor holds no scaler context rec"),
            Self::Unsupported(what) => write!(f, "unsupported scaler request: {what}"),
        }
    }
}

impl core::error::Error for ScalerError {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::font::PixelGeometry;
    use crate::testing::FakeTypeface;

    fn font(size: f32) -> Font {
        Font::new(FakeTypeface::new(), size)
    }

    #[test]
    fn rec_has_no_padding() {
        assert_eq!(size_of::<ScalerContextRec>(), 52);
    }

    #[test]
    fn lcd_needs_known_geometry_and_axis_alignment() {
        let lcd = font(12.0).with_edging(Edging::SubpixelAntiAlias);
        let paint = Paint::default();
        let flags = ScalerContextFlags::NONE;

        let unknown = SurfaceProps::default();
        let rec = ScalerContextRec::new(&lcd, &paint, &unknown, flags, Affine::IDENTITY);
        assert_eq!(rec.mask_format(), MaskFormat::A8);

        let bgr = SurfaceProps {
            pixel_geometry: PixelGeometry::BgrHorizontal,
            ..SurfaceProps::default()
        };
        let rec = ScalerContextRec::new(&lcd, &paint, &bgr, flags, Affine::IDENTITY);
        assert_eq!(rec.mask_format(), MaskFormat::Lcd16);
        assert!(rec.flags.contains(RecFlags::LCD_BGR));

        let rotated = ScalerContextRec::new(&lcd, &paint, &bgr, flags, Affine::rotate(0.3));
        assert_eq!(rotated.mask_format(), MaskFormat::A8);
        assert!(!rotated.flags.contains(RecFlags::LCD_BGR));
    }

    #[test]
    fn similar_colors_share_luminance() {
        let f = font(12.0);
        let props = SurfaceProps::default();
        let rec = |font: &Font, paint: &Paint| {
            ScalerContextRec::new(font, paint, &props, ScalerContextFlags::NONE, Affine::IDENTITY)
        };
        let mut paint = Paint {
            color: Color::from_rgba8(0x80, 0x80, 0x80, 0xFF),
            ..Paint::default()
        };
        let a = rec(&f, &paint);
        paint.color = Color::from_rgba8(0x82, 0x81, 0x80, 0xFF);
        let b = rec(&f, &paint);
        assert_eq!(a, b);

        let bw = f.clone().with_edging(Edging::Alias);
        assert_eq!(rec(&bw, &paint).luminance_color, 0);
    }

    #[test]
    fn fill_ignores_stroke_parameters() {
        let f = font(12.0);
        let props = SurfaceProps::default();
        let flags = ScalerContextFlags::NONE;
        let mut paint = Paint::default();
        let a = ScalerContextRec::new(&f, &paint, &props, flags, Affine::IDENTITY);
        paint.stroke = crate::kurbo::Stroke::new(3.0).with_join(Join::Round);
        let b = ScalerContextRec::new(&f, &paint, &props, flags, Affine::IDENTITY);
        assert_eq!(a, b);
        assert_eq!(a.frame_width, -1.0);
    }

    #[test]
    fn matrix_combines_text_and_device_transforms() {
        let f = font(10.0).with_scale_x(2.0);
        let rec = ScalerContextRec::new(
            &f,
            &Paint::default(),
            &SurfaceProps::default(),
            ScalerContextFlags::NONE,
            Affine::scale(3.0),
        );
        assert_eq!(rec.matrix().as_coeffs(), [60.0, 0.0, 0.0, 30.0, 0.0, 0.0]);
    }
}
