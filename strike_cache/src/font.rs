// Copyright 2025 the Strike Cache Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The rendering request a strike is keyed from: font, paint and surface properties.

use core::fmt;
use std::sync::Arc;

use crate::buffer::WriteBuffer;
use crate::kurbo::Stroke;
use crate::peniko::Color;
use crate::scaler::Typeface;

/// How glyph edges are rasterized.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum Edging {
    /// One bit per pixel.
    Alias,
    /// Grayscale coverage.
    #[default]
    AntiAlias,
    /// Per-channel (LCD) coverage.
    SubpixelAntiAlias,
}

/// Outline hinting strength.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Hinting {
    /// No hinting.
    None = 0,
    /// Vertical-only hinting.
    Slight = 1,
    /// The font's default hinting.
    #[default]
    Normal = 2,
    /// Hinting on both axes.
    Full = 3,
}

impl Hinting {
    /// Decodes a hinting level stored in a scaler context rec.
    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0 => Self::None,
            1 => Self::Slight,
            2 => Self::Normal,
            3 => Self::Full,
            _ => return None,
        })
    }
}

/// A typeface at a size, with the text-level rendering options that affect glyph shapes.
#[derive(Clone, Debug)]
pub struct Font {
    typeface: Arc<dyn Typeface>,
    size: f32,
    scale_x: f32,
    skew_x: f32,
    edging: Edging,
    hinting: Hinting,
    subpixel: bool,
    linear_metrics: bool,
    embolden: bool,
    embedded_bitmaps: bool,
    force_auto_hinting: bool,
}

impl Font {
    /// Creates a font for `typeface` at `size` with default options.
    ///
    /// Negative or non-finite sizes are treated as zero.
    pub fn new(typeface: Arc<dyn Typeface>, size: f32) -> Self {
        Self {
            typeface,
            size: if size.is_finite() { size.max(0.0) } else { 0.0 },
            scale_x: 1.0,
            skew_x: 0.0,
            edging: Edging::default(),
            hinting: Hinting::default(),
            subpixel: false,
            linear_metrics: false,
            embolden: false,
            embedded_bitmaps: true,
            force_auto_hinting: false,
        }
    }

    /// The typeface.
    pub fn typeface(&self) -> &Arc<dyn Typeface> {
        &self.typeface
    }

    /// Text size in points.
    pub fn size(&self) -> f32 {
        self.size
    }

    /// Horizontal scale applied before the device matrix.
    pub fn scale_x(&self) -> f32 {
        self.scale_x
    }

    /// Horizontal skew applied before the device matrix.
    pub fn skew_x(&self) -> f32 {
        self.skew_x
    }

    /// Edge rasterization mode.
    pub fn edging(&self) -> Edging {
        self.edging
    }

    /// Hinting level.
    pub fn hinting(&self) -> Hinting {
        self.hinting
    }

    /// Whether glyphs are positioned at subpixel offsets.
    pub fn is_subpixel(&self) -> bool {
        self.subpixel
    }

    /// Whether advances are taken from unhinted outlines.
    pub fn is_linear_metrics(&self) -> bool {
        self.linear_metrics
    }

    /// Whether outlines are synthetically emboldened.
    pub fn is_embolden(&self) -> bool {
        self.embolden
    }

    /// Whether embedded bitmap strikes may be used.
    pub fn is_embedded_bitmaps(&self) -> bool {
        self.embedded_bitmaps
    }

    /// Whether the autohinter is preferred over the font's own instructions.
    pub fn is_force_auto_hinting(&self) -> bool {
        self.force_auto_hinting
    }

    /// Sets the text size.
    pub fn with_size(mut self, size: f32) -> Self {
        self.size = if size.is_finite() { size.max(0.0) } else { 0.0 };
        self
    }

    /// Sets the horizontal scale.
    pub fn with_scale_x(mut self, scale_x: f32) -> Self {
        self.scale_x = scale_x;
        self
    }

    /// Sets the horizontal skew.
    pub fn with_skew_x(mut self, skew_x: f32) -> Self {
        self.skew_x = skew_x;
        self
    }

    /// Sets the edging mode.
    pub fn with_edging(mut self, edging: Edging) -> Self {
        self.edging = edging;
        self
    }

    /// Sets the hinting level.
    pub fn with_hinting(mut self, hinting: Hinting) -> Self {
        self.hinting = hinting;
        self
    }

    /// Enables or disables subpixel positioning.
    pub fn with_subpixel(mut self, subpixel: bool) -> Self {
        self.subpixel = subpixel;
        self
    }

    /// Enables or disables linear metrics.
    pub fn with_linear_metrics(mut self, linear_metrics: bool) -> Self {
        self.linear_metrics = linear_metrics;
        self
    }

    /// Enables or disables synthetic emboldening.
    pub fn with_embolden(mut self, embolden: bool) -> Self {
        self.embolden = embolden;
        self
    }

    /// Enables or disables embedded bitmaps.
    pub fn with_embedded_bitmaps(mut self, embedded_bitmaps: bool) -> Self {
        self.embedded_bitmaps = embedded_bitmaps;
        self
    }

    /// Enables or disables forced autohinting.
    pub fn with_force_auto_hinting(mut self, force_auto_hinting: bool) -> Self {
        self.force_auto_hinting = force_auto_hinting;
        self
    }
}

/// How a paint covers glyph geometry.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum PaintStyle {
    /// Fill the outline.
    #[default]
    Fill,
    /// Stroke the outline.
    Stroke,
    /// Fill and stroke the outline.
    StrokeAndFill,
}

/// The subset of paint state that influences glyph generation.
#[derive(Clone, Debug)]
pub struct Paint {
    /// Paint color; only its luminance reaches the cache key.
    pub color: Color,
    /// Fill or stroke.
    pub style: PaintStyle,
    /// Stroke parameters, ignored when filling. A zero width is a hairline.
    pub stroke: Stroke,
    /// Effect applied to glyph outlines.
    pub path_effect: Option<Arc<dyn Effect>>,
    /// Effect applied to glyph masks.
    pub mask_filter: Option<Arc<dyn Effect>>,
}

impl Default for Paint {
    fn default() -> Self {
        Self {
            color: Color::BLACK,
            style: PaintStyle::Fill,
            stroke: Stroke::new(0.0),
            path_effect: None,
            mask_filter: None,
        }
    }
}

impl Paint {
    /// Whether this paint strokes with a zero width.
    pub fn is_hairline(&self) -> bool {
        self.style != PaintStyle::Fill && self.stroke.width == 0.0
    }

    /// The effects carried into a strike.
    pub fn effects(&self) -> StrikeEffects {
        StrikeEffects {
            path_effect: self.path_effect.clone(),
            mask_filter: self.mask_filter.clone(),
        }
    }
}

/// Physical layout of a display's subpixels.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum PixelGeometry {
    /// Unknown layout; LCD text is downgraded to grayscale.
    #[default]
    Unknown,
    /// Horizontal red, green, blue.
    RgbHorizontal,
    /// Horizontal blue, green, red.
    BgrHorizontal,
    /// Vertical red, green, blue.
    RgbVertical,
    /// Vertical blue, green, red.
    BgrVertical,
}

impl PixelGeometry {
    pub(crate) fn is_bgr(self) -> bool {
        matches!(self, Self::BgrHorizontal | Self::BgrVertical)
    }

    pub(crate) fn is_vertical(self) -> bool {
        matches!(self, Self::RgbVertical | Self::BgrVertical)
    }
}

/// Properties of the surface text is drawn to.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct SurfaceProps {
    /// Subpixel layout of the target.
    pub pixel_geometry: PixelGeometry,
    /// Requests metrics and masks that don't depend on the device.
    pub use_device_independent_fonts: bool,
}

/// Contrast and gamma adjustments requested by the drawing backend.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct ScalerContextFlags(u8);

impl ScalerContextFlags {
    /// No adjustments.
    pub const NONE: Self = Self(0);
    /// Apply a fake gamma curve to coverage.
    pub const FAKE_GAMMA: Self = Self(1);
    /// Boost coverage contrast.
    pub const BOOST_CONTRAST: Self = Self(2);
    /// Both adjustments.
    pub const FAKE_GAMMA_AND_BOOST_CONTRAST: Self = Self(3);

    /// Whether every flag in `other` is set.
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl core::ops::BitOr for ScalerContextFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// A path effect or mask filter that participates in a strike's identity.
///
/// Effects are keyed by their type name and flattened parameters, so two effects that
/// flatten identically share strikes.
pub trait Effect: Send + Sync + fmt::Debug {
    /// A stable name for the effect's type.
    fn type_name(&self) -> &str;

    /// Writes the effect's parameters.
    fn flatten(&self, buffer: &mut WriteBuffer);
}

/// The effects a strike's scaler context needs in addition to its descriptor.
#[derive(Clone, Debug, Default)]
pub struct StrikeEffects {
    /// Effect applied to glyph outlines.
    pub path_effect: Option<Arc<dyn Effect>>,
    /// Effect applied to glyph masks.
    pub mask_filter: Option<Arc<dyn Effect>>,
}

impl StrikeEffects {
    /// Whether no effect is present.
    pub fn is_empty(&self) -> bool {
        self.path_effect.is_none() && self.mask_filter.is_none()
    }
}
