// Copyright 2025 the Strike Cache Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! A synthetic typeface whose scaler counts every call.
//!
//! Glyph shapes are derived from the glyph id and text size, so results are predictable
//! without font files:
//!
//! - [`EMPTY_GLYPH`] has an advance but no pixels and no outline.
//! - [`LARGE_GLYPH`] is too wide for an atlas.
//! - [`DRAWABLE_GLYPH`] is the only glyph with a drawable.
//! - Every other id below [`FAKE_GLYPH_COUNT`] is a rectangle; ids past it are empty.

use core::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::buffer::WriteBuffer;
use crate::descriptor::Descriptor;
use crate::font::{Effect, Font, Paint, ScalerContextFlags, StrikeEffects, SurfaceProps};
use crate::glyph::{GlyphMetrics, PackedGlyphId};
use crate::kurbo::{Affine, BezPath, Rect, Shape};
use crate::scaler::{
    FontMetrics, GlyphDrawable, GlyphPath, ScalerContext, ScalerContextRec, ScalerError,
    SerializedDrawable, Typeface, TypefaceId,
};
use crate::strike::Strike;
use crate::strike_spec::StrikeSpec;

/// A glyph with an advance but nothing to draw.
pub const EMPTY_GLYPH: u16 = 32;
/// A glyph wider than any atlas slot.
pub const LARGE_GLYPH: u16 = 900;
/// The glyph that produces a drawable.
pub const DRAWABLE_GLYPH: u16 = 1000;
/// Number of glyphs the fake typeface claims to have.
pub const FAKE_GLYPH_COUNT: u32 = 2048;

/// Calls made into scaler contexts of one [`FakeTypeface`].
#[derive(Debug, Default)]
pub struct ScalerCounters {
    contexts: AtomicUsize,
    glyphs: AtomicUsize,
    images: AtomicUsize,
    paths: AtomicUsize,
    drawables: AtomicUsize,
}

impl ScalerCounters {
    /// Scaler contexts created.
    pub fn contexts(&self) -> usize {
        self.contexts.load(Ordering::Relaxed)
    }

    /// Calls to [`ScalerContext::make_glyph`].
    pub fn glyphs(&self) -> usize {
        self.glyphs.load(Ordering::Relaxed)
    }

    /// Calls to [`ScalerContext::generate_image`].
    pub fn images(&self) -> usize {
        self.images.load(Ordering::Relaxed)
    }

    /// Calls to [`ScalerContext::generate_path`].
    pub fn paths(&self) -> usize {
        self.paths.load(Ordering::Relaxed)
    }

    /// Calls to [`ScalerContext::generate_drawable`].
    pub fn drawables(&self) -> usize {
        self.drawables.load(Ordering::Relaxed)
    }

    fn bump(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// A typeface of synthetic rectangular glyphs.
#[derive(Debug)]
pub struct FakeTypeface {
    id: TypefaceId,
    fail: bool,
    counters: Arc<ScalerCounters>,
}

impl FakeTypeface {
    /// A typeface with a fresh id.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            id: TypefaceId::new(),
            fail: false,
            counters: Arc::default(),
        })
    }

    /// A typeface whose scaler contexts can't be created.
    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            id: TypefaceId::new(),
            fail: true,
            counters: Arc::default(),
        })
    }

    /// Calls made so far.
    pub fn counters(&self) -> &ScalerCounters {
        &self.counters
    }
}

impl Typeface for FakeTypeface {
    fn id(&self) -> TypefaceId {
        self.id
    }

    fn glyph_count(&self) -> u32 {
        FAKE_GLYPH_COUNT
    }

    fn create_scaler_context(
        &self,
        _effects: &StrikeEffects,
        descriptor: &Descriptor,
    ) -> Result<Box<dyn ScalerContext>, ScalerError> {
        if self.fail {
            return Err(ScalerError::Unsupported("fake typeface configured to fail"));
        }
        ScalerCounters::bump(&self.counters.contexts);
        Ok(Box::new(FakeScaler {
            rec: *descriptor.rec(),
            counters: self.counters.clone(),
        }))
    }
}

struct FakeScaler {
    rec: ScalerContextRec,
    counters: Arc<ScalerCounters>,
}

impl FakeScaler {
    fn size(&self) -> f64 {
        let [_, _, c, d, _, _] = self.rec.matrix().as_coeffs();
        c.hypot(d)
    }

    /// Outline bounds in device space, y down.
    fn outline_bounds(&self, glyph_id: u16) -> Option<Rect> {
        if glyph_id == EMPTY_GLYPH || u32::from(glyph_id) >= FAKE_GLYPH_COUNT {
            return None;
        }
        let size = self.size();
        let width = if glyph_id == LARGE_GLYPH {
            300.0
        } else {
            0.5 * size + f64::from(glyph_id % 3)
        };
        Some(Rect::new(0.0, -0.7 * size, width, 0.0))
    }

    #[expect(clippy::cast_possible_truncation, reason = "advances are small")]
    fn advance(&self, glyph_id: u16) -> f32 {
        let size = self.size();
        let advance = match self.outline_bounds(glyph_id) {
            Some(bounds) => bounds.width() + 0.1 * size,
            None => 0.25 * size,
        };
        advance as f32
    }
}

impl ScalerContext for FakeScaler {
    #[expect(clippy::cast_possible_truncation, reason = "text sizes fit in f32")]
    fn font_metrics(&self) -> FontMetrics {
        let size = self.size() as f32;
        FontMetrics {
            top: -0.9 * size,
            ascent: -0.8 * size,
            descent: 0.2 * size,
            bottom: 0.3 * size,
            leading: 0.1 * size,
            average_width: 0.5 * size,
            x_min: 0.0,
            x_max: 300.0,
            x_height: 0.5 * size,
            cap_height: 0.7 * size,
            underline_position: 0.1 * size,
            underline_thickness: 0.05 * size,
        }
    }

    fn make_glyph(&mut self, id: PackedGlyphId) -> GlyphMetrics {
        ScalerCounters::bump(&self.counters.glyphs);
        let glyph_id = id.glyph_id();
        let advance = self.advance(glyph_id);
        let format = self.rec.mask_format();
        match self.outline_bounds(glyph_id) {
            Some(bounds) => {
                let offset = id.subpixel_offset();
                GlyphMetrics::from_bounds(advance, 0.0, bounds + offset.to_vec2(), format)
            }
            None => GlyphMetrics {
                advance_x: advance,
                ..GlyphMetrics::empty(format)
            },
        }
    }

    fn generate_image(&mut self, id: PackedGlyphId, metrics: &GlyphMetrics) -> Option<Vec<u8>> {
        ScalerCounters::bump(&self.counters.images);
        #[expect(clippy::cast_possible_truncation, reason = "only a fill pattern")]
        let fill = id.glyph_id() as u8;
        Some(vec![fill; metrics.image_size()])
    }

    fn generate_path(&mut self, id: PackedGlyphId) -> Option<GlyphPath> {
        ScalerCounters::bump(&self.counters.paths);
        let bounds = self.outline_bounds(id.glyph_id())?;
        Some(GlyphPath {
            path: bounds.to_path(0.1),
            is_hairline: false,
        })
    }

    fn generate_drawable(&mut self, id: PackedGlyphId) -> Option<Arc<dyn GlyphDrawable>> {
        ScalerCounters::bump(&self.counters.drawables);
        if id.glyph_id() != DRAWABLE_GLYPH {
            return None;
        }
        let bounds = self.outline_bounds(DRAWABLE_GLYPH)?;
        Some(Arc::new(SerializedDrawable::new(bounds, vec![0xD, 0xA, 0x1, 0x7])))
    }
}

/// An effect identified by name and a fixed payload.
#[derive(Clone, Debug)]
pub struct FakeEffect {
    name: &'static str,
    payload: Vec<u8>,
}

impl FakeEffect {
    /// Creates an effect.
    pub fn new(name: &'static str, payload: impl Into<Vec<u8>>) -> Arc<Self> {
        Arc::new(Self {
            name,
            payload: payload.into(),
        })
    }
}

impl Effect for FakeEffect {
    fn type_name(&self) -> &str {
        self.name
    }

    fn flatten(&self, buffer: &mut WriteBuffer) {
        buffer.write_byte_array(&self.payload);
    }
}

/// A mask strike spec for `typeface` at `size`, with default paint and no device transform.
pub fn mask_spec(typeface: &Arc<FakeTypeface>, size: f32) -> StrikeSpec {
    let font = Font::new(typeface.clone(), size);
    StrikeSpec::make_mask(
        &font,
        &Paint::default(),
        &SurfaceProps::default(),
        ScalerContextFlags::NONE,
        Affine::IDENTITY,
    )
}

/// A strike outside any cache, for exercising glyph logic directly.
///
/// # Panics
///
/// Panics if `typeface` was created with [`FakeTypeface::failing`].
pub fn fake_strike(typeface: &Arc<FakeTypeface>, size: f32) -> Arc<Strike> {
    let spec = mask_spec(typeface, size);
    let scaler = spec
        .create_scaler_context()
        .expect("fake typefaces create scaler contexts unless told to fail");
    Arc::new(Strike::new(spec, scaler, None, None))
}

/// A path that isn't a rectangle, for buffer and wire tests.
pub fn sample_path() -> BezPath {
    let mut path = BezPath::new();
    path.move_to((0.0, 0.0));
    path.line_to((10.0, 0.0));
    path.quad_to((12.0, 5.0), (10.0, 10.0));
    path.curve_to((7.0, 12.0), (3.0, 12.0), (0.0, 10.0));
    path.close_path();
    path
}
