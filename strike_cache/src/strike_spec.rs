// Copyright 2025 the Strike Cache Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Turning a drawing request into the key of the strike that serves it.

use std::sync::Arc;

use crate::descriptor::Descriptor;
use crate::font::{
    Edging, Font, Hinting, Paint, PaintStyle, ScalerContextFlags, StrikeEffects, SurfaceProps,
};
use crate::kurbo::Affine;
use crate::scaler::{ScalerContext, ScalerContextRec, ScalerError, Typeface};
use crate::strike::Strike;
use crate::strike_cache::{ExclusiveStrikePtr, StrikeCache, DEFAULT_POINT_SIZE_LIMIT};

/// Text size outlines are cached at; path strikes rescale by
/// [`StrikeSpec::strike_to_source_ratio`].
pub const CANONICAL_PATH_TEXT_SIZE: f32 = 64.0;

/// Everything needed to find or build a strike: its descriptor, typeface and effects.
#[derive(Clone, Debug)]
pub struct StrikeSpec {
    descriptor: Descriptor,
    typeface: Arc<dyn Typeface>,
    effects: StrikeEffects,
    strike_to_source_ratio: f32,
}

impl StrikeSpec {
    /// A strike for rendering masks through `device_matrix`.
    pub fn make_mask(
        font: &Font,
        paint: &Paint,
        surface_props: &SurfaceProps,
        scaler_flags: ScalerContextFlags,
        device_matrix: Affine,
    ) -> Self {
        Self::build(font, paint, surface_props, scaler_flags, device_matrix, 1.0)
    }

    /// A strike of outlines at a canonical size, shared across device scales.
    pub fn make_path(
        font: &Font,
        paint: &Paint,
        surface_props: &SurfaceProps,
        scaler_flags: ScalerContextFlags,
    ) -> Self {
        let (path_font, path_paint, ratio) = setup_for_paths(font, paint);
        let mut spec = Self::build(
            &path_font,
            &path_paint,
            surface_props,
            scaler_flags,
            Affine::IDENTITY,
            ratio,
        );
        let mut rec = *spec.descriptor.rec();
        rec.ignore_luminance();
        spec.descriptor = Descriptor::new(&rec, &spec.effects);
        spec
    }

    /// A device-independent strike for measuring text.
    pub fn make_canonicalized(font: &Font, paint: Option<&Paint>) -> Self {
        let paint = paint.cloned().unwrap_or_default();
        let props = SurfaceProps::default();
        let flags = ScalerContextFlags::FAKE_GAMMA_AND_BOOST_CONTRAST;
        if Self::should_draw_as_path(&paint, font, Affine::IDENTITY, DEFAULT_POINT_SIZE_LIMIT) {
            Self::make_path(font, &paint, &props, flags)
        } else {
            Self::make_mask(font, &paint, &props, flags, Affine::IDENTITY)
        }
    }

    /// Rebuilds a spec from a descriptor received from elsewhere.
    pub fn from_descriptor(descriptor: Descriptor, typeface: Arc<dyn Typeface>) -> Self {
        Self::from_parts(descriptor, typeface, StrikeEffects::default())
    }

    pub(crate) fn from_parts(
        descriptor: Descriptor,
        typeface: Arc<dyn Typeface>,
        effects: StrikeEffects,
    ) -> Self {
        Self {
            descriptor,
            typeface,
            effects,
            strike_to_source_ratio: 1.0,
        }
    }

    fn build(
        font: &Font,
        paint: &Paint,
        surface_props: &SurfaceProps,
        scaler_flags: ScalerContextFlags,
        device_matrix: Affine,
        strike_to_source_ratio: f32,
    ) -> Self {
        let rec = ScalerContextRec::new(font, paint, surface_props, scaler_flags, device_matrix);
        let effects = paint.effects();
        Self {
            descriptor: Descriptor::new(&rec, &effects),
            typeface: font.typeface().clone(),
            effects,
            strike_to_source_ratio,
        }
    }

    /// Whether glyphs are better drawn from outlines than cached as masks.
    ///
    /// Hairline strokes always draw as paths. Otherwise the text matrix is checked
    /// against `point_size_limit` along both axes.
    pub fn should_draw_as_path(
        paint: &Paint,
        font: &Font,
        matrix: Affine,
        point_size_limit: f32,
    ) -> bool {
        if paint.is_hairline() {
            return true;
        }
        let size = f64::from(font.size());
        let text = Affine::new([
            size * f64::from(font.scale_x()),
            0.0,
            size * f64::from(font.skew_x()),
            size,
            0.0,
            0.0,
        ]);
        let [a, b, c, d, _, _] = (matrix * text).as_coeffs();
        let limit = f64::from(point_size_limit);
        let limit2 = limit * limit;
        a * a + b * b > limit2 || c * c + d * d > limit2
    }

    /// The strike's key.
    pub fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }

    /// The typeface glyphs come from.
    pub fn typeface(&self) -> &Arc<dyn Typeface> {
        &self.typeface
    }

    /// Effects applied by the scaler.
    pub fn effects(&self) -> &StrikeEffects {
        &self.effects
    }

    /// Scale from strike glyph space back to the requested text size.
    pub fn strike_to_source_ratio(&self) -> f32 {
        self.strike_to_source_ratio
    }

    /// Builds a scaler context for this spec.
    pub fn create_scaler_context(&self) -> Result<Box<dyn ScalerContext>, ScalerError> {
        self.typeface
            .create_scaler_context(&self.effects, &self.descriptor)
    }

    /// Finds or creates the strike in `cache`.
    pub fn find_or_create_strike(&self, cache: &StrikeCache) -> Option<Arc<Strike>> {
        cache.find_or_create_strike(self)
    }

    /// Finds or creates the strike in `cache`, checked out for exclusive use.
    pub fn find_or_create_exclusive_strike<'a>(
        &self,
        cache: &'a StrikeCache,
    ) -> Option<ExclusiveStrikePtr<'a>> {
        cache.find_or_create_strike_exclusive(&self.descriptor, &self.effects, &self.typeface)
    }
}

/// Normalizes a font and paint for outline extraction. Returns the ratio that restores
/// the original size.
fn setup_for_paths(font: &Font, paint: &Paint) -> (Font, Paint, f32) {
    let edging = match font.edging() {
        Edging::SubpixelAntiAlias => Edging::AntiAlias,
        other => other,
    };
    let path_font = font
        .clone()
        .with_size(CANONICAL_PATH_TEXT_SIZE)
        .with_hinting(Hinting::None)
        .with_edging(edging)
        .with_embedded_bitmaps(false)
        .with_force_auto_hinting(false)
        // Subpixel offsets are applied when the outline is transformed to the device.
        .with_subpixel(false);
    let path_paint = Paint {
        style: PaintStyle::Fill,
        path_effect: None,
        ..paint.clone()
    };
    (path_font, path_paint, font.size() / CANONICAL_PATH_TEXT_SIZE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::font::PixelGeometry;
    use crate::kurbo::Stroke;
    use crate::testing::FakeTypeface;

    fn props() -> SurfaceProps {
        SurfaceProps {
            pixel_geometry: PixelGeometry::RgbHorizontal,
            use_device_independent_fonts: false,
        }
    }

    #[test]
    fn equivalent_requests_share_a_key() {
        let typeface = FakeTypeface::new();
        let font = Font::new(typeface.clone(), 12.0).with_subpixel(true);
        let paint = Paint::default();
        let flags = ScalerContextFlags::NONE;

        let a = StrikeSpec::make_mask(&font, &paint, &props(), flags, Affine::scale(2.0));
        // Same linear part, different translation and float noise.
        let noisy = Affine::new([2.000_000_2, -0.0, 0.0, 1.999_999_9, 10.0, 20.0]);
        let b = StrikeSpec::make_mask(&font.clone(), &paint.clone(), &props(), flags, noisy);
        assert_eq!(a.descriptor(), b.descriptor());
        assert_eq!(a.descriptor().checksum(), b.descriptor().checksum());

        let c = StrikeSpec::make_mask(&font, &paint, &props(), flags, Affine::scale(3.0));
        assert_ne!(a.descriptor(), c.descriptor());
    }

    #[test]
    fn path_strikes_are_canonical() {
        let typeface = FakeTypeface::new();
        let small = Font::new(typeface.clone(), 12.0).with_subpixel(true);
        let large = small.clone().with_size(300.0).with_hinting(Hinting::Full);
        let paint = Paint::default();
        let flags = ScalerContextFlags::NONE;

        let a = StrikeSpec::make_path(&small, &paint, &props(), flags);
        let b = StrikeSpec::make_path(&large, &paint, &props(), flags);
        assert_eq!(a.descriptor(), b.descriptor());
        assert_eq!(a.strike_to_source_ratio(), 12.0 / 64.0);
        assert_eq!(b.strike_to_source_ratio(), 300.0 / 64.0);
        let rec = a.descriptor().rec();
        assert!(!rec.is_subpixel());
        assert_eq!(rec.text_size, CANONICAL_PATH_TEXT_SIZE);
        assert_eq!(rec.luminance_color, 0);
    }

    #[test]
    fn draw_as_path_thresholds() {
        let typeface = FakeTypeface::new();
        let paint = Paint::default();
        let font = Font::new(typeface, 100.0);
        assert!(!StrikeSpec::should_draw_as_path(&paint, &font, Affine::IDENTITY, 256.0));
        assert!(StrikeSpec::should_draw_as_path(&paint, &font, Affine::scale(3.0), 256.0));
        assert!(StrikeSpec::should_draw_as_path(
            &paint,
            &font,
            Affine::scale_non_uniform(1.0, 2.6),
            256.0
        ));

        let hairline = Paint {
            style: PaintStyle::Stroke,
            stroke: Stroke::new(0.0),
            ..Paint::default()
        };
        let tiny = font.clone().with_size(4.0);
        assert!(StrikeSpec::should_draw_as_path(&hairline, &tiny, Affine::IDENTITY, 256.0));
    }

    #[test]
    fn canonicalized_ignores_device() {
        let typeface = FakeTypeface::new();
        let font = Font::new(typeface, 12.0);
        let a = StrikeSpec::make_canonicalized(&font, None);
        let b = StrikeSpec::make_canonicalized(&font, Some(&Paint::default()));
        assert_eq!(a.descriptor(), b.descriptor());
        assert_eq!(a.descriptor().rec().post_matrix(), Affine::IDENTITY);

        let huge = font.with_size(1000.0);
        let path = StrikeSpec::make_canonicalized(&huge, None);
        assert_eq!(path.descriptor().rec().text_size, CANONICAL_PATH_TEXT_SIZE);
    }
}
