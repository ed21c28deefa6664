// Copyright 2025 the Strike Cache Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! A scaler backed by Skrifa, producing outlines and metrics from font files.
//!
//! There is no rasterizer here: glyph images are never produced, so mask lookups fall back to
//! paths the way oversized glyphs do.

use core::fmt;
use std::sync::Arc;

use self_cell::self_cell;
use skrifa::instance::{LocationRef, Size};
use skrifa::metrics::GlyphMetrics as SkrifaGlyphMetrics;
use skrifa::outline::{DrawSettings, OutlinePen};
use skrifa::{FontRef, GlyphId, MetadataProvider, OutlineGlyphCollection};

use crate::descriptor::Descriptor;
use crate::font::StrikeEffects;
use crate::glyph::{GlyphMetrics, PackedGlyphId};
use crate::kurbo::{Affine, BezPath, Point, Rect};
use crate::peniko::FontData;
use crate::scaler::{
    FontMetrics, GlyphPath, ScalerContext, ScalerContextRec, ScalerError, Typeface, TypefaceId,
};

/// A [`Typeface`] reading glyphs from font data with Skrifa.
pub struct SkrifaTypeface {
    id: TypefaceId,
    font: FontData,
    glyph_count: u32,
}

impl SkrifaTypeface {
    /// Parses `font`, failing if it isn't a readable font file.
    pub fn new(font: FontData) -> Result<Arc<Self>, ScalerError> {
        let font_ref = font_ref(&font).ok_or(ScalerError::InvalidFont)?;
        let glyph_count = font_ref
            .metrics(Size::unscaled(), LocationRef::default())
            .glyph_count;
        Ok(Arc::new(Self {
            id: TypefaceId::new(),
            font,
            glyph_count: u32::from(glyph_count),
        }))
    }

    /// The font data glyphs are read from.
    pub fn font(&self) -> &FontData {
        &self.font
    }
}

impl fmt::Debug for SkrifaTypeface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SkrifaTypeface")
            .field("id", &self.id)
            .field("index", &self.font.index)
            .field("glyph_count", &self.glyph_count)
            .finish_non_exhaustive()
    }
}

impl Typeface for SkrifaTypeface {
    fn id(&self) -> TypefaceId {
        self.id
    }

    fn glyph_count(&self) -> u32 {
        self.glyph_count
    }

    fn create_scaler_context(
        &self,
        _effects: &StrikeEffects,
        descriptor: &Descriptor,
    ) -> Result<Box<dyn ScalerContext>, ScalerError> {
        let rec = *descriptor.rec();
        if !rec.text_size.is_finite() || rec.text_size <= 0.0 {
            return Err(ScalerError::Unsupported("non-positive text size"));
        }
        let font_ref = font_ref(&self.font).ok_or(ScalerError::InvalidFont)?;
        let units_per_em = font_ref
            .metrics(Size::unscaled(), LocationRef::default())
            .units_per_em;
        if units_per_em == 0 {
            return Err(ScalerError::InvalidFont);
        }
        // Outlines are drawn in font units with y up.
        let transform = rec.matrix()
            * Affine::scale_non_uniform(1.0, -1.0)
            * Affine::scale(1.0 / f64::from(units_per_em));
        let font_metrics = text_metrics(&font_ref, rec.text_size);
        let tables = ParsedFont::try_new(self.font.clone(), parse_tables)?;
        Ok(Box::new(SkrifaScaler {
            tables,
            rec,
            transform,
            font_metrics,
            pen: OutlinePath::new(),
        }))
    }
}

fn font_ref(font: &FontData) -> Option<FontRef<'_>> {
    FontRef::from_index(font.data.as_ref(), font.index).ok()
}

/// The tables a scaler reads for every glyph.
struct FontTables<'a> {
    outlines: OutlineGlyphCollection<'a>,
    glyph_metrics: SkrifaGlyphMetrics<'a>,
}

fn parse_tables(font: &FontData) -> Result<FontTables<'_>, ScalerError> {
    let font_ref = font_ref(font).ok_or(ScalerError::InvalidFont)?;
    Ok(FontTables {
        outlines: font_ref.outline_glyphs(),
        glyph_metrics: font_ref.glyph_metrics(Size::unscaled(), LocationRef::default()),
    })
}

self_cell!(
    /// Font data together with the tables parsed from it.
    struct ParsedFont {
        owner: FontData,

        #[not_covariant]
        dependent: FontTables,
    }
);

/// Metrics at `size`, converted to a y-down coordinate system.
fn text_metrics(font_ref: &FontRef<'_>, size: f32) -> FontMetrics {
    let metrics = font_ref.metrics(Size::new(size), LocationRef::default());
    let (top, bottom, x_min, x_max) = metrics.bounds.map_or((0.0, 0.0, 0.0, 0.0), |b| {
        (-b.y_max, -b.y_min, b.x_min, b.x_max)
    });
    let (underline_position, underline_thickness) = metrics
        .underline
        .map_or((0.0, 0.0), |u| (-u.offset, u.thickness));
    FontMetrics {
        top,
        ascent: -metrics.ascent,
        descent: -metrics.descent,
        bottom,
        leading: metrics.leading,
        average_width: metrics.average_width.unwrap_or_default(),
        x_min,
        x_max,
        x_height: metrics.x_height.unwrap_or_default(),
        cap_height: metrics.cap_height.unwrap_or_default(),
        underline_position,
        underline_thickness,
    }
}

struct SkrifaScaler {
    tables: ParsedFont,
    rec: ScalerContextRec,
    /// Font units to device space.
    transform: Affine,
    font_metrics: FontMetrics,
    pen: OutlinePath,
}

impl SkrifaScaler {
    /// Draws the outline of `glyph_id` into the pen, in font units.
    fn draw(&mut self, glyph_id: u16) -> bool {
        let pen = &mut self.pen;
        self.tables.with_dependent(|_, tables| {
            let Some(outline) = tables.outlines.get(GlyphId::new(u32::from(glyph_id))) else {
                return false;
            };
            pen.reuse();
            let settings = DrawSettings::unhinted(Size::unscaled(), LocationRef::default());
            match outline.draw(settings, pen) {
                Ok(_) => true,
                Err(err) => {
                    log::debug!("failed to draw glyph {glyph_id}: {err}");
                    false
                }
            }
        })
    }

    #[expect(
        clippy::cast_possible_truncation,
        reason = "advances are stored as f32 in glyph metrics"
    )]
    fn advance(&self, glyph_id: u16) -> f32 {
        let advance = self.tables.with_dependent(|_, tables| {
            tables
                .glyph_metrics
                .advance_width(GlyphId::new(u32::from(glyph_id)))
                .unwrap_or_default()
        });
        (self.transform * Point::new(f64::from(advance), 0.0)).x as f32
    }
}

impl ScalerContext for SkrifaScaler {
    fn font_metrics(&self) -> FontMetrics {
        self.font_metrics
    }

    fn make_glyph(&mut self, id: PackedGlyphId) -> GlyphMetrics {
        let advance = self.advance(id.glyph_id());
        let format = self.rec.mask_format();
        if !self.draw(id.glyph_id()) || self.pen.path.elements().is_empty() {
            return GlyphMetrics {
                advance_x: advance,
                ..GlyphMetrics::empty(format)
            };
        }
        let bounds = self.transform.transform_rect_bbox(self.pen.bbox);
        GlyphMetrics::from_bounds(
            advance,
            0.0,
            bounds + id.subpixel_offset().to_vec2(),
            format,
        )
    }

    fn generate_image(&mut self, _id: PackedGlyphId, _metrics: &GlyphMetrics) -> Option<Vec<u8>> {
        None
    }

    fn generate_path(&mut self, id: PackedGlyphId) -> Option<GlyphPath> {
        if !self.draw(id.glyph_id()) {
            return None;
        }
        let mut path = self.pen.path.clone();
        path.apply_affine(self.transform);
        Some(GlyphPath {
            path,
            is_hairline: false,
        })
    }
}

struct OutlinePath {
    path: BezPath,
    bbox: Rect,
}

impl OutlinePath {
    fn new() -> Self {
        Self {
            path: BezPath::new(),
            bbox: Rect {
                x0: f64::INFINITY,
                y0: f64::INFINITY,
                x1: f64::NEG_INFINITY,
                y1: f64::NEG_INFINITY,
            },
        }
    }

    fn reuse(&mut self) {
        self.path.truncate(0);
        self.bbox = Rect {
            x0: f64::INFINITY,
            y0: f64::INFINITY,
            x1: f64::NEG_INFINITY,
            y1: f64::NEG_INFINITY,
        };
    }
}

impl OutlinePen for OutlinePath {
    #[inline]
    fn move_to(&mut self, x: f32, y: f32) {
        self.path.move_to((x, y));
        self.bbox = self.bbox.union_pt((x, y));
    }

    #[inline]
    fn line_to(&mut self, x: f32, y: f32) {
        self.path.line_to((x, y));
        self.bbox = self.bbox.union_pt((x, y));
    }

    #[inline]
    fn curve_to(&mut self, cx0: f32, cy0: f32, cx1: f32, cy1: f32, x: f32, y: f32) {
        self.path.curve_to((cx0, cy0), (cx1, cy1), (x, y));
        self.bbox = self.bbox.union_pt((cx0, cy0));
        self.bbox = self.bbox.union_pt((cx1, cy1));
        self.bbox = self.bbox.union_pt((x, y));
    }

    #[inline]
    fn quad_to(&mut self, cx: f32, cy: f32, x: f32, y: f32) {
        self.path.quad_to((cx, cy), (x, y));
        self.bbox = self.bbox.union_pt((cx, cy));
        self.bbox = self.bbox.union_pt((x, y));
    }

    #[inline]
    fn close(&mut self) {
        self.path.close_path();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peniko::Blob;

    #[test]
    fn garbage_is_not_a_font() {
        let font = FontData::new(Blob::from(vec![0_u8; 64]), 0);
        assert_eq!(
            SkrifaTypeface::new(font).unwrap_err(),
            ScalerError::InvalidFont
        );
    }

    #[test]
    fn tables_need_a_font() {
        let font = FontData::new(Blob::from(vec![0_u8; 16]), 0);
        assert!(matches!(
            ParsedFont::try_new(font, parse_tables),
            Err(ScalerError::InvalidFont)
        ));
    }

    #[test]
    fn pen_tracks_control_points() {
        let mut pen = OutlinePath::new();
        pen.move_to(0.0, 0.0);
        pen.quad_to(5.0, 10.0, 10.0, 0.0);
        pen.close();
        assert_eq!(pen.bbox, Rect::new(0.0, 0.0, 10.0, 10.0));
        pen.reuse();
        assert!(pen.path.elements().is_empty());
        assert!(pen.bbox.x0.is_infinite());
    }
}
