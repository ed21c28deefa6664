// Copyright 2025 the Strike Cache Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Strike Cache keeps per-glyph rendering data for every font configuration a renderer uses.
//!
//! A *strike* is the set of glyphs produced by one typeface at one size, transform and set of
//! rendering options. Strikes are identified by a [`Descriptor`] built from a [`StrikeSpec`],
//! and live in a [`StrikeCache`] that evicts the least recently used strikes once its memory or
//! count budget is exceeded.
//!
//! Glyphs are produced lazily by a [`ScalerContext`] the first time they are asked for. Each
//! strike answers "how should this glyph be drawn?" with a [`GlyphDigest`], so that text
//! painters can sort a run into atlas masks, paths and drawables without touching the scaler
//! again.
//!
//! The [`remote`] module splits the cache across two processes: one that knows the fonts and
//! one that only rasterizes.
//!
//! ## Features
//!
//! - `testing`: Exposes the [`testing`] module with a synthetic typeface and call counting.

// LINEBENDER LINT SET - lib.rs - v3
// See https://linebender.org/wiki/canonical-lints/
// These lints shouldn't apply to examples or tests.
#![cfg_attr(not(test), warn(unused_crate_dependencies))]
// These lints shouldn't apply to examples.
#![warn(clippy::print_stdout, clippy::print_stderr)]
// Targeting e.g. 32-bit means structs containing usize can give false positives for 64-bit.
#![cfg_attr(target_pointer_width = "64", warn(clippy::trivially_copy_pass_by_ref))]
// END LINEBENDER LINT SET
#![cfg_attr(docsrs, feature(doc_cfg))]

pub use peniko;
pub use peniko::kurbo;
pub use skrifa;

mod math;

pub mod buffer;
pub mod descriptor;
pub mod font;
pub mod glyph;
pub mod gpu;
pub mod remote;
pub mod scaler;
pub mod skrifa_scaler;
pub mod strike;
pub mod strike_cache;
pub mod strike_spec;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use descriptor::Descriptor;
pub use font::{Font, Paint, StrikeEffects, SurfaceProps};
pub use glyph::{ActionType, Glyph, GlyphAction, GlyphDigest, PackedGlyphId, RoundingSpec};
pub use gpu::{StrikeForGpu, StrikeForGpuCache, StrikePromise};
pub use scaler::{ScalerContext, ScalerContextRec, Typeface, TypefaceId};
pub use skrifa_scaler::SkrifaTypeface;
pub use strike::{Strike, StrikeGuard};
pub use strike_cache::{ExclusiveStrikePtr, StrikeCache, StrikeCacheConfig, StrikePinner};
pub use strike_spec::StrikeSpec;
