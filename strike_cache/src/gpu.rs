// Copyright 2025 the Strike Cache Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The interface glyph-painting code sees.
//!
//! Painters work against [`StrikeForGpu`] so the same code runs on a local [`Strike`] and on a
//! [`RemoteStrike`](crate::remote::RemoteStrike) that records what a remote client will need.

use core::fmt;
use std::sync::Arc;

use crate::buffer::{ReadBuffer, ReadError, WriteBuffer};
use crate::descriptor::Descriptor;
use crate::glyph::{ActionType, Glyph, GlyphAction, GlyphDigest, PackedGlyphId, RoundingSpec};
use crate::kurbo::Point;
use crate::remote::StrikeClient;
use crate::strike::{Strike, StrikeGuard};
use crate::strike_cache::StrikeCache;
use crate::strike_spec::StrikeSpec;

/// A locked strike, as seen by glyph painters.
pub trait GlyphPreparer {
    /// Returns the digest for `id`, deciding `action` the first time it is asked for.
    fn digest_for(&mut self, action: ActionType, id: PackedGlyphId) -> GlyphDigest;

    /// The glyph record behind a digest produced by this session's strike.
    fn glyph(&self, digest: &GlyphDigest) -> Option<&Glyph>;

    /// Makes sure the glyph's image has been attempted. Returns whether it exists.
    fn prepare_for_image(&mut self, id: PackedGlyphId) -> bool;

    /// Makes sure the glyph's outline has been attempted. Returns whether it exists.
    fn prepare_for_path(&mut self, id: PackedGlyphId) -> bool;

    /// Makes sure the glyph's drawable has been attempted. Returns whether it exists.
    fn prepare_for_drawable(&mut self, id: PackedGlyphId) -> bool;
}

impl GlyphPreparer for StrikeGuard<'_> {
    fn digest_for(&mut self, action: ActionType, id: PackedGlyphId) -> GlyphDigest {
        StrikeGuard::digest_for(self, action, id)
    }

    fn glyph(&self, digest: &GlyphDigest) -> Option<&Glyph> {
        StrikeGuard::glyph(self, digest)
    }

    fn prepare_for_image(&mut self, id: PackedGlyphId) -> bool {
        StrikeGuard::prepare_for_image(self, id)
    }

    fn prepare_for_path(&mut self, id: PackedGlyphId) -> bool {
        StrikeGuard::prepare_for_path(self, id)
    }

    fn prepare_for_drawable(&mut self, id: PackedGlyphId) -> bool {
        StrikeGuard::prepare_for_drawable(self, id)
    }
}

/// A strike that glyph painters can use, local or remote.
pub trait StrikeForGpu: Send + Sync + fmt::Debug {
    /// Locks the strike for a glyph preparation session. Dropping the session unlocks.
    fn lock(&self) -> Box<dyn GlyphPreparer + '_>;

    /// The key of the strike.
    fn descriptor(&self) -> &Descriptor;

    /// How positions are quantized for this strike.
    fn rounding_spec(&self) -> RoundingSpec;

    /// A promise that resolves back to this strike's data on the consuming side.
    fn strike_promise(self: Arc<Self>) -> StrikePromise;
}

impl StrikeForGpu for Strike {
    fn lock(&self) -> Box<dyn GlyphPreparer + '_> {
        Box::new(Strike::lock(self))
    }

    fn descriptor(&self) -> &Descriptor {
        Strike::descriptor(self)
    }

    fn rounding_spec(&self) -> RoundingSpec {
        Strike::rounding_spec(self)
    }

    fn strike_promise(self: Arc<Self>) -> StrikePromise {
        StrikePromise::from_strike(self)
    }
}

/// A source of [`StrikeForGpu`]s.
pub trait StrikeForGpuCache {
    /// Finds or creates the strike for `spec`. Returns `None` if it can't be built.
    fn find_or_create_scoped_strike(&self, spec: &StrikeSpec) -> Option<Arc<dyn StrikeForGpu>>;
}

impl StrikeForGpuCache for StrikeCache {
    fn find_or_create_scoped_strike(&self, spec: &StrikeSpec) -> Option<Arc<dyn StrikeForGpu>> {
        let strike: Arc<dyn StrikeForGpu> = self.find_or_create_strike(spec)?;
        Some(strike)
    }
}

#[derive(Clone, Debug)]
enum PromiseState {
    Strike(Arc<Strike>),
    Spec(Box<StrikeSpec>),
}

/// A strike, or the spec to find it with, resolved the first time it is needed.
///
/// Promises are created when text is recorded and resolved later, possibly on another thread
/// or after crossing a serialization boundary. The descriptor is available in both states.
#[derive(Clone, Debug)]
pub struct StrikePromise {
    state: PromiseState,
}

impl StrikePromise {
    /// A promise that is already resolved.
    pub fn from_strike(strike: Arc<Strike>) -> Self {
        Self {
            state: PromiseState::Strike(strike),
        }
    }

    /// A promise resolved on first use by looking `spec` up in a cache.
    pub fn from_spec(spec: StrikeSpec) -> Self {
        Self {
            state: PromiseState::Spec(Box::new(spec)),
        }
    }

    /// Whether the promise holds a strike.
    pub fn is_resolved(&self) -> bool {
        matches!(self.state, PromiseState::Strike(_))
    }

    /// Resolves against [`StrikeCache::current`].
    pub fn strike(&mut self) -> Option<&Arc<Strike>> {
        let cache = StrikeCache::current();
        self.strike_in(&cache)
    }

    /// Resolves against `cache`, keeping the strike for later calls.
    ///
    /// Returns `None`, and stays unresolved, if the strike can't be created.
    pub fn strike_in(&mut self, cache: &StrikeCache) -> Option<&Arc<Strike>> {
        if let PromiseState::Spec(spec) = &self.state {
            let strike = spec.find_or_create_strike(cache)?;
            self.state = PromiseState::Strike(strike);
        }
        match &self.state {
            PromiseState::Strike(strike) => Some(strike),
            PromiseState::Spec(_) => None,
        }
    }

    /// The key of the promised strike.
    pub fn descriptor(&self) -> &Descriptor {
        match &self.state {
            PromiseState::Strike(strike) => strike.descriptor(),
            PromiseState::Spec(spec) => spec.descriptor(),
        }
    }

    /// Lets go of the strike so the cache may evict it. The promise can be resolved again.
    pub fn reset_strike(&mut self) {
        if let PromiseState::Strike(strike) = &self.state {
            let spec = strike.strike_spec().clone();
            self.state = PromiseState::Spec(Box::new(spec));
        }
    }

    /// Writes the promise's descriptor.
    pub fn flatten(&self, buffer: &mut WriteBuffer) {
        self.descriptor().flatten(buffer);
    }

    /// Reads a promise written by [`StrikePromise::flatten`] and resolves it against `cache`.
    ///
    /// With a `client`, the descriptor's typeface id is translated from the server's. Returns
    /// `Ok(None)` when the strike is no longer cached; its glyphs should simply not be drawn.
    pub fn from_buffer(
        buffer: &mut ReadBuffer<'_>,
        client: Option<&StrikeClient>,
        cache: &StrikeCache,
    ) -> Result<Option<Self>, ReadError> {
        let mut descriptor = Descriptor::from_buffer(buffer)?;
        if let Some(client) = client {
            match client.translate_typeface_id(&descriptor) {
                Some(translated) => descriptor = translated,
                None => return Ok(None),
            }
        }
        Ok(cache.find_strike(&descriptor).map(Self::from_strike))
    }
}

/// A strike handed from one stage to the next, either owned or borrowed.
#[derive(Debug)]
pub enum StrikeRef<'a> {
    /// A strike this reference owns until it is taken.
    Owned(Option<Arc<Strike>>),
    /// A strike owned elsewhere.
    Borrowed(&'a dyn StrikeForGpu),
}

impl StrikeRef<'_> {
    /// Moves the owned strike out. Later calls, and borrowed references, return `None`.
    pub fn take_strike(&mut self) -> Option<Arc<Strike>> {
        match self {
            Self::Owned(strike) => strike.take(),
            Self::Borrowed(_) => None,
        }
    }

    /// The referenced strike, if it hasn't been taken.
    pub fn as_strike_for_gpu(&self) -> Option<&dyn StrikeForGpu> {
        match self {
            Self::Owned(strike) => strike.as_deref().map(|s| s as &dyn StrikeForGpu),
            Self::Borrowed(strike) => Some(*strike),
        }
    }
}

/// Glyphs of a run sorted by what the strike decided for one [`ActionType`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GlyphRunPlan {
    /// Accepted glyphs with the device position to draw them at.
    pub accepted: Vec<(PackedGlyphId, Point)>,
    /// Glyphs that need another drawing method, with their original positions.
    pub rejected: Vec<(u16, Point)>,
}

/// Sorts a run of positioned glyphs by the strike's verdict for `action`.
///
/// Dropped glyphs draw nothing and appear in neither list. Accepted glyphs of image actions
/// have their images prepared.
pub fn plan_glyph_run(
    strike: &dyn StrikeForGpu,
    action: ActionType,
    glyphs: &[(u16, Point)],
) -> GlyphRunPlan {
    let rounding = strike.rounding_spec();
    let mut session = strike.lock();
    let mut plan = GlyphRunPlan::default();
    for &(glyph_id, position) in glyphs {
        let id = rounding.packed_glyph_id(glyph_id, position);
        match session.digest_for(action, id).action_for(action) {
            GlyphAction::Accept => {
                if matches!(
                    action,
                    ActionType::DirectMask | ActionType::DirectMaskCpu | ActionType::Mask
                ) {
                    session.prepare_for_image(id);
                }
                plan.accepted.push((id, rounding.integral_position(position)));
            }
            GlyphAction::Reject => plan.rejected.push((glyph_id, position)),
            GlyphAction::Drop | GlyphAction::Unset => {}
        }
    }
    plan
}
