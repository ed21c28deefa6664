// Copyright 2025 the Strike Cache Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! A strike: every glyph realized so far for one [`StrikeSpec`].
//!
//! Glyph data lives behind the strike's own mutex. The strike's position in the cache's LRU
//! list is not stored here; the cache keeps it in its own nodes under the cache lock.

use core::fmt;
use core::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use hashbrown::HashMap;
use parking_lot::{Mutex, MutexGuard};

use crate::descriptor::Descriptor;
use crate::glyph::{
    ActionType, Glyph, GlyphAction, GlyphDigest, GlyphMetrics, PackedGlyphId, RoundingSpec,
};
use crate::scaler::{FontMetrics, GlyphDrawable, GlyphPath, ScalerContext};
use crate::strike_cache::{CacheLink, StrikePinner};
use crate::strike_spec::StrikeSpec;

/// Bookkeeping cost of one glyph beyond its payloads.
const GLYPH_OVERHEAD: usize =
    size_of::<Glyph>() + size_of::<GlyphDigest>() + size_of::<PackedGlyphId>();

/// Glyph records plus the digest table that indexes them.
///
/// Records are never removed, so a digest's index stays valid for the life of the store.
#[derive(Debug, Default)]
pub(crate) struct GlyphStore {
    digests: HashMap<PackedGlyphId, GlyphDigest>,
    glyphs: Vec<Glyph>,
    memory_used: usize,
}

impl GlyphStore {
    pub(crate) fn len(&self) -> usize {
        self.glyphs.len()
    }

    /// Bytes held by records and payloads.
    pub(crate) fn memory_used(&self) -> usize {
        self.memory_used
    }

    pub(crate) fn find(&self, id: PackedGlyphId) -> Option<GlyphDigest> {
        self.digests.get(&id).copied()
    }

    pub(crate) fn glyph(&self, index: usize) -> Option<&Glyph> {
        debug_assert!(
            index < self.glyphs.len(),
            "glyph index {index} out of range for {} glyphs",
            self.glyphs.len()
        );
        self.glyphs.get(index)
    }

    fn digest_at(&self, index: usize) -> GlyphDigest {
        let id = self.glyphs[index].id();
        self.digests[&id]
    }

    fn push(&mut self, id: PackedGlyphId, metrics: GlyphMetrics) -> usize {
        let index = self.glyphs.len();
        let glyph = Glyph::new(id, metrics);
        self.digests.insert(id, GlyphDigest::new(index, &glyph));
        self.glyphs.push(glyph);
        self.memory_used += GLYPH_OVERHEAD;
        index
    }

    /// Finds a glyph, asking the scaler for its metrics the first time.
    pub(crate) fn index_for(&mut self, id: PackedGlyphId, scaler: &mut dyn ScalerContext) -> usize {
        match self.find(id) {
            Some(digest) => digest.index(),
            None => self.push(id, scaler.make_glyph(id)),
        }
    }

    /// Finds a glyph, creating it with `metrics` if it is unknown.
    pub(crate) fn index_with_metrics(&mut self, id: PackedGlyphId, metrics: GlyphMetrics) -> usize {
        match self.find(id) {
            Some(digest) => digest.index(),
            None => self.push(id, metrics),
        }
    }

    fn sync_digest(&mut self, index: usize) {
        let glyph = &self.glyphs[index];
        if let Some(digest) = self.digests.get_mut(&glyph.id()) {
            digest.sync_attempts(glyph);
        }
    }

    pub(crate) fn digest_for(
        &mut self,
        action: ActionType,
        id: PackedGlyphId,
        scaler: &mut dyn ScalerContext,
    ) -> GlyphDigest {
        let index = self.index_for(id, scaler);
        let digest = self.digest_at(index);
        if digest.action_for(action) != GlyphAction::Unset {
            return digest;
        }

        let mask_verdict = |reject: bool| {
            if digest.is_empty() {
                GlyphAction::Drop
            } else if reject {
                GlyphAction::Reject
            } else {
                GlyphAction::Accept
            }
        };
        let verdict = match action {
            ActionType::DirectMask | ActionType::Mask => mask_verdict(!digest.fits_in_atlas()),
            // The CPU rasterizer has no atlas to fit into.
            ActionType::DirectMaskCpu => mask_verdict(false),
            ActionType::Sdft => mask_verdict(!digest.fits_in_atlas() || digest.is_color()),
            ActionType::Path => {
                if self.prepare_path(index, scaler) {
                    GlyphAction::Accept
                } else {
                    mask_verdict(true)
                }
            }
            ActionType::Drawable => {
                if self.prepare_drawable(index, scaler) {
                    GlyphAction::Accept
                } else {
                    mask_verdict(true)
                }
            }
        };

        let id = self.glyphs[index].id();
        self.sync_digest(index);
        let digest = self
            .digests
            .get_mut(&id)
            .map(|digest| {
                digest.set_action(action, verdict);
                *digest
            })
            .unwrap_or(digest);
        digest
    }

    pub(crate) fn prepare_image(&mut self, index: usize, scaler: &mut dyn ScalerContext) -> bool {
        self.memory_used += self.glyphs[index].set_image(scaler);
        self.sync_digest(index);
        self.glyphs[index].image().is_some()
    }

    pub(crate) fn prepare_path(&mut self, index: usize, scaler: &mut dyn ScalerContext) -> bool {
        self.memory_used += self.glyphs[index].set_path(scaler);
        self.sync_digest(index);
        self.glyphs[index].path().is_some()
    }

    pub(crate) fn prepare_drawable(
        &mut self,
        index: usize,
        scaler: &mut dyn ScalerContext,
    ) -> bool {
        self.memory_used += self.glyphs[index].set_drawable(scaler);
        self.sync_digest(index);
        self.glyphs[index].drawable().is_some()
    }

    pub(crate) fn merge_image(&mut self, index: usize, image: Option<Vec<u8>>) {
        self.memory_used += self.glyphs[index].set_image_from(image);
        self.sync_digest(index);
    }

    pub(crate) fn merge_path(&mut self, index: usize, path: Option<GlyphPath>) {
        self.memory_used += self.glyphs[index].set_path_from(path);
        self.sync_digest(index);
    }

    pub(crate) fn merge_drawable(
        &mut self,
        index: usize,
        drawable: Option<Arc<dyn GlyphDrawable>>,
    ) {
        self.memory_used += self.glyphs[index].set_drawable_from(drawable);
        self.sync_digest(index);
    }
}

struct StrikeState {
    scaler: Box<dyn ScalerContext>,
    glyphs: GlyphStore,
}

/// The cached glyphs of one typeface, size and set of rendering effects.
///
/// All glyph access goes through [`Strike::lock`]. Metadata accessors don't lock.
pub struct Strike {
    spec: StrikeSpec,
    rounding_spec: RoundingSpec,
    font_metrics: FontMetrics,
    pinner: Option<Box<dyn StrikePinner>>,
    base_memory: usize,
    memory_used: AtomicUsize,
    glyph_count: AtomicUsize,
    owner: OnceLock<CacheLink>,
    state: Mutex<StrikeState>,
}

impl Strike {
    /// Creates an empty strike.
    ///
    /// `font_metrics` overrides the scaler's metrics, for strikes whose data comes from
    /// another process.
    pub fn new(
        spec: StrikeSpec,
        scaler: Box<dyn ScalerContext>,
        font_metrics: Option<FontMetrics>,
        pinner: Option<Box<dyn StrikePinner>>,
    ) -> Self {
        let font_metrics = font_metrics.unwrap_or_else(|| scaler.font_metrics());
        let rounding_spec = RoundingSpec::from_rec(spec.descriptor().rec());
        let base_memory = size_of::<Self>() + spec.descriptor().len();
        Self {
            spec,
            rounding_spec,
            font_metrics,
            pinner,
            base_memory,
            memory_used: AtomicUsize::new(base_memory),
            glyph_count: AtomicUsize::new(0),
            owner: OnceLock::new(),
            state: Mutex::new(StrikeState {
                scaler,
                glyphs: GlyphStore::default(),
            }),
        }
    }

    /// Acquires the strike's lock.
    ///
    /// The lock is not re-entrant. Debug builds panic when a thread locks a strike it
    /// already holds instead of deadlocking. If the strike grew while locked, unlocking it
    /// charges the growth to the cache that owns it, which may purge.
    pub fn lock(&self) -> StrikeGuard<'_> {
        #[cfg(debug_assertions)]
        held_locks::acquire(self.address());
        let state = self.state.lock();
        StrikeGuard {
            strike: self,
            memory_at_lock: self.memory_used(),
            state,
        }
    }

    /// Ties the strike to the cache that lists it.
    pub(crate) fn set_owner(&self, owner: CacheLink) {
        let fresh = self.owner.set(owner).is_ok();
        debug_assert!(fresh, "strike already belongs to a cache");
    }

    #[cfg(debug_assertions)]
    fn address(&self) -> usize {
        core::ptr::from_ref(self) as usize
    }

    /// The key this strike is cached under.
    pub fn descriptor(&self) -> &Descriptor {
        self.spec.descriptor()
    }

    /// The spec this strike was built from.
    pub fn strike_spec(&self) -> &StrikeSpec {
        &self.spec
    }

    /// How glyph positions are quantized for this strike.
    pub fn rounding_spec(&self) -> RoundingSpec {
        self.rounding_spec
    }

    /// Vertical metrics.
    pub fn font_metrics(&self) -> &FontMetrics {
        &self.font_metrics
    }

    /// Scale from this strike's glyph space back to the requested size.
    pub fn strike_to_source_ratio(&self) -> f32 {
        self.spec.strike_to_source_ratio()
    }

    /// Bytes held by the strike, updated by every operation that grows it.
    pub fn memory_used(&self) -> usize {
        self.memory_used.load(Ordering::Relaxed)
    }

    /// Number of glyph records.
    pub fn glyph_count(&self) -> usize {
        self.glyph_count.load(Ordering::Relaxed)
    }

    /// The pinner keeping this strike alive, if any.
    pub fn pinner(&self) -> Option<&dyn StrikePinner> {
        self.pinner.as_deref()
    }

    /// Whether the cache may evict this strike.
    pub(crate) fn can_delete(&self) -> bool {
        self.pinner.as_ref().is_none_or(|pinner| pinner.can_delete())
    }

    /// Asks the pinner to check that the strike is still valid.
    pub fn verify_pinned_strike(&self) {
        if let Some(pinner) = &self.pinner {
            pinner.assert_valid();
        }
    }
}

impl fmt::Debug for Strike {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Strike")
            .field("descriptor", self.descriptor())
            .field("rounding_spec", &self.rounding_spec)
            .field("memory_used", &self.memory_used())
            .field("glyph_count", &self.glyph_count())
            .field("pinned", &self.pinner.is_some())
            .finish_non_exhaustive()
    }
}

/// An element of a buffer converted in place by [`StrikeGuard::glyph_ids_to_paths`].
#[derive(Clone, Debug, PartialEq)]
pub enum IdOrPath {
    /// A glyph id waiting to be converted.
    Id(u16),
    /// The glyph's outline, or `None` if it has none.
    Path(Option<GlyphPath>),
}

/// An element of a buffer converted in place by [`StrikeGuard::glyph_ids_to_drawables`].
#[derive(Clone, Debug)]
pub enum IdOrDrawable {
    /// A glyph id waiting to be converted.
    Id(u16),
    /// The glyph's drawable, or `None` if it has none.
    Drawable(Option<Arc<dyn GlyphDrawable>>),
}

/// Exclusive access to a strike's glyphs. Dropping the guard unlocks the strike.
pub struct StrikeGuard<'a> {
    strike: &'a Strike,
    memory_at_lock: usize,
    state: MutexGuard<'a, StrikeState>,
}

impl<'a> StrikeGuard<'a> {
    /// The locked strike.
    pub fn strike(&self) -> &'a Strike {
        self.strike
    }

    /// Releases the lock.
    pub fn unlock(self) {}

    fn publish(&self) {
        let glyphs = &self.state.glyphs;
        self.strike
            .memory_used
            .store(self.strike.base_memory + glyphs.memory_used(), Ordering::Relaxed);
        self.strike.glyph_count.store(glyphs.len(), Ordering::Relaxed);
    }

    /// Number of glyph records.
    pub fn glyph_count(&self) -> usize {
        self.state.glyphs.len()
    }

    /// The digest of an already known glyph.
    pub fn find_digest(&self, id: PackedGlyphId) -> Option<GlyphDigest> {
        self.state.glyphs.find(id)
    }

    /// Returns the digest for `id`, creating the glyph record and deciding `action` the
    /// first time either is needed.
    pub fn digest_for(&mut self, action: ActionType, id: PackedGlyphId) -> GlyphDigest {
        let state = &mut *self.state;
        let digest = state.glyphs.digest_for(action, id, state.scaler.as_mut());
        self.publish();
        digest
    }

    /// The glyph record a digest refers to.
    ///
    /// Digests from another strike are a programming error: debug builds panic, release
    /// builds return `None` when the index is out of range.
    pub fn glyph(&self, digest: &GlyphDigest) -> Option<&Glyph> {
        self.state.glyphs.glyph(digest.index())
    }

    fn index_for(&mut self, id: PackedGlyphId) -> usize {
        let state = &mut *self.state;
        state.glyphs.index_for(id, state.scaler.as_mut())
    }

    /// Generates the glyph's image if that hasn't been tried. Returns whether it has one.
    pub fn prepare_for_image(&mut self, id: PackedGlyphId) -> bool {
        let index = self.index_for(id);
        let state = &mut *self.state;
        let present = state.glyphs.prepare_image(index, state.scaler.as_mut());
        self.publish();
        present
    }

    /// Generates the glyph's outline if that hasn't been tried. Returns whether it has one.
    pub fn prepare_for_path(&mut self, id: PackedGlyphId) -> bool {
        let index = self.index_for(id);
        let state = &mut *self.state;
        let present = state.glyphs.prepare_path(index, state.scaler.as_mut());
        self.publish();
        present
    }

    /// Generates the glyph's drawable if that hasn't been tried. Returns whether it has one.
    pub fn prepare_for_drawable(&mut self, id: PackedGlyphId) -> bool {
        let index = self.index_for(id);
        let state = &mut *self.state;
        let present = state.glyphs.prepare_drawable(index, state.scaler.as_mut());
        self.publish();
        present
    }

    fn collect(&self, indices: Vec<usize>) -> Vec<&Glyph> {
        indices
            .into_iter()
            .filter_map(|index| self.state.glyphs.glyph(index))
            .collect()
    }

    /// Metrics-only glyphs for integral positions.
    pub fn metrics(&mut self, glyph_ids: &[u16]) -> Vec<&Glyph> {
        let indices = glyph_ids
            .iter()
            .map(|&id| self.index_for(PackedGlyphId::new(id)))
            .collect();
        self.publish();
        self.collect(indices)
    }

    /// Glyphs with their images prepared.
    pub fn prepare_images(&mut self, ids: &[PackedGlyphId]) -> Vec<&Glyph> {
        let indices = ids
            .iter()
            .map(|&id| {
                let index = self.index_for(id);
                let state = &mut *self.state;
                state.glyphs.prepare_image(index, state.scaler.as_mut());
                index
            })
            .collect();
        self.publish();
        self.collect(indices)
    }

    /// Glyphs with their outlines prepared.
    pub fn prepare_paths(&mut self, glyph_ids: &[u16]) -> Vec<&Glyph> {
        let indices = glyph_ids
            .iter()
            .map(|&id| {
                let index = self.index_for(PackedGlyphId::new(id));
                let state = &mut *self.state;
                state.glyphs.prepare_path(index, state.scaler.as_mut());
                index
            })
            .collect();
        self.publish();
        self.collect(indices)
    }

    /// Glyphs with their drawables prepared.
    pub fn prepare_drawables(&mut self, glyph_ids: &[u16]) -> Vec<&Glyph> {
        let indices = glyph_ids
            .iter()
            .map(|&id| {
                let index = self.index_for(PackedGlyphId::new(id));
                let state = &mut *self.state;
                state.glyphs.prepare_drawable(index, state.scaler.as_mut());
                index
            })
            .collect();
        self.publish();
        self.collect(indices)
    }

    /// Replaces every [`IdOrPath::Id`] with the glyph's outline.
    pub fn glyph_ids_to_paths(&mut self, items: &mut [IdOrPath]) {
        for item in items.iter_mut() {
            if let IdOrPath::Id(id) = *item {
                let index = self.index_for(PackedGlyphId::new(id));
                let state = &mut *self.state;
                state.glyphs.prepare_path(index, state.scaler.as_mut());
                let glyph = &state.glyphs.glyphs[index];
                *item = IdOrPath::Path(glyph.path().map(|path| GlyphPath {
                    path: path.clone(),
                    is_hairline: glyph.path_is_hairline(),
                }));
            }
        }
        self.publish();
    }

    /// Replaces every [`IdOrDrawable::Id`] with the glyph's drawable.
    pub fn glyph_ids_to_drawables(&mut self, items: &mut [IdOrDrawable]) {
        for item in items.iter_mut() {
            if let IdOrDrawable::Id(id) = *item {
                let index = self.index_for(PackedGlyphId::new(id));
                let state = &mut *self.state;
                state.glyphs.prepare_drawable(index, state.scaler.as_mut());
                *item = IdOrDrawable::Drawable(state.glyphs.glyphs[index].drawable().cloned());
            }
        }
        self.publish();
    }

    /// Adds a glyph with known metrics, leaving an existing record untouched.
    pub fn merge_glyph(&mut self, id: PackedGlyphId, metrics: GlyphMetrics) -> &Glyph {
        let index = self.state.glyphs.index_with_metrics(id, metrics);
        self.publish();
        &self.state.glyphs.glyphs[index]
    }

    /// Adds a glyph and the outcome of rendering its image. An image that was already
    /// attempted is kept.
    pub fn merge_glyph_and_image(
        &mut self,
        id: PackedGlyphId,
        metrics: GlyphMetrics,
        image: Option<Vec<u8>>,
    ) -> &Glyph {
        let glyphs = &mut self.state.glyphs;
        let index = glyphs.index_with_metrics(id, metrics);
        glyphs.merge_image(index, image);
        self.publish();
        &self.state.glyphs.glyphs[index]
    }

    /// Adds a glyph and the outcome of generating its outline.
    pub fn merge_path(
        &mut self,
        id: PackedGlyphId,
        metrics: GlyphMetrics,
        path: Option<GlyphPath>,
    ) -> &Glyph {
        let glyphs = &mut self.state.glyphs;
        let index = glyphs.index_with_metrics(id, metrics);
        glyphs.merge_path(index, path);
        self.publish();
        &self.state.glyphs.glyphs[index]
    }

    /// Adds a glyph and the outcome of generating its drawable.
    pub fn merge_drawable(
        &mut self,
        id: PackedGlyphId,
        metrics: GlyphMetrics,
        drawable: Option<Arc<dyn GlyphDrawable>>,
    ) -> &Glyph {
        let glyphs = &mut self.state.glyphs;
        let index = glyphs.index_with_metrics(id, metrics);
        glyphs.merge_drawable(index, drawable);
        self.publish();
        &self.state.glyphs.glyphs[index]
    }
}

impl Drop for StrikeGuard<'_> {
    fn drop(&mut self) {
        #[cfg(debug_assertions)]
        held_locks::release(self.strike.address());
        if self.strike.memory_used() != self.memory_at_lock {
            if let Some(owner) = self.strike.owner.get() {
                owner.strike_grew(self.strike);
            }
        }
    }
}

impl fmt::Debug for StrikeGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StrikeGuard")
            .field("strike", self.strike.descriptor())
            .field("glyph_count", &self.state.glyphs.len())
            .finish_non_exhaustive()
    }
}

/// Strikes locked by the current thread, to turn re-entrant locking into a panic.
#[cfg(debug_assertions)]
mod held_locks {
    use core::cell::RefCell;

    use smallvec::SmallVec;

    thread_local! {
        static HELD: RefCell<SmallVec<[usize; 4]>> = RefCell::new(SmallVec::new());
    }

    pub(super) fn acquire(address: usize) {
        HELD.with(|held| {
            let mut held = held.borrow_mut();
            assert!(
                !held.contains(&address),
                "strike is already locked by this thread; strike locks are not re-entrant"
            );
            held.push(address);
        });
    }

    pub(super) fn release(address: usize) {
        HELD.with(|held| {
            let mut held = held.borrow_mut();
            if let Some(position) = held.iter().rposition(|&a| a == address) {
                held.swap_remove(position);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::glyph::GlyphAction;
    use crate::testing::{fake_strike, FakeTypeface, EMPTY_GLYPH, LARGE_GLYPH};

    #[test]
    fn digest_is_idempotent() {
        let typeface = FakeTypeface::new();
        let strike = fake_strike(&typeface, 12.0);
        let id = PackedGlyphId::new(5);

        let mut guard = strike.lock();
        let first = guard.digest_for(ActionType::DirectMask, id);
        let memory = strike.memory_used();
        let second = guard.digest_for(ActionType::DirectMask, id);
        assert_eq!(first.index(), second.index());
        assert_eq!(first, second);
        assert_eq!(strike.memory_used(), memory);
        assert_eq!(typeface.counters().glyphs(), 1);
    }

    #[test]
    fn absent_payloads_are_not_retried() {
        let typeface = FakeTypeface::new();
        let strike = fake_strike(&typeface, 12.0);
        let id = PackedGlyphId::new(EMPTY_GLYPH);

        let mut guard = strike.lock();
        assert!(!guard.prepare_for_path(id));
        assert!(!guard.prepare_for_path(id));
        assert!(!guard.prepare_for_drawable(id));
        assert!(!guard.prepare_for_drawable(id));
        assert!(!guard.prepare_for_image(id));
        assert!(!guard.prepare_for_image(id));
        let counters = typeface.counters();
        assert_eq!(counters.paths(), 1);
        assert_eq!(counters.drawables(), 1);
        // Empty glyphs never reach the scaler for images.
        assert_eq!(counters.images(), 0);

        let digest = guard.find_digest(id).unwrap();
        assert!(digest.image_attempted());
        assert!(digest.path_attempted());
        assert!(digest.drawable_attempted());
    }

    #[test]
    fn actions_follow_glyph_shape() {
        let typeface = FakeTypeface::new();
        let strike = fake_strike(&typeface, 12.0);
        let mut guard = strike.lock();

        let empty = PackedGlyphId::new(EMPTY_GLYPH);
        assert_eq!(
            guard.digest_for(ActionType::DirectMask, empty).action_for(ActionType::DirectMask),
            GlyphAction::Drop
        );
        let large = PackedGlyphId::new(LARGE_GLYPH);
        let digest = guard.digest_for(ActionType::DirectMask, large);
        assert_eq!(digest.action_for(ActionType::DirectMask), GlyphAction::Reject);
        let digest = guard.digest_for(ActionType::DirectMaskCpu, large);
        assert_eq!(digest.action_for(ActionType::DirectMaskCpu), GlyphAction::Accept);
        let digest = guard.digest_for(ActionType::Path, large);
        assert_eq!(digest.action_for(ActionType::Path), GlyphAction::Accept);
        assert!(digest.path_attempted());
        // Earlier verdicts are kept.
        assert_eq!(digest.action_for(ActionType::DirectMask), GlyphAction::Reject);
    }

    #[test]
    fn subpixel_buckets_make_distinct_glyphs() {
        let typeface = FakeTypeface::new();
        let strike = fake_strike(&typeface, 12.0);
        let mut guard = strike.lock();
        let a = guard.digest_for(ActionType::Mask, PackedGlyphId::with_subpixel(9, 0, 0));
        let b = guard.digest_for(ActionType::Mask, PackedGlyphId::with_subpixel(9, 3, 0));
        assert_ne!(a.index(), b.index());
        assert_eq!(guard.glyph_count(), 2);
    }

    #[test]
    fn batches_and_in_place_conversion() {
        let typeface = FakeTypeface::new();
        let strike = fake_strike(&typeface, 12.0);
        let mut guard = strike.lock();

        let glyphs = guard.prepare_paths(&[3, EMPTY_GLYPH, 3]);
        assert_eq!(glyphs.len(), 3);
        assert!(glyphs[0].path().is_some());
        assert!(glyphs[1].path().is_none());
        assert_eq!(typeface.counters().paths(), 2);

        let mut items = [IdOrPath::Id(3), IdOrPath::Id(EMPTY_GLYPH)];
        guard.glyph_ids_to_paths(&mut items);
        assert!(matches!(&items[0], IdOrPath::Path(Some(_))));
        assert_eq!(items[1], IdOrPath::Path(None));

        let mut items = [IdOrDrawable::Id(3)];
        guard.glyph_ids_to_drawables(&mut items);
        assert!(matches!(items[0], IdOrDrawable::Drawable(None)));

        let images = guard.prepare_images(&[PackedGlyphId::new(3)]);
        assert_eq!(images[0].image().map(<[u8]>::len), Some(images[0].metrics().image_size()));
        drop(guard);
        assert_eq!(strike.glyph_count(), 2);
    }

    #[test]
    fn merge_keeps_attempted_payloads() {
        let typeface = FakeTypeface::new();
        let strike = fake_strike(&typeface, 12.0);
        let mut guard = strike.lock();
        let id = PackedGlyphId::new(4);
        let metrics = GlyphMetrics {
            advance_x: 3.0,
            width: 1,
            height: 2,
            ..GlyphMetrics::default()
        };

        let glyph = guard.merge_glyph_and_image(id, metrics, None);
        assert!(glyph.image_attempted());
        let glyph = guard.merge_glyph_and_image(id, metrics, Some(vec![1, 2]));
        assert!(glyph.image().is_none());
        let glyph = guard.merge_path(id, metrics, None);
        assert!(glyph.path_attempted());
        assert_eq!(glyph.advance_x(), 3.0);
        // Merged glyphs don't consult the scaler.
        assert_eq!(typeface.counters().glyphs(), 0);
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic(expected = "strike locks are not re-entrant")]
    fn relocking_panics() {
        let typeface = FakeTypeface::new();
        let strike = fake_strike(&typeface, 12.0);
        let _first = strike.lock();
        let _second = strike.lock();
    }

    #[test]
    fn different_strikes_lock_independently() {
        let typeface = FakeTypeface::new();
        let a = fake_strike(&typeface, 12.0);
        let b = fake_strike(&typeface, 13.0);
        let _a = a.lock();
        let _b = b.lock();
    }
}
