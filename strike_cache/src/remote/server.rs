// Copyright 2025 the Strike Cache Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

use core::fmt;
use core::mem;
use std::sync::Arc;

use hashbrown::{HashMap, HashSet};
use parking_lot::{Mutex, MutexGuard};

use super::{
    DEFAULT_MAX_ENTRIES_IN_DESCRIPTOR_MAP, HandleId, IMAGE_ABSENT, IMAGE_NOT_ATTEMPTED,
    IMAGE_PRESENT, write_font_metrics,
};
use crate::buffer::WriteBuffer;
use crate::descriptor::Descriptor;
use crate::glyph::{
    ActionType, Glyph, GlyphAction, GlyphDigest, GlyphMetrics, MAX_ATLAS_GLYPH_DIMENSION,
    PackedGlyphId, RoundingSpec,
};
use crate::gpu::{GlyphPreparer, StrikeForGpu, StrikeForGpuCache, StrikePromise};
use crate::scaler::{FontMetrics, GlyphPath, MaskFormat, ScalerContext, TypefaceId};
use crate::strike::GlyphStore;
use crate::strike_spec::StrikeSpec;

/// Discardable handles as seen by the server.
pub trait ServerHandleManager: Send + Sync {
    /// Creates a handle. New handles start out locked.
    fn create_handle(&self) -> HandleId;

    /// Locks a handle for the next batch of strike data. Returns false if the client has
    /// deleted it.
    fn lock_handle(&self, handle: HandleId) -> bool;

    /// Whether the client has deleted the handle.
    fn is_handle_deleted(&self, handle: HandleId) -> bool;
}

#[derive(Copy, Clone)]
enum PendingKind {
    Mask,
    Path,
    Drawable,
}

impl PendingKind {
    fn for_action(action: ActionType) -> Self {
        match action {
            ActionType::Path => Self::Path,
            ActionType::Drawable => Self::Drawable,
            _ => Self::Mask,
        }
    }
}

struct RemoteState {
    scaler: Option<Box<dyn ScalerContext>>,
    glyphs: GlyphStore,
    masks_to_send: Vec<usize>,
    paths_to_send: Vec<usize>,
    drawables_to_send: Vec<usize>,
    sent_font_metrics: bool,
}

impl RemoteState {
    fn queue(&mut self, kind: PendingKind, index: usize) {
        let list = match kind {
            PendingKind::Mask => &mut self.masks_to_send,
            PendingKind::Path => &mut self.paths_to_send,
            PendingKind::Drawable => &mut self.drawables_to_send,
        };
        if !list.contains(&index) {
            list.push(index);
        }
    }

    fn has_pending_glyphs(&self) -> bool {
        !self.masks_to_send.is_empty()
            || !self.paths_to_send.is_empty()
            || !self.drawables_to_send.is_empty()
    }
}

/// Recreates the scaler after it was dropped by a previous write.
fn ensure_scaler<'a>(
    slot: &'a mut Option<Box<dyn ScalerContext>>,
    spec: &StrikeSpec,
) -> &'a mut dyn ScalerContext {
    slot.get_or_insert_with(|| match spec.create_scaler_context() {
        Ok(scaler) => scaler,
        Err(err) => {
            log::warn!(
                "failed to recreate scaler context ({err}) for {}",
                spec.descriptor().dump_rec()
            );
            Box::new(EmptyScaler {
                mask_format: spec.descriptor().rec().mask_format(),
            })
        }
    })
    .as_mut()
}

/// Stands in for a scaler that can no longer be created; every glyph is empty.
struct EmptyScaler {
    mask_format: MaskFormat,
}

impl ScalerContext for EmptyScaler {
    fn font_metrics(&self) -> FontMetrics {
        FontMetrics::default()
    }

    fn make_glyph(&mut self, _id: PackedGlyphId) -> GlyphMetrics {
        GlyphMetrics::empty(self.mask_format)
    }

    fn generate_image(&mut self, _id: PackedGlyphId, _metrics: &GlyphMetrics) -> Option<Vec<u8>> {
        None
    }

    fn generate_path(&mut self, _id: PackedGlyphId) -> Option<GlyphPath> {
        None
    }
}

/// A strike on the server side of a split-process cache.
///
/// It answers painters like a local strike would and remembers which glyphs the client
/// hasn't received yet.
pub struct RemoteStrike {
    spec: StrikeSpec,
    handle: HandleId,
    rounding_spec: RoundingSpec,
    font_metrics: FontMetrics,
    state: Mutex<RemoteState>,
}

impl RemoteStrike {
    fn new(spec: StrikeSpec, handle: HandleId, scaler: Box<dyn ScalerContext>) -> Self {
        Self {
            rounding_spec: RoundingSpec::from_rec(spec.descriptor().rec()),
            font_metrics: scaler.font_metrics(),
            spec,
            handle,
            state: Mutex::new(RemoteState {
                scaler: Some(scaler),
                glyphs: GlyphStore::default(),
                masks_to_send: Vec::new(),
                paths_to_send: Vec::new(),
                drawables_to_send: Vec::new(),
                sent_font_metrics: false,
            }),
        }
    }

    /// The discardable handle pinning this strike on the client.
    pub fn handle(&self) -> HandleId {
        self.handle
    }

    /// The spec the strike was created from.
    pub fn strike_spec(&self) -> &StrikeSpec {
        &self.spec
    }

    /// Whether some glyphs haven't been written yet.
    pub fn has_pending_glyphs(&self) -> bool {
        self.state.lock().has_pending_glyphs()
    }

    fn reset_scaler_context(&self) {
        self.state.lock().scaler = None;
    }

    fn write_pending_glyphs(&self, buffer: &mut WriteBuffer) {
        let mut state = self.state.lock();
        let state = &mut *state;

        buffer.write_u32(self.spec.typeface().id().to_u32());
        buffer.write_u32(self.handle);
        self.spec.descriptor().flatten(buffer);
        buffer.write_bool(state.sent_font_metrics);
        if !state.sent_font_metrics {
            write_font_metrics(buffer, &self.font_metrics);
            state.sent_font_metrics = true;
        }

        let masks = mem::take(&mut state.masks_to_send);
        let paths = mem::take(&mut state.paths_to_send);
        let drawables = mem::take(&mut state.drawables_to_send);

        // Install the payloads before writing. Oversized masks are drawn another way, so
        // their images are never rendered.
        let scaler = ensure_scaler(&mut state.scaler, &self.spec);
        for &index in &masks {
            let fits = state
                .glyphs
                .glyph(index)
                .is_some_and(|glyph| glyph.metrics().max_dimension() <= MAX_ATLAS_GLYPH_DIMENSION);
            if fits {
                state.glyphs.prepare_image(index, scaler);
            }
        }
        for &index in &paths {
            state.glyphs.prepare_path(index, scaler);
        }
        for &index in &drawables {
            state.glyphs.prepare_drawable(index, scaler);
        }

        let glyphs = &state.glyphs;
        let resolve = |indices: &[usize]| -> Vec<&Glyph> {
            indices.iter().filter_map(|&index| glyphs.glyph(index)).collect()
        };

        let masks = resolve(&masks);
        buffer.write_count(masks.len());
        for glyph in masks {
            write_glyph(buffer, glyph);
            if !glyph.image_attempted() {
                buffer.write_u32(IMAGE_NOT_ATTEMPTED);
            } else if let Some(image) = glyph.image() {
                buffer.write_u32(IMAGE_PRESENT);
                buffer.write_byte_array(image);
            } else {
                buffer.write_u32(IMAGE_ABSENT);
            }
        }

        let paths = resolve(&paths);
        buffer.write_count(paths.len());
        for glyph in paths {
            write_glyph(buffer, glyph);
            buffer.write_bool(glyph.path().is_some());
            if let Some(path) = glyph.path() {
                buffer.write_path(path);
                buffer.write_bool(glyph.path_is_hairline());
            }
        }

        let drawables = resolve(&drawables);
        buffer.write_count(drawables.len());
        for glyph in drawables {
            write_glyph(buffer, glyph);
            buffer.write_bool(glyph.drawable().is_some());
            if let Some(drawable) = glyph.drawable() {
                write_rect(buffer, drawable.bounds());
                buffer.write_byte_array(&drawable.to_bytes());
            }
        }
    }
}

fn write_glyph(buffer: &mut WriteBuffer, glyph: &Glyph) {
    buffer.write_u32(glyph.id().to_u32());
    glyph.metrics().flatten(buffer);
}

#[expect(clippy::cast_possible_truncation, reason = "drawable bounds are f32 on the wire")]
fn write_rect(buffer: &mut WriteBuffer, rect: crate::kurbo::Rect) {
    for value in [rect.x0, rect.y0, rect.x1, rect.y1] {
        buffer.write_f32(value as f32);
    }
}

impl fmt::Debug for RemoteStrike {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteStrike")
            .field("descriptor", self.spec.descriptor())
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}

/// The glyph preparation session of a [`RemoteStrike`].
struct RemoteGuard<'a> {
    strike: &'a RemoteStrike,
    state: MutexGuard<'a, RemoteState>,
}

impl RemoteGuard<'_> {
    /// Prepares one payload kind and queues the glyph if this was the first attempt.
    fn prepare(
        &mut self,
        id: PackedGlyphId,
        kind: PendingKind,
        attempted: fn(&Glyph) -> bool,
        prepare: fn(&mut GlyphStore, usize, &mut dyn ScalerContext) -> bool,
    ) -> bool {
        let state = &mut *self.state;
        let scaler = ensure_scaler(&mut state.scaler, &self.strike.spec);
        let index = state.glyphs.index_for(id, scaler);
        let already = state.glyphs.glyph(index).is_some_and(attempted);
        let present = prepare(&mut state.glyphs, index, scaler);
        if !already {
            state.queue(kind, index);
        }
        present
    }
}

impl GlyphPreparer for RemoteGuard<'_> {
    fn digest_for(&mut self, action: ActionType, id: PackedGlyphId) -> GlyphDigest {
        let known = self.state.glyphs.find(id);
        if let Some(digest) = known.filter(|d| d.action_for(action) != GlyphAction::Unset) {
            return digest;
        }
        let state = &mut *self.state;
        let scaler = ensure_scaler(&mut state.scaler, &self.strike.spec);
        let digest = state.glyphs.digest_for(action, id, scaler);
        state.queue(PendingKind::for_action(action), digest.index());
        digest
    }

    fn glyph(&self, digest: &GlyphDigest) -> Option<&Glyph> {
        self.state.glyphs.glyph(digest.index())
    }

    fn prepare_for_image(&mut self, id: PackedGlyphId) -> bool {
        self.prepare(id, PendingKind::Mask, Glyph::image_attempted, GlyphStore::prepare_image)
    }

    fn prepare_for_path(&mut self, id: PackedGlyphId) -> bool {
        self.prepare(id, PendingKind::Path, Glyph::path_attempted, GlyphStore::prepare_path)
    }

    fn prepare_for_drawable(&mut self, id: PackedGlyphId) -> bool {
        self.prepare(
            id,
            PendingKind::Drawable,
            Glyph::drawable_attempted,
            GlyphStore::prepare_drawable,
        )
    }
}

impl StrikeForGpu for RemoteStrike {
    fn lock(&self) -> Box<dyn GlyphPreparer + '_> {
        Box::new(RemoteGuard {
            strike: self,
            state: self.state.lock(),
        })
    }

    fn descriptor(&self) -> &Descriptor {
        self.spec.descriptor()
    }

    fn rounding_spec(&self) -> RoundingSpec {
        self.rounding_spec
    }

    fn strike_promise(self: Arc<Self>) -> StrikePromise {
        StrikePromise::from_spec(self.spec.clone())
    }
}

struct ServerState {
    remote_strikes: HashMap<Descriptor, Arc<RemoteStrike>>,
    /// Strikes touched since the last write.
    strikes_to_send: Vec<Arc<RemoteStrike>>,
    cached_typefaces: HashSet<TypefaceId>,
    typefaces_to_send: Vec<(TypefaceId, u32)>,
    max_entries: usize,
}

impl ServerState {
    fn is_tracked(&self, strike: &Arc<RemoteStrike>) -> bool {
        self.strikes_to_send.iter().any(|s| Arc::ptr_eq(s, strike))
    }

    /// Drops strikes whose handles the client deleted, while the map is over its limit.
    fn check_for_deleted_entries(&mut self, manager: &dyn ServerHandleManager) {
        if self.remote_strikes.len() <= self.max_entries {
            return;
        }
        let mut excess = self.remote_strikes.len() - self.max_entries;
        let tracked = &self.strikes_to_send;
        self.remote_strikes.retain(|_, strike| {
            if excess == 0 {
                return true;
            }
            let deleted = manager.is_handle_deleted(strike.handle)
                && !tracked.iter().any(|s| Arc::ptr_eq(s, strike));
            if deleted {
                excess -= 1;
            }
            !deleted
        });
    }
}

/// The renderer side of a split-process glyph cache.
pub struct StrikeServer {
    manager: Arc<dyn ServerHandleManager>,
    state: Mutex<ServerState>,
}

impl StrikeServer {
    /// Creates a server that pins strikes through `manager`.
    pub fn new(manager: Arc<dyn ServerHandleManager>) -> Self {
        Self {
            manager,
            state: Mutex::new(ServerState {
                remote_strikes: HashMap::new(),
                strikes_to_send: Vec::new(),
                cached_typefaces: HashSet::new(),
                typefaces_to_send: Vec::new(),
                max_entries: DEFAULT_MAX_ENTRIES_IN_DESCRIPTOR_MAP,
            }),
        }
    }

    /// Sets how many strikes are kept before deleted ones are dropped.
    pub fn set_max_entries_in_descriptor_map(&self, count: usize) {
        self.state.lock().max_entries = count;
    }

    /// Number of strikes the server knows about.
    pub fn remote_strike_count(&self) -> usize {
        self.state.lock().remote_strikes.len()
    }

    /// Serializes newly seen typefaces and the pending glyphs of every touched strike into
    /// `memory`, replacing its contents.
    ///
    /// `memory` is left empty when there is nothing to send. Must not be called while a
    /// session on one of this server's strikes is open on the same thread; sessions open on
    /// other threads only delay the write.
    pub fn write_strike_data(&self, memory: &mut Vec<u8>) {
        memory.clear();
        // Strikes are locked only after the server lock is released.
        let (touched, typefaces) = {
            let mut state = self.state.lock();
            (
                mem::take(&mut state.strikes_to_send),
                mem::take(&mut state.typefaces_to_send),
            )
        };
        let (pending, idle): (Vec<_>, Vec<_>) =
            touched.into_iter().partition(|strike| strike.has_pending_glyphs());
        for strike in &idle {
            strike.reset_scaler_context();
        }
        if pending.is_empty() && typefaces.is_empty() {
            return;
        }

        let mut buffer = WriteBuffer::new();
        buffer.write_count(typefaces.len());
        for (id, glyph_count) in typefaces {
            buffer.write_u32(id.to_u32());
            buffer.write_u32(glyph_count);
        }
        buffer.write_count(pending.len());
        for strike in &pending {
            strike.write_pending_glyphs(&mut buffer);
            strike.reset_scaler_context();
        }
        log::trace!(
            "wrote {} bytes of strike data for {} strikes",
            buffer.len(),
            pending.len()
        );
        *memory = buffer.into_bytes();
    }
}

impl StrikeForGpuCache for StrikeServer {
    fn find_or_create_scoped_strike(&self, spec: &StrikeSpec) -> Option<Arc<dyn StrikeForGpu>> {
        let mut state = self.state.lock();
        if let Some(strike) = state.remote_strikes.get(spec.descriptor()).cloned() {
            if state.is_tracked(&strike) {
                return Some(strike);
            }
            // The client may have evicted the strike since the last write.
            if self.manager.lock_handle(strike.handle) {
                state.strikes_to_send.push(strike.clone());
                return Some(strike);
            }
            state.remote_strikes.remove(spec.descriptor());
        }

        let scaler = match spec.create_scaler_context() {
            Ok(scaler) => scaler,
            Err(err) => {
                log::warn!(
                    "failed to create scaler context ({err}) for {}",
                    spec.descriptor().dump_rec()
                );
                return None;
            }
        };
        let typeface = spec.typeface();
        if state.cached_typefaces.insert(typeface.id()) {
            state.typefaces_to_send.push((typeface.id(), typeface.glyph_count()));
        }
        let handle = self.manager.create_handle();
        let strike = Arc::new(RemoteStrike::new(spec.clone(), handle, scaler));
        state.strikes_to_send.push(strike.clone());
        state
            .remote_strikes
            .insert(spec.descriptor().clone(), strike.clone());
        state.check_for_deleted_entries(self.manager.as_ref());
        Some(strike)
    }
}

impl fmt::Debug for StrikeServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("StrikeServer")
            .field("remote_strikes", &state.remote_strikes.len())
            .field("strikes_to_send", &state.strikes_to_send.len())
            .field("max_entries", &state.max_entries)
            .finish_non_exhaustive()
    }
}
