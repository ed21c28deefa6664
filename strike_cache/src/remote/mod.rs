// Copyright 2025 the Strike Cache Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Split-process glyph caching.
//!
//! A [`StrikeServer`] lives next to the code that lays out text. It hands out
//! [`RemoteStrike`]s that record every glyph a painter asks for, and
//! [`StrikeServer::write_strike_data`] serializes what is new since the last call. A
//! [`StrikeClient`] in the process that rasterizes reads that data into its [`StrikeCache`]
//! so that the same lookups succeed there without access to the font files.
//!
//! Strikes sent to a client are pinned by a discardable handle. The client may delete the
//! handle when its cache wants to evict the strike, and the server notices when it next tries
//! to lock the handle.
//!
//! [`StrikeCache`]: crate::strike_cache::StrikeCache

mod client;
mod server;

pub use client::{
    CacheMissType, ClientHandleManager, ReadFailureData, StrikeClient, StrikeDataError,
    TypefaceProxy,
};
pub use server::{RemoteStrike, ServerHandleManager, StrikeServer};

use bytemuck::{Zeroable, cast_mut, cast_ref};

use crate::buffer::{ReadBuffer, ReadError, WriteBuffer};
use crate::scaler::FontMetrics;

/// Identifies a discardable handle shared by a server and its client.
pub type HandleId = u32;

/// Default size of the server's descriptor map before deleted strikes are dropped.
pub const DEFAULT_MAX_ENTRIES_IN_DESCRIPTOR_MAP: usize = 2000;

/// States of a serialized glyph image.
const IMAGE_NOT_ATTEMPTED: u32 = 0;
const IMAGE_ABSENT: u32 = 1;
const IMAGE_PRESENT: u32 = 2;

/// Smallest serialized typeface: server id and glyph count.
const TYPEFACE_BYTES: usize = 8;
/// Smallest serialized strike: ids, descriptor length, metrics flag and three glyph counts.
const STRIKE_BYTES: usize = 28;
/// Smallest serialized glyph: id, seven metric words and one state word.
const GLYPH_BYTES: usize = 36;

const FONT_METRICS_WORDS: usize = size_of::<FontMetrics>() / size_of::<f32>();

fn write_font_metrics(buffer: &mut WriteBuffer, metrics: &FontMetrics) {
    let words: &[f32; FONT_METRICS_WORDS] = cast_ref(metrics);
    for &word in words {
        buffer.write_f32(word);
    }
}

fn read_font_metrics(buffer: &mut ReadBuffer<'_>) -> Result<FontMetrics, ReadError> {
    let mut metrics = FontMetrics::zeroed();
    let words: &mut [f32; FONT_METRICS_WORDS] = cast_mut(&mut metrics);
    for word in words {
        *word = buffer.read_f32()?;
    }
    Ok(metrics)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use hashbrown::HashSet;
    use parking_lot::Mutex;

    use super::*;
    use crate::glyph::{ActionType, GlyphAction, PackedGlyphId};
    use crate::gpu::{StrikeForGpuCache, plan_glyph_run};
    use crate::kurbo::Point;
    use crate::strike_cache::{StrikeCache, StrikeCacheConfig};
    use crate::testing::{DRAWABLE_GLYPH, EMPTY_GLYPH, FakeTypeface, LARGE_GLYPH, mask_spec};

    #[derive(Default)]
    struct Handles {
        next: Mutex<HandleId>,
        deleted: Mutex<HashSet<HandleId>>,
        failures: Mutex<Vec<ReadFailureData>>,
    }

    impl ServerHandleManager for Handles {
        fn create_handle(&self) -> HandleId {
            let mut next = self.next.lock();
            *next += 1;
            *next
        }

        fn lock_handle(&self, handle: HandleId) -> bool {
            !self.deleted.lock().contains(&handle)
        }

        fn is_handle_deleted(&self, handle: HandleId) -> bool {
            self.deleted.lock().contains(&handle)
        }
    }

    impl ClientHandleManager for Handles {
        fn delete_handle(&self, handle: HandleId) -> bool {
            self.deleted.lock().insert(handle);
            true
        }

        fn notify_read_failure(&self, data: &ReadFailureData) {
            self.failures.lock().push(*data);
        }
    }

    fn client_cache() -> Arc<StrikeCache> {
        Arc::new(StrikeCache::new(StrikeCacheConfig::default()))
    }

    #[test]
    fn font_metrics_survive_the_wire() {
        let metrics = FontMetrics {
            ascent: -9.5,
            descent: 2.25,
            underline_thickness: 0.5,
            ..FontMetrics::default()
        };
        let mut buffer = WriteBuffer::new();
        write_font_metrics(&mut buffer, &metrics);
        let bytes = buffer.into_bytes();
        assert_eq!(bytes.len(), size_of::<FontMetrics>());
        let read = read_font_metrics(&mut ReadBuffer::new(&bytes)).unwrap();
        assert_eq!(read, metrics);
    }

    #[test]
    fn client_sees_what_server_recorded() {
        let handles = Arc::new(Handles::default());
        let server = StrikeServer::new(handles.clone());
        let typeface = FakeTypeface::new();
        let spec = mask_spec(&typeface, 12.0);

        let remote = server.find_or_create_scoped_strike(&spec).unwrap();
        let run = [
            (3, Point::new(0.0, 0.0)),
            (EMPTY_GLYPH, Point::new(8.0, 0.0)),
            (LARGE_GLYPH, Point::new(16.0, 0.0)),
        ];
        let plan = plan_glyph_run(&*remote, ActionType::DirectMask, &run);
        assert_eq!(plan.accepted.len(), 1);
        {
            let mut session = remote.lock();
            session.digest_for(ActionType::Path, PackedGlyphId::new(LARGE_GLYPH));
            session.digest_for(ActionType::Drawable, PackedGlyphId::new(DRAWABLE_GLYPH));
        }

        let mut data = Vec::new();
        server.write_strike_data(&mut data);
        assert!(!data.is_empty());

        let cache = client_cache();
        let client = StrikeClient::new(handles.clone(), Some(cache.clone()), false);
        client.read_strike_data(&data).unwrap();

        let local = client.translate_typeface_id(spec.descriptor()).unwrap();
        let strike = cache.find_strike(&local).unwrap();
        assert!(strike.pinner().is_some());
        let mut guard = strike.lock();
        let three = guard.find_digest(PackedGlyphId::new(3)).unwrap();
        assert!(three.image_attempted());
        assert!(guard.glyph(&three).unwrap().image().is_some());
        let large = guard.digest_for(ActionType::Path, PackedGlyphId::new(LARGE_GLYPH));
        assert_eq!(large.action_for(ActionType::Path), GlyphAction::Accept);
        let drawable = guard.find_digest(PackedGlyphId::new(DRAWABLE_GLYPH)).unwrap();
        assert!(guard.glyph(&drawable).unwrap().drawable().is_some());
        drop(guard);
        // The proxy scaler was never asked; everything came over the wire.
        assert!(handles.failures.lock().is_empty());

        // A second write with nothing new produces nothing.
        let mut again = Vec::new();
        server.write_strike_data(&mut again);
        assert!(again.is_empty());
    }
}
