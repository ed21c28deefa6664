// Copyright 2025 the Strike Cache Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

use core::fmt;
use std::sync::Arc;

use hashbrown::HashMap;
use parking_lot::Mutex;

use super::{
    GLYPH_BYTES, HandleId, IMAGE_ABSENT, IMAGE_NOT_ATTEMPTED, IMAGE_PRESENT, STRIKE_BYTES,
    TYPEFACE_BYTES, read_font_metrics,
};
use crate::buffer::{ReadBuffer, ReadError};
use crate::descriptor::Descriptor;
use crate::font::StrikeEffects;
use crate::glyph::{GlyphMetrics, PackedGlyphId};
use crate::kurbo::Rect;
use crate::scaler::{
    FontMetrics, GlyphDrawable, GlyphPath, ScalerContext, ScalerContextRec, ScalerError,
    SerializedDrawable, Typeface, TypefaceId,
};
use crate::strike::Strike;
use crate::strike_cache::{StrikeCache, StrikePinner};
use crate::strike_spec::StrikeSpec;

/// What a client-side scaler was asked for but didn't have.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum CacheMissType {
    /// Strike metrics.
    FontMetrics,
    /// A glyph's metrics.
    GlyphMetrics,
    /// A glyph's image.
    GlyphImage,
    /// A glyph's outline.
    GlyphPath,
    /// A glyph's drawable.
    GlyphDrawable,
}

/// How far [`StrikeClient::read_strike_data`] got before the data turned out malformed.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct ReadFailureData {
    /// Size of the data.
    pub memory_size: usize,
    /// Bytes consumed before the failure.
    pub bytes_read: usize,
    /// Typefaces read.
    pub typeface_count: u64,
    /// Strikes read completely.
    pub strike_count: u64,
    /// Glyph images merged.
    pub glyph_images_count: u64,
    /// Glyph paths merged.
    pub glyph_paths_count: u64,
}

/// Discardable handles as seen by the client.
pub trait ClientHandleManager: Send + Sync {
    /// Deletes a handle so the server stops assuming the client has the strike. Returns
    /// whether the strike may be evicted.
    fn delete_handle(&self, handle: HandleId) -> bool;

    /// Checks that a handle is still valid.
    fn assert_handle_valid(&self, handle: HandleId) {
        let _ = handle;
    }

    /// Called when a scaler on the client side is asked for data the server never sent.
    fn notify_cache_miss(&self, miss: CacheMissType, font_size: f32) {
        let _ = (miss, font_size);
    }

    /// Called when strike data can't be read.
    fn notify_read_failure(&self, data: &ReadFailureData) {
        let _ = data;
    }
}

/// An error produced by [`StrikeClient::read_strike_data`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StrikeDataError {
    /// The data was truncated or malformed.
    Read(ReadError),
    /// A strike referred to a typeface the server never sent.
    UnknownTypeface(u32),
    /// A strike the client doesn't have arrived without font metrics.
    MissingMetrics,
    /// The strike could not be created from the received descriptor.
    StrikeCreation,
}

impl fmt::Display for StrikeDataError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read(err) => write!(f, "malformed strike data: {err}"),
            Self::UnknownTypeface(id) => write!(f, "strike refers to unknown typeface {id}"),
            Self::MissingMetrics => f.write_str("new strike arrived without font metrics"),
            Self::StrikeCreation => f.write_str("strike could not be created"),
        }
    }
}

impl core::error::Error for StrikeDataError {
    fn source(&self) -> Option<&(dyn core::error::Error + 'static)> {
        match self {
            Self::Read(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ReadError> for StrikeDataError {
    fn from(err: ReadError) -> Self {
        Self::Read(err)
    }
}

/// Pins a client strike until the client agrees to delete its handle.
struct DiscardableStrikePinner {
    handle: HandleId,
    manager: Arc<dyn ClientHandleManager>,
}

impl StrikePinner for DiscardableStrikePinner {
    fn can_delete(&self) -> bool {
        self.manager.delete_handle(self.handle)
    }

    fn assert_valid(&self) {
        self.manager.assert_handle_valid(self.handle);
    }
}

/// A client-side stand-in for a typeface that only exists in the server process.
///
/// Its scalers can't produce anything; all glyph data has to arrive through
/// [`StrikeClient::read_strike_data`].
pub struct TypefaceProxy {
    id: TypefaceId,
    server_id: u32,
    glyph_count: u32,
    manager: Arc<dyn ClientHandleManager>,
    is_logging: bool,
}

impl TypefaceProxy {
    /// The typeface id used by the server.
    pub fn server_id(&self) -> u32 {
        self.server_id
    }
}

impl fmt::Debug for TypefaceProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypefaceProxy")
            .field("id", &self.id)
            .field("server_id", &self.server_id)
            .field("glyph_count", &self.glyph_count)
            .finish_non_exhaustive()
    }
}

impl Typeface for TypefaceProxy {
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
        Ok(Box::new(ProxyScaler {
            rec: *descriptor.rec(),
            server_id: self.server_id,
            manager: self.manager.clone(),
            is_logging: self.is_logging,
        }))
    }
}

struct ProxyScaler {
    rec: ScalerContextRec,
    server_id: u32,
    manager: Arc<dyn ClientHandleManager>,
    is_logging: bool,
}

impl ProxyScaler {
    fn miss(&self, miss: CacheMissType, id: Option<PackedGlyphId>) {
        if self.is_logging {
            log::warn!(
                "strike cache miss: {miss:?} for {id:?} of server typeface {}",
                self.server_id
            );
        }
        self.manager.notify_cache_miss(miss, self.rec.text_size);
    }
}

impl ScalerContext for ProxyScaler {
    fn font_metrics(&self) -> FontMetrics {
        self.miss(CacheMissType::FontMetrics, None);
        FontMetrics::default()
    }

    fn make_glyph(&mut self, id: PackedGlyphId) -> GlyphMetrics {
        self.miss(CacheMissType::GlyphMetrics, Some(id));
        GlyphMetrics::empty(self.rec.mask_format())
    }

    fn generate_image(&mut self, id: PackedGlyphId, _metrics: &GlyphMetrics) -> Option<Vec<u8>> {
        self.miss(CacheMissType::GlyphImage, Some(id));
        None
    }

    fn generate_path(&mut self, id: PackedGlyphId) -> Option<GlyphPath> {
        self.miss(CacheMissType::GlyphPath, Some(id));
        None
    }

    fn generate_drawable(&mut self, id: PackedGlyphId) -> Option<Arc<dyn GlyphDrawable>> {
        self.miss(CacheMissType::GlyphDrawable, Some(id));
        None
    }
}

#[derive(Default)]
struct ReadProgress {
    typefaces: u64,
    strikes: u64,
    images: u64,
    paths: u64,
}

/// The rasterizing side of a split-process glyph cache.
pub struct StrikeClient {
    manager: Arc<dyn ClientHandleManager>,
    cache: Arc<StrikeCache>,
    is_logging: bool,
    typefaces: Mutex<HashMap<u32, Arc<TypefaceProxy>>>,
}

impl StrikeClient {
    /// Creates a client that fills `cache`, or [`StrikeCache::current`] when `None`.
    ///
    /// With `is_logging`, cache misses are logged as warnings.
    pub fn new(
        manager: Arc<dyn ClientHandleManager>,
        cache: Option<Arc<StrikeCache>>,
        is_logging: bool,
    ) -> Self {
        Self {
            manager,
            cache: cache.unwrap_or_else(StrikeCache::current),
            is_logging,
            typefaces: Mutex::new(HashMap::new()),
        }
    }

    /// The cache this client fills.
    pub fn cache(&self) -> &Arc<StrikeCache> {
        &self.cache
    }

    /// The proxy standing in for a server typeface, if it has been received.
    pub fn typeface_for_server_id(&self, server_id: u32) -> Option<Arc<TypefaceProxy>> {
        self.typefaces.lock().get(&server_id).cloned()
    }

    /// Rewrites a server descriptor to refer to the local proxy typeface.
    ///
    /// Returns `None` if the typeface hasn't been received.
    pub fn translate_typeface_id(&self, descriptor: &Descriptor) -> Option<Descriptor> {
        let mut rec = *descriptor.rec();
        let typeface = self.typeface_for_server_id(rec.typeface_id)?;
        rec.typeface_id = typeface.id().to_u32();
        Some(descriptor.with_rec(&rec))
    }

    fn add_typeface(&self, server_id: u32, glyph_count: u32) {
        self.typefaces.lock().entry(server_id).or_insert_with(|| {
            Arc::new(TypefaceProxy {
                id: TypefaceId::new(),
                server_id,
                glyph_count,
                manager: self.manager.clone(),
                is_logging: self.is_logging,
            })
        });
    }

    /// Merges data written by
    /// [`StrikeServer::write_strike_data`](super::StrikeServer::write_strike_data).
    ///
    /// Malformed data is reported to [`ClientHandleManager::notify_read_failure`]; whatever
    /// was merged before the failure stays in the cache.
    pub fn read_strike_data(&self, memory: &[u8]) -> Result<(), StrikeDataError> {
        if memory.is_empty() {
            return Ok(());
        }
        let mut buffer = ReadBuffer::new(memory);
        let mut progress = ReadProgress::default();
        let result = self.read_strikes(&mut buffer, &mut progress);
        if let Err(err) = &result {
            log::warn!("failed to read strike data near byte {}: {err}", buffer.offset());
            self.manager.notify_read_failure(&ReadFailureData {
                memory_size: memory.len(),
                bytes_read: buffer.offset(),
                typeface_count: progress.typefaces,
                strike_count: progress.strikes,
                glyph_images_count: progress.images,
                glyph_paths_count: progress.paths,
            });
        }
        result
    }

    fn read_strikes(
        &self,
        buffer: &mut ReadBuffer<'_>,
        progress: &mut ReadProgress,
    ) -> Result<(), StrikeDataError> {
        let typeface_count = buffer.read_count(TYPEFACE_BYTES)?;
        for _ in 0..typeface_count {
            let server_id = buffer.read_u32()?;
            let glyph_count = buffer.read_u32()?;
            self.add_typeface(server_id, glyph_count);
            progress.typefaces += 1;
        }

        let strike_count = buffer.read_count(STRIKE_BYTES)?;
        for _ in 0..strike_count {
            let server_typeface = buffer.read_u32()?;
            let handle = buffer.read_u32()?;
            let descriptor = Descriptor::from_buffer(buffer)?;
            let metrics_sent = buffer.read_bool()?;
            let font_metrics = if metrics_sent {
                None
            } else {
                Some(read_font_metrics(buffer)?)
            };

            let typeface = self
                .typeface_for_server_id(server_typeface)
                .ok_or(StrikeDataError::UnknownTypeface(server_typeface))?;
            let descriptor = self
                .translate_typeface_id(&descriptor)
                .ok_or(StrikeDataError::UnknownTypeface(descriptor.rec().typeface_id))?;

            let strike = match self.cache.find_strike(&descriptor) {
                Some(strike) => strike,
                None => {
                    let metrics = font_metrics.ok_or(StrikeDataError::MissingMetrics)?;
                    let spec = StrikeSpec::from_descriptor(descriptor, typeface);
                    let pinner = DiscardableStrikePinner {
                        handle,
                        manager: self.manager.clone(),
                    };
                    self.cache
                        .create_strike(spec, Some(metrics), Some(Box::new(pinner)))
                        .ok_or(StrikeDataError::StrikeCreation)?
                }
            };
            strike.verify_pinned_strike();
            merge_glyphs(&strike, buffer, progress)?;
            progress.strikes += 1;
        }
        Ok(())
    }
}

impl fmt::Debug for StrikeClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StrikeClient")
            .field("typefaces", &self.typefaces.lock().len())
            .field("is_logging", &self.is_logging)
            .finish_non_exhaustive()
    }
}

fn read_glyph_header(
    buffer: &mut ReadBuffer<'_>,
) -> Result<(PackedGlyphId, GlyphMetrics), ReadError> {
    let id = PackedGlyphId::from_u32(buffer.read_u32()?);
    let metrics = GlyphMetrics::read(buffer)?;
    Ok((id, metrics))
}

fn merge_glyphs(
    strike: &Strike,
    buffer: &mut ReadBuffer<'_>,
    progress: &mut ReadProgress,
) -> Result<(), ReadError> {
    let mut guard = strike.lock();

    let masks = buffer.read_count(GLYPH_BYTES)?;
    for _ in 0..masks {
        let (id, metrics) = read_glyph_header(buffer)?;
        let offset = buffer.offset();
        match buffer.read_u32()? {
            IMAGE_NOT_ATTEMPTED => {
                guard.merge_glyph(id, metrics);
            }
            IMAGE_ABSENT => {
                guard.merge_glyph_and_image(id, metrics, None);
            }
            IMAGE_PRESENT => {
                let image = buffer.read_byte_array()?;
                if image.len() != metrics.image_size() {
                    return Err(ReadError::Invalid {
                        offset,
                        what: "glyph image size",
                    });
                }
                guard.merge_glyph_and_image(id, metrics, Some(image.to_vec()));
                progress.images += 1;
            }
            _ => {
                return Err(ReadError::Invalid {
                    offset,
                    what: "glyph image state",
                });
            }
        }
    }

    let paths = buffer.read_count(GLYPH_BYTES)?;
    for _ in 0..paths {
        let (id, metrics) = read_glyph_header(buffer)?;
        let path = if buffer.read_bool()? {
            let path = buffer.read_path()?;
            let is_hairline = buffer.read_bool()?;
            Some(GlyphPath { path, is_hairline })
        } else {
            None
        };
        guard.merge_path(id, metrics, path);
        progress.paths += 1;
    }

    let drawables = buffer.read_count(GLYPH_BYTES)?;
    for _ in 0..drawables {
        let (id, metrics) = read_glyph_header(buffer)?;
        let drawable = if buffer.read_bool()? {
            let bounds = Rect::new(
                f64::from(buffer.read_f32()?),
                f64::from(buffer.read_f32()?),
                f64::from(buffer.read_f32()?),
                f64::from(buffer.read_f32()?),
            );
            let bytes = buffer.read_byte_array()?;
            Some(Arc::new(SerializedDrawable::new(bounds, bytes)) as Arc<dyn GlyphDrawable>)
        } else {
            None
        };
        guard.merge_drawable(id, metrics, drawable);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::glyph::ActionType;
    use crate::strike_cache::StrikeCacheConfig;

    #[derive(Default)]
    struct Recorder {
        misses: Mutex<Vec<CacheMissType>>,
        failures: Mutex<Vec<ReadFailureData>>,
    }

    impl ClientHandleManager for Recorder {
        fn delete_handle(&self, _handle: HandleId) -> bool {
            true
        }

        fn notify_cache_miss(&self, miss: CacheMissType, _font_size: f32) {
            self.misses.lock().push(miss);
        }

        fn notify_read_failure(&self, data: &ReadFailureData) {
            self.failures.lock().push(*data);
        }
    }

    fn client(recorder: &Arc<Recorder>) -> StrikeClient {
        let cache = Arc::new(StrikeCache::new(StrikeCacheConfig::default()));
        StrikeClient::new(recorder.clone(), Some(cache), true)
    }

    #[test]
    fn empty_data_is_a_no_op() {
        let recorder = Arc::new(Recorder::default());
        assert_eq!(client(&recorder).read_strike_data(&[]), Ok(()));
        assert!(recorder.failures.lock().is_empty());
    }

    #[test]
    fn truncated_data_reports_progress() {
        let recorder = Arc::new(Recorder::default());
        let client = client(&recorder);
        let mut buffer = crate::buffer::WriteBuffer::new();
        buffer.write_count(1);
        buffer.write_u32(7);
        buffer.write_u32(100);
        // One strike announced, none present.
        buffer.write_count(1);
        let bytes = buffer.into_bytes();

        let err = client.read_strike_data(&bytes).unwrap_err();
        assert!(matches!(err, StrikeDataError::Read(ReadError::Invalid { .. })));
        let failures = recorder.failures.lock();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].typeface_count, 1);
        assert_eq!(failures[0].strike_count, 0);
        assert_eq!(failures[0].memory_size, bytes.len());
        assert!(client.typeface_for_server_id(7).is_some());
    }

    #[test]
    fn proxy_scalers_report_misses() {
        let recorder = Arc::new(Recorder::default());
        let client = client(&recorder);
        client.add_typeface(9, 10);
        let proxy = client.typeface_for_server_id(9).unwrap();
        assert_eq!(proxy.server_id(), 9);
        assert_eq!(proxy.glyph_count(), 10);

        let font = crate::font::Font::new(proxy, 12.0);
        let spec = StrikeSpec::make_canonicalized(&font, None);
        let strike = client.cache().find_or_create_strike(&spec).unwrap();
        let digest = strike
            .lock()
            .digest_for(ActionType::Path, PackedGlyphId::new(5));
        assert!(digest.is_empty());
        let misses = recorder.misses.lock();
        assert_eq!(
            *misses,
            [
                CacheMissType::FontMetrics,
                CacheMissType::GlyphMetrics,
                CacheMissType::GlyphPath
            ]
        );
    }

    #[test]
    fn unknown_typeface_is_rejected() {
        let recorder = Arc::new(Recorder::default());
        let client = client(&recorder);
        let typeface = crate::testing::FakeTypeface::new();
        let spec = crate::testing::mask_spec(&typeface, 12.0);
        assert!(client.translate_typeface_id(spec.descriptor()).is_none());

        let mut buffer = crate::buffer::WriteBuffer::new();
        buffer.write_count(0);
        buffer.write_count(1);
        buffer.write_u32(typeface.id().to_u32());
        buffer.write_u32(1);
        spec.descriptor().flatten(&mut buffer);
        buffer.write_bool(true);
        for _ in 0..3 {
            buffer.write_count(0);
        }
        let err = client.read_strike_data(&buffer.into_bytes()).unwrap_err();
        assert_eq!(err, StrikeDataError::UnknownTypeface(typeface.id().to_u32()));
    }
}
