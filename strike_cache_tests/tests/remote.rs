// Copyright 2025 the Strike Cache Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

use strike_cache::buffer::{ReadBuffer, WriteBuffer};
use strike_cache::gpu::{StrikeForGpuCache, plan_glyph_run};
use strike_cache::kurbo::Point;
use strike_cache::remote::{CacheMissType, StrikeClient, StrikeDataError, StrikeServer};
use strike_cache::testing::{FakeTypeface, mask_spec};
use strike_cache::{ActionType, PackedGlyphId, StrikeForGpu, StrikePromise, StrikeSpec};

use crate::util::{SharedHandles, cache_with_count_limit, default_cache};

/// Records a few glyphs of `spec` on the server and returns the serialized update.
fn record(server: &StrikeServer, spec: &StrikeSpec, glyphs: &[u16]) -> Vec<u8> {
    let strike = server.find_or_create_scoped_strike(spec).unwrap();
    let run: Vec<_> = glyphs
        .iter()
        .map(|&id| (id, Point::new(f64::from(id), 0.0)))
        .collect();
    plan_glyph_run(&*strike, ActionType::DirectMask, &run);
    let mut data = Vec::new();
    server.write_strike_data(&mut data);
    data
}

#[test]
fn remote_client_draws_without_asking_its_scaler() {
    let handles = SharedHandles::new();
    let server = StrikeServer::new(handles.clone());
    let typeface = FakeTypeface::new();
    let spec = mask_spec(&typeface, 16.0);
    let data = record(&server, &spec, &[4, 5, 6]);

    let cache = default_cache();
    let client = StrikeClient::new(handles.clone(), Some(cache.clone()), false);
    client.read_strike_data(&data).unwrap();

    let descriptor = client.translate_typeface_id(spec.descriptor()).unwrap();
    let strike = cache.find_strike(&descriptor).unwrap();
    let plan = plan_glyph_run(
        &*strike,
        ActionType::DirectMask,
        &[(4, Point::ZERO), (5, Point::ZERO), (6, Point::ZERO)],
    );
    assert_eq!(plan.accepted.len(), 3);
    assert!(handles.misses().is_empty());

    // A glyph the server never saw is a miss on the client.
    strike
        .lock()
        .digest_for(ActionType::DirectMask, PackedGlyphId::new(99));
    assert_eq!(handles.misses(), [CacheMissType::GlyphMetrics]);
}

#[test]
fn remote_updates_merge_into_existing_strikes() {
    let handles = SharedHandles::new();
    let server = StrikeServer::new(handles.clone());
    let typeface = FakeTypeface::new();
    let spec = mask_spec(&typeface, 16.0);
    let cache = default_cache();
    let client = StrikeClient::new(handles.clone(), Some(cache.clone()), false);

    let first = record(&server, &spec, &[1, 2]);
    client.read_strike_data(&first).unwrap();
    let second = record(&server, &spec, &[2, 3]);
    // Only the new glyph is sent, without the typeface or metrics.
    assert!(second.len() < first.len());
    client.read_strike_data(&second).unwrap();

    assert_eq!(cache.cache_count_used(), 1);
    let descriptor = client.translate_typeface_id(spec.descriptor()).unwrap();
    let strike = cache.find_strike(&descriptor).unwrap();
    assert_eq!(strike.glyph_count(), 3);
    assert_eq!(typeface.counters().contexts(), 1);
}

#[test]
fn remote_evicted_strike_is_rebuilt_on_the_server() {
    let handles = SharedHandles::new();
    let server = StrikeServer::new(handles.clone());
    let typeface = FakeTypeface::new();
    let first_spec = mask_spec(&typeface, 10.0);
    let second_spec = mask_spec(&typeface, 20.0);

    let cache = cache_with_count_limit(1);
    let client = StrikeClient::new(handles.clone(), Some(cache.clone()), false);
    client
        .read_strike_data(&record(&server, &first_spec, &[1]))
        .unwrap();
    client
        .read_strike_data(&record(&server, &second_spec, &[1]))
        .unwrap();

    // Making room for the second strike deleted the first one's handle, numbered from one.
    assert!(handles.is_deleted(1));
    let first_local = client.translate_typeface_id(first_spec.descriptor()).unwrap();
    assert!(cache.find_strike(&first_local).is_none());

    // The server notices and sends the strike again, metrics included.
    let data = record(&server, &first_spec, &[1]);
    assert!(!data.is_empty());
    client.read_strike_data(&data).unwrap();
    let rebuilt = cache.find_strike(&first_local).unwrap();
    assert_eq!(rebuilt.glyph_count(), 1);
    assert!(handles.failures().is_empty());
}

#[test]
fn remote_promise_crosses_to_the_client() {
    let handles = SharedHandles::new();
    let server = StrikeServer::new(handles.clone());
    let typeface = FakeTypeface::new();
    let spec = mask_spec(&typeface, 16.0);

    let remote = server.find_or_create_scoped_strike(&spec).unwrap();
    let mut promise_bytes = WriteBuffer::new();
    remote.clone().strike_promise().flatten(&mut promise_bytes);
    plan_glyph_run(&*remote, ActionType::DirectMask, &[(8, Point::ZERO)]);
    let mut data = Vec::new();
    server.write_strike_data(&mut data);

    let cache = default_cache();
    let client = StrikeClient::new(handles.clone(), Some(cache.clone()), false);
    let bytes = promise_bytes.into_bytes();
    // Before the strike data arrives the typeface is unknown.
    let early = StrikePromise::from_buffer(&mut ReadBuffer::new(&bytes), Some(&client), &cache);
    assert!(early.unwrap().is_none());

    client.read_strike_data(&data).unwrap();
    let mut promise =
        StrikePromise::from_buffer(&mut ReadBuffer::new(&bytes), Some(&client), &cache)
            .unwrap()
            .unwrap();
    let strike = promise.strike_in(&cache).unwrap();
    assert!(strike.lock().find_digest(PackedGlyphId::new(8)).is_some());
}

#[test]
fn remote_truncated_data_fails_without_panicking() {
    let handles = SharedHandles::new();
    let server = StrikeServer::new(handles.clone());
    let typeface = FakeTypeface::new();
    let data = record(&server, &mask_spec(&typeface, 16.0), &[1, 2, 3]);

    for len in 1..data.len() {
        let client = StrikeClient::new(handles.clone(), Some(default_cache()), false);
        let result = client.read_strike_data(&data[..len]);
        assert!(
            matches!(result, Err(StrikeDataError::Read(_))),
            "prefix of {len} bytes gave {result:?}"
        );
    }
    let failures = handles.failures();
    assert_eq!(failures.len(), data.len() - 1);
    assert!(failures.iter().all(|f| f.bytes_read <= f.memory_size));
    assert!(failures.iter().all(|f| f.strike_count == 0));
}
