// Copyright 2025 the Strike Cache Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use strike_cache::gpu::StrikeForGpuCache;
use strike_cache::remote::{StrikeClient, StrikeServer};
use strike_cache::strike_cache::{CacheScope, MIN_CACHE_SIZE_LIMIT, StrikeCacheConfig};
use strike_cache::testing::{FakeTypeface, mask_spec};
use strike_cache::{ActionType, PackedGlyphId, StrikeCache};

use crate::util::{SharedHandles, default_cache};

const THREADS: usize = 8;

#[test]
fn concurrency_threads_share_one_strike_per_descriptor() {
    let cache = default_cache();
    let typeface = FakeTypeface::new();
    let specs: Vec<_> = (0..4).map(|i| mask_spec(&typeface, 10.0 + i as f32)).collect();

    let strikes: Vec<Vec<_>> = thread::scope(|scope| {
        let workers: Vec<_> = (0..THREADS)
            .map(|worker| {
                let cache = &cache;
                let specs = &specs;
                scope.spawn(move || {
                    specs
                        .iter()
                        .map(|spec| {
                            let strike = spec.find_or_create_exclusive_strike(cache).unwrap();
                            let mut guard = strike.lock();
                            for id in 0..64 {
                                let id = PackedGlyphId::new((id + worker as u16) % 64);
                                guard.digest_for(ActionType::DirectMask, id);
                                guard.prepare_for_image(id);
                            }
                            drop(guard);
                            strike.strike().clone()
                        })
                        .collect()
                })
            })
            .collect();
        workers
            .into_iter()
            .map(|worker| worker.join().unwrap())
            .collect()
    });

    for per_thread in &strikes[1..] {
        for (a, b) in per_thread.iter().zip(&strikes[0]) {
            assert!(Arc::ptr_eq(a, b));
        }
    }
    assert_eq!(cache.cache_count_used(), specs.len());
    assert_eq!(cache.stats().checked_out_count, 0);
    for strike in &strikes[0] {
        // Every thread asked for the same 64 glyphs.
        assert_eq!(strike.glyph_count(), 64);
    }
    cache.validate();
}

#[test]
fn concurrency_eviction_under_load_keeps_the_list_consistent() {
    let cache = StrikeCache::new(StrikeCacheConfig {
        size_limit: MIN_CACHE_SIZE_LIMIT,
        count_limit: 6,
        ..StrikeCacheConfig::default()
    });
    let typeface = FakeTypeface::new();

    thread::scope(|scope| {
        for worker in 0..THREADS {
            let cache = &cache;
            let typeface = &typeface;
            scope.spawn(move || {
                for round in 0..32 {
                    let size = 8.0 + ((worker * 3 + round) % 16) as f32;
                    let spec = mask_spec(typeface, size);
                    if round % 2 == 0 {
                        let strike = spec.find_or_create_exclusive_strike(cache).unwrap();
                        strike
                            .lock()
                            .prepare_for_image(PackedGlyphId::new(round as u16));
                    } else if let Some(strike) = cache.find_or_create_strike(&spec) {
                        strike
                            .lock()
                            .digest_for(ActionType::Path, PackedGlyphId::new(1));
                    }
                }
            });
        }
    });

    assert!(cache.cache_count_used() <= 6);
    assert_eq!(cache.stats().checked_out_count, 0);
    cache.validate();
}

#[test]
fn concurrency_thread_local_scope_isolates_threads() {
    // Scope is process-wide and set once; whichever test wins, `current` stays stable.
    let scope = match StrikeCache::configure_scope(CacheScope::ThreadLocal) {
        Ok(()) => CacheScope::ThreadLocal,
        Err(existing) => existing,
    };
    let here = StrikeCache::current();
    let there = thread::spawn(StrikeCache::current).join().unwrap();
    match scope {
        CacheScope::ThreadLocal => assert!(!Arc::ptr_eq(&here, &there)),
        CacheScope::Global => assert!(Arc::ptr_eq(&here, &there)),
    }
    assert!(Arc::ptr_eq(&here, &StrikeCache::current()));
}

#[test]
fn concurrency_server_and_client_on_separate_threads() {
    let handles = SharedHandles::new();
    let server = StrikeServer::new(handles.clone());
    let typeface = FakeTypeface::new();
    let spec = mask_spec(&typeface, 18.0);
    let cache = default_cache();
    let client = StrikeClient::new(handles.clone(), Some(cache.clone()), false);

    let (sender, receiver) = std::sync::mpsc::channel::<Vec<u8>>();
    thread::scope(|scope| {
        scope.spawn(|| {
            for id in 1..=4 {
                let strike = server.find_or_create_scoped_strike(&spec).unwrap();
                strike
                    .lock()
                    .digest_for(ActionType::DirectMask, PackedGlyphId::new(id));
                drop(strike);
                let mut data = Vec::new();
                server.write_strike_data(&mut data);
                sender.send(data).unwrap();
            }
            drop(sender);
        });
        scope.spawn(|| {
            let receiver = receiver;
            for data in receiver {
                client.read_strike_data(&data).unwrap();
            }
        });
    });

    let descriptor = client.translate_typeface_id(spec.descriptor()).unwrap();
    assert_eq!(cache.find_strike(&descriptor).unwrap().glyph_count(), 4);
    assert!(handles.misses().is_empty());
}

#[test]
fn concurrency_open_session_can_fetch_strikes_during_a_write() {
    let handles = SharedHandles::new();
    let server = StrikeServer::new(handles.clone());
    let typeface = FakeTypeface::new();
    let first = mask_spec(&typeface, 12.0);
    let fallback = mask_spec(&typeface, 24.0);
    let remote = server.find_or_create_scoped_strike(&first).unwrap();
    let barrier = Barrier::new(2);

    let (written, later) = thread::scope(|scope| {
        let writer = scope.spawn(|| {
            barrier.wait();
            let mut data = Vec::new();
            server.write_strike_data(&mut data);
            data
        });
        let mut session = remote.lock();
        session.digest_for(ActionType::DirectMask, PackedGlyphId::new(1));
        barrier.wait();
        // Let the writer reach this strike's lock.
        thread::sleep(Duration::from_millis(20));
        let other = server.find_or_create_scoped_strike(&fallback).unwrap();
        other.lock().digest_for(ActionType::Path, PackedGlyphId::new(1));
        drop(session);
        let written = writer.join().unwrap();
        let mut later = Vec::new();
        server.write_strike_data(&mut later);
        (written, later)
    });

    let cache = default_cache();
    let client = StrikeClient::new(handles.clone(), Some(cache.clone()), false);
    client.read_strike_data(&written).unwrap();
    client.read_strike_data(&later).unwrap();
    for spec in [&first, &fallback] {
        let descriptor = client.translate_typeface_id(spec.descriptor()).unwrap();
        assert_eq!(cache.find_strike(&descriptor).unwrap().glyph_count(), 1);
    }
    assert!(handles.failures().is_empty());
}
