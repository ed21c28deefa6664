// Copyright 2025 the Strike Cache Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

use std::sync::Arc;

use strike_cache::buffer::{ReadBuffer, WriteBuffer};
use strike_cache::gpu::{StrikeRef, plan_glyph_run};
use strike_cache::kurbo::Point;
use strike_cache::testing::{FakeTypeface, LARGE_GLYPH, mask_spec};
use strike_cache::{ActionType, StrikeForGpu, StrikePromise};

use crate::util::default_cache;

#[test]
fn promise_survives_eviction_by_resolving_again() {
    let cache = default_cache();
    let typeface = FakeTypeface::new();
    let mut promise = StrikePromise::from_spec(mask_spec(&typeface, 14.0));

    let first = promise.strike_in(&cache).unwrap().clone();
    promise.reset_strike();
    assert!(!promise.is_resolved());
    drop(first);
    cache.purge_all();
    assert_eq!(cache.cache_count_used(), 0);

    let second = promise.strike_in(&cache).unwrap().clone();
    assert_eq!(second.descriptor(), promise.descriptor());
    assert_eq!(typeface.counters().contexts(), 2);
}

#[test]
fn promise_round_trip_needs_a_live_strike() {
    let cache = default_cache();
    let typeface = FakeTypeface::new();
    let strike = cache
        .find_or_create_strike(&mask_spec(&typeface, 14.0))
        .unwrap();
    let promise = strike.clone().strike_promise();
    assert!(promise.is_resolved());

    let mut buffer = WriteBuffer::new();
    promise.flatten(&mut buffer);
    let bytes = buffer.into_bytes();

    let mut read = StrikePromise::from_buffer(&mut ReadBuffer::new(&bytes), None, &cache)
        .unwrap()
        .unwrap();
    assert!(Arc::ptr_eq(read.strike_in(&cache).unwrap(), &strike));

    drop(strike);
    drop(read);
    cache.purge_all();
    let gone = StrikePromise::from_buffer(&mut ReadBuffer::new(&bytes), None, &cache).unwrap();
    assert!(gone.is_none());
}

#[test]
fn promise_strike_ref_feeds_a_glyph_run() {
    let cache = default_cache();
    let typeface = FakeTypeface::new();
    let mut promise = StrikePromise::from_spec(mask_spec(&typeface, 12.0));
    let strike = promise.strike_in(&cache).unwrap().clone();

    let mut owned = StrikeRef::Owned(Some(strike));
    let run = [(7, Point::new(1.25, 3.0)), (LARGE_GLYPH, Point::new(9.0, 3.0))];
    let plan = {
        let strike = owned.as_strike_for_gpu().unwrap();
        plan_glyph_run(strike, ActionType::DirectMask, &run)
    };
    assert_eq!(plan.accepted.len(), 1);
    assert_eq!(plan.rejected, [(LARGE_GLYPH, Point::new(9.0, 3.0))]);
    // Without subpixel positioning the glyph lands on the nearest pixel.
    assert_eq!(plan.accepted[0].1, Point::new(1.0, 3.0));

    assert!(owned.take_strike().is_some());
    assert!(owned.as_strike_for_gpu().is_none());
}
