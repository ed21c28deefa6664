// Copyright 2025 the Strike Cache Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Utility functions and types shared across tests.

use std::sync::Arc;

use hashbrown::HashSet;
use parking_lot::Mutex;
use strike_cache::remote::{
    CacheMissType, ClientHandleManager, HandleId, ReadFailureData, ServerHandleManager,
};
use strike_cache::{StrikeCache, StrikeCacheConfig};

/// Handles shared by a server and a client living in the same test.
#[derive(Debug, Default)]
pub(crate) struct SharedHandles {
    next: Mutex<HandleId>,
    deleted: Mutex<HashSet<HandleId>>,
    misses: Mutex<Vec<CacheMissType>>,
    failures: Mutex<Vec<ReadFailureData>>,
}

impl SharedHandles {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn is_deleted(&self, handle: HandleId) -> bool {
        self.deleted.lock().contains(&handle)
    }

    pub(crate) fn misses(&self) -> Vec<CacheMissType> {
        self.misses.lock().clone()
    }

    pub(crate) fn failures(&self) -> Vec<ReadFailureData> {
        self.failures.lock().clone()
    }
}

impl ServerHandleManager for SharedHandles {
    fn create_handle(&self) -> HandleId {
        let mut next = self.next.lock();
        *next += 1;
        *next
    }

    fn lock_handle(&self, handle: HandleId) -> bool {
        !self.is_deleted(handle)
    }

    fn is_handle_deleted(&self, handle: HandleId) -> bool {
        self.is_deleted(handle)
    }
}

impl ClientHandleManager for SharedHandles {
    fn delete_handle(&self, handle: HandleId) -> bool {
        self.deleted.lock().insert(handle);
        true
    }

    fn notify_cache_miss(&self, miss: CacheMissType, _font_size: f32) {
        self.misses.lock().push(miss);
    }

    fn notify_read_failure(&self, data: &ReadFailureData) {
        self.failures.lock().push(*data);
    }
}

/// A private cache with the default budgets.
pub(crate) fn default_cache() -> Arc<StrikeCache> {
    Arc::new(StrikeCache::new(StrikeCacheConfig::default()))
}

/// A private cache holding at most `count_limit` strikes.
pub(crate) fn cache_with_count_limit(count_limit: usize) -> Arc<StrikeCache> {
    Arc::new(StrikeCache::new(StrikeCacheConfig {
        count_limit,
        ..StrikeCacheConfig::default()
    }))
}
