// Copyright 2025 the Strike Cache Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The budgeted, least-recently-used collection of strikes.
//!
//! Two locks are involved. The cache lock guards the LRU list, the lookup table and the
//! budget counters; it is held only for bookkeeping and never while a scaler runs. Each
//! strike's own lock guards its glyphs. A strike that is checked out through
//! [`ExclusiveStrikePtr`] is unlinked from the list, so it can't be evicted while in use;
//! dropping the pointer links it back in at the head and purges.
//!
//! Strikes handed out by [`StrikeCache::find_or_create_strike`] stay in the list. When one of
//! them grows, unlocking it charges the growth to its cache and purges. The cache lock may be
//! taken while a strike lock is held, never the other way around.

use core::fmt;
use core::ops::Deref;
use std::sync::{Arc, OnceLock, Weak};

use hashbrown::HashMap;
use parking_lot::Mutex;

use crate::descriptor::Descriptor;
use crate::font::StrikeEffects;
use crate::scaler::{FontMetrics, Typeface};
use crate::strike::Strike;
use crate::strike_spec::StrikeSpec;

/// The byte budget never drops below this.
pub const MIN_CACHE_SIZE_LIMIT: usize = 256 * 1024;
/// Default byte budget.
pub const DEFAULT_CACHE_SIZE_LIMIT: usize = 2 * 1024 * 1024;
/// Default number of strikes.
pub const DEFAULT_CACHE_COUNT_LIMIT: usize = 2048;
/// Default largest text size that is cached as masks.
pub const DEFAULT_POINT_SIZE_LIMIT: f32 = 256.0;

/// Lets an outside party keep a strike from being evicted.
///
/// The cache polls [`StrikePinner::can_delete`] when it wants to evict the strike; a pinned
/// strike is skipped until that returns true.
pub trait StrikePinner: Send + Sync {
    /// Whether the strike may be evicted now.
    fn can_delete(&self) -> bool;

    /// Checks that the pinned strike is still valid.
    fn assert_valid(&self) {}
}

/// Receives memory statistics from [`StrikeCache::dump_memory_statistics`].
pub trait TraceMemoryDump {
    /// Records one value.
    fn dump_numeric_value(&mut self, dump_name: &str, value_name: &str, units: &str, value: u64);

    /// Whether per-strike entries are wanted in addition to the totals.
    fn should_dump_details(&self) -> bool {
        true
    }
}

/// Budgets for a [`StrikeCache`].
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct StrikeCacheConfig {
    /// Maximum bytes held by attached strikes; clamped to [`MIN_CACHE_SIZE_LIMIT`].
    pub size_limit: usize,
    /// Maximum number of attached strikes.
    pub count_limit: usize,
    /// Text larger than this on either axis should draw as paths.
    pub point_size_limit: f32,
}

impl Default for StrikeCacheConfig {
    fn default() -> Self {
        Self {
            size_limit: DEFAULT_CACHE_SIZE_LIMIT,
            count_limit: DEFAULT_CACHE_COUNT_LIMIT,
            point_size_limit: DEFAULT_POINT_SIZE_LIMIT,
        }
    }
}

/// Which cache [`StrikeCache::current`] hands out.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum CacheScope {
    /// One cache shared by every thread.
    #[default]
    Global,
    /// One cache per thread.
    ThreadLocal,
}

/// A snapshot of cache usage.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct StrikeCacheStats {
    /// Strikes in the LRU list.
    pub strike_count: usize,
    /// Strikes currently checked out.
    pub checked_out_count: usize,
    /// Strikes with a pinner.
    pub pinned_count: usize,
    /// Bytes held by strikes in the LRU list.
    pub bytes_used: usize,
    /// Glyph records across all strikes, checked out or not.
    pub glyph_count: usize,
    /// Byte budget.
    pub size_limit: usize,
    /// Strike budget.
    pub count_limit: usize,
    /// Point size limit.
    pub point_size_limit: f32,
}

struct Node {
    strike: Arc<Strike>,
    prev: Option<usize>,
    next: Option<usize>,
    /// Bytes charged to the budget while linked.
    memory_used: usize,
    checkouts: usize,
    attached: bool,
}

struct CacheState {
    nodes: Vec<Option<Node>>,
    free: Vec<usize>,
    lookup: HashMap<Descriptor, usize>,
    head: Option<usize>,
    tail: Option<usize>,
    total_memory_used: usize,
    cache_count: usize,
    size_limit: usize,
    count_limit: usize,
    point_size_limit: f32,
}

impl CacheState {
    fn new(config: &StrikeCacheConfig) -> Self {
        Self {
            nodes: Vec::new(),
            free: Vec::new(),
            lookup: HashMap::new(),
            head: None,
            tail: None,
            total_memory_used: 0,
            cache_count: 0,
            size_limit: config.size_limit.max(MIN_CACHE_SIZE_LIMIT),
            count_limit: config.count_limit,
            point_size_limit: config.point_size_limit.max(0.0),
        }
    }

    fn node(&self, index: usize) -> &Node {
        self.nodes[index]
            .as_ref()
            .unwrap_or_else(|| unreachable!("strike cache slot {index} is free"))
    }

    fn node_mut(&mut self, index: usize) -> &mut Node {
        self.nodes[index]
            .as_mut()
            .unwrap_or_else(|| unreachable!("strike cache slot {index} is free"))
    }

    /// Adds a strike and links it at the head.
    fn insert(&mut self, strike: Arc<Strike>) -> usize {
        let node = Node {
            strike,
            prev: None,
            next: None,
            memory_used: 0,
            checkouts: 0,
            attached: false,
        };
        let descriptor = node.strike.descriptor().clone();
        let index = if let Some(index) = self.free.pop() {
            self.nodes[index] = Some(node);
            index
        } else {
            self.nodes.push(Some(node));
            self.nodes.len() - 1
        };
        self.lookup.insert(descriptor, index);
        self.attach(index);
        index
    }

    /// Links a node at the head and charges its memory to the budget.
    fn attach(&mut self, index: usize) {
        let old_head = self.head;
        let node = self.node_mut(index);
        debug_assert!(!node.attached, "attaching a strike that is already attached");
        node.memory_used = node.strike.memory_used();
        node.attached = true;
        node.prev = None;
        node.next = old_head;
        let memory = node.memory_used;
        match old_head {
            Some(head) => self.node_mut(head).prev = Some(index),
            None => self.tail = Some(index),
        }
        self.head = Some(index);
        self.total_memory_used += memory;
        self.cache_count += 1;
    }

    /// Unlinks a node and removes its memory from the budget.
    fn detach(&mut self, index: usize) {
        let node = self.node_mut(index);
        debug_assert!(node.attached, "detaching a strike that is not attached");
        let (prev, next, memory) = (node.prev, node.next, node.memory_used);
        node.attached = false;
        node.prev = None;
        node.next = None;
        match prev {
            Some(prev) => self.node_mut(prev).next = next,
            None => self.head = next,
        }
        match next {
            Some(next) => self.node_mut(next).prev = prev,
            None => self.tail = prev,
        }
        self.total_memory_used -= memory;
        self.cache_count -= 1;
    }

    fn move_to_head(&mut self, index: usize) {
        if self.node(index).attached && self.head != Some(index) {
            self.detach(index);
            self.attach(index);
        }
    }

    fn remove(&mut self, index: usize) -> Arc<Strike> {
        if self.node(index).attached {
            self.detach(index);
        }
        let node = self.nodes[index]
            .take()
            .unwrap_or_else(|| unreachable!("strike cache slot {index} is free"));
        self.lookup.remove(node.strike.descriptor());
        self.free.push(index);
        node.strike
    }

    /// Charges an attached strike's current size to the budget. Returns false for strikes
    /// that are checked out; they are charged when they are linked back in.
    fn recharge(&mut self, index: usize) -> bool {
        let node = self.node_mut(index);
        if !node.attached {
            return false;
        }
        let current = node.strike.memory_used();
        let previous = core::mem::replace(&mut node.memory_used, current);
        self.total_memory_used = self.total_memory_used - previous + current;
        true
    }

    /// Evicts from the tail until the budgets are met. Each strike is visited at most once,
    /// so a run of pinned strikes at the tail can leave the cache over budget.
    fn purge(&mut self, min_bytes_needed: usize, evicted: &mut Vec<Arc<Strike>>) -> usize {
        let mut bytes_needed = self
            .total_memory_used
            .saturating_sub(self.size_limit)
            .max(min_bytes_needed);
        if bytes_needed > 0 {
            // No small purges.
            bytes_needed = bytes_needed.max(self.total_memory_used >> 2);
        }
        let mut count_needed = 0;
        if self.cache_count > self.count_limit {
            count_needed = (self.cache_count - self.count_limit).max(self.cache_count >> 2);
        }
        if bytes_needed == 0 && count_needed == 0 {
            return 0;
        }

        let mut bytes_freed = 0;
        let mut count_freed = 0;
        let mut cursor = self.tail;
        while let Some(index) = cursor {
            if bytes_freed >= bytes_needed && count_freed >= count_needed {
                break;
            }
            let node = self.node(index);
            cursor = node.prev;
            if node.strike.can_delete() {
                bytes_freed += node.memory_used;
                count_freed += 1;
                evicted.push(self.remove(index));
            }
        }

        if count_freed > 0 {
            log::debug!(
                "purged {count_freed} strikes ({bytes_freed} bytes); needed {count_needed} \
                 strikes, {bytes_needed} bytes"
            );
        }
        bytes_freed
    }

    fn validate(&self) {
        let mut memory = 0;
        let mut count = 0;
        let mut cursor = self.head;
        let mut prev = None;
        while let Some(index) = cursor {
            let node = self.node(index);
            assert!(node.attached, "detached strike found in the LRU list");
            assert_eq!(node.prev, prev, "broken LRU back link");
            memory += node.memory_used;
            count += 1;
            prev = Some(index);
            cursor = node.next;
        }
        assert_eq!(self.tail, prev, "LRU tail does not end the list");
        assert_eq!(
            memory, self.total_memory_used,
            "strike cache byte accounting is out of sync"
        );
        assert_eq!(
            count, self.cache_count,
            "strike cache count accounting is out of sync"
        );
    }
}

/// The cache a strike belongs to, as seen from the strike.
pub(crate) struct CacheLink(Weak<Mutex<CacheState>>);

impl CacheLink {
    /// Charges the growth of `strike` to the cache and purges if that broke a budget.
    pub(crate) fn strike_grew(&self, strike: &Strike) {
        let Some(state) = self.0.upgrade() else {
            return;
        };
        let mut evicted = Vec::new();
        {
            let mut state = state.lock();
            let Some(&index) = state.lookup.get(strike.descriptor()) else {
                // Already evicted.
                return;
            };
            if !core::ptr::eq(Arc::as_ptr(&state.node(index).strike), strike) {
                return;
            }
            if state.recharge(index) {
                state.purge(0, &mut evicted);
            }
        }
        // Strikes are freed outside the cache lock.
        drop(evicted);
    }
}

/// A budgeted LRU cache of strikes.
pub struct StrikeCache {
    state: Arc<Mutex<CacheState>>,
}

impl Default for StrikeCache {
    fn default() -> Self {
        Self::new(StrikeCacheConfig::default())
    }
}

static SCOPE: OnceLock<CacheScope> = OnceLock::new();
static GLOBAL: OnceLock<Arc<StrikeCache>> = OnceLock::new();

std::thread_local! {
    static THREAD_CACHE: Arc<StrikeCache> = Arc::new(StrikeCache::default());
}

impl StrikeCache {
    /// Creates a cache with the given budgets.
    pub fn new(config: StrikeCacheConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(CacheState::new(&config))),
        }
    }

    fn link(&self) -> CacheLink {
        CacheLink(Arc::downgrade(&self.state))
    }

    /// Chooses what [`StrikeCache::current`] returns for the rest of the process.
    ///
    /// The first call wins, including the implicit one made by `current`. Asking for a
    /// different scope afterwards returns the scope already in effect.
    pub fn configure_scope(scope: CacheScope) -> Result<(), CacheScope> {
        let active = *SCOPE.get_or_init(|| scope);
        if active == scope {
            Ok(())
        } else {
            Err(active)
        }
    }

    /// The process-wide or thread-local cache, created on first use.
    pub fn current() -> Arc<Self> {
        match SCOPE.get_or_init(CacheScope::default) {
            CacheScope::Global => GLOBAL.get_or_init(|| Arc::new(Self::default())).clone(),
            CacheScope::ThreadLocal => THREAD_CACHE.with(Arc::clone),
        }
    }

    fn finish(&self, evicted: Vec<Arc<Strike>>) {
        // Strikes are freed outside the cache lock.
        drop(evicted);
    }

    fn checkout<'a>(&'a self, state: &mut CacheState, index: usize) -> ExclusiveStrikePtr<'a> {
        if state.node(index).attached {
            state.detach(index);
        }
        let node = state.node_mut(index);
        node.checkouts += 1;
        log::trace!("checked out strike {:#010x}", node.strike.descriptor().checksum());
        ExclusiveStrikePtr {
            cache: self,
            strike: node.strike.clone(),
        }
    }

    fn release(&self, strike: &Arc<Strike>) {
        let mut evicted = Vec::new();
        {
            let mut state = self.state.lock();
            let Some(&index) = state.lookup.get(strike.descriptor()) else {
                log::error!(
                    "released strike {:#010x} is not in the cache",
                    strike.descriptor().checksum()
                );
                return;
            };
            let node = state.node_mut(index);
            debug_assert!(Arc::ptr_eq(&node.strike, strike), "released a foreign strike");
            node.checkouts -= 1;
            if node.checkouts == 0 {
                state.attach(index);
            }
            log::trace!("released strike {:#010x}", strike.descriptor().checksum());
            state.purge(0, &mut evicted);
        }
        self.finish(evicted);
    }

    /// Finds the strike for `descriptor`, creating it with `typeface` on a miss, and checks
    /// it out so it can't be evicted while the returned pointer lives.
    ///
    /// Returns `None` if the typeface can't build a scaler context.
    pub fn find_or_create_strike_exclusive(
        &self,
        descriptor: &Descriptor,
        effects: &StrikeEffects,
        typeface: &Arc<dyn Typeface>,
    ) -> Option<ExclusiveStrikePtr<'_>> {
        if let Some(found) = self.find_strike_exclusive(descriptor) {
            return Some(found);
        }
        let spec = StrikeSpec::from_parts(descriptor.clone(), typeface.clone(), effects.clone());
        let strike = Arc::new(self.build_strike(spec, None, None)?);

        let mut state = self.state.lock();
        // Another thread may have built the same strike meanwhile.
        if let Some(&index) = state.lookup.get(descriptor) {
            return Some(self.checkout(&mut state, index));
        }
        strike.set_owner(self.link());
        let index = state.insert(strike);
        Some(self.checkout(&mut state, index))
    }

    /// Checks out the strike for `descriptor` if it is cached.
    pub fn find_strike_exclusive(&self, descriptor: &Descriptor) -> Option<ExclusiveStrikePtr<'_>> {
        let mut state = self.state.lock();
        let index = *state.lookup.get(descriptor)?;
        Some(self.checkout(&mut state, index))
    }

    /// Returns the cached strike for `descriptor`, marking it most recently used.
    pub fn find_strike(&self, descriptor: &Descriptor) -> Option<Arc<Strike>> {
        let mut state = self.state.lock();
        let index = *state.lookup.get(descriptor)?;
        state.move_to_head(index);
        Some(state.node(index).strike.clone())
    }

    /// Returns the strike for `spec`, creating it on a miss.
    ///
    /// The strike stays evictable; holders of the returned reference keep it alive but not
    /// cached. Growing it through [`Strike::lock`] is charged to this cache's budget.
    pub fn find_or_create_strike(&self, spec: &StrikeSpec) -> Option<Arc<Strike>> {
        self.find_strike(spec.descriptor())
            .or_else(|| self.create_strike(spec.clone(), None, None))
    }

    /// Builds a strike for `spec` and links it at the head of the cache.
    ///
    /// `font_metrics` overrides the scaler's metrics. If a strike with the same descriptor
    /// is already cached, it is returned instead.
    pub fn create_strike(
        &self,
        spec: StrikeSpec,
        font_metrics: Option<FontMetrics>,
        pinner: Option<Box<dyn StrikePinner>>,
    ) -> Option<Arc<Strike>> {
        let strike = Arc::new(self.build_strike(spec, font_metrics, pinner)?);
        let mut evicted = Vec::new();
        let result = {
            let mut state = self.state.lock();
            if let Some(&index) = state.lookup.get(strike.descriptor()) {
                state.move_to_head(index);
                state.node(index).strike.clone()
            } else {
                strike.set_owner(self.link());
                state.insert(strike.clone());
                state.purge(0, &mut evicted);
                strike
            }
        };
        self.finish(evicted);
        Some(result)
    }

    fn build_strike(
        &self,
        spec: StrikeSpec,
        font_metrics: Option<FontMetrics>,
        pinner: Option<Box<dyn StrikePinner>>,
    ) -> Option<Strike> {
        match spec.create_scaler_context() {
            Ok(scaler) => {
                log::trace!("creating strike: {}", spec.descriptor().dump_rec());
                Some(Strike::new(spec, scaler, font_metrics, pinner))
            }
            Err(err) => {
                log::warn!(
                    "failed to create scaler context ({err}) for {}",
                    spec.descriptor().dump_rec()
                );
                None
            }
        }
    }

    /// Sets the byte budget, clamped to [`MIN_CACHE_SIZE_LIMIT`], and purges. Returns the
    /// previous budget.
    pub fn set_cache_size_limit(&self, limit: usize) -> usize {
        let mut evicted = Vec::new();
        let previous = {
            let mut state = self.state.lock();
            let previous =
                core::mem::replace(&mut state.size_limit, limit.max(MIN_CACHE_SIZE_LIMIT));
            log::debug!("strike cache size limit {previous} -> {}", state.size_limit);
            state.purge(0, &mut evicted);
            previous
        };
        self.finish(evicted);
        previous
    }

    /// Sets the strike budget and purges. Returns the previous budget.
    pub fn set_cache_count_limit(&self, limit: usize) -> usize {
        let mut evicted = Vec::new();
        let previous = {
            let mut state = self.state.lock();
            let previous = core::mem::replace(&mut state.count_limit, limit);
            log::debug!("strike cache count limit {previous} -> {limit}");
            state.purge(0, &mut evicted);
            previous
        };
        self.finish(evicted);
        previous
    }

    /// Sets the point size limit. Returns the previous limit.
    pub fn set_cache_point_size_limit(&self, limit: f32) -> f32 {
        let limit = if limit.is_finite() { limit.max(0.0) } else { 0.0 };
        let mut state = self.state.lock();
        log::debug!("strike cache point size limit {} -> {limit}", state.point_size_limit);
        core::mem::replace(&mut state.point_size_limit, limit)
    }

    /// The byte budget.
    pub fn cache_size_limit(&self) -> usize {
        self.state.lock().size_limit
    }

    /// The strike budget.
    pub fn cache_count_limit(&self) -> usize {
        self.state.lock().count_limit
    }

    /// The point size limit.
    pub fn cache_point_size_limit(&self) -> f32 {
        self.state.lock().point_size_limit
    }

    /// Bytes held by strikes in the LRU list.
    pub fn total_memory_used(&self) -> usize {
        self.state.lock().total_memory_used
    }

    /// Number of strikes in the LRU list.
    pub fn cache_count_used(&self) -> usize {
        self.state.lock().cache_count
    }

    /// Evicts every strike that isn't checked out or pinned.
    pub fn purge_all(&self) {
        let mut evicted = Vec::new();
        {
            let mut state = self.state.lock();
            let everything = state.total_memory_used.max(1);
            state.purge(everything, &mut evicted);
        }
        self.finish(evicted);
    }

    /// Runs a purge that frees at least `min_bytes_needed`, if enough strikes can be
    /// evicted. Returns the bytes freed.
    pub fn purge(&self, min_bytes_needed: usize) -> usize {
        let mut evicted = Vec::new();
        let freed = self.state.lock().purge(min_bytes_needed, &mut evicted);
        self.finish(evicted);
        freed
    }

    /// Checks the LRU list against the cached byte and strike counts.
    ///
    /// # Panics
    ///
    /// Panics if they disagree.
    pub fn validate(&self) {
        self.state.lock().validate();
    }

    /// Current usage and budgets.
    pub fn stats(&self) -> StrikeCacheStats {
        let state = self.state.lock();
        let mut stats = StrikeCacheStats {
            strike_count: state.cache_count,
            bytes_used: state.total_memory_used,
            size_limit: state.size_limit,
            count_limit: state.count_limit,
            point_size_limit: state.point_size_limit,
            ..StrikeCacheStats::default()
        };
        for node in state.nodes.iter().flatten() {
            if node.checkouts > 0 {
                stats.checked_out_count += 1;
            }
            if node.strike.pinner().is_some() {
                stats.pinned_count += 1;
            }
            stats.glyph_count += node.strike.glyph_count();
        }
        stats
    }

    /// Reports totals and, if wanted, per-strike usage to `dump`.
    pub fn dump_memory_statistics(&self, dump: &mut dyn TraceMemoryDump) {
        const DUMP_NAME: &str = "strike_cache";
        let stats = self.stats();
        let strikes: Vec<_> = {
            let state = self.state.lock();
            state.nodes.iter().flatten().map(|node| node.strike.clone()).collect()
        };
        dump.dump_numeric_value(DUMP_NAME, "size", "bytes", stats.bytes_used as u64);
        dump.dump_numeric_value(DUMP_NAME, "budget_size", "bytes", stats.size_limit as u64);
        dump.dump_numeric_value(DUMP_NAME, "glyph_count", "objects", stats.glyph_count as u64);
        if !dump.should_dump_details() {
            return;
        }
        for strike in strikes {
            let name = format!(
                "{DUMP_NAME}/{}_{:#010x}",
                strike.descriptor().rec().typeface_id,
                strike.descriptor().checksum()
            );
            dump.dump_numeric_value(&name, "size", "bytes", strike.memory_used() as u64);
            dump.dump_numeric_value(&name, "glyph_count", "objects", strike.glyph_count() as u64);
        }
    }
}

impl fmt::Debug for StrikeCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("StrikeCache")
            .field("cache_count", &state.cache_count)
            .field("total_memory_used", &state.total_memory_used)
            .field("size_limit", &state.size_limit)
            .field("count_limit", &state.count_limit)
            .finish_non_exhaustive()
    }
}

/// A strike checked out of a [`StrikeCache`].
///
/// While any pointer to a strike lives, the strike is out of the LRU list and can't be
/// evicted. Dropping the last one links it back at the head and purges.
pub struct ExclusiveStrikePtr<'a> {
    cache: &'a StrikeCache,
    strike: Arc<Strike>,
}

impl ExclusiveStrikePtr<'_> {
    /// The shared strike.
    pub fn strike(&self) -> &Arc<Strike> {
        &self.strike
    }

    /// Returns the strike to the cache now.
    pub fn release(self) {}
}

impl Deref for ExclusiveStrikePtr<'_> {
    type Target = Strike;

    fn deref(&self) -> &Strike {
        &self.strike
    }
}

impl Drop for ExclusiveStrikePtr<'_> {
    fn drop(&mut self) {
        self.cache.release(&self.strike);
    }
}

impl fmt::Debug for ExclusiveStrikePtr<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ExclusiveStrikePtr").field(&self.strike).finish()
    }
}
