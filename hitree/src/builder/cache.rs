/*
* Licensed to Elasticsearch B.V. under one or more contributor
* license agreements. See the NOTICE file distributed with
* this work for additional information regarding copyright
* ownership. Elasticsearch B.V. licenses this file to you under
* the Apache License, Version 2.0 (the "License"); you may
* not use this file except in compliance with the License.
* You may obtain a copy of the License at
*
*  http://www.apache.org/licenses/LICENSE-2.0
*
* Unless required by applicable law or agreed to in writing,
* software distributed under the License is distributed on an
* "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
* KIND, either express or implied.  See the License for the
* specific language governing permissions and limitations
* under the License.
*/

//! # The listed cache
//! An LRU-bounded id-to-tract cache. A tracker vector holds one slot per possible
//! id (ids are dense, so the lookup is an index), a tick-ordered map holds the
//! usage order. `cleanup()` evicts from the least recently used end until the size
//! fits the limit; the limit is rebalanced between the leaf and node tiers on
//! every merge iteration.
//!
//! Values are handed out as `Arc` clones so distance workers can hold a tract
//! across the parallel section while the cache keeps evicting behind them.

use std::collections::BTreeMap;
use std::sync::Arc;

struct CacheEntry<T> {
    value: Arc<T>,
    tick: u64,
}

pub(crate) struct ListedCache<T> {
    size_limit: usize,
    next_tick: u64,
    usage: BTreeMap<u64, usize>,
    tracker: Vec<Option<CacheEntry<T>>>,
    stored: usize,
    hits: u64,
    misses: u64,
}

impl<T> ListedCache<T> {
    /// A cache able to hold ids below `list_size`, evicting down to `size_limit`
    pub(crate) fn new(list_size: usize, size_limit: usize) -> ListedCache<T> {
        let mut tracker = Vec::with_capacity(list_size);
        tracker.resize_with(list_size, || None);
        ListedCache {
            size_limit,
            next_tick: 0,
            usage: BTreeMap::new(),
            tracker,
            stored: 0,
            hits: 0,
            misses: 0,
        }
    }

    /// Entries currently stored, can temporarily exceed the limit until `cleanup()`
    pub(crate) fn size(&self) -> usize {
        self.stored
    }

    /// False once `shutdown()` released the tracking table
    pub(crate) fn active(&self) -> bool {
        !self.tracker.is_empty()
    }

    /// The eviction target size
    pub(crate) fn limit(&self) -> usize {
        self.size_limit
    }

    /// Changes the eviction target, applied on the next `cleanup()`
    pub(crate) fn set_limit(&mut self, size_limit: usize) {
        self.size_limit = size_limit;
    }

    /// The least recently used id, if anything is stored
    pub(crate) fn oldest(&self) -> Option<usize> {
        self.usage.values().next().copied()
    }

    ///
    pub(crate) fn has(&self, id: usize) -> bool {
        self.tracker[id].is_some()
    }

    /// Cache hits recorded by `get`
    pub(crate) fn hits(&self) -> u64 {
        self.hits
    }

    /// Cache misses recorded by `get`
    pub(crate) fn misses(&self) -> u64 {
        self.misses
    }

    /// Fetches an entry and promotes it to most recently used
    pub(crate) fn get(&mut self, id: usize) -> Option<Arc<T>> {
        let next_tick = self.next_tick;
        self.next_tick += 1;
        match self.tracker[id].as_mut() {
            Some(entry) => {
                self.usage.remove(&entry.tick);
                entry.tick = next_tick;
                self.usage.insert(next_tick, id);
                self.hits += 1;
                Some(Arc::clone(&entry.value))
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    /// Fetches an entry without touching the usage order
    pub(crate) fn get_no_update(&self, id: usize) -> Option<Arc<T>> {
        self.tracker[id].as_ref().map(|entry| Arc::clone(&entry.value))
    }

    /// Moves a value in and returns the stored handle. Inserting over an existing
    /// entry is a no-op that hands back what is already there.
    pub(crate) fn insert(&mut self, id: usize, value: T) -> Arc<T> {
        if let Some(entry) = self.tracker[id].as_ref() {
            log::warn!("cache entry {} is already loaded, new value dropped", id);
            return Arc::clone(&entry.value);
        }
        let tick = self.next_tick;
        self.next_tick += 1;
        let value = Arc::new(value);
        self.usage.insert(tick, id);
        self.tracker[id] = Some(CacheEntry {
            value: Arc::clone(&value),
            tick,
        });
        self.stored += 1;
        value
    }

    /// Drops an entry if present
    pub(crate) fn erase(&mut self, id: usize) {
        if let Some(entry) = self.tracker[id].take() {
            self.usage.remove(&entry.tick);
            self.stored -= 1;
        }
    }

    /// Evicts least recently used entries until the size fits the limit.
    /// A limit of zero empties the cache.
    pub(crate) fn cleanup(&mut self) {
        while self.stored > self.size_limit {
            let (tick, id) = match self.usage.iter().next() {
                Some((tick, id)) => (*tick, *id),
                None => break,
            };
            self.usage.remove(&tick);
            self.tracker[id] = None;
            self.stored -= 1;
        }
    }

    /// Empties the cache but keeps the tracker usable
    pub(crate) fn clear(&mut self) {
        self.usage.clear();
        for slot in self.tracker.iter_mut() {
            *slot = None;
        }
        self.stored = 0;
    }

    /// Releases the tracking table entirely; the cache may not be used after this
    pub(crate) fn shutdown(&mut self) {
        self.usage.clear();
        self.tracker = Vec::new();
        self.stored = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_get_erase() {
        let mut cache: ListedCache<u32> = ListedCache::new(8, 4);
        assert!(!cache.has(3));
        cache.insert(3, 33);
        assert!(cache.has(3));
        assert_eq!(*cache.get(3).unwrap(), 33);
        assert_eq!(cache.hits(), 1);
        assert!(cache.get(4).is_none());
        assert_eq!(cache.misses(), 1);
        cache.erase(3);
        assert!(!cache.has(3));
        assert_eq!(cache.size(), 0);
        // erasing twice stays quiet
        cache.erase(3);
    }

    #[test]
    fn eviction_follows_usage_order() {
        let mut cache: ListedCache<u32> = ListedCache::new(8, 2);
        cache.insert(0, 0);
        cache.insert(1, 10);
        cache.insert(2, 20);
        assert_eq!(cache.size(), 3);
        // promote 0, leaving 1 as the oldest
        cache.get(0);
        assert_eq!(cache.oldest(), Some(1));
        cache.cleanup();
        assert_eq!(cache.size(), 2);
        assert!(!cache.has(1));
        assert!(cache.has(0));
        assert!(cache.has(2));
    }

    #[test]
    fn cleanup_to_zero_empties() {
        let mut cache: ListedCache<u32> = ListedCache::new(4, 2);
        cache.insert(0, 0);
        cache.insert(1, 1);
        cache.set_limit(0);
        cache.cleanup();
        assert_eq!(cache.size(), 0);
    }

    #[test]
    fn clear_keeps_the_tracker_usable() {
        let mut cache: ListedCache<u32> = ListedCache::new(4, 4);
        cache.insert(0, 5);
        cache.clear();
        assert!(cache.active());
        assert_eq!(cache.size(), 0);
        cache.insert(0, 6);
        assert_eq!(*cache.get(0).unwrap(), 6);
    }

    #[test]
    fn shutdown_releases_the_tracker() {
        let mut cache: ListedCache<u32> = ListedCache::new(4, 4);
        cache.insert(0, 5);
        cache.shutdown();
        assert!(!cache.active());
        assert_eq!(cache.size(), 0);
    }

    #[test]
    fn double_insert_keeps_first() {
        let mut cache: ListedCache<u32> = ListedCache::new(4, 4);
        cache.insert(2, 22);
        let handle = cache.insert(2, 99);
        assert_eq!(*handle, 22);
        assert_eq!(cache.size(), 1);
    }

    #[test]
    fn handles_survive_eviction() {
        let mut cache: ListedCache<Vec<u8>> = ListedCache::new(4, 1);
        let held = cache.insert(0, vec![7; 16]);
        cache.insert(1, vec![9; 16]);
        cache.cleanup();
        assert!(!cache.has(0));
        assert_eq!(held[0], 7);
    }

    #[test]
    fn no_update_read_does_not_promote() {
        let mut cache: ListedCache<u32> = ListedCache::new(4, 2);
        cache.insert(0, 0);
        cache.insert(1, 1);
        cache.get_no_update(0);
        assert_eq!(cache.oldest(), Some(0));
    }
}
