//! Bounded compiled-pattern cache
//!
//! Keyed by the raw pattern text. Access is sharded through `DashMap`, so
//! lookups for unrelated patterns never contend on one lock. When full, the
//! least recently used eighth of the entries is dropped in one sweep.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::pattern::ast::PatternNode;

pub struct CompiledCache {
    entries: DashMap<String, (Arc<PatternNode>, u64)>,
    capacity: usize,
    clock: AtomicU64,
}

impl CompiledCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: DashMap::new(),
            capacity,
            clock: AtomicU64::new(0),
        }
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed)
    }

    pub fn get(&self, raw: &str) -> Option<Arc<PatternNode>> {
        let tick = self.tick();
        self.entries.get_mut(raw).map(|mut entry| {
            entry.1 = tick;
            Arc::clone(&entry.0)
        })
    }

    pub fn insert(&self, raw: &str, node: Arc<PatternNode>) {
        if self.capacity == 0 {
            return;
        }
        if self.entries.len() >= self.capacity && !self.entries.contains_key(raw) {
            self.evict();
        }
        let tick = self.tick();
        self.entries.insert(raw.to_string(), (node, tick));
    }

    fn evict(&self) {
        let mut ticks: Vec<(u64, String)> = self
            .entries
            .iter()
            .map(|e| (e.value().1, e.key().clone()))
            .collect();
        ticks.sort_unstable();

        let drop_count = (self.capacity / 8).max(1);
        for (_, key) in ticks.into_iter().take(drop_count) {
            self.entries.remove(&key);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
