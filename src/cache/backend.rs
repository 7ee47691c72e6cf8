//! Pluggable cache backends
//!
//! A backend stores opaque byte values under string keys with a TTL. The
//! in-process backend is a bounded LRU map; the networked backend is Redis.

use async_trait::async_trait;
use dashmap::DashMap;
use redis::aio::MultiplexedConnection;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::OnceCell;

use crate::cache::error::{CacheError, CacheResult};

#[async_trait]
pub trait CacheBackend: Send + Sync {
    fn name(&self) -> &'static str;

    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>>;

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> CacheResult<()>;
}

struct MemoryEntry {
    value: Arc<Vec<u8>>,
    expires_at: Instant,
    last_used: u64,
}

/// Bounded in-process backend with recency eviction
pub struct MemoryBackend {
    entries: DashMap<String, MemoryEntry>,
    capacity: usize,
    clock: AtomicU64,
}

impl MemoryBackend {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: DashMap::new(),
            capacity: capacity.max(1),
            clock: AtomicU64::new(0),
        }
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop expired entries, then the least recently used eighth if still full
    fn evict(&self) {
        let now = Instant::now();
        self.entries.retain(|_, e| e.expires_at > now);
        if self.entries.len() < self.capacity {
            return;
        }

        let mut ticks: Vec<(u64, String)> = self
            .entries
            .iter()
            .map(|e| (e.value().last_used, e.key().clone()))
            .collect();
        ticks.sort_unstable();

        let drop_count = (self.capacity / 8).max(1);
        for (_, key) in ticks.into_iter().take(drop_count) {
            self.entries.remove(&key);
        }
    }
}

#[async_trait]
impl CacheBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        let tick = self.tick();
        let now = Instant::now();

        let hit = match self.entries.get_mut(key) {
            Some(mut entry) if entry.expires_at > now => {
                entry.last_used = tick;
                Some(Arc::clone(&entry.value))
            }
            Some(_) => None,
            None => return Ok(None),
        };

        match hit {
            Some(value) => Ok(Some(value.as_ref().clone())),
            None => {
                self.entries.remove_if(key, |_, e| e.expires_at <= now);
                Ok(None)
            }
        }
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> CacheResult<()> {
        if ttl.is_zero() {
            return Ok(());
        }
        if self.entries.len() >= self.capacity && !self.entries.contains_key(key) {
            self.evict();
        }
        let entry = MemoryEntry {
            value: Arc::new(value),
            expires_at: Instant::now() + ttl,
            last_used: self.tick(),
        };
        self.entries.insert(key.to_string(), entry);
        Ok(())
    }
}

/// Redis backend; one multiplexed connection shared by all requests
pub struct RedisBackend {
    client: redis::Client,
    conn: OnceCell<MultiplexedConnection>,
    prefix: String,
    op_timeout: Duration,
}

impl RedisBackend {
    pub fn new(url: &str, op_timeout: Duration) -> CacheResult<Self> {
        let client = redis::Client::open(url)?;
        Ok(Self {
            client,
            conn: OnceCell::new(),
            prefix: "carbonhouse:".to_string(),
            op_timeout,
        })
    }

    async fn connection(&self) -> CacheResult<MultiplexedConnection> {
        let conn = self
            .conn
            .get_or_try_init(|| async {
                self.client
                    .get_multiplexed_async_connection()
                    .await
                    .map_err(CacheError::from)
            })
            .await?;
        Ok(conn.clone())
    }

    fn key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    fn timed_out(&self) -> CacheError {
        CacheError::Unavailable {
            backend: "redis",
            reason: format!("operation timed out after {}ms", self.op_timeout.as_millis()),
        }
    }
}

#[async_trait]
impl CacheBackend for RedisBackend {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        let op = async {
            let mut conn = self.connection().await?;
            let value = redis::cmd("GET")
                .arg(self.key(key))
                .query_async::<Option<Vec<u8>>>(&mut conn)
                .await?;
            Ok(value)
        };
        tokio::time::timeout(self.op_timeout, op)
            .await
            .unwrap_or_else(|_| Err(self.timed_out()))
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> CacheResult<()> {
        if ttl.is_zero() {
            return Ok(());
        }
        let op = async {
            let mut conn = self.connection().await?;
            redis::cmd("SET")
                .arg(self.key(key))
                .arg(value)
                .arg("PX")
                .arg(ttl.as_millis() as u64)
                .query_async::<()>(&mut conn)
                .await?;
            Ok(())
        };
        tokio::time::timeout(self.op_timeout, op)
            .await
            .unwrap_or_else(|_| Err(self.timed_out()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_get_set() {
        let backend = MemoryBackend::new(16);
        assert_eq!(backend.get("k").await.unwrap(), None);
        backend.set("k", vec![1, 2], Duration::from_secs(60)).await.unwrap();
        assert_eq!(backend.get("k").await.unwrap(), Some(vec![1, 2]));
    }

    #[tokio::test]
    async fn test_memory_expiry() {
        let backend = MemoryBackend::new(16);
        backend.set("k", vec![1], Duration::from_millis(10)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(backend.get("k").await.unwrap(), None);
        assert!(backend.is_empty());
    }

    #[tokio::test]
    async fn test_memory_zero_ttl_is_not_stored() {
        let backend = MemoryBackend::new(16);
        backend.set("k", vec![1], Duration::ZERO).await.unwrap();
        assert!(backend.is_empty());
    }

    #[tokio::test]
    async fn test_memory_evicts_least_recent() {
        let backend = MemoryBackend::new(8);
        let ttl = Duration::from_secs(60);
        for i in 0..8 {
            backend.set(&format!("k{}", i), vec![i], ttl).await.unwrap();
        }
        // touch k0 so k1 is the oldest
        backend.get("k0").await.unwrap();
        backend.set("k8", vec![8], ttl).await.unwrap();

        assert_eq!(backend.len(), 8);
        assert!(backend.get("k0").await.unwrap().is_some());
        assert!(backend.get("k1").await.unwrap().is_none());
        assert!(backend.get("k8").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_redis_unreachable_is_unavailable() {
        let backend = RedisBackend::new("redis://127.0.0.1:1/", Duration::from_millis(500)).unwrap();
        let err = backend.get("k").await.unwrap_err();
        assert!(matches!(err, CacheError::Unavailable { backend: "redis", .. }));
    }
}
