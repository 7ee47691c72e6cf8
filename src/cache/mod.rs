//! Result caching
//!
//! - **fingerprint**: deterministic SHA-256 keys with time bucketing
//! - **codec**: bincode values, LZ4 compressed above a size threshold
//! - **backend**: in-process LRU or Redis storage
//! - **result_cache**: single-flight `get_or_build` on top of a backend

pub mod backend;
pub mod codec;
pub mod error;
pub mod fingerprint;
pub mod result_cache;

pub use backend::{CacheBackend, MemoryBackend, RedisBackend};
pub use error::{CacheError, CacheResult};
pub use fingerprint::{time_bucket, Fingerprint, FingerprintBuilder};
pub use result_cache::{CachePolicy, CacheStats, ResultCache};

use std::sync::Arc;
use std::time::Duration;

use crate::config::{CacheBackendKind, CacheConfig};

/// Create the configured backend
pub fn backend_from_config(config: &CacheConfig) -> CacheResult<Arc<dyn CacheBackend>> {
    match config.backend {
        CacheBackendKind::Memory => Ok(Arc::new(MemoryBackend::new(config.max_entries))),
        CacheBackendKind::Redis => Ok(Arc::new(RedisBackend::new(
            &config.redis_url,
            Duration::from_millis(500),
        )?)),
    }
}

/// Policy for a namespace with the given TTL
pub fn policy(config: &CacheConfig, ttl_secs: u64) -> CachePolicy {
    CachePolicy {
        ttl: Duration::from_secs(ttl_secs),
        failure_ttl: Duration::from_secs(config.failure_ttl_secs),
        compress_threshold: config.compress_threshold_bytes,
    }
}
