//! Response bodies that are not wire-encoded series or paths

use serde::Serialize;

use crate::cache::CacheStats;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub cluster: String,
    pub uptime_seconds: u64,
    pub version: String,
    pub caches: CachesDto,
    pub compiled_patterns: usize,
}

#[derive(Debug, Serialize)]
pub struct CachesDto {
    pub find: CacheStatsDto,
    pub render: CacheStatsDto,
    pub autocomplete: CacheStatsDto,
}

#[derive(Debug, Serialize)]
pub struct CacheStatsDto {
    pub hits: u64,
    pub misses: u64,
    pub builds: u64,
    pub joined: u64,
}

impl From<CacheStats> for CacheStatsDto {
    fn from(s: CacheStats) -> Self {
        Self {
            hits: s.hits,
            misses: s.misses,
            builds: s.builds,
            joined: s.joined,
        }
    }
}
