//! Per-host bounded connection slots
//!
//! Each host gets a semaphore sized by `max_connections_per_host`. A request
//! that finds the pool exhausted queues until the request deadline, then
//! fails with [`ExecError::PoolExhausted`] instead of growing the pool.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;

use crate::cluster::error::{ExecError, ExecResult};

pub struct HostPools {
    pools: DashMap<String, Arc<Semaphore>>,
    size: usize,
}

impl HostPools {
    pub fn new(size: usize) -> Self {
        Self {
            pools: DashMap::new(),
            size: size.max(1),
        }
    }

    fn semaphore(&self, host: &str) -> Arc<Semaphore> {
        if let Some(sem) = self.pools.get(host) {
            return Arc::clone(&sem);
        }
        Arc::clone(
            &self
                .pools
                .entry(host.to_string())
                .or_insert_with(|| Arc::new(Semaphore::new(self.size))),
        )
    }

    /// Wait for a slot on `host` until `deadline`
    pub async fn acquire(&self, host: &str, deadline: Instant) -> ExecResult<OwnedSemaphorePermit> {
        let sem = self.semaphore(host);
        match tokio::time::timeout_at(deadline, sem.acquire_owned()).await {
            Ok(Ok(permit)) => Ok(permit),
            Ok(Err(_)) => Err(ExecError::host(host, "connection pool closed")),
            Err(_) => Err(ExecError::PoolExhausted {
                host: host.to_string(),
            }),
        }
    }

    /// Free slots on `host`
    pub fn available(&self, host: &str) -> usize {
        self.semaphore(host).available_permits()
    }
}
