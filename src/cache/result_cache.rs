//! Single-flight result cache
//!
//! `get_or_build` guarantees at most one concurrent build per fingerprint.
//! The first caller that misses starts the build as a spawned task; every
//! concurrent caller for the same fingerprint waits on that task's watch
//! channel and receives the same value or the same error.
//!
//! ```text
//! caller ─> failure cache ─> backend ─(miss)─> flights ─┬─ vacant:   spawn build, wait
//!                                                       └─ occupied: wait
//! build done ─> publish ─> backend.set(ttl) ─> remove flight
//! ```
//!
//! A waiter that leaves (cancelled or past its deadline) detaches from the
//! flight. The build itself is aborted only when no waiter remains. Ready
//! values live in the backend with a TTL counted from completion; builds in
//! progress are never in the backend and so can never be evicted.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Display;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::cache::backend::CacheBackend;
use crate::cache::codec;
use crate::cache::error::CacheError;
use crate::cache::fingerprint::Fingerprint;
use crate::cluster::{ExecError, QueryContext};

/// Lifetimes and encoding for one cache namespace
#[derive(Debug, Clone, Copy)]
pub struct CachePolicy {
    /// Lifetime of a ready value, from build completion; zero disables storing
    pub ttl: Duration,
    /// Lifetime of a cached failure; zero means failures are not cached
    pub failure_ttl: Duration,
    pub compress_threshold: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub builds: u64,
    pub joined: u64,
}

type Outcome<T, E> = Option<Result<Arc<T>, E>>;

struct Flight<T, E> {
    id: u64,
    rx: watch::Receiver<Outcome<T, E>>,
    waiters: usize,
    task: AbortHandle,
}

struct Inner<T, E> {
    name: &'static str,
    backend: Arc<dyn CacheBackend>,
    policy: CachePolicy,
    flights: DashMap<Fingerprint, Flight<T, E>>,
    failures: DashMap<Fingerprint, (E, Instant)>,
    next_id: AtomicU64,
    closed: CancellationToken,
    hits: AtomicU64,
    misses: AtomicU64,
    builds: AtomicU64,
    joined: AtomicU64,
}

pub struct ResultCache<T, E> {
    inner: Arc<Inner<T, E>>,
    _marker: PhantomData<fn() -> T>,
}

impl<T, E> Clone for ResultCache<T, E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            _marker: PhantomData,
        }
    }
}

/// Detaches one waiter from its flight when dropped
struct WaiterGuard<T, E> {
    inner: Arc<Inner<T, E>>,
    fingerprint: Fingerprint,
    id: u64,
}

impl<T, E> Drop for WaiterGuard<T, E> {
    fn drop(&mut self) {
        if let Entry::Occupied(mut entry) = self.inner.flights.entry(self.fingerprint.clone()) {
            let flight = entry.get_mut();
            if flight.id != self.id {
                return;
            }
            flight.waiters = flight.waiters.saturating_sub(1);
            if flight.waiters == 0 && flight.rx.borrow().is_none() {
                flight.task.abort();
                entry.remove();
                debug!(
                    cache = self.inner.name,
                    fingerprint = %self.fingerprint.short(),
                    "Last waiter left, build aborted"
                );
            }
        }
    }
}

impl<T, E> ResultCache<T, E>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
    E: Clone + Display + From<CacheError> + From<ExecError> + Send + Sync + 'static,
{
    pub fn new(name: &'static str, backend: Arc<dyn CacheBackend>, policy: CachePolicy) -> Self {
        Self {
            inner: Arc::new(Inner {
                name,
                backend,
                policy,
                flights: DashMap::new(),
                failures: DashMap::new(),
                next_id: AtomicU64::new(0),
                closed: CancellationToken::new(),
                hits: AtomicU64::new(0),
                misses: AtomicU64::new(0),
                builds: AtomicU64::new(0),
                joined: AtomicU64::new(0),
            }),
            _marker: PhantomData,
        }
    }

    /// Return the cached value for `fingerprint`, or build it once for all
    /// concurrent callers. `build` receives a context with the caller's
    /// deadline but its own cancellation.
    pub async fn get_or_build<F, Fut>(
        &self,
        fingerprint: &Fingerprint,
        ctx: &QueryContext,
        build: F,
    ) -> Result<Arc<T>, E>
    where
        F: FnOnce(QueryContext) -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let inner = &self.inner;
        if inner.closed.is_cancelled() {
            return Err(CacheError::Shutdown.into());
        }
        if let Some(err) = inner.cached_failure(fingerprint) {
            debug!(cache = inner.name, fingerprint = %fingerprint.short(), "Cached failure");
            return Err(err);
        }
        if let Some(value) = inner.lookup(fingerprint).await {
            inner.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(value);
        }
        inner.misses.fetch_add(1, Ordering::Relaxed);

        let (mut rx, id) = self.join_or_start(fingerprint, ctx, build);
        let _guard = WaiterGuard {
            inner: Arc::clone(inner),
            fingerprint: fingerprint.clone(),
            id,
        };

        let wait = async {
            tokio::select! {
                biased;
                _ = inner.closed.cancelled() => Err(CacheError::Shutdown.into()),
                res = rx.wait_for(Option::is_some) => match res {
                    Ok(outcome) => match &*outcome {
                        Some(result) => result.clone(),
                        None => Err(CacheError::Abandoned(fingerprint.short().to_string()).into()),
                    },
                    Err(_) if inner.closed.is_cancelled() => Err(CacheError::Shutdown.into()),
                    Err(_) => Err(CacheError::Abandoned(fingerprint.short().to_string()).into()),
                },
            }
        };

        match ctx.run(async { Ok::<_, ExecError>(wait.await) }).await {
            Ok(result) => result,
            Err(e) => Err(e.into()),
        }
    }

    fn join_or_start<F, Fut>(
        &self,
        fingerprint: &Fingerprint,
        ctx: &QueryContext,
        build: F,
    ) -> (watch::Receiver<Outcome<T, E>>, u64)
    where
        F: FnOnce(QueryContext) -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let inner = &self.inner;
        match inner.flights.entry(fingerprint.clone()) {
            Entry::Occupied(mut entry) => {
                let flight = entry.get_mut();
                flight.waiters += 1;
                inner.joined.fetch_add(1, Ordering::Relaxed);
                (flight.rx.clone(), flight.id)
            }
            Entry::Vacant(entry) => {
                let id = inner.next_id.fetch_add(1, Ordering::Relaxed);
                let (tx, rx) = watch::channel(None);
                inner.builds.fetch_add(1, Ordering::Relaxed);

                let fut = build(ctx.detached());
                let task = tokio::spawn(Inner::run_build(
                    Arc::clone(inner),
                    fingerprint.clone(),
                    id,
                    tx,
                    fut,
                    ctx.deadline(),
                ));
                entry.insert(Flight {
                    id,
                    rx: rx.clone(),
                    waiters: 1,
                    task: task.abort_handle(),
                });
                (rx, id)
            }
        }
    }

    /// Fail every waiter with a shutdown error and abort running builds
    pub fn shutdown(&self) {
        let inner = &self.inner;
        inner.closed.cancel();
        let mut aborted = 0usize;
        inner.flights.retain(|_, flight| {
            flight.task.abort();
            aborted += 1;
            false
        });
        debug!(cache = inner.name, aborted, "Result cache shut down");
    }

    /// Builds currently running
    pub fn in_flight(&self) -> usize {
        self.inner.flights.len()
    }

    pub fn stats(&self) -> CacheStats {
        let inner = &self.inner;
        CacheStats {
            hits: inner.hits.load(Ordering::Relaxed),
            misses: inner.misses.load(Ordering::Relaxed),
            builds: inner.builds.load(Ordering::Relaxed),
            joined: inner.joined.load(Ordering::Relaxed),
        }
    }
}

impl<T, E> Inner<T, E>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
    E: Clone + Display + From<CacheError> + From<ExecError> + Send + Sync + 'static,
{
    fn cached_failure(&self, fingerprint: &Fingerprint) -> Option<E> {
        if self.policy.failure_ttl.is_zero() {
            return None;
        }
        let now = Instant::now();
        if let Some(entry) = self.failures.get(fingerprint) {
            if entry.1 > now {
                return Some(entry.0.clone());
            }
        }
        self.failures.remove_if(fingerprint, |_, (_, until)| *until <= now);
        None
    }

    /// Backend lookup; backend and decode errors count as misses
    async fn lookup(&self, fingerprint: &Fingerprint) -> Option<Arc<T>> {
        match self.backend.get(fingerprint.as_str()).await {
            Ok(Some(bytes)) => match codec::decode::<T>(&bytes) {
                Ok(value) => Some(Arc::new(value)),
                Err(e) => {
                    warn!(cache = self.name, fingerprint = %fingerprint.short(), error = %e, "Undecodable cache value");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!(
                    cache = self.name,
                    backend = self.backend.name(),
                    error = %e,
                    "Cache backend error, treating as miss"
                );
                None
            }
        }
    }

    async fn store(&self, fingerprint: &Fingerprint, value: &T) {
        if self.policy.ttl.is_zero() {
            return;
        }
        let bytes = match codec::encode(value, self.policy.compress_threshold) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(cache = self.name, error = %e, "Failed to encode cache value");
                return;
            }
        };
        if let Err(e) = self.backend.set(fingerprint.as_str(), bytes, self.policy.ttl).await {
            warn!(
                cache = self.name,
                backend = self.backend.name(),
                error = %e,
                "Failed to store cache value"
            );
        }
    }

    async fn run_build<Fut>(
        inner: Arc<Self>,
        fingerprint: Fingerprint,
        id: u64,
        tx: watch::Sender<Outcome<T, E>>,
        fut: Fut,
        deadline: tokio::time::Instant,
    ) where
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let started = Instant::now();
        let outcome = match tokio::time::timeout_at(deadline, fut).await {
            Ok(result) => result.map(Arc::new),
            Err(_) => Err(ExecError::DeadlineExceeded.into()),
        };

        match &outcome {
            Ok(_) => debug!(
                cache = inner.name,
                fingerprint = %fingerprint.short(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Cache build complete"
            ),
            Err(e) => {
                debug!(cache = inner.name, fingerprint = %fingerprint.short(), error = %e, "Cache build failed");
                if !inner.policy.failure_ttl.is_zero() {
                    inner.failures.insert(
                        fingerprint.clone(),
                        (e.clone(), Instant::now() + inner.policy.failure_ttl),
                    );
                }
            }
        }

        let value = outcome.as_ref().ok().cloned();
        let _ = tx.send(Some(outcome));
        if let Some(value) = value {
            inner.store(&fingerprint, &value).await;
        }
        inner.flights.remove_if(&fingerprint, |_, f| f.id == id);
    }
}
