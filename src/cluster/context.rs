//! Request-scoped execution context
//!
//! Carries the correlation id, the absolute deadline and the cancellation
//! token that every store call of one request observes.

use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::cluster::error::{ExecError, ExecResult};

#[derive(Debug, Clone)]
pub struct QueryContext {
    pub request_id: String,
    deadline: Instant,
    cancel: CancellationToken,
}

impl QueryContext {
    pub fn new(request_id: impl Into<String>, timeout: Duration) -> Self {
        Self {
            request_id: request_id.into(),
            deadline: Instant::now() + timeout,
            cancel: CancellationToken::new(),
        }
    }

    /// Context with a random request id
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::new(uuid::Uuid::new_v4().to_string(), timeout)
    }

    /// Replace the cancellation token (e.g. one tied to a client connection)
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.deadline
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Context for sub-work that is cancelled with this one
    pub fn child(&self) -> Self {
        Self {
            request_id: self.request_id.clone(),
            deadline: self.deadline,
            cancel: self.cancel.child_token(),
        }
    }

    /// Same deadline, independent cancellation. Shared cache builds use this
    /// so one departing waiter does not abort work others still wait on.
    pub fn detached(&self) -> Self {
        Self {
            request_id: self.request_id.clone(),
            deadline: self.deadline,
            cancel: CancellationToken::new(),
        }
    }

    /// Run a future under this context's deadline and cancellation.
    /// The future is dropped (aborting its I/O) as soon as either fires.
    pub async fn run<T, F>(&self, fut: F) -> ExecResult<T>
    where
        F: Future<Output = ExecResult<T>>,
    {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(ExecError::Cancelled),
            res = tokio::time::timeout_at(self.deadline, fut) => {
                res.unwrap_or(Err(ExecError::DeadlineExceeded))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_deadline() {
        let ctx = QueryContext::new("r1", Duration::from_millis(20));
        let res: ExecResult<()> = ctx
            .run(async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;
        assert_eq!(res, Err(ExecError::DeadlineExceeded));
    }

    #[tokio::test]
    async fn test_run_cancel() {
        let ctx = QueryContext::new("r1", Duration::from_secs(5));
        let child = ctx.child();
        ctx.cancel();
        let res: ExecResult<()> = child.run(std::future::pending()).await;
        assert_eq!(res, Err(ExecError::Cancelled));
    }

    #[tokio::test]
    async fn test_detached_survives_cancel() {
        let ctx = QueryContext::new("r1", Duration::from_secs(5));
        let detached = ctx.detached();
        ctx.cancel();
        assert!(!detached.is_cancelled());
        assert_eq!(detached.run(async { Ok(7) }).await, Ok(7));
    }
}
