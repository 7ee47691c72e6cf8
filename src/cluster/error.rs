//! Cluster execution error types

use thiserror::Error;

/// Errors raised while talking to store hosts.
///
/// `Clone` so one failed build can be delivered to every cache waiter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecError {
    /// Network failure or non-2xx response from a host
    #[error("Host {host} failed: {reason}")]
    Host { host: String, reason: String },

    /// A single attempt ran past its per-host deadline
    #[error("Host {host} timed out after {timeout_ms}ms")]
    Timeout { host: String, timeout_ms: u64 },

    /// Waiting for a pooled connection ran past the request deadline
    #[error("Connection pool for {host} exhausted")]
    PoolExhausted { host: String },

    /// Every replica of one or more shards failed
    #[error("Partial cluster failure: shards {failed_shards:?} failed ({})", causes.join("; "))]
    PartialClusterFailure {
        failed_shards: Vec<usize>,
        causes: Vec<String>,
    },

    /// The response body could not be parsed
    #[error("Malformed response from {host}: {reason}")]
    Malformed { host: String, reason: String },

    /// The caller's budget ran out before the work finished
    #[error("Request deadline exceeded")]
    DeadlineExceeded,

    /// The caller went away
    #[error("Request cancelled")]
    Cancelled,

    /// The cluster descriptor has no usable hosts
    #[error("Cluster '{0}' has no shards")]
    NoShards(String),
}

impl ExecError {
    pub(crate) fn host(host: &str, reason: impl Into<String>) -> Self {
        ExecError::Host {
            host: host.to_string(),
            reason: reason.into(),
        }
    }

    /// Failures worth one attempt on a spare replica
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ExecError::Host { .. }
                | ExecError::Timeout { .. }
                | ExecError::PoolExhausted { .. }
                | ExecError::Malformed { .. }
        )
    }

    /// Failures caused by the caller's own budget or cancellation
    pub fn is_caller_abort(&self) -> bool {
        matches!(self, ExecError::DeadlineExceeded | ExecError::Cancelled)
    }
}

/// Result type for cluster execution
pub type ExecResult<T> = Result<T, ExecError>;
