//! Render error types

use thiserror::Error;

use crate::cluster::ExecError;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RenderError {
    /// `from` is not before `until`
    #[error("Invalid time range: from {from} is not before until {until}")]
    InvalidRange { from: i64, until: i64 },

    #[error("Invalid step: {0}")]
    InvalidStep(i64),

    #[error("Too many series: {count} (limit {limit})")]
    TooManySeries { count: usize, limit: usize },

    /// The range holds more steps per series than allowed
    #[error("Too many points per series: {points} (limit {limit})")]
    TooManyPoints { points: u64, limit: u64 },

    /// A data row could not be parsed
    #[error("Malformed data row from store: {0}")]
    Malformed(String),

    #[error(transparent)]
    Exec(#[from] ExecError),
}

impl RenderError {
    /// Caused by the request rather than the store
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            RenderError::InvalidRange { .. }
                | RenderError::InvalidStep(_)
                | RenderError::TooManySeries { .. }
                | RenderError::TooManyPoints { .. }
        )
    }
}

pub type RenderResult<T> = Result<T, RenderError>;
