//! Tag index build errors

use chrono::NaiveDate;
use thiserror::Error;

use crate::cluster::ExecError;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum BuildError {
    #[error("Invalid tagging rule: {0}")]
    InvalidRule(String),

    /// A bucket failed; buckets up to `last_completed` are committed
    #[error("Tag index bucket {bucket} failed (last completed: {}): {cause}",
        last_completed.map(|d| d.to_string()).unwrap_or_else(|| "none".to_string()))]
    Bucket {
        bucket: NaiveDate,
        last_completed: Option<NaiveDate>,
        cause: ExecError,
    },
}

impl BuildError {
    /// Resume point for a retry (`--resume-after`)
    pub fn last_completed(&self) -> Option<NaiveDate> {
        match self {
            BuildError::Bucket { last_completed, .. } => *last_completed,
            BuildError::InvalidRule(_) => None,
        }
    }
}

pub type BuildResult<T> = Result<T, BuildError>;
