//! Pattern compilation error types
//!
//! Every variant is caused by the request, so the HTTP layer reports them as
//! client errors with the message intact.

use thiserror::Error;

/// Errors raised while compiling a glob pattern or a tag expression
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CompileError {
    /// The input could not be parsed
    #[error("Parse error in '{pattern}': {reason}")]
    Parse { pattern: String, reason: String },

    /// More than one `**` segment
    #[error("Ambiguous recursion in '{0}': at most one '**' segment is allowed")]
    AmbiguousRecursion(String),

    /// Brace expansion produced too many options
    #[error("Too many alternatives in '{pattern}': {count} exceeds limit {limit}")]
    TooManyAlternatives {
        pattern: String,
        count: usize,
        limit: usize,
    },

    /// A tag regex uses constructs outside the supported subset
    #[error("Unsupported regex '{regex}' for tag '{key}': {reason}")]
    UnsupportedRegex {
        key: String,
        regex: String,
        reason: String,
    },

    /// A tag expression was malformed
    #[error("Invalid tag filter '{0}'")]
    InvalidTagFilter(String),

    /// A tag expression had only negative filters
    #[error("Tag expression '{0}' needs at least one positive filter")]
    NoPositiveFilter(String),

    /// Empty input
    #[error("Empty pattern")]
    Empty,
}

impl CompileError {
    pub(crate) fn parse(pattern: &str, reason: impl Into<String>) -> Self {
        CompileError::Parse {
            pattern: pattern.to_string(),
            reason: reason.into(),
        }
    }
}

/// Result type for pattern compilation
pub type CompileResult<T> = Result<T, CompileError>;
