//! Path and tag index access
//!
//! - **sql**: the statement AST sent to the store
//! - **predicate**: glob patterns to index predicates plus post-filters
//! - **tagged**: tag expressions to tagged-table predicates
//! - **finder**: runs predicates through the cluster executor
//!
//! # Tables
//!
//! ```text
//! index:   Date | Level | Path      | Version     branch rows end with '.'
//! tagged:  Date | Tag1  | Path | Tags | Version   Tag1 = "key=value"
//! ```

pub mod finder;
pub mod predicate;
pub mod sql;
pub mod tagged;

pub use finder::{FindMatch, Finder};
pub use predicate::{build_predicate, date_filter, dateless_bucket, DateRange, IndexPredicate, PredicateOptions};
pub use sql::{Expr, Projection, Select, Statement, Value};
