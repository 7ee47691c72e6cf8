//! Render Pipeline
//!
//! Resolved series names and a time range in, aligned [`RenderedSeries`]
//! out. Wire encoding lives in [`crate::encoding`].
//!
//! - **retention**: data table and step per path
//! - **align**: version de-duplication, bucketing, consolidation
//! - **pipeline**: data queries through the cluster executor

pub mod align;
pub mod error;
pub mod pipeline;
pub mod retention;
pub mod types;

pub use align::align;
pub use error::{RenderError, RenderResult};
pub use pipeline::{RenderQuery, Renderer};
pub use retention::choose_table;
pub use types::{grid, Aggregation, Grid, RawPoint, RenderedSeries, SeriesPoint};
