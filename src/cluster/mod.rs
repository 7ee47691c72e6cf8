//! Store cluster access
//!
//! A cluster is a list of shards, each a list of replica hosts. Every
//! request fans out to all shards, tolerates one failed replica per shard,
//! and runs under a [`QueryContext`] deadline and cancellation token.

pub mod context;
pub mod descriptor;
pub mod error;
pub mod executor;
pub mod pool;
pub mod result;
pub mod transport;

pub use context::QueryContext;
pub use descriptor::{ClusterDescriptor, DataTable};
pub use error::{ExecError, ExecResult};
pub use executor::ClusterExecutor;
pub use pool::HostPools;
pub use result::{parse_tsv, MergeMode, ResultSet};
pub use transport::{HttpTransport, Transport};
