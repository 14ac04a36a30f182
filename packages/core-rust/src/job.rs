//! Typed job payloads carried by operations.

use serde_json::Value;

use crate::client::DatabaseClient;
use crate::dataset::{DbDataSet, QueryDataSet};

/// Stable operation names, one per job variant.
pub mod job_names {
    pub const SEED: &str = "seed_data";
    pub const READ: &str = "read_data";
    pub const WRITE: &str = "write_data";
    pub const DELETE: &str = "delete_data";
    pub const QUERY: &str = "query";
}

/// The unit of work an operation performs, tagged by intent.
///
/// Each variant owns its strongly typed payload; execution dispatches on the
/// tag to the matching capability method.
#[derive(Debug, Clone, PartialEq)]
pub enum Job {
    /// Create the dataset's database and tables.
    Seed(DbDataSet),
    /// Run a read-only query.
    Read(QueryDataSet),
    /// Insert the dataset's rows.
    Write(DbDataSet),
    /// Drop the dataset's tables.
    Delete(DbDataSet),
    /// Run an arbitrary query.
    Query(QueryDataSet),
}

impl Job {
    /// Returns the human-readable operation name for this job.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Seed(_) => job_names::SEED,
            Self::Read(_) => job_names::READ,
            Self::Write(_) => job_names::WRITE,
            Self::Delete(_) => job_names::DELETE,
            Self::Query(_) => job_names::QUERY,
        }
    }

    /// Runs the job once against `client`.
    ///
    /// # Errors
    ///
    /// Propagates the capability's failure unchanged. No retry is attempted.
    pub async fn execute(&self, client: &dyn DatabaseClient) -> anyhow::Result<Value> {
        match self {
            Self::Seed(data) => client.seed(data).await,
            Self::Write(data) => client.write(data).await,
            Self::Delete(data) => client.delete(data).await,
            Self::Read(q) | Self::Query(q) => client.query(&q.query).await,
        }
    }
}
