//! Session traits and replica error taxonomy

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::model::{ColumnDef, TableRef};

/// Errors from replica interaction. Everything here is contained by the
/// check executor and surfaced as a typed check result, never a panic.
#[derive(Debug, thiserror::Error)]
pub enum ReplicaError {
    #[error("Connection {0} not found")]
    ConnectionNotFound(i64),

    #[error("Failed to connect to replica: {0}")]
    ConnectionFailed(String),

    #[error("Session did not report read-only mode")]
    ReadOnlyVerificationFailed,

    #[error("Query failed: {0}")]
    QueryFailed(String),
}

/// The monitor queries a health check may run. This is the whole query
/// surface; there is no general SQL execution path.
#[async_trait]
pub trait MonitorSession: Send + Sync {
    /// Whether the session reports read-only transactions
    async fn transaction_read_only(&self) -> Result<bool, ReplicaError>;

    /// Max value of a time column, as UTC. `None` for an empty table.
    async fn max_time_value(
        &self,
        table: &TableRef,
        time_column: &str,
    ) -> Result<Option<DateTime<Utc>>, ReplicaError>;

    /// Total row count
    async fn row_count(&self, table: &TableRef) -> Result<i64, ReplicaError>;

    /// Column metadata from the replica's information schema
    async fn column_metadata(&self, table: &TableRef) -> Result<Vec<ColumnDef>, ReplicaError>;

    /// Replication lag in seconds; `None` when the server is not a replica
    /// or lag cannot be determined. Best effort only.
    async fn replication_lag(&self) -> Result<Option<f64>, ReplicaError>;
}

/// Opens sessions against a replica. Swapped out for a mock in tests.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn open(&self, connection_string: &str) -> Result<Box<dyn MonitorSession>, ReplicaError>;
}
