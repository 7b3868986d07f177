//! Core data model for monitored tables and check results

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::baseline::BaselineStats;

/// Identifies a table on a replica. Used as the key for baselines and
/// schema snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableRef {
    pub schema: String,
    pub table: String,
}

impl TableRef {
    pub fn new(schema: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            table: table.into(),
        }
    }
}

impl std::fmt::Display for TableRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.schema, self.table)
    }
}

/// Kind of health check applied to a table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MonitorType {
    Freshness,
    Volume,
    Schema,
}

impl std::fmt::Display for MonitorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MonitorType::Freshness => write!(f, "freshness"),
            MonitorType::Volume => write!(f, "volume"),
            MonitorType::Schema => write!(f, "schema"),
        }
    }
}

/// Outcome category of a single check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    /// Check ran and the monitored signal looks healthy
    Success,
    /// Check ran and the monitored signal looks bad
    Failure,
    /// Check could not run to completion
    Error,
    /// Check was not run (query budget exhausted)
    Skipped,
}

/// Column definition as reported by the replica's information schema
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: String,
    pub nullable: bool,
    #[serde(default)]
    pub default: Option<String>,
}

/// Monitor-specific result payload
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum CheckPayload {
    Freshness {
        max_timestamp: Option<DateTime<Utc>>,
        is_stale: bool,
    },
    Volume {
        row_count: i64,
        has_zero_rows: bool,
        baseline: Option<BaselineStats>,
        is_anomaly: bool,
    },
    Schema {
        columns: Vec<ColumnDef>,
        schema_changed: bool,
    },
    /// No payload (skipped or errored checks)
    Empty,
}

/// Result of one monitor check. The core never persists these itself;
/// they are handed to the configured sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckResult {
    pub monitor: MonitorType,
    pub status: CheckStatus,
    pub payload: CheckPayload,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub executed_at: DateTime<Utc>,
}

impl CheckResult {
    pub fn success(monitor: MonitorType, payload: CheckPayload) -> Self {
        Self::finished(monitor, CheckStatus::Success, payload)
    }

    pub fn failure(monitor: MonitorType, payload: CheckPayload) -> Self {
        Self::finished(monitor, CheckStatus::Failure, payload)
    }

    /// Success or failure depending on whether the monitor's bad signal fired
    pub fn classified(monitor: MonitorType, unhealthy: bool, payload: CheckPayload) -> Self {
        if unhealthy {
            Self::failure(monitor, payload)
        } else {
            Self::success(monitor, payload)
        }
    }

    pub fn error(monitor: MonitorType, message: impl Into<String>) -> Self {
        Self {
            monitor,
            status: CheckStatus::Error,
            payload: CheckPayload::Empty,
            error_message: Some(message.into()),
            executed_at: Utc::now(),
        }
    }

    pub fn skipped(monitor: MonitorType, reason: impl Into<String>) -> Self {
        Self {
            monitor,
            status: CheckStatus::Skipped,
            payload: CheckPayload::Empty,
            error_message: Some(reason.into()),
            executed_at: Utc::now(),
        }
    }

    fn finished(monitor: MonitorType, status: CheckStatus, payload: CheckPayload) -> Self {
        Self {
            monitor,
            status,
            payload,
            error_message: None,
            executed_at: Utc::now(),
        }
    }
}

/// A table registered for monitoring. Immutable during a check cycle;
/// mutated only through the catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoredTable {
    pub id: i64,
    pub connection_id: i64,
    #[serde(flatten)]
    pub table: TableRef,
    pub monitors: Vec<MonitorType>,
    #[serde(default)]
    pub time_column: Option<String>,
    pub interval_minutes: u64,
}

/// Aggregate health derived from one cycle's check results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TableStatus {
    Healthy,
    Degraded,
    Erroring,
    Unknown,
}

impl TableStatus {
    /// Worst-of aggregation over a cycle's results. Skipped checks carry
    /// no signal; a cycle of nothing but skips is unknown.
    pub fn derive(results: &[CheckResult]) -> Self {
        let mut status = TableStatus::Unknown;
        for result in results {
            let candidate = match result.status {
                CheckStatus::Success => TableStatus::Healthy,
                CheckStatus::Failure => TableStatus::Degraded,
                CheckStatus::Error => TableStatus::Erroring,
                CheckStatus::Skipped => continue,
            };
            status = status.worst(candidate);
        }
        status
    }

    fn rank(self) -> u8 {
        match self {
            TableStatus::Unknown => 0,
            TableStatus::Healthy => 1,
            TableStatus::Degraded => 2,
            TableStatus::Erroring => 3,
        }
    }

    fn worst(self, other: Self) -> Self {
        if other.rank() > self.rank() {
            other
        } else {
            self
        }
    }
}
