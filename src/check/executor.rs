//! Runs a single monitor check through the guardrail gate

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::baseline::BaselineEngine;
use crate::config::Settings;
use crate::guardrail::GuardrailController;
use crate::model::{CheckPayload, CheckResult, MonitorType, MonitoredTable};
use crate::replica::{MonitorSession, ReplicaError, ReplicaRegistry};

/// Caller contract violations. Everything else a check can hit is
/// contained and surfaced as a typed [`CheckResult`].
#[derive(Debug, thiserror::Error)]
pub enum CheckerError {
    #[error("time_column required for freshness check on table {0}")]
    MissingTimeColumn(i64),
}

/// Executes monitor checks against replicas. Cheap to share; all state
/// lives in the services it references.
pub struct CheckExecutor {
    registry: Arc<ReplicaRegistry>,
    guardrails: Arc<GuardrailController>,
    baselines: Arc<BaselineEngine>,
    settings: Arc<Settings>,
}

impl CheckExecutor {
    pub fn new(
        registry: Arc<ReplicaRegistry>,
        guardrails: Arc<GuardrailController>,
        baselines: Arc<BaselineEngine>,
        settings: Arc<Settings>,
    ) -> Self {
        Self {
            registry,
            guardrails,
            baselines,
            settings,
        }
    }

    /// Run one monitor check. Returns `Err` only for caller contract
    /// violations; replica trouble of any kind comes back as an `error`
    /// result and guardrail denial as `skipped`.
    pub async fn run_check(
        &self,
        table: &MonitoredTable,
        monitor: MonitorType,
    ) -> Result<CheckResult, CheckerError> {
        // Contract violations surface before any replica work
        let time_column = match monitor {
            MonitorType::Freshness => Some(
                table
                    .time_column
                    .as_deref()
                    .ok_or(CheckerError::MissingTimeColumn(table.id))?,
            ),
            _ => None,
        };

        let connection_id = table.connection_id;
        if self.registry.get(connection_id).is_none() {
            return Ok(CheckResult::error(
                monitor,
                format!("Connection {} not found", connection_id),
            ));
        }

        if !self.guardrails.acquire(connection_id) {
            return Ok(CheckResult::skipped(monitor, "query budget exceeded"));
        }

        let limits = self.guardrails.limits(connection_id);

        let session = match self.registry.open_read_only_session(connection_id).await {
            Ok(session) => session,
            Err(e) => {
                tracing::error!(
                    table_id = table.id,
                    connection_id,
                    error = %e,
                    "Failed to open replica session"
                );
                return Ok(CheckResult::error(monitor, e.to_string()));
            }
        };

        // The slot is released on drop, whatever path we leave by
        let _slot = self.guardrails.commit(connection_id);

        let outcome = tokio::time::timeout(
            limits.query_timeout,
            self.execute_monitor(session.as_ref(), table, monitor, time_column),
        )
        .await;

        let result = match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                tracing::error!(
                    table_id = table.id,
                    monitor = %monitor,
                    error = %e,
                    "Check query failed"
                );
                CheckResult::error(monitor, e.to_string())
            }
            Err(_) => {
                tracing::error!(
                    table_id = table.id,
                    monitor = %monitor,
                    timeout_secs = limits.query_timeout.as_secs(),
                    "Check query timed out"
                );
                CheckResult::error(
                    monitor,
                    format!(
                        "query timed out after {}s",
                        limits.query_timeout.as_secs()
                    ),
                )
            }
        };

        Ok(result)
    }

    /// Best-effort replica lag probe through the same guarded path.
    /// Returns `None` whenever lag cannot be determined, including when
    /// the budget is exhausted.
    pub async fn replica_lag(&self, connection_id: i64) -> Option<f64> {
        if self.registry.get(connection_id).is_none() {
            return None;
        }
        if !self.guardrails.acquire(connection_id) {
            return None;
        }

        let limits = self.guardrails.limits(connection_id);
        let session = self.registry.open_read_only_session(connection_id).await.ok()?;
        let _slot = self.guardrails.commit(connection_id);

        match tokio::time::timeout(limits.query_timeout, session.replication_lag()).await {
            Ok(Ok(lag)) => lag,
            Ok(Err(e)) => {
                tracing::debug!(connection_id, error = %e, "Replica lag probe failed");
                None
            }
            Err(_) => {
                tracing::debug!(connection_id, "Replica lag probe timed out");
                None
            }
        }
    }

    async fn execute_monitor(
        &self,
        session: &dyn MonitorSession,
        table: &MonitoredTable,
        monitor: MonitorType,
        time_column: Option<&str>,
    ) -> Result<CheckResult, ReplicaError> {
        match monitor {
            MonitorType::Freshness => {
                // run_check validated the column's presence
                let column = time_column.unwrap_or_default();
                let max_timestamp = session.max_time_value(&table.table, column).await?;
                let is_stale =
                    is_stale_at(Utc::now(), max_timestamp, self.settings.staleness_threshold);

                Ok(CheckResult::classified(
                    monitor,
                    is_stale,
                    CheckPayload::Freshness {
                        max_timestamp,
                        is_stale,
                    },
                ))
            }
            MonitorType::Volume => {
                let row_count = session.row_count(&table.table).await?;
                let has_zero_rows = row_count == 0;

                // Classify against the window as it stood before this
                // reading, then fold the reading in.
                let baseline = self.baselines.get_baseline(&table.table);
                let is_anomaly = self.baselines.is_anomaly(
                    &table.table,
                    row_count,
                    self.settings.anomaly_threshold,
                );
                self.baselines.record_volume(&table.table, row_count);

                Ok(CheckResult::classified(
                    monitor,
                    has_zero_rows || is_anomaly,
                    CheckPayload::Volume {
                        row_count,
                        has_zero_rows,
                        baseline,
                        is_anomaly,
                    },
                ))
            }
            MonitorType::Schema => {
                let columns = session.column_metadata(&table.table).await?;
                let schema_changed = self.baselines.check_schema_change(&table.table, &columns);

                Ok(CheckResult::classified(
                    monitor,
                    schema_changed,
                    CheckPayload::Schema {
                        columns,
                        schema_changed,
                    },
                ))
            }
        }
    }
}

/// A table is stale when it has no rows at all or its newest row is older
/// than the threshold.
fn is_stale_at(
    now: DateTime<Utc>,
    max_timestamp: Option<DateTime<Utc>>,
    threshold: Duration,
) -> bool {
    match max_timestamp {
        None => true,
        Some(ts) => {
            let age = now.signed_duration_since(ts);
            age.num_seconds() > threshold.as_secs() as i64
        }
    }
}
