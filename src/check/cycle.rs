//! Full check cycle for one table

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::executor::{CheckExecutor, CheckerError};
use crate::alerts::{AlertDecision, AlertEvent, AlertLifecycleManager, MonitorKey, Notifier};
use crate::catalog::TableCatalog;
use crate::config::Settings;
use crate::model::{CheckPayload, CheckResult, TableStatus};
use crate::sink::CheckSink;

/// Prefix used for lag-induced suppressions so they can be lifted
/// automatically without clobbering operator-set ones.
const LAG_SUPPRESSION_PREFIX: &str = "replica lag";

/// Failures invoking a cycle. Contract violations from the executor pass
/// through; everything else is contained in the per-check results.
#[derive(Debug, thiserror::Error)]
pub enum CycleError {
    #[error("Table {0} is not registered")]
    TableNotFound(i64),

    #[error(transparent)]
    Contract(#[from] CheckerError),
}

/// What one cycle produced
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleSummary {
    pub table_id: i64,
    pub status: TableStatus,
    pub results: Vec<CheckResult>,
    /// True when the table was deregistered mid-flight and nothing was
    /// recorded
    pub discarded: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Runs check cycles: the single entrypoint the periodic trigger invokes.
/// Safe to invoke again for the same table before a previous invocation
/// finishes; the guardrail and per-key serialization protect correctness.
pub struct CheckRunner {
    catalog: Arc<TableCatalog>,
    executor: CheckExecutor,
    alerts: Arc<AlertLifecycleManager>,
    sink: Arc<dyn CheckSink>,
    notifier: Arc<Notifier>,
    settings: Arc<Settings>,
}

impl CheckRunner {
    pub fn new(
        catalog: Arc<TableCatalog>,
        executor: CheckExecutor,
        alerts: Arc<AlertLifecycleManager>,
        sink: Arc<dyn CheckSink>,
        notifier: Arc<Notifier>,
        settings: Arc<Settings>,
    ) -> Self {
        Self {
            catalog,
            executor,
            alerts,
            sink,
            notifier,
            settings,
        }
    }

    /// Run every configured monitor for a table once
    pub async fn run_check_cycle(&self, table_id: i64) -> Result<CycleSummary, CycleError> {
        let table = self
            .catalog
            .get(table_id)
            .ok_or(CycleError::TableNotFound(table_id))?;
        let started_at = Utc::now();

        tracing::debug!(table_id, table = %table.table, "Starting check cycle");

        if self.settings.backpressure_enabled {
            self.apply_lag_backpressure(table_id, table.connection_id).await;
        }

        let mut results = Vec::with_capacity(table.monitors.len());
        for monitor in &table.monitors {
            let result = self.executor.run_check(&table, *monitor).await?;
            results.push(result);
        }

        let status = TableStatus::derive(&results);
        let summary = CycleSummary {
            table_id,
            status,
            results,
            discarded: false,
            started_at,
            finished_at: Utc::now(),
        };

        // A table deregistered mid-flight gets its results discarded, not
        // recorded against stale configuration.
        if self.catalog.get(table_id).is_none() {
            tracing::debug!(table_id, "Table removed mid-cycle, discarding results");
            return Ok(CycleSummary {
                discarded: true,
                ..summary
            });
        }

        for result in &summary.results {
            self.record(table_id, result).await;
        }

        if let Err(e) = self.sink.record_cycle(&summary).await {
            tracing::error!(table_id, error = %e, "Failed to persist cycle summary");
        }

        tracing::info!(
            table_id,
            status = ?summary.status,
            checks = summary.results.len(),
            "Check cycle finished"
        );

        Ok(summary)
    }

    /// Feed one result through the alert lifecycle and hand everything to
    /// the sink. Sink failures are logged, never retried.
    async fn record(&self, table_id: i64, result: &CheckResult) {
        let key = MonitorKey::new(table_id, result.monitor);
        let detail = failure_detail(result);
        let decision = self.alerts.on_result(key, result.status, detail.as_deref());

        let event = match decision {
            AlertDecision::Opened(alert) => Some(AlertEvent::Opened(alert)),
            AlertDecision::Resolved(resolved) => Some(AlertEvent::Resolved(resolved)),
            AlertDecision::AlreadyOpen(_)
            | AlertDecision::Suppressed
            | AlertDecision::NoChange => None,
        };

        if let Some(event) = event {
            if let Err(e) = self.sink.record_alert(&event).await {
                tracing::error!(table_id, error = %e, "Failed to persist alert transition");
            }
            if let Err(e) = self.notifier.notify(&event).await {
                tracing::error!(table_id, error = %e, "Failed to send alert notification");
            }
        }

        if let Err(e) = self.sink.record_check(table_id, result).await {
            tracing::error!(table_id, error = %e, "Failed to persist check result");
        }
    }

    /// Suppress alert creation while the replica is badly lagged (twice
    /// the configured threshold), and lift lag suppressions once it
    /// recovers. Operator-set suppressions are left alone.
    async fn apply_lag_backpressure(&self, table_id: i64, connection_id: i64) {
        let Some(lag) = self.executor.replica_lag(connection_id).await else {
            return;
        };

        let threshold = self.settings.replica_lag_threshold.as_secs_f64();
        if lag > threshold * 2.0 {
            self.alerts
                .suppress(table_id, format!("{} {:.0}s", LAG_SUPPRESSION_PREFIX, lag));
        } else if self
            .alerts
            .suppression_reason(table_id)
            .map_or(false, |reason| reason.starts_with(LAG_SUPPRESSION_PREFIX))
        {
            self.alerts.unsuppress(table_id);
        }
    }
}

/// Human-readable description of why a result counts as a failure
fn failure_detail(result: &CheckResult) -> Option<String> {
    if let Some(message) = &result.error_message {
        return Some(message.clone());
    }

    match &result.payload {
        CheckPayload::Freshness { is_stale: true, .. } => {
            Some("newest row exceeds the staleness threshold".to_string())
        }
        CheckPayload::Volume {
            has_zero_rows: true,
            ..
        } => Some("table has zero rows".to_string()),
        CheckPayload::Volume {
            is_anomaly: true,
            row_count,
            ..
        } => Some(format!("row count {} deviates from baseline", row_count)),
        CheckPayload::Schema {
            schema_changed: true,
            ..
        } => Some("schema changed since last observation".to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::baseline::BaselineEngine;
    use crate::guardrail::GuardrailController;
    use crate::model::{CheckStatus, MonitorType, TableRef};
    use crate::replica::mock::{MockReplica, MockTable};
    use crate::replica::ReplicaRegistry;
    use crate::sink::MemorySink;

    struct Harness {
        mock: MockReplica,
        catalog: Arc<TableCatalog>,
        alerts: Arc<AlertLifecycleManager>,
        sink: Arc<MemorySink>,
        runner: Arc<CheckRunner>,
    }

    fn harness(settings: Settings) -> Harness {
        let settings = Arc::new(settings);
        let mock = MockReplica::new();
        let guardrails = Arc::new(GuardrailController::new(
            settings.default_guardrails.clone(),
        ));
        let registry = Arc::new(ReplicaRegistry::new(
            Arc::clone(&guardrails),
            Arc::new(mock.clone()),
        ));
        registry.register(10, "acme", "host=replica", settings.default_guardrails.clone());

        let baselines = Arc::new(BaselineEngine::new(settings.baseline_window_size));
        let executor = CheckExecutor::new(
            registry,
            guardrails,
            baselines,
            Arc::clone(&settings),
        );

        let catalog = Arc::new(TableCatalog::new());
        let alerts = Arc::new(AlertLifecycleManager::new(
            settings.alert_threshold_failures,
        ));
        let sink = Arc::new(MemorySink::new(64));
        let runner = Arc::new(CheckRunner::new(
            Arc::clone(&catalog),
            executor,
            Arc::clone(&alerts),
            Arc::clone(&sink) as Arc<dyn CheckSink>,
            Arc::new(Notifier::default()),
            settings,
        ));

        Harness {
            mock,
            catalog,
            alerts,
            sink,
            runner,
        }
    }

    fn table_ref() -> TableRef {
        TableRef::new("public", "orders")
    }

    #[tokio::test]
    async fn test_unknown_table_is_an_error() {
        let h = harness(Settings::default());
        let err = h.runner.run_check_cycle(404).await.unwrap_err();
        assert!(matches!(err, CycleError::TableNotFound(404)));
    }

    #[tokio::test]
    async fn test_cycle_records_results_and_status() {
        let h = harness(Settings::default());
        let table = h.catalog.create(
            10,
            table_ref(),
            vec![MonitorType::Volume, MonitorType::Schema],
            None,
            5,
        );
        h.mock.set_table(
            table_ref(),
            MockTable {
                row_count: 50,
                ..Default::default()
            },
        );

        let summary = h.runner.run_check_cycle(table.id).await.unwrap();
        assert_eq!(summary.results.len(), 2);
        assert_eq!(summary.status, TableStatus::Healthy);
        assert!(!summary.discarded);
        assert_eq!(h.sink.recent_checks(Some(table.id)).len(), 2);
        assert_eq!(h.sink.recent_cycles().len(), 1);
    }

    #[tokio::test]
    async fn test_consecutive_bad_cycles_open_then_resolve_alert() {
        let h = harness(Settings::default());
        let table = h.catalog.create(
            10,
            table_ref(),
            vec![MonitorType::Freshness],
            Some("created_at".to_string()),
            5,
        );

        // Stale twice: the second failure crosses the threshold
        h.mock.set_table(
            table_ref(),
            MockTable {
                max_timestamp: Some(Utc::now() - chrono::Duration::hours(2)),
                ..Default::default()
            },
        );
        h.runner.run_check_cycle(table.id).await.unwrap();
        assert!(h.alerts.open_alerts().is_empty());

        h.runner.run_check_cycle(table.id).await.unwrap();
        let open = h.alerts.open_alerts();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].monitor, MonitorType::Freshness);

        // Recovery resolves on the next success
        h.mock.set_table(
            table_ref(),
            MockTable {
                max_timestamp: Some(Utc::now()),
                ..Default::default()
            },
        );
        h.runner.run_check_cycle(table.id).await.unwrap();
        assert!(h.alerts.open_alerts().is_empty());

        let events = h.sink.alert_history();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], AlertEvent::Opened(_)));
        assert!(matches!(events[1], AlertEvent::Resolved(_)));
    }

    #[tokio::test]
    async fn test_error_results_feed_the_debouncer() {
        let h = harness(Settings::default());
        let table = h
            .catalog
            .create(10, table_ref(), vec![MonitorType::Volume], None, 5);
        h.mock.set_fail_queries(true);

        h.runner.run_check_cycle(table.id).await.unwrap();
        let summary = h.runner.run_check_cycle(table.id).await.unwrap();
        assert_eq!(summary.status, TableStatus::Erroring);
        assert_eq!(h.alerts.open_alerts().len(), 1);
    }

    #[tokio::test]
    async fn test_discards_when_table_removed_mid_flight() {
        let h = harness(Settings::default());
        let table = h.catalog.create(
            10,
            table_ref(),
            vec![MonitorType::Volume],
            None,
            5,
        );
        h.mock.set_table(
            table_ref(),
            MockTable {
                row_count: 50,
                ..Default::default()
            },
        );
        h.mock
            .set_query_delay(Some(std::time::Duration::from_millis(200)));

        let runner = Arc::clone(&h.runner);
        let cycle = tokio::spawn(async move { runner.run_check_cycle(table.id).await });

        // Deregister while the volume query is still in flight
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        h.catalog.remove(table.id);

        let summary = cycle.await.unwrap().unwrap();
        assert!(summary.discarded);
        // The in-flight check completed but nothing was recorded
        assert_eq!(summary.results.len(), 1);
        assert!(h.sink.recent_checks(None).is_empty());
        assert!(h.sink.recent_cycles().is_empty());
    }

    #[tokio::test]
    async fn test_lag_backpressure_suppresses_alert_creation() {
        let h = harness(Settings::default());
        let table = h
            .catalog
            .create(10, table_ref(), vec![MonitorType::Volume], None, 5);
        h.mock.set_table(table_ref(), MockTable::default());
        // Twice the 30s default threshold
        h.mock.set_lag_seconds(Some(75.0));

        h.runner.run_check_cycle(table.id).await.unwrap();
        h.runner.run_check_cycle(table.id).await.unwrap();

        // Failures counted, creation blocked
        assert!(h.alerts.open_alerts().is_empty());
        assert_eq!(
            h.alerts
                .failure_count(MonitorKey::new(table.id, MonitorType::Volume)),
            2
        );

        // Replica recovers: suppression lifts, next failure opens
        h.mock.set_lag_seconds(Some(1.0));
        h.runner.run_check_cycle(table.id).await.unwrap();
        assert_eq!(h.alerts.open_alerts().len(), 1);
    }

    #[tokio::test]
    async fn test_freshness_without_time_column_propagates() {
        let h = harness(Settings::default());
        let table = h
            .catalog
            .create(10, table_ref(), vec![MonitorType::Freshness], None, 5);

        let err = h.runner.run_check_cycle(table.id).await.unwrap_err();
        assert!(matches!(
            err,
            CycleError::Contract(CheckerError::MissingTimeColumn(_))
        ));
    }

    #[tokio::test]
    async fn test_skipped_checks_yield_unknown_status() {
        let mut settings = Settings::default();
        settings.default_guardrails = settings
            .default_guardrails
            .with_max_queries_per_minute(0);
        let h = harness(settings);
        // Re-register with the zero budget
        let table = h
            .catalog
            .create(10, table_ref(), vec![MonitorType::Volume], None, 5);

        let summary = h.runner.run_check_cycle(table.id).await.unwrap();
        assert_eq!(summary.status, TableStatus::Unknown);
        assert_eq!(summary.results[0].status, CheckStatus::Skipped);
    }
}
