//! Consecutive-failure debouncing and alert state transitions

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::model::{CheckStatus, MonitorType};

/// Key for per-monitor alert state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MonitorKey {
    pub table_id: i64,
    pub monitor: MonitorType,
}

impl MonitorKey {
    pub fn new(table_id: i64, monitor: MonitorType) -> Self {
        Self { table_id, monitor }
    }
}

/// An open alert. At most one exists per key at any time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: u64,
    pub table_id: i64,
    pub monitor: MonitorType,
    pub message: String,
    pub opened_at: DateTime<Utc>,
}

/// A resolved alert, kept for the resolution record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvedAlert {
    pub alert: Alert,
    pub resolved_at: DateTime<Utc>,
}

/// Lifecycle transition emitted to the sink and notifier
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum AlertEvent {
    Opened(Alert),
    Resolved(ResolvedAlert),
}

/// Outcome of feeding one check result through the lifecycle
#[derive(Debug, Clone)]
pub enum AlertDecision {
    /// Counter moved (or not), no transition
    NoChange,
    /// Threshold crossed, new alert opened
    Opened(Alert),
    /// Threshold crossed again while already open; existing identity returned
    AlreadyOpen(u64),
    /// Success closed an open alert
    Resolved(ResolvedAlert),
    /// Threshold crossed but the table is suppressed; nothing opened
    Suppressed,
}

#[derive(Debug, Default)]
struct AlertEntry {
    consecutive_failures: u32,
    open: Option<Alert>,
}

/// State machine per (table, monitor) key: Quiet until the consecutive
/// failure threshold is crossed, Open until the next success. Suppression
/// is per table and blocks creation only; counters keep advancing and
/// open alerts stay open.
pub struct AlertLifecycleManager {
    threshold: u32,
    next_alert_id: AtomicU64,
    entries: DashMap<MonitorKey, AlertEntry>,
    suppressions: DashMap<i64, String>,
}

impl AlertLifecycleManager {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
            next_alert_id: AtomicU64::new(1),
            entries: DashMap::new(),
            suppressions: DashMap::new(),
        }
    }

    /// Feed one check result through the state machine. Skipped checks are
    /// neither a pass nor a fail and leave everything untouched.
    pub fn on_result(
        &self,
        key: MonitorKey,
        status: CheckStatus,
        detail: Option<&str>,
    ) -> AlertDecision {
        if status == CheckStatus::Skipped {
            return AlertDecision::NoChange;
        }

        let mut entry = self.entries.entry(key).or_default();

        match status {
            CheckStatus::Success => {
                entry.consecutive_failures = 0;
                match entry.open.take() {
                    Some(alert) => {
                        let resolved = ResolvedAlert {
                            alert,
                            resolved_at: Utc::now(),
                        };
                        tracing::info!(
                            alert_id = resolved.alert.id,
                            table_id = key.table_id,
                            monitor = %key.monitor,
                            "Alert resolved"
                        );
                        AlertDecision::Resolved(resolved)
                    }
                    None => AlertDecision::NoChange,
                }
            }
            CheckStatus::Failure | CheckStatus::Error => {
                entry.consecutive_failures += 1;
                if entry.consecutive_failures < self.threshold {
                    return AlertDecision::NoChange;
                }

                if let Some(alert) = &entry.open {
                    return AlertDecision::AlreadyOpen(alert.id);
                }

                if let Some(reason) = self.suppression_reason(key.table_id) {
                    tracing::info!(
                        table_id = key.table_id,
                        monitor = %key.monitor,
                        reason = %reason,
                        "Alert creation suppressed"
                    );
                    return AlertDecision::Suppressed;
                }

                let alert = Alert {
                    id: self.next_alert_id.fetch_add(1, Ordering::SeqCst),
                    table_id: key.table_id,
                    monitor: key.monitor,
                    message: detail
                        .map(str::to_string)
                        .unwrap_or_else(|| format!("{} check failing", key.monitor)),
                    opened_at: Utc::now(),
                };
                entry.open = Some(alert.clone());
                tracing::warn!(
                    alert_id = alert.id,
                    table_id = key.table_id,
                    monitor = %key.monitor,
                    failures = entry.consecutive_failures,
                    "Alert opened"
                );
                AlertDecision::Opened(alert)
            }
            CheckStatus::Skipped => AlertDecision::NoChange,
        }
    }

    /// Block alert creation for a table until [`unsuppress`](Self::unsuppress).
    /// Existing open alerts are left alone.
    pub fn suppress(&self, table_id: i64, reason: impl Into<String>) {
        let reason = reason.into();
        tracing::info!(table_id, reason = %reason, "Alerts suppressed for table");
        self.suppressions.insert(table_id, reason);
    }

    pub fn unsuppress(&self, table_id: i64) {
        if self.suppressions.remove(&table_id).is_some() {
            tracing::info!(table_id, "Alert suppression lifted");
        }
    }

    pub fn suppression_reason(&self, table_id: i64) -> Option<String> {
        self.suppressions.get(&table_id).map(|r| r.clone())
    }

    /// All currently open alerts
    pub fn open_alerts(&self) -> Vec<Alert> {
        let mut alerts: Vec<Alert> = self
            .entries
            .iter()
            .filter_map(|entry| entry.open.clone())
            .collect();
        alerts.sort_by_key(|a| a.id);
        alerts
    }

    /// Current consecutive-failure count for a key
    pub fn failure_count(&self, key: MonitorKey) -> u32 {
        self.entries
            .get(&key)
            .map(|entry| entry.consecutive_failures)
            .unwrap_or(0)
    }

    /// Drop all state for a table (called when it is deregistered)
    pub fn forget_table(&self, table_id: i64) {
        self.entries.retain(|key, _| key.table_id != table_id);
        self.suppressions.remove(&table_id);
    }
}
