//! Persistence collaborator for check results and alert transitions
//!
//! The core hands results off and moves on; a sink failure is logged by
//! the caller and never retried here.

use std::collections::VecDeque;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::alerts::AlertEvent;
use crate::check::CycleSummary;
use crate::model::CheckResult;

/// Sink write failure
#[derive(Debug, thiserror::Error)]
#[error("Sink error: {0}")]
pub struct SinkError(pub String);

/// Receives every check result, alert transition, and cycle summary for
/// durable storage.
#[async_trait]
pub trait CheckSink: Send + Sync {
    async fn record_check(&self, table_id: i64, result: &CheckResult) -> Result<(), SinkError>;
    async fn record_alert(&self, event: &AlertEvent) -> Result<(), SinkError>;
    async fn record_cycle(&self, summary: &CycleSummary) -> Result<(), SinkError>;
}

/// A check result annotated with its table, as stored by the sink
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordedCheck {
    pub table_id: i64,
    #[serde(flatten)]
    pub result: CheckResult,
    pub recorded_at: DateTime<Utc>,
}

/// Bounded in-memory sink backing the API's recent-history endpoints and
/// the tests.
pub struct MemorySink {
    capacity: usize,
    checks: Mutex<VecDeque<RecordedCheck>>,
    alerts: Mutex<VecDeque<AlertEvent>>,
    cycles: Mutex<VecDeque<CycleSummary>>,
}

impl MemorySink {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            checks: Mutex::new(VecDeque::new()),
            alerts: Mutex::new(VecDeque::new()),
            cycles: Mutex::new(VecDeque::new()),
        }
    }

    /// Recent check results, newest last, optionally filtered by table
    pub fn recent_checks(&self, table_id: Option<i64>) -> Vec<RecordedCheck> {
        self.checks
            .lock()
            .iter()
            .filter(|check| table_id.map_or(true, |id| check.table_id == id))
            .cloned()
            .collect()
    }

    pub fn alert_history(&self) -> Vec<AlertEvent> {
        self.alerts.lock().iter().cloned().collect()
    }

    pub fn recent_cycles(&self) -> Vec<CycleSummary> {
        self.cycles.lock().iter().cloned().collect()
    }

    fn push_bounded<T>(queue: &Mutex<VecDeque<T>>, capacity: usize, item: T) {
        let mut queue = queue.lock();
        if queue.len() == capacity {
            queue.pop_front();
        }
        queue.push_back(item);
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl CheckSink for MemorySink {
    async fn record_check(&self, table_id: i64, result: &CheckResult) -> Result<(), SinkError> {
        Self::push_bounded(
            &self.checks,
            self.capacity,
            RecordedCheck {
                table_id,
                result: result.clone(),
                recorded_at: Utc::now(),
            },
        );
        Ok(())
    }

    async fn record_alert(&self, event: &AlertEvent) -> Result<(), SinkError> {
        Self::push_bounded(&self.alerts, self.capacity, event.clone());
        Ok(())
    }

    async fn record_cycle(&self, summary: &CycleSummary) -> Result<(), SinkError> {
        Self::push_bounded(&self.cycles, self.capacity, summary.clone());
        Ok(())
    }
}
