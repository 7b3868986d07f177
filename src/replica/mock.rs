//! In-memory replica used by tests

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use super::session::{MonitorSession, ReplicaError, SessionFactory};
use crate::model::{ColumnDef, TableRef};

/// State of one mock table
#[derive(Debug, Clone, Default)]
pub struct MockTable {
    pub row_count: i64,
    pub max_timestamp: Option<DateTime<Utc>>,
    pub columns: Vec<ColumnDef>,
}

#[derive(Default)]
struct MockState {
    fail_connect: Mutex<bool>,
    report_read_only: Mutex<bool>,
    fail_queries: Mutex<bool>,
    query_delay: Mutex<Option<Duration>>,
    lag_seconds: Mutex<Option<f64>>,
    tables: Mutex<HashMap<TableRef, MockTable>>,
    sessions_opened: AtomicUsize,
}

/// Scriptable replica: a session factory whose behavior the test controls.
/// Cloning shares the underlying state.
#[derive(Clone)]
pub struct MockReplica {
    state: Arc<MockState>,
}

impl MockReplica {
    pub fn new() -> Self {
        let state = MockState {
            report_read_only: Mutex::new(true),
            ..Default::default()
        };
        Self {
            state: Arc::new(state),
        }
    }

    pub fn set_table(&self, table: TableRef, mock: MockTable) {
        self.state.tables.lock().insert(table, mock);
    }

    pub fn set_read_only(&self, read_only: bool) {
        *self.state.report_read_only.lock() = read_only;
    }

    pub fn set_fail_connect(&self, fail: bool) {
        *self.state.fail_connect.lock() = fail;
    }

    pub fn set_fail_queries(&self, fail: bool) {
        *self.state.fail_queries.lock() = fail;
    }

    pub fn set_query_delay(&self, delay: Option<Duration>) {
        *self.state.query_delay.lock() = delay;
    }

    pub fn set_lag_seconds(&self, lag: Option<f64>) {
        *self.state.lag_seconds.lock() = lag;
    }

    pub fn sessions_opened(&self) -> usize {
        self.state.sessions_opened.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionFactory for MockReplica {
    async fn open(&self, _connection_string: &str) -> Result<Box<dyn MonitorSession>, ReplicaError> {
        if *self.state.fail_connect.lock() {
            return Err(ReplicaError::ConnectionFailed(
                "injected connect failure".to_string(),
            ));
        }
        self.state.sessions_opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockSession {
            state: Arc::clone(&self.state),
        }))
    }
}

struct MockSession {
    state: Arc<MockState>,
}

impl MockSession {
    async fn before_query(&self) -> Result<(), ReplicaError> {
        let delay = *self.state.query_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if *self.state.fail_queries.lock() {
            return Err(ReplicaError::QueryFailed(
                "injected query failure".to_string(),
            ));
        }
        Ok(())
    }

    fn table(&self, table: &TableRef) -> Result<MockTable, ReplicaError> {
        self.state
            .tables
            .lock()
            .get(table)
            .cloned()
            .ok_or_else(|| ReplicaError::QueryFailed(format!("relation {} does not exist", table)))
    }
}

#[async_trait]
impl MonitorSession for MockSession {
    async fn transaction_read_only(&self) -> Result<bool, ReplicaError> {
        Ok(*self.state.report_read_only.lock())
    }

    async fn max_time_value(
        &self,
        table: &TableRef,
        _time_column: &str,
    ) -> Result<Option<DateTime<Utc>>, ReplicaError> {
        self.before_query().await?;
        Ok(self.table(table)?.max_timestamp)
    }

    async fn row_count(&self, table: &TableRef) -> Result<i64, ReplicaError> {
        self.before_query().await?;
        Ok(self.table(table)?.row_count)
    }

    async fn column_metadata(&self, table: &TableRef) -> Result<Vec<ColumnDef>, ReplicaError> {
        self.before_query().await?;
        Ok(self.table(table)?.columns)
    }

    async fn replication_lag(&self) -> Result<Option<f64>, ReplicaError> {
        self.before_query().await?;
        Ok(*self.state.lag_seconds.lock())
    }
}
