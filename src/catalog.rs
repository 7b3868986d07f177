//! Catalog of tables registered for monitoring
//!
//! This is the configuration side of the system: checks read it at the
//! start of each cycle and never mutate it. Mutation happens only through
//! the management API.

use std::sync::atomic::{AtomicI64, Ordering};

use dashmap::DashMap;

use crate::model::{MonitorType, MonitoredTable, TableRef};

/// In-memory table configuration store
pub struct TableCatalog {
    tables: DashMap<i64, MonitoredTable>,
    next_id: AtomicI64,
}

impl TableCatalog {
    pub fn new() -> Self {
        Self {
            tables: DashMap::new(),
            next_id: AtomicI64::new(1),
        }
    }

    /// Register a table, assigning it an id
    pub fn create(
        &self,
        connection_id: i64,
        table: TableRef,
        monitors: Vec<MonitorType>,
        time_column: Option<String>,
        interval_minutes: u64,
    ) -> MonitoredTable {
        let entry = MonitoredTable {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            connection_id,
            table,
            monitors,
            time_column,
            interval_minutes: interval_minutes.max(1),
        };
        self.tables.insert(entry.id, entry.clone());
        tracing::info!(table_id = entry.id, table = %entry.table, "Table registered for monitoring");
        entry
    }

    /// Insert or replace a table with a known id
    pub fn upsert(&self, table: MonitoredTable) {
        self.next_id.fetch_max(table.id + 1, Ordering::SeqCst);
        self.tables.insert(table.id, table);
    }

    pub fn get(&self, id: i64) -> Option<MonitoredTable> {
        self.tables.get(&id).map(|entry| entry.clone())
    }

    pub fn remove(&self, id: i64) -> bool {
        self.tables.remove(&id).is_some()
    }

    pub fn list(&self) -> Vec<MonitoredTable> {
        let mut tables: Vec<MonitoredTable> =
            self.tables.iter().map(|entry| entry.clone()).collect();
        tables.sort_by_key(|t| t.id);
        tables
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

impl Default for TableCatalog {
    fn default() -> Self {
        Self::new()
    }
}
