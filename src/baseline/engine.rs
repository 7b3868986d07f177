//! Rolling volume statistics and schema snapshot diffing

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::model::{ColumnDef, TableRef};

/// One recorded row-count reading
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeObservation {
    pub row_count: i64,
    pub observed_at: DateTime<Utc>,
}

/// Statistics derived from the current volume window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaselineStats {
    pub average: f64,
    pub min: i64,
    pub max: i64,
    pub count: usize,
}

/// Bounded FIFO window of volume observations
#[derive(Debug)]
struct VolumeWindow {
    observations: VecDeque<VolumeObservation>,
    capacity: usize,
}

impl VolumeWindow {
    fn new(capacity: usize) -> Self {
        Self {
            observations: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    fn push(&mut self, observation: VolumeObservation) {
        if self.observations.len() == self.capacity {
            self.observations.pop_front();
        }
        self.observations.push_back(observation);
    }

    fn stats(&self) -> Option<BaselineStats> {
        if self.observations.is_empty() {
            return None;
        }

        let counts: Vec<i64> = self.observations.iter().map(|o| o.row_count).collect();
        let sum: i64 = counts.iter().sum();
        // Window is non-empty, min/max exist
        let min = counts.iter().copied().min().unwrap_or(0);
        let max = counts.iter().copied().max().unwrap_or(0);

        Some(BaselineStats {
            average: sum as f64 / counts.len() as f64,
            min,
            max,
            count: counts.len(),
        })
    }
}

/// Last-seen column set for a table
#[derive(Debug, Clone)]
struct SchemaSnapshot {
    columns: Vec<ColumnDef>,
}

/// Rolling-baseline engine. Window capacity is fixed for the engine's
/// lifetime; keys are independent, so concurrent checks on different
/// tables never contend.
pub struct BaselineEngine {
    window_size: usize,
    volumes: DashMap<TableRef, VolumeWindow>,
    schemas: DashMap<TableRef, SchemaSnapshot>,
}

impl BaselineEngine {
    pub fn new(window_size: usize) -> Self {
        Self {
            window_size: window_size.max(1),
            volumes: DashMap::new(),
            schemas: DashMap::new(),
        }
    }

    /// Append a volume observation, evicting the oldest entry once the
    /// window is full.
    pub fn record_volume(&self, table: &TableRef, row_count: i64) {
        self.record_volume_at(table, row_count, Utc::now());
    }

    pub fn record_volume_at(&self, table: &TableRef, row_count: i64, now: DateTime<Utc>) {
        self.volumes
            .entry(table.clone())
            .or_insert_with(|| VolumeWindow::new(self.window_size))
            .push(VolumeObservation {
                row_count,
                observed_at: now,
            });
    }

    /// Stats over the current window, or `None` with no observations yet
    pub fn get_baseline(&self, table: &TableRef) -> Option<BaselineStats> {
        self.volumes.get(table).and_then(|window| window.stats())
    }

    /// Whether `current` deviates from the baseline average by more than
    /// `threshold` (as a fraction, 0.30 = 30%). Without history nothing
    /// can be classified; with a zero average any non-zero value is
    /// anomalous.
    pub fn is_anomaly(&self, table: &TableRef, current: i64, threshold: f64) -> bool {
        let Some(baseline) = self.get_baseline(table) else {
            return false;
        };

        if baseline.average == 0.0 {
            return current != 0;
        }

        let deviation = (current as f64 - baseline.average).abs() / baseline.average;
        deviation > threshold
    }

    /// Diff the current column set against the stored snapshot. The first
    /// observation stores the snapshot and reports no change; afterwards
    /// any added/removed column, type change, or nullability change counts
    /// as drift and replaces the snapshot.
    pub fn check_schema_change(&self, table: &TableRef, current: &[ColumnDef]) -> bool {
        let mut entry = match self.schemas.entry(table.clone()) {
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(SchemaSnapshot {
                    columns: current.to_vec(),
                });
                return false;
            }
            dashmap::mapref::entry::Entry::Occupied(occupied) => occupied,
        };

        let changed = schema_differs(&entry.get().columns, current);
        if changed {
            entry.get_mut().columns = current.to_vec();
        }
        changed
    }

    /// Number of tables with volume history, for introspection
    pub fn tracked_tables(&self) -> usize {
        self.volumes.len()
    }
}

fn schema_differs(previous: &[ColumnDef], current: &[ColumnDef]) -> bool {
    let prev_names: std::collections::HashSet<&str> =
        previous.iter().map(|c| c.name.as_str()).collect();
    let curr_names: std::collections::HashSet<&str> =
        current.iter().map(|c| c.name.as_str()).collect();

    if prev_names != curr_names {
        return true;
    }

    for prev_col in previous {
        if let Some(curr_col) = current.iter().find(|c| c.name == prev_col.name) {
            if prev_col.data_type != curr_col.data_type {
                return true;
            }
            if prev_col.nullable != curr_col.nullable {
                return true;
            }
        }
    }

    false
}
