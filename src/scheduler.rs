//! Periodic check scheduling
//!
//! A background worker that finds due tables and kicks off their cycles.
//! The core only depends on `run_check_cycle`; anything that can invoke
//! that on a timer (this worker, cron, an external queue) is a valid
//! trigger.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::time::interval;

use crate::catalog::TableCatalog;
use crate::check::CheckRunner;

/// Background scheduler dispatching check cycles for due tables
pub struct CheckScheduler {
    catalog: Arc<TableCatalog>,
    runner: Arc<CheckRunner>,
    tick: Duration,
    shutdown_tx: Option<mpsc::Sender<()>>,
}

impl CheckScheduler {
    pub fn new(catalog: Arc<TableCatalog>, runner: Arc<CheckRunner>, tick: Duration) -> Self {
        Self {
            catalog,
            runner,
            tick,
            shutdown_tx: None,
        }
    }

    /// Start the background worker
    pub fn start(&mut self) -> tokio::task::JoinHandle<()> {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        self.shutdown_tx = Some(shutdown_tx);

        let catalog = Arc::clone(&self.catalog);
        let runner = Arc::clone(&self.runner);
        let tick = self.tick;

        tokio::spawn(async move {
            tracing::info!(tick_secs = tick.as_secs(), "Check scheduler started");
            let mut ticker = interval(tick);
            let mut last_runs: HashMap<i64, DateTime<Utc>> = HashMap::new();

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        Self::dispatch_due(&catalog, &runner, &mut last_runs).await;
                    }
                    _ = shutdown_rx.recv() => {
                        tracing::info!("Check scheduler shutting down");
                        break;
                    }
                }
            }
        })
    }

    /// Stop the background worker
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(()).await;
        }
    }

    /// Kick off a cycle for every table whose interval has elapsed. Each
    /// cycle runs as its own task; tables sharing a connection contend on
    /// the guardrail, not on each other.
    async fn dispatch_due(
        catalog: &Arc<TableCatalog>,
        runner: &Arc<CheckRunner>,
        last_runs: &mut HashMap<i64, DateTime<Utc>>,
    ) {
        let now = Utc::now();
        let due = due_tables(catalog, last_runs, now);

        // Forget tables that no longer exist
        last_runs.retain(|table_id, _| catalog.get(*table_id).is_some());

        for table_id in due {
            last_runs.insert(table_id, now);
            let runner = Arc::clone(runner);
            tokio::spawn(async move {
                match runner.run_check_cycle(table_id).await {
                    Ok(summary) if summary.discarded => {
                        tracing::debug!(table_id, "Scheduled cycle discarded");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::error!(table_id, error = %e, "Scheduled cycle failed");
                    }
                }
            });
        }
    }
}

fn due_tables(
    catalog: &TableCatalog,
    last_runs: &HashMap<i64, DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Vec<i64> {
    catalog
        .list()
        .into_iter()
        .filter(|table| {
            last_runs.get(&table.id).map_or(true, |last| {
                let elapsed = now.signed_duration_since(*last);
                elapsed >= chrono::Duration::minutes(table.interval_minutes as i64)
            })
        })
        .map(|table| table.id)
        .collect()
}
