//! Repliwatch: Replica Table Health Monitoring
//!
//! Monitors the health of tables living on customer-operated, read-only
//! database replicas without harming those replicas, and turns repeated
//! bad signals into debounced alerts.
//!
//! # Features
//!
//! - **Guardrails**: Per-connection query-rate and concurrency budgets
//! - **Read-Only Enforcement**: Sessions are verified read-only before use
//! - **Freshness Checks**: Staleness from the max of a time column
//! - **Volume Checks**: Row counts against a rolling baseline window
//! - **Schema Checks**: Column-level drift detection
//! - **Debounced Alerts**: Consecutive failures before anything pages
//! - **Backpressure**: Alert suppression while a replica is badly lagged
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use repliwatch::api::build_state;
//! use repliwatch::config::Settings;
//! use repliwatch::guardrail::GuardrailLimits;
//! use repliwatch::model::{MonitorType, TableRef};
//! use repliwatch::replica::PgSessionFactory;
//!
//! # async fn demo() {
//! let state = build_state(Settings::default(), Arc::new(PgSessionFactory));
//!
//! state.registry.register(
//!     1,
//!     "acme-replica",
//!     "host=replica.acme.example user=monitor dbname=prod",
//!     GuardrailLimits::default(),
//! );
//! let table = state.catalog.create(
//!     1,
//!     TableRef::new("public", "orders"),
//!     vec![MonitorType::Volume, MonitorType::Freshness],
//!     Some("created_at".to_string()),
//!     5,
//! );
//!
//! let summary = state.runner.run_check_cycle(table.id).await.unwrap();
//! println!("table status: {:?}", summary.status);
//! # }
//! ```

pub mod alerts;
pub mod api;
pub mod baseline;
pub mod catalog;
pub mod check;
pub mod config;
pub mod guardrail;
pub mod model;
pub mod replica;
pub mod scheduler;
pub mod sink;

// Re-export commonly used types
pub use alerts::{Alert, AlertEvent, AlertLifecycleManager};
pub use baseline::{BaselineEngine, BaselineStats};
pub use check::{CheckExecutor, CheckRunner, CycleSummary};
pub use config::Settings;
pub use guardrail::{GuardrailController, GuardrailLimits};
pub use model::{CheckResult, CheckStatus, MonitorType, MonitoredTable, TableRef, TableStatus};
pub use replica::ReplicaRegistry;
