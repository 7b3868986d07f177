//! Check execution pipeline
//!
//! One check = one guarded, read-only, timeout-bounded query against a
//! replica, classified into a structured result. A cycle runs every
//! configured monitor for a table and feeds the alert lifecycle.

pub mod cycle;
pub mod executor;

pub use cycle::{CheckRunner, CycleError, CycleSummary};
pub use executor::{CheckExecutor, CheckerError};
