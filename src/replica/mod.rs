//! Read-only access to customer replicas
//!
//! The registry owns connection configuration and is the only component
//! that opens sessions. Sessions expose the closed set of monitor queries
//! and nothing else; a write-capable session is never handed out.

pub mod postgres;
pub mod registry;
pub mod session;

#[cfg(test)]
pub mod mock;

pub use postgres::PgSessionFactory;
pub use registry::{ReplicaConnection, ReplicaRegistry};
pub use session::{MonitorSession, ReplicaError, SessionFactory};
