//! Registry of customer replica connections

use std::sync::Arc;

use dashmap::DashMap;

use super::session::{MonitorSession, ReplicaError, SessionFactory};
use crate::guardrail::{GuardrailController, GuardrailLimits};

/// A registered replica connection. The registry entry exclusively owns
/// the connection string; it is never echoed in logs or API responses.
#[derive(Debug, Clone)]
pub struct ReplicaConnection {
    pub id: i64,
    pub name: String,
    connection_string: String,
    pub limits: GuardrailLimits,
}

impl ReplicaConnection {
    pub fn connection_string(&self) -> &str {
        &self.connection_string
    }
}

/// Maps connection ids to replica access configuration. The single
/// authority for creating and destroying connections and the only
/// component that opens sessions against them.
pub struct ReplicaRegistry {
    connections: DashMap<i64, ReplicaConnection>,
    guardrails: Arc<GuardrailController>,
    factory: Arc<dyn SessionFactory>,
}

impl ReplicaRegistry {
    pub fn new(guardrails: Arc<GuardrailController>, factory: Arc<dyn SessionFactory>) -> Self {
        Self {
            connections: DashMap::new(),
            guardrails,
            factory,
        }
    }

    /// Create or replace a connection entry and install its guardrail
    /// limits.
    pub fn register(
        &self,
        id: i64,
        name: impl Into<String>,
        connection_string: impl Into<String>,
        limits: GuardrailLimits,
    ) {
        let connection = ReplicaConnection {
            id,
            name: name.into(),
            connection_string: connection_string.into(),
            limits: limits.clone(),
        };
        self.guardrails.configure(id, limits);
        self.connections.insert(id, connection);
        tracing::info!(connection_id = id, "Replica connection registered");
    }

    pub fn get(&self, id: i64) -> Option<ReplicaConnection> {
        self.connections.get(&id).map(|entry| entry.clone())
    }

    pub fn remove(&self, id: i64) -> bool {
        let removed = self.connections.remove(&id).is_some();
        if removed {
            self.guardrails.remove(id);
            tracing::info!(connection_id = id, "Replica connection removed");
        }
        removed
    }

    pub fn list(&self) -> Vec<ReplicaConnection> {
        self.connections.iter().map(|entry| entry.clone()).collect()
    }

    /// Open a session configured for read-only transactions and verify the
    /// replica actually reports read-only mode. A session that fails
    /// verification is closed and never returned; dropping the returned
    /// session closes it on every exit path.
    pub async fn open_read_only_session(
        &self,
        id: i64,
    ) -> Result<Box<dyn MonitorSession>, ReplicaError> {
        let connection = self.get(id).ok_or(ReplicaError::ConnectionNotFound(id))?;

        let session = self.factory.open(&connection.connection_string).await?;

        match session.transaction_read_only().await {
            Ok(true) => Ok(session),
            Ok(false) => {
                tracing::error!(
                    connection_id = id,
                    "Replica session is not read-only, refusing to use it"
                );
                Err(ReplicaError::ReadOnlyVerificationFailed)
            }
            Err(e) => Err(e),
        }
    }
}
