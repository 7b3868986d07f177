//! Postgres session implementation
//!
//! Connections force `default_transaction_read_only=on`; the registry
//! still verifies what the server reports before handing a session out.
//! Identifiers are quoted, everything else is parameterized.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_postgres::NoTls;

use super::session::{MonitorSession, ReplicaError, SessionFactory};
use crate::model::{ColumnDef, TableRef};

/// Opens `tokio-postgres` sessions against customer replicas
pub struct PgSessionFactory;

#[async_trait]
impl SessionFactory for PgSessionFactory {
    async fn open(&self, connection_string: &str) -> Result<Box<dyn MonitorSession>, ReplicaError> {
        let mut config: tokio_postgres::Config = connection_string
            .parse()
            .map_err(|e: tokio_postgres::Error| ReplicaError::ConnectionFailed(e.to_string()))?;
        config.options("-c default_transaction_read_only=on");

        let (client, connection) = config
            .connect(NoTls)
            .await
            .map_err(|e| ReplicaError::ConnectionFailed(e.to_string()))?;

        // The connection future drives the socket; it resolves once the
        // client is dropped, which is how sessions get closed.
        let driver = tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::warn!(error = %e, "Replica connection terminated with error");
            }
        });

        Ok(Box::new(PgSession { client, driver }))
    }
}

/// One live replica session. Dropping it closes the client and tears down
/// the driver task, discarding any in-progress transaction state.
pub struct PgSession {
    client: tokio_postgres::Client,
    driver: tokio::task::JoinHandle<()>,
}

impl Drop for PgSession {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

#[async_trait]
impl MonitorSession for PgSession {
    async fn transaction_read_only(&self) -> Result<bool, ReplicaError> {
        let row = self
            .client
            .query_one("SHOW transaction_read_only", &[])
            .await
            .map_err(query_error)?;
        let setting: String = row.get(0);
        Ok(setting == "on")
    }

    async fn max_time_value(
        &self,
        table: &TableRef,
        time_column: &str,
    ) -> Result<Option<DateTime<Utc>>, ReplicaError> {
        // EXTRACT(EPOCH ...) keeps the result type stable whether the
        // column is timestamp or timestamptz.
        let query = format!(
            "SELECT EXTRACT(EPOCH FROM MAX({}))::float8 FROM {}.{}",
            quote_ident(time_column),
            quote_ident(&table.schema),
            quote_ident(&table.table),
        );

        let row = self.client.query_one(&query, &[]).await.map_err(query_error)?;
        let epoch: Option<f64> = row.get(0);
        Ok(epoch.and_then(datetime_from_epoch))
    }

    async fn row_count(&self, table: &TableRef) -> Result<i64, ReplicaError> {
        let query = format!(
            "SELECT COUNT(*) FROM {}.{}",
            quote_ident(&table.schema),
            quote_ident(&table.table),
        );

        let row = self.client.query_one(&query, &[]).await.map_err(query_error)?;
        Ok(row.get(0))
    }

    async fn column_metadata(&self, table: &TableRef) -> Result<Vec<ColumnDef>, ReplicaError> {
        let rows = self
            .client
            .query(
                "SELECT column_name, data_type, is_nullable, column_default \
                 FROM information_schema.columns \
                 WHERE table_schema = $1 AND table_name = $2 \
                 ORDER BY ordinal_position",
                &[&table.schema, &table.table],
            )
            .await
            .map_err(query_error)?;

        Ok(rows
            .iter()
            .map(|row| {
                let nullable: String = row.get(2);
                ColumnDef {
                    name: row.get(0),
                    data_type: row.get(1),
                    nullable: nullable == "YES",
                    default: row.get(3),
                }
            })
            .collect())
    }

    async fn replication_lag(&self) -> Result<Option<f64>, ReplicaError> {
        let row = self
            .client
            .query_one(
                "SELECT CASE WHEN pg_is_in_recovery() \
                 THEN EXTRACT(EPOCH FROM (NOW() - pg_last_xact_replay_timestamp()))::float8 \
                 END",
                &[],
            )
            .await
            .map_err(query_error)?;
        Ok(row.get(0))
    }
}

fn query_error(e: tokio_postgres::Error) -> ReplicaError {
    ReplicaError::QueryFailed(e.to_string())
}

fn datetime_from_epoch(epoch: f64) -> Option<DateTime<Utc>> {
    let secs = epoch.trunc() as i64;
    let nanos = (epoch.fract().abs() * 1_000_000_000.0) as u32;
    DateTime::from_timestamp(secs, nanos)
}

/// Quote an identifier for interpolation into a statement. Doubles any
/// embedded quotes, the same escaping the server itself uses.
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}
