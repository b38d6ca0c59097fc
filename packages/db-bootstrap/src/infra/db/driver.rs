use async_trait::async_trait;
use migration::{MigrationHandle, MigrationSource};
use sea_orm::DatabaseConnection;
use sqlx::{Connection, Database, Pool};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::db::{BackendConfig, BackendKind, DbConfig};
use crate::error::BootstrapError;
use crate::infra::db::embedded::EmbeddedEngine;
use crate::infra::db::postgres::PostgresConnector;
use crate::infra::db::sqlite::SqliteConnector;

/// A verified connection plus a migration handle bound to the same pool.
#[derive(Debug)]
pub struct Connected {
    pub conn: DatabaseConnection,
    pub migrations: MigrationHandle,
}

/// Opens, verifies and wraps a connection for one backend.
#[async_trait]
pub trait Connector {
    /// `engine` receives any self-managed server started along the way, and
    /// keeps it even if a later step fails.
    async fn connect(
        &self,
        source: &MigrationSource,
        engine: &mut EmbeddedEngine,
        cancel: &CancellationToken,
    ) -> Result<Connected, BootstrapError>;
}

#[derive(Debug, Clone)]
pub enum Driver {
    Sqlite(SqliteConnector),
    Postgres(PostgresConnector),
}

impl Driver {
    pub fn kind(&self) -> BackendKind {
        match self {
            Driver::Sqlite(_) => BackendKind::Sqlite,
            Driver::Postgres(_) => BackendKind::Postgres,
        }
    }
}

#[async_trait]
impl Connector for Driver {
    async fn connect(
        &self,
        source: &MigrationSource,
        engine: &mut EmbeddedEngine,
        cancel: &CancellationToken,
    ) -> Result<Connected, BootstrapError> {
        match self {
            Driver::Sqlite(c) => c.connect(source, engine, cancel).await,
            Driver::Postgres(c) => c.connect(source, engine, cancel).await,
        }
    }
}

pub fn select_driver(config: &DbConfig) -> Driver {
    let driver = match &config.backend {
        BackendConfig::Sqlite(target) => {
            Driver::Sqlite(SqliteConnector::new(target.clone(), config.connect_timeout))
        }
        BackendConfig::Postgres(target) => {
            Driver::Postgres(PostgresConnector::new(target.clone(), config.connect_timeout))
        }
    };
    debug!(backend = %driver.kind(), "driver selected");
    driver
}

/// Check out one connection and ping it, giving up early on cancellation.
pub(crate) async fn ping<DB>(
    pool: &Pool<DB>,
    backend: &'static str,
    cancel: &CancellationToken,
) -> Result<(), BootstrapError>
where
    DB: Database,
{
    let check = async {
        let mut conn = pool.acquire().await?;
        conn.ping().await
    };

    tokio::select! {
        biased;

        _ = cancel.cancelled() => Err(BootstrapError::Cancelled { stage: "liveness check" }),
        result = check => result.map_err(|source| BootstrapError::Ping { backend, source }),
    }
}

/// Construct the migration handle; failures here are kept apart from liveness failures.
pub(crate) async fn migration_handle(
    source: &MigrationSource,
    pool: migration::DbPool,
) -> Result<MigrationHandle, BootstrapError> {
    MigrationHandle::new(source.clone(), pool)
        .await
        .map_err(BootstrapError::MigrationSetup)
}
