use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use migration::{DbPool, MigrationSource};
use sea_orm::SqlxSqliteConnector;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::db::SqliteTarget;
use crate::error::{BootstrapError, ConfigError};
use crate::infra::db::driver::{migration_handle, ping, Connected, Connector};
use crate::infra::db::embedded::EmbeddedEngine;

const MAX_CONNECTIONS: u32 = 5;
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// File-based backend. No credential, no background process.
#[derive(Debug, Clone)]
pub struct SqliteConnector {
    target: SqliteTarget,
    connect_timeout: Duration,
}

impl SqliteConnector {
    pub fn new(target: SqliteTarget, connect_timeout: Duration) -> Self {
        Self {
            target,
            connect_timeout,
        }
    }

    async fn pool(&self) -> Result<SqlitePool, BootstrapError> {
        let pool = match &self.target {
            SqliteTarget::File(path) => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    tokio::fs::create_dir_all(parent)
                        .await
                        .map_err(|source| ConfigError::Path {
                            path: parent.to_path_buf(),
                            source,
                        })?;
                }
                info!(path = %path.display(), "sqlite=file");

                let options = SqliteConnectOptions::new()
                    .filename(path)
                    .create_if_missing(true)
                    .foreign_keys(true)
                    .journal_mode(SqliteJournalMode::Wal)
                    .synchronous(SqliteSynchronous::Normal)
                    .busy_timeout(BUSY_TIMEOUT);

                SqlitePoolOptions::new()
                    .max_connections(MAX_CONNECTIONS)
                    .acquire_timeout(self.connect_timeout)
                    .connect_lazy_with(options)
            }
            SqliteTarget::Memory => {
                info!("sqlite=memory");
                let options = SqliteConnectOptions::from_str("sqlite::memory:")
                    .map_err(|e| ConfigError::InvalidUrl {
                        message: e.to_string(),
                    })?
                    .foreign_keys(true);

                // Every connection would be a separate database; keep exactly one alive.
                SqlitePoolOptions::new()
                    .min_connections(1)
                    .max_connections(1)
                    .idle_timeout(None)
                    .max_lifetime(None)
                    .acquire_timeout(self.connect_timeout)
                    .connect_lazy_with(options)
            }
        };
        Ok(pool)
    }
}

#[async_trait]
impl Connector for SqliteConnector {
    async fn connect(
        &self,
        source: &MigrationSource,
        _engine: &mut EmbeddedEngine,
        cancel: &CancellationToken,
    ) -> Result<Connected, BootstrapError> {
        let pool = self.pool().await?;

        ping(&pool, "sqlite", cancel).await?;

        let migrations = migration_handle(source, DbPool::Sqlite(pool.clone())).await?;
        Ok(Connected {
            conn: SqlxSqliteConnector::from_sqlx_sqlite_pool(pool),
            migrations,
        })
    }
}
