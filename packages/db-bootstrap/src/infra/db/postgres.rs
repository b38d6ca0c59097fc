use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use migration::{DbPool, MigrationSource};
use sea_orm::SqlxPostgresConnector;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::db::{PostgresTarget, SelfManaged};
use crate::error::{BootstrapError, ConfigError};
use crate::infra::db::core::sanitize_db_url;
use crate::infra::db::credential;
use crate::infra::db::driver::{migration_handle, ping, Connected, Connector};
use crate::infra::db::embedded::{EmbeddedEngine, EngineSettings};

const MAX_CONNECTIONS: u32 = 10;

/// Server-based backend: an external server, or a self-managed one started on demand.
#[derive(Debug, Clone)]
pub struct PostgresConnector {
    target: PostgresTarget,
    connect_timeout: Duration,
}

impl PostgresConnector {
    pub fn new(target: PostgresTarget, connect_timeout: Duration) -> Self {
        Self {
            target,
            connect_timeout,
        }
    }

    async fn connect_options(
        &self,
        engine: &mut EmbeddedEngine,
        cancel: &CancellationToken,
    ) -> Result<PgConnectOptions, BootstrapError> {
        match &self.target {
            PostgresTarget::Url(url) => {
                info!(url = %sanitize_db_url(url), "postgres=external");
                PgConnectOptions::from_str(url).map_err(|e| {
                    BootstrapError::Config(ConfigError::InvalidUrl {
                        message: e.to_string(),
                    })
                })
            }
            PostgresTarget::External(params) => {
                info!(
                    host = %params.host,
                    port = params.port,
                    db_name = %params.db_name,
                    ssl_mode = ?params.ssl_mode,
                    "postgres=external"
                );
                Ok(params.connect_options())
            }
            PostgresTarget::SelfManaged(settings) => {
                start_self_managed(settings, engine, cancel).await
            }
        }
    }
}

/// Credential first, then the engine, then the connection options against it.
async fn start_self_managed(
    settings: &SelfManaged,
    engine: &mut EmbeddedEngine,
    cancel: &CancellationToken,
) -> Result<PgConnectOptions, BootstrapError> {
    let credential = credential::get_or_create(&settings.credential_file)?;

    engine
        .start(
            EngineSettings {
                data_dir: settings.data_dir.clone(),
                port: settings.port,
                user: settings.user.clone(),
                credential: credential.clone(),
                db_name: settings.db_name.clone(),
            },
            cancel,
        )
        .await?;

    info!(
        port = settings.port,
        data_dir = %settings.data_dir.display(),
        "postgres=self_managed"
    );

    Ok(PgConnectOptions::new()
        .host("localhost")
        .port(settings.port)
        .username(&settings.user)
        .password(credential.expose())
        .database(&settings.db_name)
        .ssl_mode(PgSslMode::Disable))
}

#[async_trait]
impl Connector for PostgresConnector {
    async fn connect(
        &self,
        source: &MigrationSource,
        engine: &mut EmbeddedEngine,
        cancel: &CancellationToken,
    ) -> Result<Connected, BootstrapError> {
        let options = self.connect_options(engine, cancel).await?;

        let pool = PgPoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .acquire_timeout(self.connect_timeout)
            .connect_lazy_with(options);

        ping(&pool, "postgres", cancel).await?;

        let migrations = migration_handle(source, DbPool::Postgres(pool.clone())).await?;
        Ok(Connected {
            conn: SqlxPostgresConnector::from_sqlx_postgres_pool(pool),
            migrations,
        })
    }
}
