//! Lifecycle of the self-managed PostgreSQL server.
//!
//! `NotStarted -> Starting -> Running -> Stopped`. The engine is an explicit
//! owner object: whoever holds it is responsible for calling [`EmbeddedEngine::stop`].
//! A server that is dropped while still running is stopped by `postgresql_embedded`.

use std::path::{Path, PathBuf};
use std::time::Instant;

use postgresql_embedded::{PostgreSQL, Settings, Status};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::EngineError;
use crate::infra::db::credential::Credential;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    NotStarted,
    Starting,
    Running,
    Stopped,
}

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub data_dir: PathBuf,
    pub port: u16,
    pub user: String,
    pub credential: Credential,
    pub db_name: String,
}

pub struct EmbeddedEngine {
    state: EngineState,
    port: Option<u16>,
    server: Option<PostgreSQL>,
}

impl EmbeddedEngine {
    pub fn new() -> Self {
        Self {
            state: EngineState::NotStarted,
            port: None,
            server: None,
        }
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == EngineState::Running
    }

    /// Port of the current (or last) instance, once startup has begun.
    pub fn port(&self) -> Option<u16> {
        self.port
    }

    /// Initialise the data directory if needed, start the server and make sure
    /// `settings.db_name` exists.
    ///
    /// Precondition: not already running. A second start is rejected with
    /// [`EngineError::AlreadyRunning`]. If startup fails or is cancelled
    /// part-way, the partial instance is kept so [`EmbeddedEngine::stop`] can
    /// still clean it up.
    pub async fn start(
        &mut self,
        settings: EngineSettings,
        cancel: &CancellationToken,
    ) -> Result<(), EngineError> {
        if let (EngineState::Running, Some(port)) = (self.state, self.port) {
            return Err(EngineError::AlreadyRunning { port });
        }
        // Leftover from a failed or cancelled start.
        self.stop().await?;

        let data_dir = prepare_data_dir(&settings.data_dir).await?;
        let started_at = Instant::now();

        self.state = EngineState::Starting;
        self.port = Some(settings.port);

        info!(
            engine = "starting",
            port = settings.port,
            data_dir = %data_dir.display(),
            "embedded postgres"
        );

        let mut pg_settings = Settings::default();
        pg_settings.data_dir = data_dir;
        pg_settings.host = "localhost".to_string();
        pg_settings.port = settings.port;
        pg_settings.username = settings.user.clone();
        pg_settings.password = settings.credential.expose().to_string();
        pg_settings.temporary = false;

        let mut server = PostgreSQL::new(pg_settings);

        let result = tokio::select! {
            biased;

            _ = cancel.cancelled() => Err(EngineError::Cancelled),
            booted = boot(&mut server, &settings.db_name) => booted,
        };

        self.server = Some(server);

        match result {
            Ok(()) => {
                self.state = EngineState::Running;
                info!(
                    engine = "running",
                    port = settings.port,
                    db_name = %settings.db_name,
                    elapsed_ms = started_at.elapsed().as_millis(),
                    "embedded postgres"
                );
                Ok(())
            }
            Err(e) => {
                warn!(engine = "start_failed", error = %e, "embedded postgres");
                Err(e)
            }
        }
    }

    /// Stop the server. A no-op if it was never started or is already stopped.
    pub async fn stop(&mut self) -> Result<(), EngineError> {
        let Some(server) = self.server.take() else {
            debug!(state = ?self.state, "embedded postgres stop: nothing to stop");
            return Ok(());
        };

        if matches!(server.status(), Status::Started) {
            if let Err(e) = server.stop().await {
                self.server = Some(server);
                return Err(EngineError::Stop(e));
            }
            info!(engine = "stopped", port = ?self.port, "embedded postgres");
        }

        self.state = EngineState::Stopped;
        Ok(())
    }
}

impl Default for EmbeddedEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EmbeddedEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddedEngine")
            .field("state", &self.state)
            .field("port", &self.port)
            .finish()
    }
}

async fn prepare_data_dir(dir: &Path) -> Result<PathBuf, EngineError> {
    let to_err = |source| EngineError::DataDir {
        path: dir.to_path_buf(),
        source,
    };
    tokio::fs::create_dir_all(dir).await.map_err(to_err)?;
    tokio::fs::canonicalize(dir).await.map_err(to_err)
}

async fn boot(server: &mut PostgreSQL, db_name: &str) -> Result<(), EngineError> {
    server.setup().await.map_err(EngineError::Setup)?;
    server.start().await.map_err(EngineError::Start)?;

    let exists = server
        .database_exists(db_name)
        .await
        .map_err(|source| EngineError::CreateDatabase {
            name: db_name.to_string(),
            source,
        })?;
    if !exists {
        server
            .create_database(db_name)
            .await
            .map_err(|source| EngineError::CreateDatabase {
                name: db_name.to_string(),
                source,
            })?;
        info!(db_name, "embedded postgres database created");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::db::credential::generate;

    #[tokio::test]
    async fn stop_without_start_is_a_no_op() {
        let mut engine = EmbeddedEngine::new();
        engine.stop().await.unwrap();
        engine.stop().await.unwrap();
        assert_eq!(engine.state(), EngineState::NotStarted);
        assert_eq!(engine.port(), None);
    }

    #[tokio::test]
    async fn unusable_data_dir_fails_before_starting() {
        let tmp = tempfile::tempdir().unwrap();
        let blocker = tmp.path().join("file");
        std::fs::write(&blocker, b"x").unwrap();

        let mut engine = EmbeddedEngine::new();
        let settings = EngineSettings {
            data_dir: blocker.join("postgres_data"),
            port: 5433,
            user: "postgres".to_string(),
            credential: generate(32).unwrap(),
            db_name: "reesource_tracker".to_string(),
        };

        let err = engine
            .start(settings, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::DataDir { .. }), "{err:?}");
        assert_eq!(engine.state(), EngineState::NotStarted);
        engine.stop().await.unwrap();
    }

    #[tokio::test]
    async fn cancelled_start_can_still_be_stopped() {
        let tmp = tempfile::tempdir().unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let mut engine = EmbeddedEngine::new();
        let settings = EngineSettings {
            data_dir: tmp.path().join("postgres_data"),
            port: 5433,
            user: "postgres".to_string(),
            credential: generate(32).unwrap(),
            db_name: "reesource_tracker".to_string(),
        };

        let err = engine.start(settings, &cancel).await.unwrap_err();
        assert!(matches!(err, EngineError::Cancelled));
        assert_eq!(engine.state(), EngineState::Starting);
        assert!(!engine.is_running());

        engine.stop().await.unwrap();
        assert_eq!(engine.state(), EngineState::Stopped);
    }
}
