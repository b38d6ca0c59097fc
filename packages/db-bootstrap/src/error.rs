use std::io;
use std::path::PathBuf;

use migration::MigrationError;
use thiserror::Error;

/// Bad or unresolvable configuration. Raised before any side effect.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{var} must be a valid port number, got '{value}'")]
    InvalidPort { var: &'static str, value: String },

    #[error("{var} must be a whole number, got '{value}'")]
    InvalidNumber { var: &'static str, value: String },

    #[error("{var} must be true or false, got '{value}'")]
    InvalidBool { var: &'static str, value: String },

    #[error("unsupported SSL mode '{value}' (expected disable, allow, prefer, require, verify-ca or verify-full)")]
    InvalidSslMode { value: String },

    #[error("invalid connection string: {message}")]
    InvalidUrl { message: String },

    #[error("DB_PASSWORD must be set when DB_REQUIRE_PASSWORD=true")]
    MissingPassword,

    #[error("cannot prepare {}: {source}", path.display())]
    Path {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Failure to produce or read the self-managed instance's credential.
#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("credential file {} is empty; refusing to generate a new one over it", path.display())]
    Corrupt { path: PathBuf },

    #[error("failed to read credential file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to create credential file {}: {source}", path.display())]
    Create {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to write credential file {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to gather entropy for credential: {message}")]
    Entropy { message: String },

    #[error("credential file {} was created concurrently and then removed", path.display())]
    RaceLost { path: PathBuf },
}

/// Failure in the self-managed engine lifecycle.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("failed to prepare engine data directory {}: {source}", path.display())]
    DataDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("an embedded engine is already running on port {port}")]
    AlreadyRunning { port: u16 },

    #[error("failed to install or initialise embedded engine: {0}")]
    Setup(#[source] postgresql_embedded::Error),

    #[error("failed to start embedded engine: {0}")]
    Start(#[source] postgresql_embedded::Error),

    #[error("failed to create database '{name}': {source}")]
    CreateDatabase {
        name: String,
        #[source]
        source: postgresql_embedded::Error,
    },

    #[error("failed to stop embedded engine: {0}")]
    Stop(#[source] postgresql_embedded::Error),

    #[error("embedded engine startup cancelled")]
    Cancelled,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("credential provisioning failed: {0}")]
    Credential(#[from] CredentialError),

    /// Any engine failure other than cancellation, which maps to `Cancelled`.
    #[error("embedded engine error: {0}")]
    Engine(#[source] EngineError),

    /// The connection could not be verified. A started engine is left running.
    #[error("liveness check against {backend} failed: {source}")]
    Ping {
        backend: &'static str,
        #[source]
        source: sqlx::Error,
    },

    #[error("failed to prepare migrations: {0}")]
    MigrationSetup(#[source] MigrationError),

    #[error("failed to apply migrations: {0}")]
    Migration(#[from] MigrationError),

    #[error("cancelled during {stage}")]
    Cancelled { stage: &'static str },
}

impl From<EngineError> for BootstrapError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Cancelled => BootstrapError::Cancelled {
                stage: "engine startup",
            },
            other => BootstrapError::Engine(other),
        }
    }
}
