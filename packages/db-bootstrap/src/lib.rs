//! Database bootstrap: backend selection, self-managed engine lifecycle and
//! schema migration, ending in a ready-to-use connection.
//!
//! ```no_run
//! # async fn run() -> Result<(), db_bootstrap::BootstrapError> {
//! use db_bootstrap::{connect_from_env, shutdown, EmbeddedEngine};
//! use tokio_util::sync::CancellationToken;
//!
//! let mut engine = EmbeddedEngine::new();
//! let ready = connect_from_env(&mut engine, &CancellationToken::new()).await;
//! // ... use ready?.conn ...
//! shutdown(&mut engine).await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod infra;

pub use config::db;
pub use config::db::{BackendKind, DbConfig};
pub use error::{BootstrapError, ConfigError, CredentialError, EngineError};
pub use infra::db::core::{connect, connect_from_env, sanitize_db_url, shutdown, Ready};
pub use infra::db::embedded::{EmbeddedEngine, EngineState};
