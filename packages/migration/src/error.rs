use std::path::PathBuf;

use sqlx::migrate::MigrateError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("migration source {} does not exist or is not a directory", path.display())]
    MissingSource { path: PathBuf },

    #[error("failed to load migrations from {}: {source}", path.display())]
    Source {
        path: PathBuf,
        #[source]
        source: MigrateError,
    },

    /// A previous run stopped part-way through this version. Needs an operator.
    #[error("schema is dirty at version {version}; a previous migration did not complete and must be repaired by hand")]
    Dirty { version: i64 },

    #[error("migration {version} is pending but the schema is already at version {current}")]
    OutOfOrder { version: i64, current: i64 },

    #[error("failed to read schema version state: {0}")]
    Inspect(#[source] MigrateError),

    #[error("migration failed: {0}")]
    Apply(#[source] MigrateError),

    #[error("revert failed: {0}")]
    Undo(#[source] MigrateError),

    #[error("migration {version} has no down script")]
    Irreversible { version: i64 },

    #[error("no applied migration to revert")]
    NothingToUndo,
}

impl MigrationError {
    /// Map an engine error raised while applying, keeping the dirty case distinct.
    pub(crate) fn from_apply(err: MigrateError) -> Self {
        match err {
            MigrateError::Dirty(version) => MigrationError::Dirty { version },
            other => MigrationError::Apply(other),
        }
    }

    pub(crate) fn from_undo(err: MigrateError) -> Self {
        match err {
            MigrateError::Dirty(version) => MigrationError::Dirty { version },
            other => MigrationError::Undo(other),
        }
    }
}
