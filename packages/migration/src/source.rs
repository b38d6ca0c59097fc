use std::fmt;
use std::path::{Path, PathBuf};

use sqlx::migrate::Migrator;
use tracing::debug;

use crate::error::MigrationError;

/// Directory probed first, relative to the working directory.
pub const LOCAL_MIGRATIONS_DIR: &str = "migrations";
/// Fallback when no local `migrations` directory exists.
pub const DEFAULT_MIGRATIONS_DIR: &str = "database/migrations";

/// Location of the versioned migration scripts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationSource {
    dir: PathBuf,
}

impl MigrationSource {
    /// Resolve against the current working directory.
    pub fn resolve() -> Self {
        Self::resolve_in(Path::new(""))
    }

    /// Probe `<base>/migrations`, falling back to `<base>/database/migrations`.
    pub fn resolve_in(base: &Path) -> Self {
        let local = base.join(LOCAL_MIGRATIONS_DIR);
        let dir = if local.is_dir() {
            local
        } else {
            base.join(DEFAULT_MIGRATIONS_DIR)
        };
        debug!(source = %dir.display(), "migration source resolved");
        Self { dir }
    }

    pub fn from_dir(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Read every script in the directory into a migrator.
    pub(crate) async fn load(&self) -> Result<Migrator, MigrationError> {
        if !self.dir.is_dir() {
            return Err(MigrationError::MissingSource {
                path: self.dir.clone(),
            });
        }

        Migrator::new(self.dir.clone())
            .await
            .map_err(|source| MigrationError::Source {
                path: self.dir.clone(),
                source,
            })
    }
}

impl fmt::Display for MigrationSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "file://{}", self.dir.display())
    }
}
