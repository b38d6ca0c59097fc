//! Scratch migration directories for runner tests.

use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

/// The migration scripts shipped at the workspace root.
pub fn workspace_migrations_dir() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../../database/migrations")
}

/// A temporary directory of reversible migration scripts.
pub struct MigrationDir {
    dir: TempDir,
}

impl MigrationDir {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("create temp migration dir"),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Write `<version>_<name>.up.sql` and the matching `.down.sql`.
    pub fn add(&self, version: i64, name: &str, up: &str, down: &str) -> &Self {
        let stem = format!("{version:06}_{name}");
        fs::write(self.path().join(format!("{stem}.up.sql")), up).expect("write up script");
        fs::write(self.path().join(format!("{stem}.down.sql")), down).expect("write down script");
        self
    }

    /// Add a migration creating (and dropping) a one-column table.
    pub fn add_table(&self, version: i64, table: &str) -> &Self {
        self.add(
            version,
            &format!("create_{table}"),
            &format!("CREATE TABLE {table} (id INTEGER PRIMARY KEY);"),
            &format!("DROP TABLE {table};"),
        )
    }
}

impl Default for MigrationDir {
    fn default() -> Self {
        Self::new()
    }
}
