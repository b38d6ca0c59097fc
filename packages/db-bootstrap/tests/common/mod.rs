#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;

use db_bootstrap::DbConfig;
use migration::MigrationSource;
use tempfile::TempDir;
use test_support::fixtures::workspace_migrations_dir;
use test_support::unique_str;

#[ctor::ctor]
fn init_logging() {
    test_support::logging::init();
}

/// Fresh data root; the ULID-suffixed name keeps parallel tests apart in logs.
pub fn data_root() -> TempDir {
    tempfile::Builder::new()
        .prefix(&unique_str("db-root"))
        .tempdir()
        .expect("create data root")
}

/// Build a config from explicit pairs, with the data root pinned to `root`.
pub fn config_in(root: &Path, pairs: &[(&str, &str)]) -> DbConfig {
    let mut map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    map.insert(
        "DB_DATA_ROOT".to_string(),
        root.to_string_lossy().into_owned(),
    );
    DbConfig::load(|key| map.get(key).cloned(), None).expect("valid test config")
}

pub fn workspace_source() -> MigrationSource {
    MigrationSource::from_dir(workspace_migrations_dir())
}
