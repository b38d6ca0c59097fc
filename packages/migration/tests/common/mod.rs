#![allow(dead_code)]

use migration::DbPool;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;

#[ctor::ctor]
fn init_logging() {
    test_support::logging::init();
}

/// Single-connection in-memory database; the connection lives as long as the pool.
pub async fn memory_pool() -> SqlitePool {
    SqlitePoolOptions::new()
        .min_connections(1)
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .expect("open in-memory sqlite")
}

pub async fn memory_db() -> (SqlitePool, DbPool) {
    let pool = memory_pool().await;
    let db = DbPool::Sqlite(pool.clone());
    (pool, db)
}
