use std::time::Instant;

use sqlx::migrate::{Migrate, MigrateError, Migration, Migrator};
use sqlx::{Database, Executor, PgConnection, PgPool, Pool, SqliteConnection, SqlitePool};

use crate::error::MigrationError;
use crate::source::MigrationSource;

/// Pool the migration engine drives. Shares connections with the caller's handle.
#[derive(Debug, Clone)]
pub enum DbPool {
    Postgres(PgPool),
    Sqlite(SqlitePool),
}

impl DbPool {
    pub fn backend_name(&self) -> &'static str {
        match self {
            DbPool::Postgres(_) => "postgresql",
            DbPool::Sqlite(_) => "sqlite",
        }
    }
}

/// Persisted schema version state, as read from the migrations table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VersionState {
    pub current: Option<i64>,
    pub dirty: Option<i64>,
    pub applied: Vec<i64>,
}

/// Migration engine bound to one pool and one migration source.
#[derive(Debug)]
pub struct MigrationHandle {
    source: MigrationSource,
    migrator: Migrator,
    pool: DbPool,
}

impl MigrationHandle {
    /// Load the scripts from `source` and bind them to `pool`.
    pub async fn new(source: MigrationSource, pool: DbPool) -> Result<Self, MigrationError> {
        let migrator = source.load().await?;
        Ok(Self {
            source,
            migrator,
            pool,
        })
    }

    pub fn source(&self) -> &MigrationSource {
        &self.source
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    /// Up migrations known to the source, ascending.
    pub fn defined(&self) -> impl Iterator<Item = &Migration> {
        self.migrator
            .iter()
            .filter(|m| !m.migration_type.is_down_migration())
    }

    pub fn latest_defined(&self) -> Option<i64> {
        self.defined().map(|m| m.version).max()
    }

    pub async fn inspect(&self) -> Result<VersionState, MigrationError> {
        let state = match &self.pool {
            DbPool::Postgres(pool) => inspect_pool(pool).await,
            DbPool::Sqlite(pool) => inspect_pool(pool).await,
        };
        state.map_err(MigrationError::Inspect)
    }

    /// Apply the defined migrations listed in `versions`, ascending, on one
    /// locked connection. Stops at the first failure.
    pub(crate) async fn run(&self, versions: &[i64]) -> Result<(), MigrateError> {
        let defined: Vec<&Migration> = self.defined().collect();
        let batch: Vec<&Migration> = defined
            .iter()
            .copied()
            .filter(|m| versions.contains(&m.version))
            .collect();

        match &self.pool {
            DbPool::Postgres(pool) => {
                let mut conn = pool.acquire().await?;
                conn.lock().await?;
                let result = async {
                    preflight(&mut *conn, &defined).await?;
                    for m in &batch {
                        if m.no_tx {
                            apply_untracked_pg(&mut conn, m).await?;
                        } else {
                            conn.apply(m).await?;
                        }
                    }
                    Ok::<(), MigrateError>(())
                }
                .await;
                conn.unlock().await?;
                result
            }
            DbPool::Sqlite(pool) => {
                let mut conn = pool.acquire().await?;
                conn.lock().await?;
                let result = async {
                    preflight(&mut *conn, &defined).await?;
                    for m in &batch {
                        if m.no_tx {
                            apply_untracked_sqlite(&mut conn, m).await?;
                        } else {
                            conn.apply(m).await?;
                        }
                    }
                    Ok::<(), MigrateError>(())
                }
                .await;
                conn.unlock().await?;
                result
            }
        }
    }

    pub(crate) async fn undo(&self, target: i64) -> Result<(), MigrateError> {
        match &self.pool {
            DbPool::Postgres(pool) => self.migrator.undo(pool, target).await,
            DbPool::Sqlite(pool) => self.migrator.undo(pool, target).await,
        }
    }
}

async fn inspect_pool<DB>(pool: &Pool<DB>) -> Result<VersionState, MigrateError>
where
    DB: Database,
    DB::Connection: Migrate,
{
    let mut conn = pool.acquire().await?;
    conn.ensure_migrations_table().await?;

    let dirty = conn.dirty_version().await?;
    let mut applied: Vec<i64> = conn
        .list_applied_migrations()
        .await?
        .into_iter()
        .map(|m| m.version)
        .collect();
    applied.sort_unstable();

    Ok(VersionState {
        current: applied.last().copied(),
        dirty,
        applied,
    })
}

/// Checks made under the migration lock: no dirty version, and every applied
/// version still matches its script.
async fn preflight<C>(conn: &mut C, defined: &[&Migration]) -> Result<(), MigrateError>
where
    C: Migrate + ?Sized,
{
    if let Some(version) = conn.dirty_version().await? {
        return Err(MigrateError::Dirty(version));
    }

    for applied in conn.list_applied_migrations().await? {
        match defined.iter().find(|m| m.version == applied.version) {
            Some(m) if m.checksum != applied.checksum => {
                return Err(MigrateError::VersionMismatch(applied.version));
            }
            Some(_) => {}
            None => return Err(MigrateError::VersionMissing(applied.version)),
        }
    }
    Ok(())
}

// A non-transactional script cannot be rolled back, so its row is committed
// with `success = FALSE` first and only flipped once every statement has run.
// A failure in between leaves the version dirty.

async fn apply_untracked_pg(conn: &mut PgConnection, m: &Migration) -> Result<(), MigrateError> {
    let start = Instant::now();

    sqlx::query(
        "INSERT INTO _sqlx_migrations ( version, description, success, checksum, execution_time ) \
         VALUES ( $1, $2, FALSE, $3, -1 )",
    )
    .bind(m.version)
    .bind(&*m.description)
    .bind(&*m.checksum)
    .execute(&mut *conn)
    .await?;

    (&mut *conn)
        .execute(&*m.sql)
        .await
        .map_err(|e| MigrateError::ExecuteMigration(e, m.version))?;

    sqlx::query("UPDATE _sqlx_migrations SET success = TRUE, execution_time = $1 WHERE version = $2")
        .bind(elapsed_nanos(start))
        .bind(m.version)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

async fn apply_untracked_sqlite(
    conn: &mut SqliteConnection,
    m: &Migration,
) -> Result<(), MigrateError> {
    let start = Instant::now();

    sqlx::query(
        "INSERT INTO _sqlx_migrations ( version, description, success, checksum, execution_time ) \
         VALUES ( ?1, ?2, FALSE, ?3, -1 )",
    )
    .bind(m.version)
    .bind(&*m.description)
    .bind(&*m.checksum)
    .execute(&mut *conn)
    .await?;

    (&mut *conn)
        .execute(&*m.sql)
        .await
        .map_err(|e| MigrateError::ExecuteMigration(e, m.version))?;

    sqlx::query("UPDATE _sqlx_migrations SET success = TRUE, execution_time = ?1 WHERE version = ?2")
        .bind(elapsed_nanos(start))
        .bind(m.version)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

fn elapsed_nanos(start: Instant) -> i64 {
    i64::try_from(start.elapsed().as_nanos()).unwrap_or(i64::MAX)
}
