//! Versioned schema migrations loaded from a directory of SQL scripts.
//!
//! Schema version state lives in the target database (`_sqlx_migrations`);
//! its `success` column doubles as the dirty flag.

mod error;
mod handle;
pub mod runner;
mod source;

pub use error::MigrationError;
pub use handle::{DbPool, MigrationHandle, VersionState};
pub use runner::{apply, MigrationOutcome, PendingMigration, SchemaStatus};
pub use source::{MigrationSource, DEFAULT_MIGRATIONS_DIR, LOCAL_MIGRATIONS_DIR};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationCommand {
    Up,
    Down,
    Status,
}

/// Run one command against the handle, logging schema state around it.
/// Used by the CLI; application startup calls [`runner::apply`] directly.
pub async fn migrate(
    handle: &MigrationHandle,
    command: MigrationCommand,
) -> Result<(), MigrationError> {
    let before = handle.inspect().await?;
    let defined = handle.defined().count();

    tracing::info!("▶ cmd={command:?}  backend={}", handle.pool().backend_name());
    tracing::info!("▶ source: {}", handle.source());
    tracing::info!(
        "▶ BEFORE: source has {} migration(s) defined, {} applied",
        defined,
        before.applied.len()
    );

    let result = match command {
        MigrationCommand::Up => runner::apply(handle).await.map(|_| ()),
        MigrationCommand::Down => runner::down(handle).await.map(|_| ()),
        MigrationCommand::Status => {
            let status = runner::status(handle).await?;
            tracing::info!(
                "▶ version={} dirty={} pending={}",
                status
                    .current
                    .map(|v| v.to_string())
                    .unwrap_or_else(|| "none".to_string()),
                status.dirty.is_some(),
                status.pending.len()
            );
            for m in &status.pending {
                tracing::info!("   pending {} {}", m.version, m.description);
            }
            Ok(())
        }
    };

    match result {
        Ok(()) => {
            if !matches!(command, MigrationCommand::Status) {
                let after = handle.inspect().await?;
                tracing::info!(
                    "▶ AFTER: source has {} migration(s) defined, {} applied",
                    defined,
                    after.applied.len()
                );
            }
            tracing::info!("✅ {command:?} OK");
            Ok(())
        }
        Err(e) => {
            tracing::error!("❌ {command:?} failed: {e}");
            Err(e)
        }
    }
}
