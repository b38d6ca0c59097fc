//! Applies pending migrations from a [`MigrationHandle`].
//!
//! Migrations run strictly in ascending version order. Each script is its own
//! transaction unless it starts with `-- no-transaction`; such scripts are
//! recorded as dirty before they run and marked clean only once they finish.
//! A dirty version left by an aborted run is reported and never retried here.

use std::time::Instant;

use tracing::{error, info, warn};

use crate::error::MigrationError;
use crate::handle::{MigrationHandle, VersionState};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationOutcome {
    /// Schema was already at the latest version.
    NoChange { version: Option<i64> },
    Applied {
        from: Option<i64>,
        to: i64,
        count: usize,
    },
}

impl MigrationOutcome {
    pub fn is_no_change(&self) -> bool {
        matches!(self, MigrationOutcome::NoChange { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingMigration {
    pub version: i64,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaStatus {
    pub current: Option<i64>,
    pub dirty: Option<i64>,
    pub applied: usize,
    pub pending: Vec<PendingMigration>,
}

fn pending(handle: &MigrationHandle, state: &VersionState) -> Vec<PendingMigration> {
    handle
        .defined()
        .filter(|m| state.applied.binary_search(&m.version).is_err())
        .map(|m| PendingMigration {
            version: m.version,
            description: m.description.to_string(),
        })
        .collect()
}

/// Apply every pending migration. Calling again on an up-to-date schema is a no-op.
pub async fn apply(handle: &MigrationHandle) -> Result<MigrationOutcome, MigrationError> {
    let start = Instant::now();
    let before = handle.inspect().await?;

    if let Some(version) = before.dirty {
        error!(version, "migrate=refused reason=dirty");
        return Err(MigrationError::Dirty { version });
    }

    let pending = pending(handle, &before);

    if let (Some(current), Some(stray)) = (
        before.current,
        pending.iter().find(|m| Some(m.version) < before.current),
    ) {
        return Err(MigrationError::OutOfOrder {
            version: stray.version,
            current,
        });
    }

    if pending.is_empty() {
        info!(version = ?before.current, "migrate=skipped up_to_date=true");
        return Ok(MigrationOutcome::NoChange {
            version: before.current,
        });
    }

    info!(
        from = ?before.current,
        pending = pending.len(),
        source = %handle.source(),
        backend = handle.pool().backend_name(),
        "migrate=start"
    );

    let versions: Vec<i64> = pending.iter().map(|m| m.version).collect();
    if let Err(e) = handle.run(&versions).await {
        let err = MigrationError::from_apply(e);
        error!(error = %err, elapsed_ms = start.elapsed().as_millis(), "migrate=failed");
        return Err(err);
    }

    let after = handle.inspect().await?;
    let to = after.current.unwrap_or_default();
    let count = after.applied.len().saturating_sub(before.applied.len());

    info!(
        from = ?before.current,
        to,
        count,
        elapsed_ms = start.elapsed().as_millis(),
        "migrate=done"
    );

    Ok(MigrationOutcome::Applied {
        from: before.current,
        to,
        count,
    })
}

pub async fn status(handle: &MigrationHandle) -> Result<SchemaStatus, MigrationError> {
    let state = handle.inspect().await?;
    let pending = pending(handle, &state);
    Ok(SchemaStatus {
        current: state.current,
        dirty: state.dirty,
        applied: state.applied.len(),
        pending,
    })
}

/// Revert the latest applied migration. Returns the version that was reverted.
pub async fn down(handle: &MigrationHandle) -> Result<i64, MigrationError> {
    let state = handle.inspect().await?;

    if let Some(version) = state.dirty {
        return Err(MigrationError::Dirty { version });
    }

    let Some(latest) = state.current else {
        return Err(MigrationError::NothingToUndo);
    };

    let target = state
        .applied
        .iter()
        .rev()
        .nth(1)
        .copied()
        .unwrap_or(0);

    handle.undo(target).await.map_err(MigrationError::from_undo)?;

    let after = handle.inspect().await?;
    if after.current == Some(latest) {
        warn!(version = latest, "migrate=down reverted=none");
        return Err(MigrationError::Irreversible { version: latest });
    }

    info!(reverted = latest, now = ?after.current, "migrate=down");
    Ok(latest)
}

pub async fn count_applied_migrations(handle: &MigrationHandle) -> Result<usize, MigrationError> {
    Ok(handle.inspect().await?.applied.len())
}

/// Latest applied version, or `None` on an empty schema.
pub async fn latest_version(handle: &MigrationHandle) -> Result<Option<i64>, MigrationError> {
    Ok(handle.inspect().await?.current)
}
