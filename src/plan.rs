//! The migration planner.
//!
//! Reconciles the on-disk migration store against the database's
//! applied-migrations ledger and computes a safe execution plan. Pure
//! functions over two sorted name lists - nothing here touches the database,
//! so every divergence is caught before any mutation.

use crate::error::Error;

/// How the store and the ledger relate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncState {
    /// Ledger and store agree exactly.
    Synced,
    /// The store has migrations the ledger has not seen yet (normal pending
    /// state). Carries the number of unapplied migrations.
    AheadInStore(usize),
    /// The ledger records more migrations than exist on disk. Fatal.
    AheadInDb,
    /// The ledger and the store disagree at some already-applied position.
    /// Fatal.
    Diverged { index: usize },
}

/// Which way the plan moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
}

/// An ordered list of migrations to execute. `migrations` is ascending for
/// up, descending for down. An empty plan means the database is already at
/// the target.
#[derive(Debug, Clone, PartialEq)]
pub struct MigrationPlan {
    pub direction: Direction,
    pub migrations: Vec<String>,
}

impl MigrationPlan {
    pub fn is_empty(&self) -> bool {
        self.migrations.is_empty()
    }
}

/// Classify the store/ledger relation. Names are expected sorted.
pub fn sync_state(store: &[String], applied: &[String]) -> SyncState {
    if applied.len() > store.len() {
        return SyncState::AheadInDb;
    }
    for (i, name) in applied.iter().enumerate() {
        if *name != store[i] {
            return SyncState::Diverged { index: i };
        }
    }
    if applied.len() < store.len() {
        SyncState::AheadInStore(store.len() - applied.len())
    } else {
        SyncState::Synced
    }
}

/// Enforce the prefix-relation invariant, turning the fatal states into
/// errors.
pub fn verify_sync(store: &[String], applied: &[String]) -> Result<(), Error> {
    match sync_state(store, applied) {
        SyncState::AheadInDb => Err(Error::Divergence(format!(
            "database is at a later state than there are migrations: {applied:?}"
        ))),
        SyncState::Diverged { index } => Err(Error::Divergence(format!(
            "database has an unexpected intermediate migration which is missing from \
             the migrations folder. Expected {} but found {} at index {index}",
            applied[index],
            store.get(index).map(String::as_str).unwrap_or("<none>"),
        ))),
        SyncState::Synced | SyncState::AheadInStore(_) => Ok(()),
    }
}

/// Compute the execution plan that brings the database to `target` (or to the
/// latest migration when `target` is absent).
pub fn plan(
    store: &[String],
    applied: &[String],
    target: Option<&str>,
) -> Result<MigrationPlan, Error> {
    verify_sync(store, applied)?;

    let target_index = match target {
        Some(name) => store
            .iter()
            .position(|m| m == name)
            .ok_or_else(|| Error::UnknownTarget(name.to_string()))?,
        // Wrapping on an empty store means "target nothing applied", which
        // the comparisons below treat as an empty plan or a full revert.
        None => store.len().wrapping_sub(1),
    };

    let applied_len = applied.len();
    if target_index.wrapping_add(1) > applied_len {
        Ok(MigrationPlan {
            direction: Direction::Up,
            migrations: store[applied_len..=target_index].to_vec(),
        })
    } else if target_index.wrapping_add(1) < applied_len {
        let mut migrations = store[target_index + 1..applied_len].to_vec();
        migrations.reverse();
        Ok(MigrationPlan {
            direction: Direction::Down,
            migrations,
        })
    } else {
        Ok(MigrationPlan {
            direction: Direction::Up,
            migrations: vec![],
        })
    }
}
