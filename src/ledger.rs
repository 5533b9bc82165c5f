//! The applied-migrations ledger.
//!
//! A reserved table inside the target database, owned by the external schema
//! tool, with one row per applied migration. Inserts go through the tool's
//! own resolve subcommand so the tool's bookkeeping and ours never diverge;
//! deletes go through the dialect query builder.

use tracing::debug;

use crate::difftool::SchemaTool;
use crate::engine::{Connection, QueryBuilder};
use crate::error::Error;

/// The schema tool's reserved ledger table.
pub const MIGRATIONS_TABLE: &str = "_prisma_migrations";
/// The ledger column carrying the migration folder name.
pub const MIGRATION_NAME_COLUMN: &str = "migration_name";

/// Reads and writes the ledger through a live connection to the target
/// database.
pub struct AppliedStateTracker<'a> {
    conn: &'a mut dyn Connection,
    builder: &'a dyn QueryBuilder,
    tool: &'a dyn SchemaTool,
    db_name: &'a str,
}

impl<'a> AppliedStateTracker<'a> {
    pub fn new(
        conn: &'a mut dyn Connection,
        builder: &'a dyn QueryBuilder,
        tool: &'a dyn SchemaTool,
        db_name: &'a str,
    ) -> Self {
        Self { conn, builder, tool, db_name }
    }

    /// Applied migration names, sorted (names are timestamp-prefixed, so this
    /// equals application order). An empty list - never an error - when the
    /// ledger table does not exist yet. Any other failure is propagated:
    /// treating a locked or unreachable ledger as empty would make the
    /// planner replay the whole store.
    pub fn list(&mut self) -> Result<Vec<String>, Error> {
        let tables = self.conn.query(&self.builder.select_all_tables(self.db_name))?;
        let present = tables
            .iter()
            .any(|row| row.get("tablename") == Some(MIGRATIONS_TABLE));
        if !present {
            // The table only comes into existence when the first migration
            // is applied.
            debug!("ledger table does not exist yet, treating as empty");
            return Ok(vec![]);
        }
        let rows = self.conn.query(&self.builder.select_all_from(MIGRATIONS_TABLE))?;
        let mut names: Vec<String> = rows
            .iter()
            .filter_map(|row| row.get(MIGRATION_NAME_COLUMN))
            .map(str::to_string)
            .collect();
        names.sort();
        Ok(names)
    }

    /// Record a migration as applied, via the external tool.
    pub fn mark_applied(&mut self, name: &str) -> Result<(), Error> {
        self.tool.resolve_applied(name)
    }

    /// Remove a migration's ledger row after reverting it.
    pub fn mark_reverted(&mut self, name: &str) -> Result<(), Error> {
        self.conn.execute(&self.builder.delete_from_by(
            MIGRATIONS_TABLE,
            MIGRATION_NAME_COLUMN,
            name,
        ))
    }

    /// Best-effort wipe of the ledger, used only by the fresh-initialization
    /// flow. A missing table is not an error.
    pub fn clear(&mut self) {
        if let Err(e) = self.conn.execute(&self.builder.delete_all_from(MIGRATIONS_TABLE)) {
            debug!("clearing ledger table failed ({e}), ignoring");
        }
    }
}
