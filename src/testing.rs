//! Test doubles for the external schema tool.
//!
//! The real tool is a subprocess, which tests cannot depend on. These
//! substitutes implement [`SchemaTool`] in-process: one that does nothing,
//! and one that plays back scripted diff output into the migration store.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fs;
use std::path::PathBuf;

use crate::difftool::SchemaTool;
use crate::error::Error;
use crate::store::FORWARD_SQL_FILE;

/// A [`SchemaTool`] that accepts every call and does nothing.
#[derive(Debug, Default, Clone)]
pub struct NullSchemaTool;

impl SchemaTool for NullSchemaTool {
    fn create_migration(&self, _name: &str, _env: &[(String, String)]) -> Result<(), Error> {
        Ok(())
    }

    fn resolve_applied(&self, _name: &str) -> Result<(), Error> {
        Ok(())
    }

    fn pull_schema(&self) -> Result<(), Error> {
        Ok(())
    }

    fn reset_database(&self) -> Result<(), Error> {
        Ok(())
    }

    fn push_schema(&self) -> Result<(), Error> {
        Ok(())
    }

    fn print_status(&self) -> Result<(), Error> {
        Ok(())
    }

    fn generate_client(&self) -> Result<(), Error> {
        Ok(())
    }
}

/// A [`SchemaTool`] that plays back queued diff output.
///
/// Each `create_migration` call pops the next queued SQL text and writes it
/// into a fresh migration folder under the store root, named with a
/// monotonically increasing prefix so lexicographic order matches creation
/// order. An empty queue creates nothing, which the synthesizer observes as
/// an aborted run. Every call is recorded in [`calls`](Self::calls).
pub struct ScriptedSchemaTool {
    store_root: PathBuf,
    diffs: RefCell<VecDeque<String>>,
    sequence: Cell<u32>,
    /// Every trait method invocation, in order, e.g. `"resolve_applied 0001_init"`.
    pub calls: RefCell<Vec<String>>,
    /// When set, `resolve_applied` inserts ledger rows into this database
    /// file, mimicking what the real tool's resolve subcommand does.
    #[cfg(feature = "sqlite")]
    ledger_db: Option<PathBuf>,
}

impl ScriptedSchemaTool {
    pub fn new(store_root: impl Into<PathBuf>) -> Self {
        Self {
            store_root: store_root.into(),
            diffs: RefCell::new(VecDeque::new()),
            sequence: Cell::new(0),
            calls: RefCell::new(Vec::new()),
            #[cfg(feature = "sqlite")]
            ledger_db: None,
        }
    }

    /// Maintain the ledger table in the given SQLite database file on
    /// `resolve_applied`, like the real tool would.
    #[cfg(feature = "sqlite")]
    pub fn with_sqlite_ledger(mut self, db_file: impl Into<PathBuf>) -> Self {
        self.ledger_db = Some(db_file.into());
        self
    }

    /// Queue the forward SQL the next `create_migration` call will produce.
    pub fn queue_diff(&self, sql: impl Into<String>) {
        self.diffs.borrow_mut().push_back(sql.into());
    }

    fn record(&self, call: String) {
        self.calls.borrow_mut().push(call);
    }
}

impl SchemaTool for ScriptedSchemaTool {
    fn create_migration(&self, name: &str, _env: &[(String, String)]) -> Result<(), Error> {
        self.record(format!("create_migration {name}"));
        let Some(sql) = self.diffs.borrow_mut().pop_front() else {
            return Ok(());
        };
        let sequence = self.sequence.get() + 1;
        self.sequence.set(sequence);
        let dir = self.store_root.join(format!("{sequence:04}_{name}"));
        fs::create_dir_all(&dir)?;
        fs::write(dir.join(FORWARD_SQL_FILE), sql)?;
        Ok(())
    }

    fn resolve_applied(&self, name: &str) -> Result<(), Error> {
        self.record(format!("resolve_applied {name}"));
        #[cfg(feature = "sqlite")]
        if let Some(db_file) = &self.ledger_db {
            use crate::ledger::{MIGRATIONS_TABLE, MIGRATION_NAME_COLUMN};
            let conn = rusqlite::Connection::open(db_file)?;
            conn.execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS {MIGRATIONS_TABLE} \
                 ({MIGRATION_NAME_COLUMN} TEXT PRIMARY KEY);\n\
                 INSERT INTO {MIGRATIONS_TABLE} ({MIGRATION_NAME_COLUMN}) VALUES ('{name}');"
            ))?;
        }
        Ok(())
    }

    fn pull_schema(&self) -> Result<(), Error> {
        self.record("pull_schema".to_string());
        Ok(())
    }

    fn reset_database(&self) -> Result<(), Error> {
        self.record("reset_database".to_string());
        Ok(())
    }

    fn push_schema(&self) -> Result<(), Error> {
        self.record("push_schema".to_string());
        Ok(())
    }

    fn print_status(&self) -> Result<(), Error> {
        self.record("print_status".to_string());
        Ok(())
    }

    fn generate_client(&self) -> Result<(), Error> {
        self.record("generate".to_string());
        Ok(())
    }
}
