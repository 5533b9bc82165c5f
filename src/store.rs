//! The on-disk migration store.
//!
//! One folder per migration under the migrations root, named
//! `{timestamp}_{label}` by the external schema tool so lexicographic order
//! equals chronological order. Each folder holds the raw forward SQL
//! (`migration.sql`), a verbatim snapshot of the schema definition at
//! creation time, and the serialized operation-pair script.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::Error;
use crate::script::MigrationScript;

/// Raw forward statements produced by the diff generator.
pub const FORWARD_SQL_FILE: &str = "migration.sql";
/// Verbatim copy of the schema definition at the time the migration was made.
pub const SCHEMA_SNAPSHOT_FILE: &str = "migration.schema.prisma";
/// Serialized `[up, down]` operation-pair descriptor.
pub const SCRIPT_FILE: &str = "migration.json";

#[derive(Debug, Clone)]
pub struct MigrationStore {
    root: PathBuf,
}

impl MigrationStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// All migration folder names, sorted. Creates the root directory on
    /// first use.
    pub fn migration_names(&self) -> Result<Vec<String>, Error> {
        if !self.root.exists() {
            fs::create_dir_all(&self.root)?;
            return Ok(vec![]);
        }
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }

    /// The most recent migration, if any.
    pub fn latest(&self) -> Result<Option<String>, Error> {
        Ok(self.migration_names()?.pop())
    }

    pub fn migration_dir(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    pub fn forward_sql(&self, name: &str) -> Result<String, Error> {
        Ok(fs::read_to_string(
            self.migration_dir(name).join(FORWARD_SQL_FILE),
        )?)
    }

    pub fn snapshot_path(&self, name: &str) -> PathBuf {
        self.migration_dir(name).join(SCHEMA_SNAPSHOT_FILE)
    }

    /// Persist the active schema definition into the migration's folder.
    pub fn store_snapshot(&self, name: &str, schema_path: &Path) -> Result<(), Error> {
        fs::copy(schema_path, self.snapshot_path(name))?;
        Ok(())
    }

    /// Copy a migration's schema snapshot over the active schema definition.
    pub fn restore_snapshot(&self, name: &str, schema_path: &Path) -> Result<(), Error> {
        fs::copy(self.snapshot_path(name), schema_path)?;
        Ok(())
    }

    pub fn write_script(&self, script: &MigrationScript) -> Result<(), Error> {
        let dir = self.migration_dir(&script.name);
        if !dir.exists() {
            fs::create_dir_all(&dir)?;
        }
        let json = serde_json::to_string_pretty(script)?;
        fs::write(dir.join(SCRIPT_FILE), json)?;
        Ok(())
    }

    pub fn read_script(&self, name: &str) -> Result<MigrationScript, Error> {
        let raw = fs::read_to_string(self.migration_dir(name).join(SCRIPT_FILE))?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Delete a migration folder. Used for abort cleanup and for the
    /// throwaway revert folder during synthesis.
    pub fn remove(&self, name: &str) -> Result<(), Error> {
        fs::remove_dir_all(self.migration_dir(name))?;
        Ok(())
    }
}

/// Split a multi-statement SQL text into separate statements: `-- ` comment
/// lines are stripped, statements are split on `;`, trimmed, and each
/// re-terminated with `;`.
pub fn split_statements(sql: &str) -> Vec<String> {
    sql.lines()
        .filter(|line| !line.starts_with("-- "))
        .collect::<Vec<_>>()
        .join("\n")
        .split(';')
        .map(|stmt| stmt.trim())
        .filter(|stmt| !stmt.is_empty())
        .map(|stmt| format!("{stmt};"))
        .collect()
}
