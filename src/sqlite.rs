//! SQLite engine adapter, backed by the [`rusqlite`](https://crates.io/crates/rusqlite) crate.
//!
//! SQLite databases are file-resident: `file:` URLs are resolved relative to
//! the schema definition's directory, and the shadow environment copies the
//! database file instead of issuing CREATE/DROP DATABASE (which the dialect
//! does not have). The adapter conservatively reports no transactional DDL
//! support, so failed migrations are warned about at connect time.

use std::path::PathBuf;

use rusqlite::types::ValueRef;
use tracing::{debug, warn};

use crate::engine::{
    Connection, DatabaseFiles, DatabaseTopology, Engine, QueryBuilder, SqlRow,
};
use crate::error::Error;

const ENGINE_NAME: &str = "sqlite";

fn url_error(url: &str) -> Error {
    Error::EngineUrl {
        engine: ENGINE_NAME,
        url: url.to_string(),
    }
}

/// The path portion of a `file:` URL, e.g. `./dev.db`.
fn file_path(url: &str) -> Option<&str> {
    let lower = url.get(..5)?;
    if lower.eq_ignore_ascii_case("file:") {
        Some(&url[5..])
    } else {
        None
    }
}

/// Split the path portion into (directory prefix, file name). The URL must
/// contain a directory separator, mirroring the expected `file:./name.db`
/// shape.
fn split_file_name(url: &str) -> Result<(&str, &str), Error> {
    let path = file_path(url).ok_or_else(|| url_error(url))?;
    let sep = path.rfind('/').ok_or_else(|| url_error(url))?;
    let (dir, name) = path.split_at(sep + 1);
    if name.is_empty() {
        return Err(url_error(url));
    }
    Ok((dir, name))
}

pub struct SqliteEngine;

impl Engine for SqliteEngine {
    fn name(&self) -> &'static str {
        ENGINE_NAME
    }

    fn matches_url(&self, url: &str) -> bool {
        file_path(url).is_some()
    }

    fn database_name(&self, url: &str) -> Result<String, Error> {
        let (_, file_name) = split_file_name(url)?;
        let mut parts: Vec<&str> = file_name.split('.').collect();
        if parts.len() > 1 {
            parts.pop();
        }
        Ok(parts.join("."))
    }

    fn url_for_database(&self, url: &str, db_name: &str) -> Result<String, Error> {
        let (dir, file_name) = split_file_name(url)?;
        let suffix = match file_name.rfind('.') {
            Some(i) => &file_name[i..],
            None => "",
        };
        Ok(format!("file:{dir}{db_name}{suffix}"))
    }

    fn query_builder(&self) -> Box<dyn QueryBuilder> {
        Box::new(SqliteQueryBuilder)
    }

    fn connect(
        &self,
        url: &str,
        topology: &DatabaseTopology,
    ) -> Result<Box<dyn Connection>, Error> {
        let files = self.database_files(url, topology)?;
        if !files.primary.exists() {
            return Err(Error::Generic(format!(
                "EngineError:sqlite - database file not found: {}",
                files.primary.display()
            )));
        }
        warn!(
            "sqlite cannot roll back schema-altering statements; a failed migration \
             may require manual inspection"
        );
        let conn = rusqlite::Connection::open(&files.primary)?;
        debug!("connected to sqlite database {}", files.primary.display());
        Ok(Box::new(SqliteConnection { conn }))
    }

    fn is_file_based(&self) -> bool {
        true
    }

    fn database_files(
        &self,
        url: &str,
        topology: &DatabaseTopology,
    ) -> Result<DatabaseFiles, Error> {
        let path = file_path(url).ok_or_else(|| url_error(url))?;
        let primary: PathBuf = topology.schema_dir().join(path);
        let mut journal = primary.clone().into_os_string();
        journal.push("-journal");
        Ok(DatabaseFiles {
            metafiles: vec![PathBuf::from(journal)],
            primary,
        })
    }

    fn supports_transactional_ddl(&self) -> bool {
        false
    }
}

struct SqliteQueryBuilder;

impl QueryBuilder for SqliteQueryBuilder {
    fn delete_all_from(&self, table: &str) -> String {
        format!("DELETE FROM {table};")
    }

    fn delete_from_by(&self, table: &str, column: &str, value: &str) -> String {
        format!("DELETE FROM {table} WHERE {column}='{value}';")
    }

    fn select_all_from(&self, table: &str) -> String {
        format!("SELECT * FROM {table};")
    }

    fn insert_into(&self, table: &str, values: &[(&str, &str)]) -> String {
        let columns: Vec<&str> = values.iter().map(|(c, _)| *c).collect();
        let vals: Vec<&str> = values.iter().map(|(_, v)| *v).collect();
        format!(
            "INSERT INTO {table} ({}) VALUES ('{}');",
            columns.join(","),
            vals.join("','")
        )
    }

    fn update_all(&self, table: &str, values: &[(&str, &str)]) -> String {
        let assignments: Vec<String> = values
            .iter()
            .map(|(c, v)| format!("{c}='{v}'"))
            .collect();
        format!("UPDATE {table} SET {};", assignments.join(","))
    }

    // SQLite has no CREATE/DROP DATABASE; the shadow environment uses the
    // file copy/delete strategy instead.
    fn create_database(&self, _db: &str) -> String {
        String::new()
    }

    fn drop_database_if_exists(&self, _db: &str) -> String {
        String::new()
    }

    fn transaction_begin(&self) -> String {
        "BEGIN TRANSACTION;".to_string()
    }

    fn transaction_commit(&self) -> String {
        "COMMIT TRANSACTION;".to_string()
    }

    fn transaction_rollback(&self) -> String {
        "ROLLBACK TRANSACTION;".to_string()
    }

    fn set_foreign_key_check_on(&self) -> String {
        "PRAGMA ignore_check_constraints = false;".to_string()
    }

    fn set_foreign_key_check_off(&self) -> String {
        "PRAGMA ignore_check_constraints = true;".to_string()
    }

    fn drop_table_if_exists_cascade(&self, table: &str) -> String {
        format!("DROP TABLE IF EXISTS {table};")
    }

    fn select_all_tables(&self, _db: &str) -> String {
        "SELECT name AS tablename FROM sqlite_master WHERE type='table' \
         AND name != 'sqlite_sequence';"
            .to_string()
    }
}

struct SqliteConnection {
    conn: rusqlite::Connection,
}

impl Connection for SqliteConnection {
    fn query(&mut self, sql: &str) -> Result<Vec<SqlRow>, Error> {
        debug!("sqlite query: {sql}");
        let mut stmt = self.conn.prepare(sql)?;
        let names: Vec<String> = stmt
            .column_names()
            .into_iter()
            .map(str::to_string)
            .collect();
        let mut rows = stmt.query([])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let mut sql_row = SqlRow::new();
            for (i, name) in names.iter().enumerate() {
                let value = match row.get_ref(i)? {
                    ValueRef::Null => None,
                    ValueRef::Integer(v) => Some(v.to_string()),
                    ValueRef::Real(v) => Some(v.to_string()),
                    ValueRef::Text(t) => Some(String::from_utf8_lossy(t).into_owned()),
                    ValueRef::Blob(_) => None,
                };
                sql_row.insert(name.clone(), value);
            }
            out.push(sql_row);
        }
        Ok(out)
    }

    fn execute(&mut self, sql: &str) -> Result<(), Error> {
        debug!("sqlite execute: {sql}");
        self.conn.execute_batch(sql)?;
        Ok(())
    }

    fn close(self: Box<Self>) -> Result<(), Error> {
        self.conn.close().map_err(|(_, e)| Error::from(e))
    }
}
