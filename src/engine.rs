//! The engine abstraction layer.
//!
//! Everything dialect-specific lives behind the [`Engine`] contract: URL
//! recognition and manipulation, connection lifecycle, dialect SQL text
//! generation, and file-based-database detection. The planner, runner and
//! synthesizer never branch on engine type - they only talk to these traits.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::Error;

/// A single result row, with every value rendered as text.
///
/// The orchestration engine only ever inspects name-like text columns
/// (migration names, table names), so a stringly representation is enough
/// and keeps the [`Connection`] contract identical across all four engines.
/// Values that cannot be rendered as text come back as `None`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SqlRow {
    values: BTreeMap<String, Option<String>>,
}

impl SqlRow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, column: impl Into<String>, value: Option<String>) {
        self.values.insert(column.into(), value);
    }

    /// Get a column value by name. `None` for absent columns and SQL NULLs alike.
    pub fn get(&self, column: &str) -> Option<&str> {
        self.values.get(column).and_then(|v| v.as_deref())
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(|k| k.as_str())
    }
}

/// An open database connection.
///
/// Transactions are driven through `execute` with the dialect's own
/// BEGIN/COMMIT/ROLLBACK text (see [`QueryBuilder`]), so every statement of a
/// migration runs on the same session.
pub trait Connection {
    fn query(&mut self, sql: &str) -> Result<Vec<SqlRow>, Error>;

    fn execute(&mut self, sql: &str) -> Result<(), Error>;

    /// Close the connection. Consumes the connection so a closed handle
    /// cannot be reused.
    fn close(self: Box<Self>) -> Result<(), Error>;
}

/// Dialect-correct SQL text generators for the fixed set of operations the
/// orchestration engine needs. Builders are pure string builders - no
/// execution, no connection.
pub trait QueryBuilder {
    fn delete_all_from(&self, table: &str) -> String;
    fn delete_from_by(&self, table: &str, column: &str, value: &str) -> String;
    fn select_all_from(&self, table: &str) -> String;
    fn insert_into(&self, table: &str, values: &[(&str, &str)]) -> String;
    fn update_all(&self, table: &str, values: &[(&str, &str)]) -> String;
    fn create_database(&self, db: &str) -> String;
    fn drop_database_if_exists(&self, db: &str) -> String;
    fn transaction_begin(&self) -> String;
    fn transaction_commit(&self) -> String;
    fn transaction_rollback(&self) -> String;
    fn set_foreign_key_check_on(&self) -> String;
    fn set_foreign_key_check_off(&self) -> String;
    fn drop_table_if_exists_cascade(&self, table: &str) -> String;
    /// Select the names of all user tables, aliased to a `tablename` column.
    fn select_all_tables(&self, db: &str) -> String;
}

/// Context needed to resolve file-resident databases. Relative `file:` URLs
/// are resolved against the directory of the schema definition file.
#[derive(Debug, Clone)]
pub struct DatabaseTopology {
    pub schema_path: PathBuf,
}

impl DatabaseTopology {
    pub fn new(schema_path: impl Into<PathBuf>) -> Self {
        Self {
            schema_path: schema_path.into(),
        }
    }

    pub(crate) fn schema_dir(&self) -> &Path {
        self.schema_path.parent().unwrap_or_else(|| Path::new("."))
    }
}

/// The on-disk footprint of a file-resident database.
#[derive(Debug, Clone, PartialEq)]
pub struct DatabaseFiles {
    /// The database file itself.
    pub primary: PathBuf,
    /// Auxiliary files the engine may create alongside it (journals etc).
    pub metafiles: Vec<PathBuf>,
}

/// One supported database backend.
///
/// `database_name` and `url_for_database` are pure string transforms and must
/// fail loudly with [`Error::EngineUrl`] when the URL does not match the
/// engine's expected pattern - never silently produce a malformed URL.
pub trait Engine {
    /// Engine tag, e.g. `"postgresql"`. Matches the provider name used in
    /// the schema definition's datasource block.
    fn name(&self) -> &'static str;

    /// Dialect-specific URL pattern match.
    fn matches_url(&self, url: &str) -> bool;

    /// Extract the database name from its URL.
    fn database_name(&self, url: &str) -> Result<String, Error>;

    /// Build a valid URL pointing at the same server but a different database.
    fn url_for_database(&self, url: &str, db_name: &str) -> Result<String, Error>;

    fn query_builder(&self) -> Box<dyn QueryBuilder>;

    /// Open a connection. Implementations that lack transactional DDL emit a
    /// capability warning here, at connect time.
    fn connect(
        &self,
        url: &str,
        topology: &DatabaseTopology,
    ) -> Result<Box<dyn Connection>, Error>;

    /// Whether the database lives in a local file. File-resident engines use
    /// a copy/delete shadow strategy instead of CREATE/DROP DATABASE.
    fn is_file_based(&self) -> bool {
        false
    }

    /// The files backing a file-resident database. Only meaningful when
    /// [`Engine::is_file_based`] is true.
    fn database_files(
        &self,
        url: &str,
        _topology: &DatabaseTopology,
    ) -> Result<DatabaseFiles, Error> {
        Err(Error::Generic(format!(
            "engine {} is not file based, no database files for {}",
            self.name(),
            url
        )))
    }

    /// Whether schema-altering statements participate in transactions and
    /// roll back on failure.
    fn supports_transactional_ddl(&self) -> bool {
        true
    }
}

/// An explicit, dependency-injected set of engines.
///
/// Constructed once at process start and passed through the call chain;
/// nothing in this crate looks engines up through ambient global state.
pub struct EngineRegistry {
    engines: Vec<Box<dyn Engine>>,
}

impl EngineRegistry {
    /// A registry containing every engine this build was compiled with.
    pub fn with_default_engines() -> Self {
        #[allow(unused_mut)]
        let mut engines: Vec<Box<dyn Engine>> = Vec::new();
        #[cfg(feature = "sqlite")]
        engines.push(Box::new(crate::sqlite::SqliteEngine));
        #[cfg(feature = "postgres")]
        engines.push(Box::new(crate::postgres::PostgresEngine));
        #[cfg(feature = "mysql")]
        engines.push(Box::new(crate::mysql::MysqlEngine));
        #[cfg(feature = "mssql")]
        engines.push(Box::new(crate::sqlserver::SqlServerEngine));
        Self { engines }
    }

    pub fn new(engines: Vec<Box<dyn Engine>>) -> Self {
        Self { engines }
    }

    /// Find the engine whose URL pattern matches the given connection string.
    pub fn engine_for(&self, database_url: &str) -> Result<&dyn Engine, Error> {
        self.engines
            .iter()
            .map(|e| e.as_ref())
            .find(|e| e.matches_url(database_url))
            .ok_or_else(|| Error::UnknownEngine(database_url.to_string()))
    }

    pub fn engine_named(&self, name: &str) -> Option<&dyn Engine> {
        self.engines
            .iter()
            .map(|e| e.as_ref())
            .find(|e| e.name() == name)
    }

    pub fn engine_names(&self) -> Vec<&'static str> {
        self.engines.iter().map(|e| e.name()).collect()
    }
}

impl std::fmt::Debug for EngineRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineRegistry")
            .field("engines", &self.engine_names())
            .finish()
    }
}
