/// Error type for the migralens crate.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Missing or invalid configuration, or an unreachable database.
    /// Raised before any migration logic runs.
    #[error("LensConfigError: {0}")]
    Config(String),
    /// A connection string failed an engine's expected pattern.
    #[error("EngineError:{engine} - database url did not match expected pattern: {url}")]
    EngineUrl { engine: &'static str, url: String },
    /// No registered engine recognizes the connection string.
    #[error("unknown engine for url: {0}")]
    UnknownEngine(String),
    /// The applied-migrations ledger and the on-disk migration store no
    /// longer form a prefix relation. The system refuses to guess intent.
    #[error("unable to migrate database - {0}")]
    Divergence(String),
    /// A migration name was requested that does not exist in the store.
    #[error("unable to migrate database to migration named {0} - no such migration exists")]
    UnknownTarget(String),
    /// The external schema tool exited unsuccessfully.
    #[error("schema tool failed: {0}")]
    SchemaTool(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[cfg(feature = "sqlite")]
    #[error("{0}")]
    Sqlite(#[from] rusqlite::Error),
    #[cfg(feature = "postgres")]
    #[error("{0}")]
    Postgres(#[from] postgres::Error),
    #[cfg(feature = "mysql")]
    #[error("{0}")]
    Mysql(String),
    #[cfg(feature = "mssql")]
    #[error("{0}")]
    Mssql(String),
    #[error("{0}")]
    Generic(String),
}

// The mysql and tiberius error types are carried as strings to keep this
// enum cheap to move around.
#[cfg(feature = "mysql")]
impl From<mysql::Error> for Error {
    fn from(value: mysql::Error) -> Self {
        Self::Mysql(value.to_string())
    }
}

#[cfg(feature = "mssql")]
impl From<tiberius::error::Error> for Error {
    fn from(value: tiberius::error::Error) -> Self {
        Self::Mssql(value.to_string())
    }
}

impl From<String> for Error {
    fn from(value: String) -> Self {
        Self::Generic(value)
    }
}
