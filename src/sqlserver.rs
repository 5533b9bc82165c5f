//! SQL Server engine adapter, backed by the [`tiberius`](https://crates.io/crates/tiberius) crate.
//!
//! tiberius is async-only, so the adapter owns a current-thread tokio runtime
//! and blocks on each call, keeping the [`Connection`] contract synchronous
//! like the other engines. SQL Server supports transactional DDL.

use tiberius::{AuthMethod, Client, Config};
use tokio::net::TcpStream;
use tokio::runtime::Runtime;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::debug;
use url::Url;

use crate::engine::{Connection, DatabaseTopology, Engine, QueryBuilder, SqlRow};
use crate::error::Error;

const ENGINE_NAME: &str = "sqlserver";
const DEFAULT_PORT: u16 = 1433;

fn url_error(url: &str) -> Error {
    Error::EngineUrl {
        engine: ENGINE_NAME,
        url: url.to_string(),
    }
}

fn parse_url(url: &str) -> Result<Url, Error> {
    let parsed = Url::parse(url).map_err(|_| url_error(url))?;
    if parsed.path().trim_start_matches('/').is_empty() || parsed.host_str().is_none() {
        return Err(url_error(url));
    }
    Ok(parsed)
}

pub struct SqlServerEngine;

impl Engine for SqlServerEngine {
    fn name(&self) -> &'static str {
        ENGINE_NAME
    }

    fn matches_url(&self, url: &str) -> bool {
        url.to_ascii_lowercase().starts_with("sqlserver://")
    }

    fn database_name(&self, url: &str) -> Result<String, Error> {
        Ok(parse_url(url)?.path().trim_start_matches('/').to_string())
    }

    fn url_for_database(&self, url: &str, db_name: &str) -> Result<String, Error> {
        let mut parsed = parse_url(url)?;
        parsed.set_path(&format!("/{db_name}"));
        let rebuilt = parsed.to_string();
        if !rebuilt.contains(db_name) {
            return Err(url_error(url));
        }
        Ok(rebuilt)
    }

    fn query_builder(&self) -> Box<dyn QueryBuilder> {
        Box::new(SqlServerQueryBuilder)
    }

    fn connect(
        &self,
        url: &str,
        _topology: &DatabaseTopology,
    ) -> Result<Box<dyn Connection>, Error> {
        let parsed = parse_url(url)?;

        let mut config = Config::new();
        config.host(parsed.host_str().unwrap_or("localhost"));
        config.port(parsed.port().unwrap_or(DEFAULT_PORT));
        config.database(parsed.path().trim_start_matches('/'));
        if !parsed.username().is_empty() {
            config.authentication(AuthMethod::sql_server(
                parsed.username(),
                parsed.password().unwrap_or(""),
            ));
        }
        config.trust_cert();

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let client = runtime.block_on(async {
            let tcp = TcpStream::connect(config.get_addr()).await?;
            tcp.set_nodelay(true)?;
            Client::connect(config, tcp.compat_write())
                .await
                .map_err(Error::from)
        })?;
        debug!("connected to sqlserver database {}", self.database_name(url)?);
        Ok(Box::new(SqlServerConnection { runtime, client }))
    }
}

struct SqlServerQueryBuilder;

impl QueryBuilder for SqlServerQueryBuilder {
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

    fn create_database(&self, db: &str) -> String {
        format!("CREATE DATABASE {db};")
    }

    fn drop_database_if_exists(&self, db: &str) -> String {
        format!("DROP DATABASE IF EXISTS {db};")
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
        "EXEC sp_MSforeachtable \"ALTER TABLE ? WITH CHECK CHECK CONSTRAINT all\";".to_string()
    }

    fn set_foreign_key_check_off(&self) -> String {
        "EXEC sp_MSforeachtable \"ALTER TABLE ? NOCHECK CONSTRAINT all\";".to_string()
    }

    fn drop_table_if_exists_cascade(&self, table: &str) -> String {
        format!("DROP TABLE IF EXISTS {table};")
    }

    fn select_all_tables(&self, db: &str) -> String {
        format!(
            "SELECT table_name AS tablename FROM {db}.information_schema.tables \
             WHERE table_type = 'BASE TABLE';"
        )
    }
}

struct SqlServerConnection {
    runtime: Runtime,
    client: Client<Compat<TcpStream>>,
}

fn render_cell(row: &tiberius::Row, index: usize) -> Option<String> {
    if let Ok(Some(v)) = row.try_get::<&str, _>(index) {
        return Some(v.to_string());
    }
    if let Ok(Some(v)) = row.try_get::<i64, _>(index) {
        return Some(v.to_string());
    }
    if let Ok(Some(v)) = row.try_get::<i32, _>(index) {
        return Some(v.to_string());
    }
    if let Ok(Some(v)) = row.try_get::<bool, _>(index) {
        return Some(v.to_string());
    }
    None
}

impl Connection for SqlServerConnection {
    fn query(&mut self, sql: &str) -> Result<Vec<SqlRow>, Error> {
        debug!("sqlserver query: {sql}");
        let Self { runtime, client } = self;
        let results = runtime.block_on(async {
            let stream = client.simple_query(sql).await?;
            stream.into_results().await.map_err(Error::from)
        })?;
        let mut out = Vec::new();
        for row in results.into_iter().flatten() {
            let names: Vec<String> = row
                .columns()
                .iter()
                .map(|c| c.name().to_string())
                .collect();
            let mut sql_row = SqlRow::new();
            for (i, name) in names.iter().enumerate() {
                sql_row.insert(name.clone(), render_cell(&row, i));
            }
            out.push(sql_row);
        }
        Ok(out)
    }

    fn execute(&mut self, sql: &str) -> Result<(), Error> {
        debug!("sqlserver execute: {sql}");
        let Self { runtime, client } = self;
        runtime.block_on(async {
            // Drain the stream so the connection is ready for the next call.
            let stream = client.simple_query(sql).await?;
            stream.into_results().await?;
            Ok(())
        })
    }

    fn close(self: Box<Self>) -> Result<(), Error> {
        let this = *self;
        this.runtime
            .block_on(this.client.close())
            .map_err(Error::from)
    }
}
