//! PostgreSQL engine adapter, backed by the [`postgres`](https://crates.io/crates/postgres) crate.
//!
//! PostgreSQL fully supports transactional DDL: a failed migration rolls back
//! completely, including schema changes. Results are fetched through the
//! simple-query protocol, which returns every column as text - exactly the
//! representation [`SqlRow`] wants.

use postgres::{Client, NoTls, SimpleQueryMessage};
use tracing::debug;
use url::Url;

use crate::engine::{Connection, DatabaseTopology, Engine, QueryBuilder, SqlRow};
use crate::error::Error;

const ENGINE_NAME: &str = "postgresql";

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

pub struct PostgresEngine;

impl Engine for PostgresEngine {
    fn name(&self) -> &'static str {
        ENGINE_NAME
    }

    fn matches_url(&self, url: &str) -> bool {
        let lower = url.to_ascii_lowercase();
        lower.starts_with("postgres://") || lower.starts_with("postgresql://")
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
        Box::new(PostgresQueryBuilder)
    }

    fn connect(
        &self,
        url: &str,
        _topology: &DatabaseTopology,
    ) -> Result<Box<dyn Connection>, Error> {
        let client = Client::connect(url, NoTls)?;
        debug!("connected to postgres database {}", self.database_name(url)?);
        Ok(Box::new(PostgresConnection { client }))
    }
}

struct PostgresQueryBuilder;

impl QueryBuilder for PostgresQueryBuilder {
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
        "BEGIN;".to_string()
    }

    fn transaction_commit(&self) -> String {
        "COMMIT;".to_string()
    }

    fn transaction_rollback(&self) -> String {
        "ROLLBACK;".to_string()
    }

    fn set_foreign_key_check_on(&self) -> String {
        "SET session_replication_role = DEFAULT;".to_string()
    }

    fn set_foreign_key_check_off(&self) -> String {
        "SET session_replication_role = replica;".to_string()
    }

    fn drop_table_if_exists_cascade(&self, table: &str) -> String {
        format!("DROP TABLE IF EXISTS {table} CASCADE;")
    }

    fn select_all_tables(&self, _db: &str) -> String {
        "SELECT tablename FROM pg_tables WHERE schemaname = 'public';".to_string()
    }
}

struct PostgresConnection {
    client: Client,
}

impl Connection for PostgresConnection {
    fn query(&mut self, sql: &str) -> Result<Vec<SqlRow>, Error> {
        debug!("postgres query: {sql}");
        let messages = self.client.simple_query(sql)?;
        let mut out = Vec::new();
        for message in messages {
            if let SimpleQueryMessage::Row(row) = message {
                let mut sql_row = SqlRow::new();
                for (i, column) in row.columns().iter().enumerate() {
                    sql_row.insert(column.name(), row.get(i).map(str::to_string));
                }
                out.push(sql_row);
            }
        }
        Ok(out)
    }

    fn execute(&mut self, sql: &str) -> Result<(), Error> {
        debug!("postgres execute: {sql}");
        self.client.batch_execute(sql)?;
        Ok(())
    }

    fn close(self: Box<Self>) -> Result<(), Error> {
        self.client.close()?;
        Ok(())
    }
}
