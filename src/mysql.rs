//! MySQL engine adapter, backed by the [`mysql`](https://crates.io/crates/mysql) crate.
//!
//! MySQL DDL statements cause an implicit commit and cannot be rolled back,
//! so this adapter reports no transactional DDL support and warns at connect
//! time: a migration that fails partway through may leave schema changes
//! behind that need manual inspection.

use mysql::consts::CapabilityFlags;
use mysql::prelude::Queryable;
use mysql::{Conn, Opts, OptsBuilder, Value};
use tracing::{debug, warn};

use crate::engine::{Connection, DatabaseTopology, Engine, QueryBuilder, SqlRow};
use crate::error::Error;
use url::Url;

const ENGINE_NAME: &str = "mysql";

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

pub struct MysqlEngine;

impl Engine for MysqlEngine {
    fn name(&self) -> &'static str {
        ENGINE_NAME
    }

    fn matches_url(&self, url: &str) -> bool {
        url.to_ascii_lowercase().starts_with("mysql://")
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
        Box::new(MysqlQueryBuilder)
    }

    fn connect(
        &self,
        url: &str,
        _topology: &DatabaseTopology,
    ) -> Result<Box<dyn Connection>, Error> {
        let opts = Opts::from_url(url).map_err(|e| Error::Mysql(e.to_string()))?;
        // Auto-joined operation blocks arrive as one multi-statement string.
        let opts = OptsBuilder::from_opts(opts)
            .additional_capabilities(CapabilityFlags::CLIENT_MULTI_STATEMENTS);
        let conn = Conn::new(opts)?;
        warn!(
            "mysql DDL statements commit implicitly and cannot be rolled back; a failed \
             migration may require manual inspection"
        );
        debug!("connected to mysql database {}", self.database_name(url)?);
        Ok(Box::new(MysqlConnection { conn }))
    }

    fn supports_transactional_ddl(&self) -> bool {
        false
    }
}

struct MysqlQueryBuilder;

impl QueryBuilder for MysqlQueryBuilder {
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
        "SET FOREIGN_KEY_CHECKS = 1;".to_string()
    }

    fn set_foreign_key_check_off(&self) -> String {
        "SET FOREIGN_KEY_CHECKS = 0;".to_string()
    }

    fn drop_table_if_exists_cascade(&self, table: &str) -> String {
        format!("DROP TABLE IF EXISTS {table};")
    }

    fn select_all_tables(&self, db: &str) -> String {
        format!(
            "SELECT table_name AS tablename FROM information_schema.tables \
             WHERE table_schema = '{db}';"
        )
    }
}

struct MysqlConnection {
    conn: Conn,
}

fn render_value(value: Value) -> Option<String> {
    match value {
        Value::NULL => None,
        Value::Bytes(bytes) => Some(String::from_utf8_lossy(&bytes).into_owned()),
        Value::Int(v) => Some(v.to_string()),
        Value::UInt(v) => Some(v.to_string()),
        Value::Float(v) => Some(v.to_string()),
        Value::Double(v) => Some(v.to_string()),
        _ => None,
    }
}

impl Connection for MysqlConnection {
    fn query(&mut self, sql: &str) -> Result<Vec<SqlRow>, Error> {
        debug!("mysql query: {sql}");
        let rows: Vec<mysql::Row> = self.conn.query(sql)?;
        let mut out = Vec::new();
        for row in rows {
            let names: Vec<String> = row
                .columns_ref()
                .iter()
                .map(|c| c.name_str().into_owned())
                .collect();
            let mut sql_row = SqlRow::new();
            for (name, value) in names.into_iter().zip(row.unwrap()) {
                sql_row.insert(name, render_value(value));
            }
            out.push(sql_row);
        }
        Ok(out)
    }

    fn execute(&mut self, sql: &str) -> Result<(), Error> {
        debug!("mysql execute: {sql}");
        self.conn.query_drop(sql)?;
        Ok(())
    }

    fn close(self: Box<Self>) -> Result<(), Error> {
        // Conn tears the connection down on drop.
        drop(self);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_mysql_urls_only() {
        let engine = MysqlEngine;
        assert!(engine.matches_url("mysql://root:pw@localhost:3306/app"));
        assert!(!engine.matches_url("postgres://localhost/app"));
    }

    #[test]
    fn database_name_is_the_url_path() {
        let engine = MysqlEngine;
        assert_eq!(
            engine.database_name("mysql://root:pw@localhost:3306/app").unwrap(),
            "app"
        );
    }

    #[test]
    fn url_for_database_swaps_only_the_path() {
        let engine = MysqlEngine;
        assert_eq!(
            engine
                .url_for_database("mysql://root:pw@localhost:3306/app", "app_shadow_i_2")
                .unwrap(),
            "mysql://root:pw@localhost:3306/app_shadow_i_2"
        );
    }

    #[test]
    fn urls_without_a_database_fail_loudly() {
        let err = MysqlEngine.database_name("mysql://localhost:3306").unwrap_err();
        assert!(matches!(err, Error::EngineUrl { engine: "mysql", .. }), "{err}");
    }

    #[test]
    fn foreign_key_toggle_is_not_swapped() {
        let builder = MysqlEngine.query_builder();
        assert_eq!(builder.set_foreign_key_check_on(), "SET FOREIGN_KEY_CHECKS = 1;");
        assert_eq!(builder.set_foreign_key_check_off(), "SET FOREIGN_KEY_CHECKS = 0;");
    }
}
