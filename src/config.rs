//! Configuration and schema-definition introspection.
//!
//! Config *discovery* (figuring out which file to load) belongs to the CLI;
//! this module owns the shape of the configuration and its validation, which
//! must all pass before any migration logic touches the database.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::engine::{DatabaseTopology, EngineRegistry};
use crate::error::Error;
use crate::pool::ConnectionRegistry;

/// Configuration for one migralens project.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Directory holding one folder per migration.
    pub migrations_dir: PathBuf,
    /// Path to the active schema definition file.
    pub schema_path: PathBuf,
    /// Connection string of the target database.
    pub database_url: String,
    /// Optional fixed scratch database to reuse for diff generation instead
    /// of creating and dropping one per synthesis.
    #[serde(default)]
    pub shadow_database_name: Option<String>,
    #[serde(default)]
    pub verbose_logging: bool,
}

impl Config {
    /// Load a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read config file at {}: {e}", path.display()))
        })?;
        serde_json::from_str(&raw)
            .map_err(|e| Error::Config(format!("invalid config file {}: {e}", path.display())))
    }

    pub fn topology(&self) -> DatabaseTopology {
        DatabaseTopology::new(&self.schema_path)
    }

    /// Read the active schema definition file.
    pub fn schema_text(&self) -> Result<String, Error> {
        fs::read_to_string(&self.schema_path).map_err(|e| {
            Error::Config(format!(
                "cannot read schema file at {}: {e}",
                self.schema_path.display()
            ))
        })
    }

    /// Validate the configuration: paths exist, the schema declares its
    /// database url through an environment variable, the provider is one of
    /// the registered engines, and the database is reachable.
    pub fn verify(
        &self,
        engines: &EngineRegistry,
        pool: &mut ConnectionRegistry,
    ) -> Result<(), Error> {
        if self.migrations_dir.as_os_str().is_empty() {
            return Err(Error::Config("missing config value for migrationsDir".into()));
        }
        if !self.migrations_dir.exists() {
            return Err(Error::Config(format!(
                "bad migrationsDir value, directory doesn't exist: {}",
                self.migrations_dir.display()
            )));
        }
        if self.schema_path.as_os_str().is_empty() {
            return Err(Error::Config("missing config value for schemaPath".into()));
        }
        if !self.schema_path.exists() {
            return Err(Error::Config(format!(
                "bad schemaPath value, file doesn't exist: {}",
                self.schema_path.display()
            )));
        }

        let schema = self.schema_text()?;
        if database_url_env_var(&schema).is_none() {
            return Err(Error::Config(
                "bad schema file, the datasource block must acquire the database url \
                 through an environment variable, e.g. url = env(\"DATABASE_URL\")"
                    .into(),
            ));
        }
        if let Some(provider) = database_provider(&schema) {
            if engines.engine_named(&provider).is_none() {
                return Err(Error::Config(format!(
                    "bad schema file, unsupported database provider \"{provider}\", \
                     must be one of {}",
                    engines.engine_names().join(", ")
                )));
            }
        }

        if self.database_url.is_empty() {
            return Err(Error::Config("missing config value for databaseUrl".into()));
        }
        let engine = engines
            .engine_for(&self.database_url)
            .map_err(|e| Error::Config(e.to_string()))?;

        // Connect probe. The connection is tracked so it is torn down with
        // the rest at end of command.
        let handle = pool
            .open(engine, &self.database_url, &self.topology())
            .map_err(|e| {
                Error::Config(format!(
                    "bad databaseUrl value, unable to connect to database: {e}"
                ))
            })?;
        pool.release(handle)?;

        Ok(())
    }
}

fn datasource_block(schema: &str) -> Option<&str> {
    let start = schema.find("datasource db {")? + "datasource db {".len();
    let rest = &schema[start..];
    let end = rest.find('}')?;
    Some(&rest[..end])
}

/// Extract the name of the environment variable carrying the database url
/// from the schema definition's datasource block: `url = env("VAR_NAME")`.
pub fn database_url_env_var(schema: &str) -> Option<String> {
    let block = datasource_block(schema)?;
    for line in block.lines() {
        let line = line.trim();
        if let Some(rest) = line.strip_prefix("url") {
            let rest = rest.trim_start().strip_prefix('=')?.trim_start();
            let inner = rest.strip_prefix("env(\"")?;
            let end = inner.find('"')?;
            return Some(inner[..end].to_string());
        }
    }
    None
}

/// Extract the provider name from the schema definition's datasource block:
/// `provider = "postgresql"`.
pub fn database_provider(schema: &str) -> Option<String> {
    let block = datasource_block(schema)?;
    for line in block.lines() {
        let line = line.trim();
        if let Some(rest) = line.strip_prefix("provider") {
            let rest = rest.trim_start().strip_prefix('=')?.trim_start();
            let inner = rest.strip_prefix('"')?;
            let end = inner.find('"')?;
            return Some(inner[..end].to_string());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCHEMA: &str = r#"
generator client {
  provider = "prisma-client-js"
}

datasource db {
  provider = "postgresql"
  url      = env("DATABASE_URL")
}

model User {
  id Int @id
}
"#;

    #[test]
    fn extracts_env_var_name_from_datasource_block() {
        assert_eq!(database_url_env_var(SCHEMA).as_deref(), Some("DATABASE_URL"));
    }

    #[test]
    fn extracts_provider_from_datasource_block() {
        assert_eq!(database_provider(SCHEMA).as_deref(), Some("postgresql"));
    }

    #[test]
    fn missing_datasource_block_yields_none() {
        assert_eq!(database_url_env_var("model User { id Int @id }"), None);
        assert_eq!(database_provider(""), None);
    }

    #[test]
    fn hardcoded_url_yields_none() {
        let schema = "datasource db {\n  provider = \"postgresql\"\n  url = \"postgres://x\"\n}";
        assert_eq!(database_url_env_var(schema), None);
        assert_eq!(database_provider(schema).as_deref(), Some("postgresql"));
    }

    #[test]
    fn verify_rejects_missing_migrations_dir() {
        let dir = tempfile::tempdir().unwrap();
        let schema_path = dir.path().join("schema.prisma");
        std::fs::write(&schema_path, SCHEMA).unwrap();
        let config = Config {
            migrations_dir: dir.path().join("nope"),
            schema_path,
            database_url: "postgres://localhost/db".into(),
            shadow_database_name: None,
            verbose_logging: false,
        };
        let engines = EngineRegistry::with_default_engines();
        let mut pool = ConnectionRegistry::new();
        let err = config.verify(&engines, &mut pool).unwrap_err();
        assert!(matches!(err, Error::Config(_)), "{err}");
    }
}
