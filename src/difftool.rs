//! Interface to the external schema tool.
//!
//! The diff generator is an external collaborator: given the target schema
//! definition and a live database, it produces an ordered list of SQL
//! statements transforming one into the other, written into a new migration
//! folder. This crate never re-implements diffing - it drives the tool
//! against a disposable scratch database and consumes its output.

use std::path::PathBuf;
use std::process::Command;

use tracing::{debug, info};

use crate::error::Error;

/// Operations the orchestration engine needs from the external schema tool.
pub trait SchemaTool {
    /// Generate a migration folder (forward SQL only, nothing applied) by
    /// diffing the current schema definition against the database the given
    /// environment variables point at.
    fn create_migration(&self, name: &str, env: &[(String, String)]) -> Result<(), Error>;

    /// Record a migration as applied in the tool's own ledger table, through
    /// the tool itself so the two bookkeepings never diverge.
    fn resolve_applied(&self, name: &str) -> Result<(), Error>;

    /// Overwrite the schema definition from the live database state.
    fn pull_schema(&self) -> Result<(), Error>;

    /// Reset the database, replaying all migrations from scratch.
    fn reset_database(&self) -> Result<(), Error>;

    /// Force the database to the current schema state without migrations.
    fn push_schema(&self) -> Result<(), Error>;

    /// Print the tool's migration status report.
    fn print_status(&self) -> Result<(), Error>;

    /// Regenerate client/type definitions from the schema.
    fn generate_client(&self) -> Result<(), Error>;
}

// Lets callers hand the same tool instance to the engine and keep a handle
// on it, which the test doubles rely on.
impl<T: SchemaTool> SchemaTool for std::rc::Rc<T> {
    fn create_migration(&self, name: &str, env: &[(String, String)]) -> Result<(), Error> {
        (**self).create_migration(name, env)
    }

    fn resolve_applied(&self, name: &str) -> Result<(), Error> {
        (**self).resolve_applied(name)
    }

    fn pull_schema(&self) -> Result<(), Error> {
        (**self).pull_schema()
    }

    fn reset_database(&self) -> Result<(), Error> {
        (**self).reset_database()
    }

    fn push_schema(&self) -> Result<(), Error> {
        (**self).push_schema()
    }

    fn print_status(&self) -> Result<(), Error> {
        (**self).print_status()
    }

    fn generate_client(&self) -> Result<(), Error> {
        (**self).generate_client()
    }
}

/// [`SchemaTool`] backed by the Prisma CLI.
///
/// Every invocation passes the schema path explicitly and injects the
/// database url through the environment variable named in the schema's
/// datasource block.
#[derive(Debug, Clone)]
pub struct PrismaCli {
    schema_path: PathBuf,
    database_url: String,
    url_env_var: String,
    /// Program and leading arguments, normally `["npx", "prisma"]`.
    program: Vec<String>,
}

impl PrismaCli {
    pub fn new(
        schema_path: impl Into<PathBuf>,
        database_url: impl Into<String>,
        url_env_var: impl Into<String>,
    ) -> Self {
        Self {
            schema_path: schema_path.into(),
            database_url: database_url.into(),
            url_env_var: url_env_var.into(),
            program: vec!["npx".to_string(), "prisma".to_string()],
        }
    }

    /// Override the program used to invoke the tool.
    pub fn with_program(mut self, program: Vec<String>) -> Self {
        self.program = program;
        self
    }

    fn run(&self, args: &[&str], env: &[(String, String)]) -> Result<(), Error> {
        let mut cmd = Command::new(&self.program[0]);
        cmd.args(&self.program[1..])
            .args(args)
            .arg("--schema")
            .arg(&self.schema_path)
            .env(&self.url_env_var, &self.database_url);
        for (key, value) in env {
            cmd.env(key, value);
        }
        debug!("running schema tool: {:?}", cmd);
        let status = cmd.status().map_err(|e| {
            Error::SchemaTool(format!("failed to spawn {}: {e}", self.program.join(" ")))
        })?;
        if !status.success() {
            return Err(Error::SchemaTool(format!(
                "{} {} exited with {status}",
                self.program.join(" "),
                args.join(" ")
            )));
        }
        Ok(())
    }
}

impl SchemaTool for PrismaCli {
    fn create_migration(&self, name: &str, env: &[(String, String)]) -> Result<(), Error> {
        info!("invoking diff generator for migration {name}");
        self.run(
            &[
                "migrate",
                "dev",
                "--create-only",
                "--skip-seed",
                "--skip-generate",
                "--name",
                name,
            ],
            env,
        )
    }

    fn resolve_applied(&self, name: &str) -> Result<(), Error> {
        self.run(&["migrate", "resolve", "--applied", name], &[])
    }

    fn pull_schema(&self) -> Result<(), Error> {
        self.run(&["db", "pull"], &[])
    }

    fn reset_database(&self) -> Result<(), Error> {
        self.run(
            &["migrate", "reset", "--force", "--skip-generate", "--skip-seed"],
            &[],
        )
    }

    fn push_schema(&self) -> Result<(), Error> {
        self.run(
            &["db", "push", "--accept-data-loss", "--skip-generate", "--force-reset"],
            &[],
        )
    }

    fn print_status(&self) -> Result<(), Error> {
        self.run(&["migrate", "status"], &[])
    }

    fn generate_client(&self) -> Result<(), Error> {
        self.run(&["generate"], &[])
    }
}
