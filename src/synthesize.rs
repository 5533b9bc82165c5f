//! The reversible-migration synthesizer.
//!
//! Drives the external diff generator twice against a scratch database -
//! once forward from the current schema definition, once backward from the
//! previous migration's schema snapshot - and pairs the two statement lists
//! into one reversible script.

use tracing::info;

use crate::config::Config;
use crate::difftool::SchemaTool;
use crate::engine::Engine;
use crate::error::Error;
use crate::pool::ConnectionRegistry;
use crate::script::{MigrationScript, MismatchPolicy};
use crate::shadow::ShadowEnvironment;
use crate::store::{split_statements, MigrationStore};

#[derive(Debug, Clone, Copy)]
pub struct SynthesisOptions {
    /// Create the migration even when no schema changes are detected.
    pub blank: bool,
    /// What to do when the forward and reverse statement lists have
    /// different lengths.
    pub mismatch_policy: MismatchPolicy,
}

impl Default for SynthesisOptions {
    fn default() -> Self {
        Self {
            blank: false,
            mismatch_policy: MismatchPolicy::Fail,
        }
    }
}

pub struct MigrationSynthesizer<'a> {
    engine: &'a dyn Engine,
    store: &'a MigrationStore,
    tool: &'a dyn SchemaTool,
    config: &'a Config,
    /// Environment variable the schema tool reads the database url from.
    url_env_var: String,
}

impl<'a> MigrationSynthesizer<'a> {
    pub fn new(
        engine: &'a dyn Engine,
        store: &'a MigrationStore,
        tool: &'a dyn SchemaTool,
        config: &'a Config,
        url_env_var: impl Into<String>,
    ) -> Self {
        Self {
            engine,
            store,
            tool,
            config,
            url_env_var: url_env_var.into(),
        }
    }

    /// Synthesize a new reversible migration named after `label`.
    ///
    /// Returns the full (timestamp-prefixed) name of the created migration,
    /// or `None` when there was nothing to create - which is not an error.
    /// The scratch database is released on every exit path.
    pub fn make_migration(
        &self,
        pool: &mut ConnectionRegistry,
        label: &str,
        options: SynthesisOptions,
    ) -> Result<Option<String>, Error> {
        let shadow_env = ShadowEnvironment::new(
            self.engine,
            self.config.topology(),
            &self.config.database_url,
            self.config.shadow_database_name.as_deref(),
        );
        let shadow = shadow_env.acquire(pool, label)?;
        let shadow_tool_env = vec![(self.url_env_var.clone(), shadow.url.clone())];

        let result = self.synthesize(label, &options, &shadow_tool_env);
        shadow_env.release(pool, &shadow);
        result
    }

    fn synthesize(
        &self,
        label: &str,
        options: &SynthesisOptions,
        shadow_tool_env: &[(String, String)],
    ) -> Result<Option<String>, Error> {
        let previous = self.store.latest()?;

        info!("creating up migration");
        self.tool.create_migration(label, shadow_tool_env)?;

        let created = match self.store.latest()? {
            Some(name) if previous.as_ref() != Some(&name) => name,
            _ => {
                info!("migration creation aborted");
                return Ok(None);
            }
        };

        let up = split_statements(&self.store.forward_sql(&created)?);
        if up.is_empty() {
            if options.blank {
                info!("no schema changes detected, creating blank migration");
            } else {
                info!("no schema changes detected, migration not created");
                self.store.remove(&created)?;
                return Ok(None);
            }
        }

        // Snapshot the current schema into the migration folder for future
        // reverts.
        self.store
            .store_snapshot(&created, &self.config.schema_path)?;

        let mut down = Vec::new();
        if let Some(previous) = &previous {
            // Make the previous snapshot the active schema and diff again,
            // producing the reverse statements.
            self.store
                .restore_snapshot(previous, &self.config.schema_path)?;

            let generated = (|| {
                info!("creating down migration");
                self.tool.create_migration("revert", shadow_tool_env)?;
                let revert = self.store.latest()?.ok_or_else(|| {
                    Error::Generic("revert migration folder was not created".into())
                })?;
                let statements = split_statements(&self.store.forward_sql(&revert)?);
                self.store.remove(&revert)?;
                Ok::<_, Error>(statements)
            })();

            // The current schema comes back whatever happened above.
            let restored = self
                .store
                .restore_snapshot(&created, &self.config.schema_path);
            down = generated?;
            restored?;
        }

        let script = MigrationScript::paired(&created, up, down, options.mismatch_policy)?;
        self.store.write_script(&script)?;

        Ok(Some(created))
    }
}
