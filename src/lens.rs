//! The top-level command surface.
//!
//! [`Lens`] ties the pieces together: configuration, engine selection, the
//! migration store, the ledger, the synthesizer and the runner. One instance
//! per project; every command validates the configuration first and tears
//! down any connections it opened before returning.

use tracing::info;

use crate::config::{database_url_env_var, Config};
use crate::difftool::{PrismaCli, SchemaTool};
use crate::engine::{Connection, EngineRegistry};
use crate::error::Error;
use crate::ledger::AppliedStateTracker;
use crate::plan;
use crate::pool::ConnectionRegistry;
use crate::runner::{HookRegistry, TransactionalRunner};
use crate::script::MismatchPolicy;
use crate::store::MigrationStore;
use crate::synthesize::{MigrationSynthesizer, SynthesisOptions};

pub struct Lens {
    config: Config,
    engines: EngineRegistry,
    pool: ConnectionRegistry,
    tool: Box<dyn SchemaTool>,
    hooks: HookRegistry,
    /// Environment variable the schema definition reads the database url
    /// from, extracted from its datasource block.
    url_env_var: String,
}

impl Lens {
    /// Build a [`Lens`] driving the Prisma CLI as its schema tool.
    pub fn new(config: Config) -> Result<Self, Error> {
        let url_env_var = Self::url_env_var(&config)?;
        let tool = Box::new(PrismaCli::new(
            &config.schema_path,
            &config.database_url,
            &url_env_var,
        ));
        Ok(Self {
            config,
            engines: EngineRegistry::with_default_engines(),
            pool: ConnectionRegistry::new(),
            tool,
            hooks: HookRegistry::new(),
            url_env_var,
        })
    }

    /// Build a [`Lens`] around a custom schema tool.
    pub fn with_tool(config: Config, tool: Box<dyn SchemaTool>) -> Result<Self, Error> {
        let url_env_var = Self::url_env_var(&config)?;
        Ok(Self {
            config,
            engines: EngineRegistry::with_default_engines(),
            pool: ConnectionRegistry::new(),
            tool,
            hooks: HookRegistry::new(),
            url_env_var,
        })
    }

    fn url_env_var(config: &Config) -> Result<String, Error> {
        database_url_env_var(&config.schema_text()?).ok_or_else(|| {
            Error::Config(
                "bad schema file, the datasource block must acquire the database url \
                 through an environment variable"
                    .into(),
            )
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Register a callback that migration scripts can reference by name.
    pub fn register_hook(
        &mut self,
        name: impl Into<String>,
        hook: impl Fn(&mut dyn Connection) -> Result<(), Error> + Send + Sync + 'static,
    ) {
        self.hooks.register(name, hook);
    }

    /// Validate configuration and database reachability without doing
    /// anything else.
    pub fn verify(&mut self) -> Result<(), Error> {
        let result = self.config.verify(&self.engines, &mut self.pool);
        self.pool.release_all();
        result
    }

    /// Synthesize a new reversible migration. Returns its full name, or
    /// `None` when there was nothing to create.
    pub fn make_migration(
        &mut self,
        label: &str,
        options: SynthesisOptions,
    ) -> Result<Option<String>, Error> {
        let result = self.make_migration_inner(label, options);
        self.pool.release_all();
        result
    }

    /// Bring the database to `target`, or to the latest migration when
    /// `target` is absent. In fake mode only the ledger and the schema
    /// definition file move.
    pub fn migrate(&mut self, target: Option<&str>, fake: bool) -> Result<(), Error> {
        let result = self.migrate_inner(target, fake);
        self.pool.release_all();
        result
    }

    /// Adopt an existing database into migration management: capture its
    /// schema, reset it, and apply a synthesized init migration. Destroys
    /// data; callers are expected to confirm with the user first.
    pub fn prepare(&mut self) -> Result<(), Error> {
        let result = self.prepare_inner();
        self.pool.release_all();
        result
    }

    /// Force the database to the current schema definition without touching
    /// the migration store.
    pub fn push(&mut self) -> Result<(), Error> {
        let result = self.push_inner();
        self.pool.release_all();
        result
    }

    /// Report the schema tool's view of migration state.
    pub fn status(&mut self) -> Result<(), Error> {
        let result = self.status_inner();
        self.pool.release_all();
        result
    }

    fn make_migration_inner(
        &mut self,
        label: &str,
        options: SynthesisOptions,
    ) -> Result<Option<String>, Error> {
        self.config.verify(&self.engines, &mut self.pool)?;
        let engine = self.engines.engine_for(&self.config.database_url)?;
        let store = MigrationStore::new(&self.config.migrations_dir);
        let synthesizer = MigrationSynthesizer::new(
            engine,
            &store,
            self.tool.as_ref(),
            &self.config,
            &self.url_env_var,
        );
        synthesizer.make_migration(&mut self.pool, label, options)
    }

    fn migrate_inner(&mut self, target: Option<&str>, fake: bool) -> Result<(), Error> {
        self.config.verify(&self.engines, &mut self.pool)?;
        let engine = self.engines.engine_for(&self.config.database_url)?;
        let builder = engine.query_builder();
        let store = MigrationStore::new(&self.config.migrations_dir);
        let store_names = store.migration_names()?;

        let db_name = engine.database_name(&self.config.database_url)?;
        let handle = self
            .pool
            .open(engine, &self.config.database_url, &self.config.topology())?;
        let applied = match self.pool.connection(handle) {
            Ok(conn) => {
                AppliedStateTracker::new(conn, builder.as_ref(), self.tool.as_ref(), &db_name)
                    .list()
            }
            Err(e) => Err(e),
        };
        let released = self.pool.release(handle);
        let applied = applied?;
        released?;

        let plan = plan::plan(&store_names, &applied, target)?;
        let runner =
            TransactionalRunner::new(engine, &store, self.tool.as_ref(), &self.config, &self.hooks);
        runner.run(&mut self.pool, &plan, fake)
    }

    fn prepare_inner(&mut self) -> Result<(), Error> {
        self.config.verify(&self.engines, &mut self.pool)?;
        let store = MigrationStore::new(&self.config.migrations_dir);
        if !store.migration_names()?.is_empty() {
            return Err(Error::Generic(
                "migrations folder is not empty, prepare only works on an unmanaged project"
                    .into(),
            ));
        }

        {
            let engine = self.engines.engine_for(&self.config.database_url)?;
            let builder = engine.query_builder();
            let db_name = engine.database_name(&self.config.database_url)?;
            let handle =
                self.pool
                    .open(engine, &self.config.database_url, &self.config.topology())?;
            if let Ok(conn) = self.pool.connection(handle) {
                AppliedStateTracker::new(conn, builder.as_ref(), self.tool.as_ref(), &db_name)
                    .clear();
            }
            self.pool.release(handle)?;
        }

        info!("capturing current database schema");
        self.tool.pull_schema()?;
        info!("resetting database");
        self.tool.reset_database()?;

        let created = self.make_migration_inner(
            "init",
            SynthesisOptions {
                blank: true,
                mismatch_policy: MismatchPolicy::AutoJoin,
            },
        )?;
        match created {
            Some(name) => self.migrate_inner(Some(name.as_str()), false),
            None => Ok(()),
        }
    }

    fn push_inner(&mut self) -> Result<(), Error> {
        self.config.verify(&self.engines, &mut self.pool)?;
        self.tool.push_schema()
    }

    fn status_inner(&mut self) -> Result<(), Error> {
        self.config.verify(&self.engines, &mut self.pool)?;
        self.tool.print_status()
    }
}
