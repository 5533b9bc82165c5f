//! The transactional runner.
//!
//! Executes a [`MigrationPlan`] migration by migration, strictly in order,
//! aborting the whole run on the first failure. Each migration is its own
//! atomicity boundary: its operations run inside one transaction on one
//! connection, and a failure rolls that migration back while migrations
//! already executed in the same run stay committed.

use std::collections::HashMap;

use tracing::{info, warn};

use crate::config::Config;
use crate::difftool::SchemaTool;
use crate::engine::{Connection, Engine, QueryBuilder};
use crate::error::Error;
use crate::ledger::AppliedStateTracker;
use crate::plan::{Direction, MigrationPlan};
use crate::pool::ConnectionRegistry;
use crate::script::Operation;
use crate::store::MigrationStore;

/// A named callback an [`Operation::Hook`] resolves to at run time.
pub type Hook = Box<dyn Fn(&mut dyn Connection) -> Result<(), Error> + Send + Sync>;

/// Opaque hook references in migration scripts are looked up here.
#[derive(Default)]
pub struct HookRegistry {
    hooks: HashMap<String, Hook>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        name: impl Into<String>,
        hook: impl Fn(&mut dyn Connection) -> Result<(), Error> + Send + Sync + 'static,
    ) {
        self.hooks.insert(name.into(), Box::new(hook));
    }

    fn get(&self, name: &str) -> Option<&Hook> {
        self.hooks.get(name)
    }
}

impl std::fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookRegistry")
            .field("hooks", &self.hooks.keys().collect::<Vec<_>>())
            .finish()
    }
}

pub struct TransactionalRunner<'a> {
    engine: &'a dyn Engine,
    store: &'a MigrationStore,
    tool: &'a dyn SchemaTool,
    config: &'a Config,
    hooks: &'a HookRegistry,
}

impl<'a> TransactionalRunner<'a> {
    pub fn new(
        engine: &'a dyn Engine,
        store: &'a MigrationStore,
        tool: &'a dyn SchemaTool,
        config: &'a Config,
        hooks: &'a HookRegistry,
    ) -> Self {
        Self {
            engine,
            store,
            tool,
            config,
            hooks,
        }
    }

    /// Execute the plan. In fake mode the ledger and the schema definition
    /// file are updated, but no migration operation touches the database.
    pub fn run(
        &self,
        pool: &mut ConnectionRegistry,
        plan: &MigrationPlan,
        fake: bool,
    ) -> Result<(), Error> {
        if plan.is_empty() {
            info!("nothing to migrate, database is up to date");
            return Ok(());
        }

        let builder = self.engine.query_builder();
        let db_name = self.engine.database_name(&self.config.database_url)?;
        let store_names = self.store.migration_names()?;

        for name in &plan.migrations {
            match plan.direction {
                Direction::Up => info!(fake, "applying migration {name}"),
                Direction::Down => info!(fake, "reverting migration {name}"),
            }
            let script = self.store.read_script(name)?;

            let handle = pool.open(self.engine, &self.config.database_url, &self.config.topology())?;
            let result = (|| {
                let conn = pool.connection(handle)?;
                if !fake {
                    self.run_in_transaction(conn, builder.as_ref(), &script.operations, plan.direction)?;
                }
                let mut ledger =
                    AppliedStateTracker::new(conn, builder.as_ref(), self.tool, &db_name);
                match plan.direction {
                    Direction::Up => ledger.mark_applied(name),
                    Direction::Down => ledger.mark_reverted(name),
                }
            })();
            let released = pool.release(handle);
            result?;
            released?;

            // The schema definition file follows the database: the migration
            // just applied when moving up, the one before the reverted
            // migration when moving down (clamped to the first migration when
            // reverting past the start of history).
            let snapshot_of = match plan.direction {
                Direction::Up => name.as_str(),
                Direction::Down => {
                    let index = store_names.iter().position(|n| n == name).unwrap_or(0);
                    store_names[index.saturating_sub(1)].as_str()
                }
            };
            info!("updating schema definition according to migration");
            self.store
                .restore_snapshot(snapshot_of, &self.config.schema_path)?;
        }

        info!("migration successful, updating client type definitions");
        self.tool.generate_client()
    }

    fn run_in_transaction(
        &self,
        conn: &mut dyn Connection,
        builder: &dyn QueryBuilder,
        operations: &[crate::script::OperationPair],
        direction: Direction,
    ) -> Result<(), Error> {
        conn.execute(&builder.transaction_begin())?;
        let result = operations.iter().try_for_each(|pair| {
            let operation = match direction {
                Direction::Up => &pair.up,
                Direction::Down => &pair.down,
            };
            self.apply_operation(conn, operation)
        });
        match result {
            Ok(()) => conn.execute(&builder.transaction_commit()),
            Err(e) => {
                if let Err(rollback) = conn.execute(&builder.transaction_rollback()) {
                    warn!("rollback failed after operation error: {rollback}");
                }
                Err(e)
            }
        }
    }

    fn apply_operation(
        &self,
        conn: &mut dyn Connection,
        operation: &Operation,
    ) -> Result<(), Error> {
        match operation {
            Operation::RawSql { sql } => conn.execute(sql),
            Operation::Hook { name } => {
                let hook = self
                    .hooks
                    .get(name)
                    .ok_or_else(|| Error::Generic(format!("no hook registered under name {name}")))?;
                hook(conn)
            }
            Operation::Noop => Ok(()),
        }
    }
}
