//! The shadow environment.
//!
//! A disposable scratch database, identical in emptiness to "no migrations
//! applied yet", used exclusively by the synthesizer to compute diffs.
//! Acquisition picks one of three strategies and release reverses it -
//! release always runs, and its failures are logged rather than thrown so
//! they can never mask the error that triggered cleanup.

use std::fs;
use std::path::PathBuf;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::engine::{DatabaseTopology, Engine, QueryBuilder};
use crate::error::Error;
use crate::pool::ConnectionRegistry;

/// How the scratch database was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShadowStrategy {
    /// A fixed, operator-provided shadow database is reused by truncation.
    /// Avoids needing CREATE DATABASE privileges.
    Reused,
    /// The live database file was copied and stripped (file-resident engines).
    FileCopy,
    /// A uniquely-named database was created via CREATE DATABASE.
    Created,
}

/// An acquired scratch database, to be passed back to
/// [`ShadowEnvironment::release`] when done.
#[derive(Debug, Clone)]
pub struct ShadowDatabase {
    pub name: String,
    pub url: String,
    pub strategy: ShadowStrategy,
    /// The copied database file, for the file strategy.
    pub file: Option<PathBuf>,
    /// Auxiliary files the engine may have created next to the database.
    pub metafiles: Vec<PathBuf>,
}

pub struct ShadowEnvironment<'a> {
    engine: &'a dyn Engine,
    builder: Box<dyn QueryBuilder>,
    topology: DatabaseTopology,
    base_url: &'a str,
    fixed_name: Option<&'a str>,
}

impl<'a> ShadowEnvironment<'a> {
    pub fn new(
        engine: &'a dyn Engine,
        topology: DatabaseTopology,
        base_url: &'a str,
        fixed_name: Option<&'a str>,
    ) -> Self {
        Self {
            engine,
            builder: engine.query_builder(),
            topology,
            base_url,
            fixed_name,
        }
    }

    /// Produce a clean scratch database for diff generation against.
    pub fn acquire(
        &self,
        pool: &mut ConnectionRegistry,
        label: &str,
    ) -> Result<ShadowDatabase, Error> {
        let base_name = self.engine.database_name(self.base_url)?;

        if let Some(fixed) = self.fixed_name {
            let url = self.engine.url_for_database(self.base_url, fixed)?;
            info!("reusing configured shadow database {fixed}");
            self.drop_all_tables(pool, &url, fixed)?;
            // A file-resident fixed shadow accumulates journal files like any
            // other database, so they are swept on release here too.
            let metafiles = if self.engine.is_file_based() {
                self.engine.database_files(&url, &self.topology)?.metafiles
            } else {
                vec![]
            };
            return Ok(ShadowDatabase {
                name: fixed.to_string(),
                url,
                strategy: ShadowStrategy::Reused,
                file: None,
                metafiles,
            });
        }

        // Monotonic suffix keeps concurrent invocations on the same host from
        // colliding.
        let name = format!(
            "{base_name}_shadow_{label}_{}",
            Utc::now().timestamp_millis()
        );
        let url = self.engine.url_for_database(self.base_url, &name)?;

        if self.engine.is_file_based() {
            let live = self.engine.database_files(self.base_url, &self.topology)?;
            let scratch = self.engine.database_files(&url, &self.topology)?;
            info!(
                "copying database file {} to shadow {}",
                live.primary.display(),
                scratch.primary.display()
            );
            fs::copy(&live.primary, &scratch.primary)?;
            self.drop_all_tables(pool, &url, &name)?;
            return Ok(ShadowDatabase {
                name,
                url,
                strategy: ShadowStrategy::FileCopy,
                file: Some(scratch.primary),
                metafiles: scratch.metafiles,
            });
        }

        info!("creating shadow database {name}");
        let handle = pool.open(self.engine, self.base_url, &self.topology)?;
        let result = (|| {
            let conn = pool.connection(handle)?;
            conn.execute(&self.builder.drop_database_if_exists(&name))?;
            conn.execute(&self.builder.create_database(&name))
        })();
        let released = pool.release(handle);
        result?;
        released?;

        Ok(ShadowDatabase {
            name,
            url,
            strategy: ShadowStrategy::Created,
            file: None,
            metafiles: vec![],
        })
    }

    /// Tear the scratch database down. Runs on success and failure paths
    /// alike; problems are logged, never returned.
    pub fn release(&self, pool: &mut ConnectionRegistry, shadow: &ShadowDatabase) {
        let result = match shadow.strategy {
            ShadowStrategy::Reused => self.drop_all_tables(pool, &shadow.url, &shadow.name),
            ShadowStrategy::FileCopy => match &shadow.file {
                Some(file) => {
                    debug!("removing shadow database file {}", file.display());
                    fs::remove_file(file).map_err(Error::from)
                }
                None => Ok(()),
            },
            ShadowStrategy::Created => {
                let drop_sql = self.builder.drop_database_if_exists(&shadow.name);
                pool.open(self.engine, self.base_url, &self.topology)
                    .and_then(|handle| {
                        let result = pool.connection(handle).and_then(|c| c.execute(&drop_sql));
                        let _ = pool.release(handle);
                        result
                    })
            }
        };
        if let Err(e) = result {
            warn!("failed to release shadow database {}: {e}", shadow.name);
        }

        for metafile in &shadow.metafiles {
            if metafile.exists() {
                debug!("removing shadow metafile {}", metafile.display());
                if let Err(e) = fs::remove_file(metafile) {
                    warn!("failed to remove shadow metafile {}: {e}", metafile.display());
                }
            }
        }
    }

    /// Forcibly empty a database by dropping every table, with foreign-key
    /// checks disabled around the drops.
    fn drop_all_tables(
        &self,
        pool: &mut ConnectionRegistry,
        url: &str,
        db_name: &str,
    ) -> Result<(), Error> {
        let handle = pool.open(self.engine, url, &self.topology)?;
        let result = (|| {
            let conn = pool.connection(handle)?;
            conn.execute(&self.builder.set_foreign_key_check_off())?;
            let tables = conn.query(&self.builder.select_all_tables(db_name))?;
            for row in &tables {
                if let Some(table) = row.get("tablename") {
                    conn.execute(&self.builder.drop_table_if_exists_cascade(table))?;
                }
            }
            conn.execute(&self.builder.set_foreign_key_check_on())
        })();
        let released = pool.release(handle);
        result?;
        released
    }
}
