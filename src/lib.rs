//! `migralens` orchestrates reversible, cross-engine schema migrations on
//! top of an external diff-generating schema tool.
//!
//! Core concepts:
//! - The schema tool (the Prisma CLI by default) knows how to diff a schema
//!   definition against a live database; `migralens` drives it against a
//!   disposable scratch database twice to synthesize a forward *and* a
//!   reverse statement list for every migration.
//! - The migration store is a plain directory tree, one folder per
//!   migration, holding the raw SQL, a schema snapshot, and a serialized
//!   `[up, down]` operation-pair script.
//! - The planner reconciles the store against the applied-migrations ledger
//!   inside the database and computes an ordered up or down plan, refusing
//!   to act when the two have diverged.
//! - The runner executes each migration's operations inside a transaction on
//!   a single connection, rolling the migration back on the first failure.
//!
//! # Targeted migrations
//!
//! `migrate` with no target brings the database to the latest migration.
//! Given a target name it moves *either way*: forward by applying the
//! pending migrations up to the target, or backward by running the reverse
//! operations of every migration after it, newest first.
//!
//! # Database support
//!
//! - `SQLite` - available with the `sqlite` feature flag.
//! - `PostgreSQL` - available with the `postgres` feature flag.
//! - `MySQL` - available with the `mysql` feature flag.
//! - `SQL Server` - available with the `mssql` feature flag.

mod error;
pub use error::Error;

pub mod config;
pub mod difftool;
pub mod engine;
pub mod ledger;
pub mod lens;
pub mod plan;
pub mod pool;
pub mod runner;
pub mod script;
pub mod shadow;
pub mod store;
pub mod synthesize;
pub mod testing;

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "postgres")]
pub mod postgres;

#[cfg(feature = "mysql")]
pub mod mysql;

#[cfg(feature = "mssql")]
pub mod sqlserver;

pub use config::Config;
pub use lens::Lens;
pub use script::MismatchPolicy;
pub use synthesize::SynthesisOptions;

#[cfg(all(test, feature = "sqlite"))]
mod test_sqlite;
