//! End-to-end flows against a real SQLite database.
//!
//! These tests exercise the full synthesize/plan/run pipeline with the
//! scripted schema-tool double standing in for the external CLI: diff output
//! is played back from a queue, and ledger inserts go into the same database
//! file the real tool's resolve subcommand would write to.

use std::fs;
use std::path::Path;
use std::rc::Rc;

use crate::config::Config;
use crate::engine::Connection;
use crate::error::Error;
use crate::lens::Lens;
use crate::script::{MigrationScript, MismatchPolicy, Operation};
use crate::store::MigrationStore;
use crate::synthesize::SynthesisOptions;
use crate::testing::ScriptedSchemaTool;

const SCHEMA_V1: &str = r#"datasource db {
  provider = "sqlite"
  url      = env("DATABASE_URL")
}

model User {
  id Int @id
}
"#;

const SCHEMA_V2: &str = r#"datasource db {
  provider = "sqlite"
  url      = env("DATABASE_URL")
}

model User {
  id Int @id
}

model Post {
  id Int @id
}
"#;

struct Project {
    dir: tempfile::TempDir,
    lens: Lens,
    tool: Rc<ScriptedSchemaTool>,
}

/// Route log output through the test harness. Repeat calls are fine, only
/// the first registration wins.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

impl Project {
    fn new() -> Self {
        init_tracing();
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::write(root.join("schema.prisma"), SCHEMA_V1).unwrap();
        fs::write(root.join("dev.db"), b"").unwrap();
        fs::create_dir(root.join("migrations")).unwrap();

        let config = Config {
            migrations_dir: root.join("migrations"),
            schema_path: root.join("schema.prisma"),
            database_url: "file:./dev.db".to_string(),
            shadow_database_name: None,
            verbose_logging: false,
        };
        let tool = Rc::new(
            ScriptedSchemaTool::new(root.join("migrations"))
                .with_sqlite_ledger(root.join("dev.db")),
        );
        let lens = Lens::with_tool(config, Box::new(tool.clone())).unwrap();
        Self { dir, lens, tool }
    }

    fn root(&self) -> &Path {
        self.dir.path()
    }

    fn store(&self) -> MigrationStore {
        MigrationStore::new(self.root().join("migrations"))
    }

    fn schema(&self) -> String {
        fs::read_to_string(self.root().join("schema.prisma")).unwrap()
    }

    fn write_schema(&self, text: &str) {
        fs::write(self.root().join("schema.prisma"), text).unwrap();
    }

    fn table_names(&self) -> Vec<String> {
        let conn = rusqlite::Connection::open(self.root().join("dev.db")).unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT name FROM sqlite_master WHERE type='table' \
                 AND name NOT LIKE 'sqlite_%' AND name != '_prisma_migrations' \
                 ORDER BY name",
            )
            .unwrap();
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();
        names
    }

    fn applied(&self) -> Vec<String> {
        let conn = rusqlite::Connection::open(self.root().join("dev.db")).unwrap();
        let mut stmt = match conn.prepare(
            "SELECT migration_name FROM _prisma_migrations ORDER BY migration_name",
        ) {
            Ok(stmt) => stmt,
            Err(_) => return vec![],
        };
        stmt.query_map([], |row| row.get::<_, String>(0))
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap()
    }

    /// Leftover scratch database files next to the live one, if any.
    fn shadow_files(&self) -> Vec<String> {
        fs::read_dir(self.root())
            .unwrap()
            .filter_map(|e| Some(e.ok()?.file_name().to_string_lossy().into_owned()))
            .filter(|name| name.contains("_shadow_"))
            .collect()
    }

    /// Synthesize the standard two-migration history: users, then posts.
    fn synthesize_two(&mut self) -> (String, String) {
        self.tool
            .queue_diff("-- CreateTable\nCREATE TABLE users (id INTEGER PRIMARY KEY);\n");
        let first = self
            .lens
            .make_migration("add_users", SynthesisOptions::default())
            .unwrap()
            .unwrap();

        self.write_schema(SCHEMA_V2);
        self.tool
            .queue_diff("-- CreateTable\nCREATE TABLE posts (id INTEGER PRIMARY KEY);\n");
        self.tool.queue_diff("-- DropTable\nDROP TABLE posts;\n");
        let second = self
            .lens
            .make_migration("add_posts", SynthesisOptions::default())
            .unwrap()
            .unwrap();
        (first, second)
    }
}

#[test]
fn first_migration_pairs_every_statement_with_a_noop() {
    let mut project = Project::new();
    project
        .tool
        .queue_diff("-- CreateTable\nCREATE TABLE users (id INTEGER PRIMARY KEY);\n");

    let name = project
        .lens
        .make_migration("add_users", SynthesisOptions::default())
        .unwrap()
        .unwrap();
    assert_eq!(name, "0001_add_users");

    let store = project.store();
    let folder = store.migration_dir(&name);
    assert!(folder.join("migration.sql").exists());
    assert!(folder.join("migration.schema.prisma").exists());

    let script = store.read_script(&name).unwrap();
    assert_eq!(script.operations.len(), 1);
    assert_eq!(
        script.operations[0].up,
        Operation::RawSql {
            sql: "CREATE TABLE users (id INTEGER PRIMARY KEY);".into()
        }
    );
    assert_eq!(script.operations[0].down, Operation::Noop);

    // The scratch database never outlives synthesis.
    assert!(project.shadow_files().is_empty());
    assert_eq!(project.schema(), SCHEMA_V1);
}

#[test]
fn second_migration_derives_its_reverse_from_the_previous_snapshot() {
    let mut project = Project::new();
    let (first, second) = project.synthesize_two();
    assert_eq!(second, "0002_add_posts");

    let store = project.store();
    let script = store.read_script(&second).unwrap();
    assert_eq!(
        script.operations[0].up,
        Operation::RawSql {
            sql: "CREATE TABLE posts (id INTEGER PRIMARY KEY);".into()
        }
    );
    assert_eq!(
        script.operations[0].down,
        Operation::RawSql {
            sql: "DROP TABLE posts;".into()
        }
    );

    // The throwaway revert folder is gone, the snapshots capture each
    // migration's schema, and the live schema definition is back in place.
    assert_eq!(store.migration_names().unwrap(), vec![first.clone(), second.clone()]);
    assert_eq!(
        fs::read_to_string(store.snapshot_path(&first)).unwrap(),
        SCHEMA_V1
    );
    assert_eq!(
        fs::read_to_string(store.snapshot_path(&second)).unwrap(),
        SCHEMA_V2
    );
    assert_eq!(project.schema(), SCHEMA_V2);
    assert!(project
        .tool
        .calls
        .borrow()
        .contains(&"create_migration revert".to_string()));
}

#[test]
fn synthesis_without_schema_changes_creates_nothing_unless_blank() {
    let mut project = Project::new();
    project.tool.queue_diff("-- This is an empty migration.\n");
    let created = project
        .lens
        .make_migration("noop", SynthesisOptions::default())
        .unwrap();
    assert_eq!(created, None);
    assert!(project.store().migration_names().unwrap().is_empty());

    project.tool.queue_diff("-- This is an empty migration.\n");
    let created = project
        .lens
        .make_migration(
            "noop",
            SynthesisOptions {
                blank: true,
                mismatch_policy: MismatchPolicy::Fail,
            },
        )
        .unwrap()
        .unwrap();
    assert_eq!(created, "0002_noop");
    assert!(project.store().read_script(&created).unwrap().operations.is_empty());
}

#[test]
fn aborted_tool_run_yields_none() {
    // Empty queue: the tool call returns without creating a folder, which is
    // how an operator abort looks from the outside.
    let mut project = Project::new();
    let created = project
        .lens
        .make_migration("aborted", SynthesisOptions::default())
        .unwrap();
    assert_eq!(created, None);
}

#[test]
fn migrate_applies_pending_migrations_in_order() {
    let mut project = Project::new();
    let (first, second) = project.synthesize_two();

    project.lens.migrate(None, false).unwrap();

    assert_eq!(project.table_names(), vec!["posts".to_string(), "users".to_string()]);
    assert_eq!(project.applied(), vec![first.clone(), second.clone()]);
    assert_eq!(project.schema(), SCHEMA_V2);
    let calls = project.tool.calls.borrow();
    assert!(calls.contains(&format!("resolve_applied {first}")));
    assert!(calls.contains(&format!("resolve_applied {second}")));
    assert_eq!(calls.last().map(String::as_str), Some("generate"));
}

#[test]
fn migrate_to_an_earlier_target_reverts_and_restores_the_snapshot() {
    let mut project = Project::new();
    let (first, second) = project.synthesize_two();
    project.lens.migrate(None, false).unwrap();

    project.lens.migrate(Some(first.as_str()), false).unwrap();

    assert_eq!(project.table_names(), vec!["users".to_string()]);
    assert_eq!(project.applied(), vec![first]);
    // The schema definition follows the database back to the first
    // migration's snapshot.
    assert_eq!(project.schema(), SCHEMA_V1);
    let _ = second;
}

#[test]
fn migrate_is_a_noop_when_already_at_the_target() {
    let mut project = Project::new();
    let (first, _) = project.synthesize_two();
    project.lens.migrate(Some(first.as_str()), false).unwrap();
    let applied = project.applied();
    project.lens.migrate(Some(first.as_str()), false).unwrap();
    assert_eq!(project.applied(), applied);
}

#[test]
fn failed_operation_rolls_back_its_migration_and_leaves_the_ledger_alone() {
    let mut project = Project::new();
    project
        .tool
        .queue_diff("CREATE TABLE users (id INTEGER PRIMARY KEY);\n");
    let first = project
        .lens
        .make_migration("add_users", SynthesisOptions::default())
        .unwrap()
        .unwrap();
    project.lens.migrate(None, false).unwrap();

    // A hand-crafted migration whose second statement cannot execute.
    let store = project.store();
    let bad = MigrationScript::paired(
        "0002_bad",
        vec![
            "CREATE TABLE posts (id INTEGER PRIMARY KEY);".to_string(),
            "THIS IS NOT SQL;".to_string(),
        ],
        vec!["DROP TABLE posts;".to_string(), "SELECT 1;".to_string()],
        MismatchPolicy::Fail,
    )
    .unwrap();
    store.write_script(&bad).unwrap();
    store
        .store_snapshot("0002_bad", &project.root().join("schema.prisma"))
        .unwrap();

    let err = project.lens.migrate(None, false).unwrap_err();
    assert!(matches!(err, Error::Sqlite(_)), "{err}");

    // The first statement was rolled back with the rest of the migration.
    assert_eq!(project.table_names(), vec!["users".to_string()]);
    assert_eq!(project.applied(), vec![first]);
    assert_eq!(project.schema(), SCHEMA_V1);
}

#[test]
fn fake_migration_moves_the_ledger_but_not_the_database() {
    let mut project = Project::new();
    project
        .tool
        .queue_diff("CREATE TABLE users (id INTEGER PRIMARY KEY);\n");
    let name = project
        .lens
        .make_migration("add_users", SynthesisOptions::default())
        .unwrap()
        .unwrap();

    project.lens.migrate(None, true).unwrap();

    assert!(project.table_names().is_empty());
    assert_eq!(project.applied(), vec![name]);
}

#[test]
fn unknown_target_is_rejected() {
    let mut project = Project::new();
    project.synthesize_two();
    let err = project.lens.migrate(Some("0009_nope"), false).unwrap_err();
    assert!(matches!(err, Error::UnknownTarget(_)), "{err}");
}

#[test]
fn ledger_ahead_of_the_store_is_fatal() {
    let project = Project::new();
    let conn = rusqlite::Connection::open(project.root().join("dev.db")).unwrap();
    conn.execute_batch(
        "CREATE TABLE _prisma_migrations (migration_name TEXT PRIMARY KEY);\n\
         INSERT INTO _prisma_migrations (migration_name) VALUES ('0001_ghost');",
    )
    .unwrap();
    drop(conn);

    let mut project = project;
    let err = project.lens.migrate(None, false).unwrap_err();
    assert!(matches!(err, Error::Divergence(_)), "{err}");
}

#[test]
fn hook_operations_resolve_through_the_registry() {
    let mut project = Project::new();
    project.lens.register_hook("seed_users", |conn| {
        conn.execute("INSERT INTO users (id) VALUES (1);")
    });

    let store = project.store();
    let script = MigrationScript {
        name: "0001_seeded".to_string(),
        operations: vec![
            crate::script::OperationPair {
                up: Operation::RawSql {
                    sql: "CREATE TABLE users (id INTEGER PRIMARY KEY);".into(),
                },
                down: Operation::RawSql {
                    sql: "DROP TABLE users;".into(),
                },
            },
            crate::script::OperationPair {
                up: Operation::Hook {
                    name: "seed_users".into(),
                },
                down: Operation::Noop,
            },
        ],
    };
    store.write_script(&script).unwrap();
    store
        .store_snapshot("0001_seeded", &project.root().join("schema.prisma"))
        .unwrap();

    project.lens.migrate(None, false).unwrap();

    let conn = rusqlite::Connection::open(project.root().join("dev.db")).unwrap();
    let count: i64 = conn
        .query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))
        .unwrap();
    assert_eq!(count, 1);
}

#[test]
fn unregistered_hook_fails_the_migration() {
    let mut project = Project::new();
    let store = project.store();
    let script = MigrationScript {
        name: "0001_hooked".to_string(),
        operations: vec![crate::script::OperationPair {
            up: Operation::Hook {
                name: "missing".into(),
            },
            down: Operation::Noop,
        }],
    };
    store.write_script(&script).unwrap();
    store
        .store_snapshot("0001_hooked", &project.root().join("schema.prisma"))
        .unwrap();

    let err = project.lens.migrate(None, false).unwrap_err();
    assert!(err.to_string().contains("no hook registered"), "{err}");
    assert!(project.applied().is_empty());
}

#[test]
fn prepare_adopts_an_unmanaged_database() {
    let mut project = Project::new();
    project
        .tool
        .queue_diff("CREATE TABLE adopted (id INTEGER PRIMARY KEY);\n");

    project.lens.prepare().unwrap();

    assert_eq!(
        project.store().migration_names().unwrap(),
        vec!["0001_init".to_string()]
    );
    assert_eq!(project.applied(), vec!["0001_init".to_string()]);
    assert_eq!(project.table_names(), vec!["adopted".to_string()]);
    let calls = project.tool.calls.borrow();
    let pull = calls.iter().position(|c| c == "pull_schema").unwrap();
    let reset = calls.iter().position(|c| c == "reset_database").unwrap();
    assert!(pull < reset);
}

#[test]
fn prepare_refuses_a_managed_project() {
    let mut project = Project::new();
    project
        .tool
        .queue_diff("CREATE TABLE users (id INTEGER PRIMARY KEY);\n");
    project
        .lens
        .make_migration("add_users", SynthesisOptions::default())
        .unwrap();

    let err = project.lens.prepare().unwrap_err();
    assert!(err.to_string().contains("not empty"), "{err}");
}

#[test]
fn failed_synthesis_still_releases_the_scratch_database() {
    let mut project = Project::new();
    project
        .tool
        .queue_diff("CREATE TABLE users (id INTEGER PRIMARY KEY);\n");
    project
        .lens
        .make_migration("add_users", SynthesisOptions::default())
        .unwrap();

    // Mismatched statement counts under the strict policy abort pairing
    // after the scratch database has been acquired.
    project.write_schema(SCHEMA_V2);
    project.tool.queue_diff(
        "CREATE TABLE posts (id INTEGER PRIMARY KEY);\nCREATE INDEX posts_id ON posts (id);\n",
    );
    project.tool.queue_diff("DROP TABLE posts;\n");
    let err = project
        .lens
        .make_migration("add_posts", SynthesisOptions::default())
        .unwrap_err();
    assert!(err.to_string().contains("different operation counts"), "{err}");

    assert!(project.shadow_files().is_empty());
    // The active schema definition was restored on the way out.
    assert_eq!(project.schema(), SCHEMA_V2);
}
