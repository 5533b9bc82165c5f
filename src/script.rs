//! The migration-script artifact.
//!
//! Instead of executable code, a migration's runnable form is a data-driven
//! descriptor: an ordered list of `[up, down]` operation pairs interpreted by
//! the runner. The descriptor is serialized as JSON next to the raw forward
//! SQL inside the migration folder.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::Error;

/// One executable operation of a migration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Operation {
    /// A raw SQL statement executed on the injected connection.
    RawSql { sql: String },
    /// An opaque hook reference, resolved through the runner's hook registry.
    /// Lets operators attach data transformations to a migration without the
    /// script carrying code.
    Hook { name: String },
    /// Placeholder for a statement with no counterpart in the other
    /// direction. Applying it does nothing.
    Noop,
}

impl Operation {
    fn from_sql(sql: String) -> Self {
        if sql.trim().is_empty() {
            Operation::Noop
        } else {
            Operation::RawSql { sql }
        }
    }
}

/// A forward operation paired with its reverse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationPair {
    pub up: Operation,
    pub down: Operation,
}

/// What to do when the diff generator batched statements differently between
/// the forward and the reverse direction, leaving the two sides with
/// different operation counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MismatchPolicy {
    /// Join each side into a single combined operation block (logged as a
    /// warning).
    AutoJoin,
    /// Refuse and surface an error, so an operator can approve the join
    /// explicitly (e.g. by re-running with the auto-resolve flag).
    Fail,
}

/// The serialized form of a migration: its name plus the ordered operation
/// pairs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationScript {
    pub name: String,
    pub operations: Vec<OperationPair>,
}

impl MigrationScript {
    /// Build the paired operation list from the forward and reverse statement
    /// lists. Equal lengths pair element-wise; mismatched lengths are handled
    /// per the given policy. A statement with an empty counterpart gets a
    /// [`Operation::Noop`] partner, never a hole.
    pub fn paired(
        name: impl Into<String>,
        up: Vec<String>,
        down: Vec<String>,
        policy: MismatchPolicy,
    ) -> Result<Self, Error> {
        let name = name.into();
        let (up, down) = if up.len() == down.len() {
            (up, down)
        } else if down.is_empty() {
            // Nothing to revert (e.g. the first migration of a project).
            // Not a batching mismatch; every statement pairs with a Noop.
            let pad = vec![String::new(); up.len()];
            (up, pad)
        } else if up.is_empty() {
            let pad = vec![String::new(); down.len()];
            (pad, down)
        } else {
            match policy {
                MismatchPolicy::AutoJoin => {
                    warn!(
                        migration = %name,
                        "up and down have different operation counts ({} vs {}), \
                         joining each side into a single operation",
                        up.len(),
                        down.len()
                    );
                    (vec![up.join("\n")], vec![down.join("\n")])
                }
                MismatchPolicy::Fail => {
                    return Err(Error::Generic(format!(
                        "migration {name}: up and down have different operation counts \
                         ({} vs {}); re-run with auto-resolve to join them into a single \
                         operation",
                        up.len(),
                        down.len()
                    )));
                }
            }
        };

        let operations = up
            .into_iter()
            .zip(down)
            .map(|(u, d)| OperationPair {
                up: Operation::from_sql(u),
                down: Operation::from_sql(d),
            })
            .collect();

        Ok(Self { name, operations })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stmts(s: &[&str]) -> Vec<String> {
        s.iter().map(|x| x.to_string()).collect()
    }

    #[test]
    fn equal_lengths_pair_element_wise() {
        let script = MigrationScript::paired(
            "m1",
            stmts(&["CREATE TABLE a (id int);", "CREATE TABLE b (id int);"]),
            stmts(&["DROP TABLE a;", "DROP TABLE b;"]),
            MismatchPolicy::Fail,
        )
        .unwrap();
        assert_eq!(script.operations.len(), 2);
        assert_eq!(
            script.operations[1],
            OperationPair {
                up: Operation::RawSql {
                    sql: "CREATE TABLE b (id int);".into()
                },
                down: Operation::RawSql {
                    sql: "DROP TABLE b;".into()
                },
            }
        );
    }

    #[test]
    fn mismatch_with_auto_join_collapses_each_side() {
        let script = MigrationScript::paired(
            "m1",
            stmts(&["CREATE TABLE a (id int);", "CREATE TABLE b (id int);"]),
            stmts(&["DROP TABLE a;"]),
            MismatchPolicy::AutoJoin,
        )
        .unwrap();
        assert_eq!(script.operations.len(), 1);
        assert_eq!(
            script.operations[0].up,
            Operation::RawSql {
                sql: "CREATE TABLE a (id int);\nCREATE TABLE b (id int);".into()
            }
        );
        assert_eq!(
            script.operations[0].down,
            Operation::RawSql {
                sql: "DROP TABLE a;".into()
            }
        );
    }

    #[test]
    fn mismatch_without_auto_join_is_an_error() {
        let err = MigrationScript::paired(
            "m1",
            stmts(&["CREATE TABLE a (id int);", "CREATE TABLE b (id int);"]),
            stmts(&["DROP TABLE a;"]),
            MismatchPolicy::Fail,
        )
        .unwrap_err();
        assert!(err.to_string().contains("different operation counts"));
    }

    #[test]
    fn empty_side_becomes_noop_never_a_hole() {
        // First migration of a project: there is nothing to revert, which is
        // not a count mismatch even under the strict policy.
        let script = MigrationScript::paired(
            "m1",
            stmts(&["CREATE TABLE a (id int);", "CREATE TABLE b (id int);"]),
            stmts(&[]),
            MismatchPolicy::Fail,
        )
        .unwrap();
        assert_eq!(script.operations.len(), 2);
        assert_eq!(script.operations[0].down, Operation::Noop);
        assert_eq!(script.operations[1].down, Operation::Noop);
    }

    #[test]
    fn descriptor_serializes_to_tagged_json() {
        let script = MigrationScript::paired(
            "m1",
            stmts(&["CREATE TABLE a (id int);"]),
            stmts(&["DROP TABLE a;"]),
            MismatchPolicy::Fail,
        )
        .unwrap();
        let json = serde_json::to_string(&script).unwrap();
        assert!(json.contains("\"kind\":\"rawSql\""), "{json}");
        let back: MigrationScript = serde_json::from_str(&json).unwrap();
        assert_eq!(back, script);
    }
}
