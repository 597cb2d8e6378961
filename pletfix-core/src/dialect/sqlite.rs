use super::{Dialect, TruncateStrategy};

/// Resets the autoincrement counter of the table bound to `?`.
const RESET_SEQUENCE: &str = "DELETE FROM sqlite_sequence WHERE name = ?";

/// `sqlite_sequence` exists only once an `AUTOINCREMENT` table has been created.
const SEQUENCE_TABLE_PROBE: &str =
    "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'sqlite_sequence'";

/// SQLite syntax.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteDialect;

impl Dialect for SqliteDialect {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn extra_keywords(&self) -> &'static [&'static str] {
        &["GLOB", "REGEXP", "MATCH"]
    }

    fn limit_literal(&self, limit: u64) -> String {
        if limit == u64::MAX {
            "-1".to_owned()
        } else {
            limit.to_string()
        }
    }

    fn truncate_strategy(&self) -> TruncateStrategy {
        TruncateStrategy::DeleteAndResetSequence {
            probe: SEQUENCE_TABLE_PROBE,
            reset: RESET_SEQUENCE,
        }
    }

    fn compile_truncate(&self, table: &str) -> String {
        format!("DELETE FROM {}", self.quote_name(table))
    }
}
