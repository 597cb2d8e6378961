use super::Dialect;
use crate::schema::SchemaColumn;

/// PostgreSQL syntax.
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresDialect;

impl Dialect for PostgresDialect {
    fn name(&self) -> &'static str {
        "pgsql"
    }

    fn extra_keywords(&self) -> &'static [&'static str] {
        &["ILIKE", "CURRENT_DATE"]
    }

    fn limit_literal(&self, limit: u64) -> String {
        if limit == u64::MAX {
            "ALL".to_owned()
        } else {
            limit.to_string()
        }
    }

    fn empty_insert_needs_schema(&self) -> bool {
        true
    }

    /// PostgreSQL has no `()` row syntax, so one column is written
    /// explicitly: the identity column from its sequence, otherwise the first
    /// column's default, `NULL` or an empty string.
    fn compile_insert_empty(&self, table: &str, columns: &[SchemaColumn]) -> String {
        let quoted = self.quote_name(table);
        let Some(column) = columns
            .iter()
            .find(|c| c.auto_increment)
            .or_else(|| columns.first())
        else {
            return format!("INSERT INTO {} DEFAULT VALUES", quoted);
        };

        let value = if column.auto_increment {
            format!(
                "nextval(pg_get_serial_sequence('{}','{}'))",
                escape_literal(table),
                escape_literal(&column.name)
            )
        } else if let Some(default) = &column.default {
            default.clone()
        } else if column.nullable {
            "NULL".to_owned()
        } else {
            "''".to_owned()
        };

        format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quoted,
            self.quote_identifier(&column.name),
            value
        )
    }

    fn compile_truncate(&self, table: &str) -> String {
        format!("TRUNCATE TABLE {} RESTART IDENTITY", self.quote_name(table))
    }
}

fn escape_literal(s: &str) -> String {
    s.replace('\'', "''")
}
