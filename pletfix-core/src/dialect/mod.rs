//! Database-engine specific SQL syntax.
//!
//! The portable parts of statement assembly live in the default methods of
//! [`Dialect`]; each engine overrides only what is not portable: pagination,
//! empty-row inserts, deletes with joins and truncation.

mod mysql;
mod postgres;
mod sqlite;
mod sqlserver;

pub use mysql::MySqlDialect;
pub use postgres::PostgresDialect;
pub use sqlite::SqliteDialect;
pub use sqlserver::{Pagination, SqlServerDialect};

use crate::bindings::{Bindings, Clause};
use crate::schema::SchemaColumn;
use crate::value::Value;
use std::fmt::{self, Write};

/// Keywords the expression compiler upper-cases instead of quoting.
pub const KEYWORDS: &[&str] = &[
    "ALL", "AND", "ANY", "BETWEEN", "EXISTS", "IN", "LIKE", "NOT", "OR", "SOME", "AS", "IS",
    "NULL", "TRUE", "FALSE", "CASE", "WHEN", "THEN", "ELSE", "END", "ASC", "DESC", "DISTINCT",
];

/// Clauses between the select list and `ORDER BY`.
pub const BODY_CLAUSES: [Clause; 5] = [
    Clause::From,
    Clause::Join,
    Clause::Where,
    Clause::Group,
    Clause::Having,
];

/// The compiled clause lists of a query, borrowed from the builder.
#[derive(Debug, Clone, Copy)]
pub struct SelectParts<'a> {
    pub distinct: bool,
    pub columns: &'a [String],
    pub from: &'a [String],
    pub joins: &'a [String],
    pub wheres: &'a [String],
    pub group_by: &'a [String],
    pub having: &'a [String],
    pub order_by: &'a [String],
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    pub bindings: &'a Bindings,
}

impl SelectParts<'_> {
    /// `DISTINCT ` or nothing.
    pub fn flags(&self) -> &'static str {
        if self.distinct { "DISTINCT " } else { "" }
    }

    pub fn select_list(&self) -> String {
        if self.columns.is_empty() {
            "*".to_owned()
        } else {
            self.columns.join(", ")
        }
    }

    /// `FROM`, `JOIN`, `WHERE`, `GROUP BY` and `HAVING`, each with a leading space.
    pub fn body(&self) -> String {
        let mut sql = String::with_capacity(128);
        if !self.from.is_empty() {
            let _ = write!(sql, " FROM {}", self.from.join(", "));
        }
        sql.push_str(&self.join_sql());
        sql.push_str(&self.where_sql());
        if !self.group_by.is_empty() {
            let _ = write!(sql, " GROUP BY {}", self.group_by.join(", "));
        }
        if !self.having.is_empty() {
            let _ = write!(sql, " HAVING {}", self.having.join(" "));
        }
        sql
    }

    pub fn join_sql(&self) -> String {
        if self.joins.is_empty() {
            String::new()
        } else {
            format!(" {}", self.joins.join(" "))
        }
    }

    pub fn where_sql(&self) -> String {
        if self.wheres.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.wheres.join(" "))
        }
    }

    pub fn order_list(&self) -> Option<String> {
        if self.order_by.is_empty() {
            None
        } else {
            Some(self.order_by.join(", "))
        }
    }

    pub fn order_sql(&self) -> String {
        self.order_list()
            .map(|order| format!(" ORDER BY {}", order))
            .unwrap_or_default()
    }

    /// Collects bindings of the given clauses in order.
    pub fn bindings_for(&self, clauses: &[Clause]) -> Vec<Value> {
        let mut out = Vec::new();
        self.bindings.collect_into(clauses, &mut out);
        out
    }
}

/// SQL text together with its bindings in placeholder order.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    pub sql: String,
    pub bindings: Vec<Value>,
}

/// Facts some dialects need from the database before paginating.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageContext {
    /// Total rows of the unpaginated query.
    pub total_rows: Option<u64>,
    /// Quoted identity column used when the caller gave no order.
    pub identity_column: Option<String>,
}

/// The table a `DELETE` targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteTarget {
    pub table: String,
    pub alias: Option<String>,
}

/// How `truncate()` is carried out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TruncateStrategy {
    /// A native `TRUNCATE TABLE` statement.
    Truncate,
    /// `DELETE FROM` plus a reset of the autoincrement bookkeeping, in one
    /// transaction. `reset` runs only when `probe` counts a non-zero result
    /// and binds the table name.
    DeleteAndResetSequence {
        probe: &'static str,
        reset: &'static str,
    },
}

/// SQL syntax of one database engine.
pub trait Dialect: Send + Sync + fmt::Debug {
    /// Driver name, as used in configuration (`sqlite`, `mysql`, `pgsql`, `sqlsrv`).
    fn name(&self) -> &'static str;

    /// Opening and closing identifier quote characters.
    fn quote_chars(&self) -> (char, char) {
        ('"', '"')
    }

    /// Quotes a single identifier, doubling embedded closing quotes.
    fn quote_identifier(&self, ident: &str) -> String {
        let (open, close) = self.quote_chars();
        let mut quoted = String::with_capacity(ident.len() + 2);
        quoted.push(open);
        for c in ident.chars() {
            if c == close {
                quoted.push(close);
            }
            quoted.push(c);
        }
        quoted.push(close);
        quoted
    }

    /// Quotes a possibly qualified name (`table.column`, `table.*`).
    fn quote_name(&self, name: &str) -> String {
        name.split('.')
            .map(|part| {
                if part == "*" {
                    part.to_owned()
                } else {
                    self.quote_identifier(part.trim())
                }
            })
            .collect::<Vec<_>>()
            .join(".")
    }

    /// Keywords of this engine on top of [`KEYWORDS`].
    fn extra_keywords(&self) -> &'static [&'static str] {
        &[]
    }

    fn is_keyword(&self, word: &str) -> bool {
        KEYWORDS.iter().any(|k| k.eq_ignore_ascii_case(word))
            || self.extra_keywords().iter().any(|k| k.eq_ignore_ascii_case(word))
    }

    /// Renders a `LIMIT` value; `u64::MAX` is the offset-only sentinel.
    fn limit_literal(&self, limit: u64) -> String {
        limit.to_string()
    }

    /// Whether pagination needs [`PageContext::total_rows`].
    fn needs_total_rows(&self, _query: &SelectParts<'_>) -> bool {
        false
    }

    /// Whether pagination needs [`PageContext::identity_column`].
    fn needs_identity_column(&self, _query: &SelectParts<'_>) -> bool {
        false
    }

    fn compile_select(&self, query: &SelectParts<'_>, _page: &PageContext) -> CompiledQuery {
        let mut sql = format!(
            "SELECT {}{}{}{}",
            query.flags(),
            query.select_list(),
            query.body(),
            query.order_sql()
        );
        if let Some(limit) = query.limit {
            let _ = write!(sql, " LIMIT {}", self.limit_literal(limit));
        }
        if let Some(offset) = query.offset {
            let _ = write!(sql, " OFFSET {}", offset);
        }
        CompiledQuery {
            sql,
            bindings: query.bindings.flatten(),
        }
    }

    /// Whether [`Dialect::compile_insert_empty`] needs the table's columns.
    fn empty_insert_needs_schema(&self) -> bool {
        false
    }

    /// Inserts a row consisting of defaults only.
    fn compile_insert_empty(&self, table: &str, _columns: &[SchemaColumn]) -> String {
        format!("INSERT INTO {} DEFAULT VALUES", self.quote_name(table))
    }

    fn compile_delete(&self, target: &DeleteTarget, query: &SelectParts<'_>) -> CompiledQuery {
        let source = match query.from.first() {
            Some(from) => from.clone(),
            None => self.quote_name(&target.table),
        };
        CompiledQuery {
            sql: format!(
                "DELETE FROM {}{}{}",
                source,
                query.join_sql(),
                query.where_sql()
            ),
            bindings: query.bindings_for(&[Clause::From, Clause::Join, Clause::Where]),
        }
    }

    /// Whether `UPDATE` may carry `JOIN` clauses.
    fn supports_update_join(&self) -> bool {
        false
    }

    fn truncate_strategy(&self) -> TruncateStrategy {
        TruncateStrategy::Truncate
    }

    fn compile_truncate(&self, table: &str) -> String {
        format!("TRUNCATE TABLE {}", self.quote_name(table))
    }
}
