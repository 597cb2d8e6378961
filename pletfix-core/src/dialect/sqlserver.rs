use super::{BODY_CLAUSES, CompiledQuery, Dialect, PageContext, SelectParts};
use crate::bindings::Clause;
use std::fmt::Write;

/// How a server version paginates with an offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pagination {
    /// `ORDER BY … OFFSET m ROWS FETCH NEXT n ROWS ONLY` (2012+).
    OffsetFetch,
    /// `ROW_NUMBER() OVER (ORDER BY …)` in a derived table (2005, 2008).
    RowNumber,
    /// Double-nested `TOP` with a reversed order in between (2000).
    TopSandwich,
}

/// Lowest major version supporting each strategy, newest first.
const CAPABILITIES: [(u32, Pagination); 3] = [
    (11, Pagination::OffsetFetch),
    (9, Pagination::RowNumber),
    (0, Pagination::TopSandwich),
];

const ROW_NUM: &str = "[_row_num]";

/// Microsoft SQL Server syntax.
#[derive(Debug, Clone, Copy)]
pub struct SqlServerDialect {
    pagination: Pagination,
}

impl Default for SqlServerDialect {
    fn default() -> Self {
        Self::new(11)
    }
}

impl SqlServerDialect {
    /// Dialect for a server major version (8 = 2000, 9 = 2005, 10 = 2008, 11 = 2012).
    pub fn new(major_version: u32) -> Self {
        let pagination = CAPABILITIES
            .iter()
            .find(|(floor, _)| major_version >= *floor)
            .map(|(_, p)| *p)
            .unwrap_or(Pagination::TopSandwich);
        Self { pagination }
    }

    /// Parses a version such as `"10.50.1600"` or `"11"`.
    pub fn from_version(version: &str) -> Option<Self> {
        let major = version.trim().split('.').next()?.parse().ok()?;
        Some(Self::new(major))
    }

    pub fn with_pagination(pagination: Pagination) -> Self {
        Self { pagination }
    }

    pub fn pagination(&self) -> Pagination {
        self.pagination
    }

    fn default_order(&self, page: &PageContext, fallback: &str) -> String {
        page.identity_column
            .clone()
            .unwrap_or_else(|| fallback.to_owned())
    }

    fn compile_offset_fetch(&self, q: &SelectParts<'_>, offset: u64) -> CompiledQuery {
        let order = q.order_list().unwrap_or_else(|| "(SELECT 0)".to_owned());
        let mut sql = format!(
            "SELECT {}{}{} ORDER BY {} OFFSET {} ROWS",
            q.flags(),
            q.select_list(),
            q.body(),
            order,
            offset
        );
        if let Some(limit) = q.limit.filter(|l| *l != u64::MAX) {
            let _ = write!(sql, " FETCH NEXT {} ROWS ONLY", limit);
        }
        CompiledQuery {
            sql,
            bindings: q.bindings.flatten(),
        }
    }

    fn compile_row_number(
        &self,
        q: &SelectParts<'_>,
        offset: u64,
        page: &PageContext,
    ) -> CompiledQuery {
        let order = q
            .order_list()
            .unwrap_or_else(|| self.default_order(page, "(SELECT 0)"));
        let mut bindings = Vec::new();
        let mut sql = if q.distinct {
            // Rows are made distinct before numbering; a row number is unique
            // per row and would defeat DISTINCT.
            let outer_order: Vec<String> = split_order(&order)
                .iter()
                .map(|t| OrderTerm::parse(t).render(false))
                .collect();
            q.bindings.collect_into(&[Clause::Order], &mut bindings);
            q.bindings.collect_into(&[Clause::Select], &mut bindings);
            q.bindings.collect_into(&BODY_CLAUSES, &mut bindings);
            format!(
                "SELECT * FROM (SELECT *, ROW_NUMBER() OVER (ORDER BY {}) AS {} FROM (SELECT DISTINCT {}{}) AS [_distinct]) AS [_paged] WHERE {} > {}",
                outer_order.join(", "),
                ROW_NUM,
                q.select_list(),
                q.body(),
                ROW_NUM,
                offset
            )
        } else {
            // The window's ORDER BY now precedes the body.
            q.bindings
                .collect_into(&[Clause::Select, Clause::Order], &mut bindings);
            q.bindings.collect_into(&BODY_CLAUSES, &mut bindings);
            format!(
                "SELECT * FROM (SELECT {}, ROW_NUMBER() OVER (ORDER BY {}) AS {}{}) AS [_paged] WHERE {} > {}",
                q.select_list(),
                order,
                ROW_NUM,
                q.body(),
                ROW_NUM,
                offset
            )
        };
        if let Some(limit) = q.limit.filter(|l| *l != u64::MAX) {
            let _ = write!(sql, " AND {} <= {}", ROW_NUM, offset.saturating_add(limit));
        }
        let _ = write!(sql, " ORDER BY {}", ROW_NUM);
        CompiledQuery { sql, bindings }
    }

    /// Order columns missing from the select list are projected into the
    /// inner table, since the outer levels can only see what it selects.
    /// Expressions are projected under a `[_order_N]` alias.
    fn compile_top_sandwich(
        &self,
        q: &SelectParts<'_>,
        offset: u64,
        page: &PageContext,
    ) -> CompiledQuery {
        let total = page.total_rows.unwrap_or(u64::MAX);
        let mut limit = q.limit.unwrap_or(u64::MAX);
        if offset.saturating_add(limit) > total {
            limit = total.saturating_sub(offset);
        }
        let order = q
            .order_list()
            .unwrap_or_else(|| self.default_order(page, "1"));
        let items = split_order(&order);
        let terms: Vec<OrderTerm<'_>> = items.iter().map(|t| OrderTerm::parse(t)).collect();

        let mut order_bindings = q.bindings.get(Clause::Order).iter().cloned();
        let mut extra = Vec::new();
        let mut extra_bindings = Vec::new();
        let mut keys = Vec::with_capacity(terms.len());
        for (i, term) in terms.iter().enumerate() {
            let own: Vec<_> = order_bindings
                .by_ref()
                .take(term.expr.matches('?').count())
                .collect();
            if term.expr.bytes().all(|b| b.is_ascii_digit()) {
                keys.push(term.expr.to_owned());
            } else if is_column_ref(term.expr) {
                let name = unqualify(term.expr);
                if !projects(q.columns, name) {
                    extra.push(term.expr.to_owned());
                }
                keys.push(name.to_owned());
            } else {
                let alias = format!("[_order_{}]", i + 1);
                extra.push(format!("{} AS {}", term.expr, alias));
                extra_bindings.extend(own);
                keys.push(alias);
            }
        }
        let direction = |reverse: bool| -> Vec<String> {
            terms
                .iter()
                .zip(&keys)
                .map(|(term, key)| {
                    let dir = if term.descending != reverse { "DESC" } else { "ASC" };
                    format!("{} {}", key, dir)
                })
                .collect()
        };

        let mut inner_list = q.select_list();
        for column in &extra {
            inner_list.push_str(", ");
            inner_list.push_str(column);
        }
        let outer_list = if extra.is_empty() {
            "*".to_owned()
        } else {
            visible_columns(q.columns).unwrap_or_else(|| "*".to_owned())
        };

        let sql = format!(
            "SELECT {} FROM (SELECT TOP {} * FROM (SELECT {}TOP {} {}{} ORDER BY {}) AS [_inner] ORDER BY {}) AS [_outer] ORDER BY {}",
            outer_list,
            limit,
            q.flags(),
            offset.saturating_add(limit),
            inner_list,
            q.body(),
            order,
            direction(true).join(", "),
            direction(false).join(", ")
        );

        let mut bindings = q.bindings.get(Clause::Select).to_vec();
        bindings.extend(extra_bindings);
        q.bindings.collect_into(&BODY_CLAUSES, &mut bindings);
        q.bindings.collect_into(&[Clause::Order], &mut bindings);
        CompiledQuery { sql, bindings }
    }
}

impl Dialect for SqlServerDialect {
    fn name(&self) -> &'static str {
        "sqlsrv"
    }

    fn quote_chars(&self) -> (char, char) {
        ('[', ']')
    }

    fn needs_total_rows(&self, query: &SelectParts<'_>) -> bool {
        query.offset.is_some() && self.pagination == Pagination::TopSandwich
    }

    fn needs_identity_column(&self, query: &SelectParts<'_>) -> bool {
        query.offset.is_some()
            && query.order_by.is_empty()
            && self.pagination != Pagination::OffsetFetch
    }

    fn compile_select(&self, query: &SelectParts<'_>, page: &PageContext) -> CompiledQuery {
        let Some(offset) = query.offset else {
            let top = match query.limit {
                Some(limit) if limit != u64::MAX => format!("TOP {} ", limit),
                _ => String::new(),
            };
            return CompiledQuery {
                sql: format!(
                    "SELECT {}{}{}{}{}",
                    query.flags(),
                    top,
                    query.select_list(),
                    query.body(),
                    query.order_sql()
                ),
                bindings: query.bindings.flatten(),
            };
        };

        match self.pagination {
            Pagination::OffsetFetch => self.compile_offset_fetch(query, offset),
            Pagination::RowNumber => self.compile_row_number(query, offset, page),
            Pagination::TopSandwich => self.compile_top_sandwich(query, offset, page),
        }
    }
}

/// One `ORDER BY` term, split into expression and direction.
struct OrderTerm<'a> {
    expr: &'a str,
    descending: bool,
}

impl<'a> OrderTerm<'a> {
    fn parse(term: &'a str) -> Self {
        let term = term.trim();
        let upper = term.to_ascii_uppercase();
        if upper.ends_with(" DESC") {
            Self {
                expr: term[..term.len() - 5].trim_end(),
                descending: true,
            }
        } else if upper.ends_with(" ASC") {
            Self {
                expr: term[..term.len() - 4].trim_end(),
                descending: false,
            }
        } else {
            Self {
                expr: term,
                descending: false,
            }
        }
    }

    /// Renders the term for use outside the derived table, where table
    /// qualifiers no longer resolve.
    fn render(&self, reverse: bool) -> String {
        let expr = unqualify(self.expr);
        let descending = self.descending != reverse;
        if descending {
            format!("{} DESC", expr)
        } else {
            format!("{} ASC", expr)
        }
    }
}

fn unqualify(expr: &str) -> &str {
    if expr.starts_with('[') && expr.ends_with(']') {
        if let Some(pos) = expr.rfind("].[") {
            return &expr[pos + 2..];
        }
    }
    expr
}

/// `[col]` or `[t].[col]`.
fn is_column_ref(expr: &str) -> bool {
    !expr.is_empty()
        && expr
            .split("].[")
            .enumerate()
            .all(|(i, part)| !part.contains(['(', ' ', ',']) && (i > 0 || part.starts_with('[')))
        && expr.ends_with(']')
}

/// The name a select column is visible under in a derived table.
fn output_name(column: &str) -> Option<&str> {
    match column.rfind(" AS ") {
        Some(pos) if !column[pos..].contains(')') => Some(column[pos + 4..].trim()),
        _ if is_column_ref(column) => Some(unqualify(column)),
        _ => None,
    }
}

fn projects(columns: &[String], name: &str) -> bool {
    columns.is_empty()
        || columns.iter().any(|c| {
            c == "*" || c.ends_with(".*") || output_name(c) == Some(name)
        })
}

/// The select list as seen from outside the derived tables, if every column
/// has a name there.
fn visible_columns(columns: &[String]) -> Option<String> {
    if columns.is_empty() {
        return None;
    }
    let names: Option<Vec<&str>> = columns.iter().map(|c| output_name(c)).collect();
    names.map(|names| names.join(", "))
}

fn split_order(order: &str) -> Vec<String> {
    crate::expression::split_top_level(order, ',')
}
