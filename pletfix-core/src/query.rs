use crate::bindings::{Bindings, Clause};
use crate::database::Database;
use crate::dialect::{
    CompiledQuery, DeleteTarget, Dialect, PageContext, SelectParts, TruncateStrategy,
};
use crate::error::{PletfixError, PletfixResult};
use crate::expression::{compile_expression, compile_list};
use crate::hooks;
use crate::model::{Entity, HookKind, ModelClass};
use crate::orm::Orm;
use crate::relation;
use crate::schema::identity_column;
use crate::value::{Row, Value};
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use serde::de::DeserializeOwned;
use std::sync::Arc;

/// Join flavours.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Left,
    Right,
}

impl JoinKind {
    fn as_sql(self) -> &'static str {
        match self {
            JoinKind::Inner => "INNER JOIN",
            JoinKind::Left => "LEFT JOIN",
            JoinKind::Right => "RIGHT JOIN",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Connector {
    And,
    Or,
}

/// A fluent, mutable SQL query builder.
///
/// Clauses are compiled through the dialect as they are added; each clause
/// keeps its own binding list so the final binding order always follows the
/// placeholders in the SQL text. `clone()` gives an independent copy.
#[derive(Debug, Clone)]
pub struct QueryBuilder {
    orm: Orm,
    distinct: bool,
    columns: Vec<String>,
    from: Vec<String>,
    table: Option<String>,
    alias: Option<String>,
    joins: Vec<String>,
    wheres: Vec<String>,
    group_by: Vec<String>,
    having: Vec<String>,
    order_by: Vec<String>,
    limit: Option<u64>,
    offset: Option<u64>,
    bindings: Bindings,
    class: Option<Arc<ModelClass>>,
    with: Vec<String>,
    hooks_enabled: bool,
}

impl QueryBuilder {
    pub(crate) fn new(orm: Orm) -> Self {
        Self {
            orm,
            distinct: false,
            columns: Vec::new(),
            from: Vec::new(),
            table: None,
            alias: None,
            joins: Vec::new(),
            wheres: Vec::new(),
            group_by: Vec::new(),
            having: Vec::new(),
            order_by: Vec::new(),
            limit: None,
            offset: None,
            bindings: Bindings::new(),
            class: None,
            with: Vec::new(),
            hooks_enabled: true,
        }
    }

    /// A builder scoped to the class's table, hydrating into the class.
    pub(crate) fn for_class(orm: Orm, class: Arc<ModelClass>) -> Self {
        let table = class.table_name().to_owned();
        let mut builder = Self::new(orm).table(&table);
        builder.class = Some(class);
        builder
    }

    /// Returns the builder to its freshly constructed state.
    pub fn reset(&mut self) {
        *self = Self::new(self.orm.clone());
    }

    pub fn orm(&self) -> &Orm {
        &self.orm
    }

    fn db(&self) -> &dyn Database {
        self.orm.db().as_ref()
    }

    fn dialect(&self) -> &dyn Dialect {
        self.orm.dialect()
    }

    fn compile(&self, expr: &str) -> String {
        compile_expression(self.dialect(), expr)
    }

    pub fn class(&self) -> Option<&Arc<ModelClass>> {
        self.class.as_ref()
    }

    /// Hydrates results into `class` and enables its hooks and relations.
    pub fn as_class(mut self, class: Arc<ModelClass>) -> Self {
        self.class = Some(class);
        self
    }

    /// The unquoted target table, if one was set.
    pub fn table_name(&self) -> Option<&str> {
        self.table.as_deref()
    }

    fn table_label(&self) -> &str {
        self.table.as_deref().unwrap_or("")
    }

    // ---- SELECT ----

    /// Adds comma separated columns to the select list.
    pub fn select(mut self, columns: &str) -> Self {
        let compiled = compile_list(self.dialect(), columns);
        self.columns.extend(compiled);
        self
    }

    /// Adds a select expression carrying its own bindings.
    pub fn select_raw(mut self, expr: &str, bindings: impl IntoIterator<Item = Value>) -> Self {
        let compiled = self.compile(expr);
        self.columns.push(compiled);
        self.bindings.extend(Clause::Select, bindings);
        self
    }

    /// Adds `(subquery) AS alias` to the select list.
    pub fn select_sub(mut self, sub: QueryBuilder, alias: &str) -> Self {
        let compiled = sub.compiled();
        let alias = self.dialect().quote_identifier(alias);
        self.columns.push(format!("({}) AS {}", compiled.sql, alias));
        self.bindings.extend(Clause::Select, compiled.bindings);
        self
    }

    pub fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    // ---- FROM ----

    /// Adds a source to the `FROM` list.
    pub fn from(self, source: &str) -> Self {
        self.from_raw(source, None, Vec::new())
    }

    pub fn from_as(self, source: &str, alias: &str) -> Self {
        self.from_raw(source, Some(alias), Vec::new())
    }

    /// Adds a source carrying its own bindings, e.g. a table-valued function.
    pub fn from_raw(
        mut self,
        source: &str,
        alias: Option<&str>,
        bindings: impl IntoIterator<Item = Value>,
    ) -> Self {
        let mut compiled = self.compile(source);
        if let Some(alias) = alias {
            compiled = format!("{} AS {}", compiled, self.dialect().quote_identifier(alias));
        }
        if self.table.is_none() {
            self.table = Some(source.trim().to_owned());
            self.alias = alias.map(str::to_owned);
        }
        self.from.push(compiled);
        self.bindings.extend(Clause::From, bindings);
        self
    }

    /// Adds `(subquery) AS alias` to the `FROM` list.
    pub fn from_sub(mut self, sub: QueryBuilder, alias: &str) -> Self {
        let compiled = sub.compiled();
        let alias = self.dialect().quote_identifier(alias);
        self.from.push(format!("({}) AS {}", compiled.sql, alias));
        self.bindings.extend(Clause::From, compiled.bindings);
        self
    }

    /// Replaces the first `FROM` entry with `name`, which becomes the target
    /// table of inserts, updates and deletes.
    pub fn table(mut self, name: &str) -> Self {
        let compiled = self.dialect().quote_name(name.trim());
        match self.from.first_mut() {
            Some(first) => *first = compiled,
            None => self.from.push(compiled),
        }
        self.table = Some(name.trim().to_owned());
        self.alias = None;
        self
    }

    // ---- JOIN ----

    pub fn join(self, source: &str, on: &str) -> Self {
        self.join_raw(JoinKind::Inner, source, None, on, Vec::new())
    }

    pub fn left_join(self, source: &str, on: &str) -> Self {
        self.join_raw(JoinKind::Left, source, None, on, Vec::new())
    }

    pub fn right_join(self, source: &str, on: &str) -> Self {
        self.join_raw(JoinKind::Right, source, None, on, Vec::new())
    }

    pub fn join_as(self, kind: JoinKind, source: &str, alias: &str, on: &str) -> Self {
        self.join_raw(kind, source, Some(alias), on, Vec::new())
    }

    /// Adds `KIND JOIN source [AS alias] ON condition` with bindings for the condition.
    pub fn join_raw(
        mut self,
        kind: JoinKind,
        source: &str,
        alias: Option<&str>,
        on: &str,
        bindings: impl IntoIterator<Item = Value>,
    ) -> Self {
        let mut compiled = self.compile(source);
        if let Some(alias) = alias {
            compiled = format!("{} AS {}", compiled, self.dialect().quote_identifier(alias));
        }
        let on = self.compile(on);
        self.joins
            .push(format!("{} {} ON {}", kind.as_sql(), compiled, on));
        self.bindings.extend(Clause::Join, bindings);
        self
    }

    /// Joins `(subquery) AS alias`; the subquery's bindings come first.
    pub fn join_sub(mut self, kind: JoinKind, sub: QueryBuilder, alias: &str, on: &str) -> Self {
        let compiled = sub.compiled();
        let alias = self.dialect().quote_identifier(alias);
        let on = self.compile(on);
        self.joins.push(format!(
            "{} ({}) AS {} ON {}",
            kind.as_sql(),
            compiled.sql,
            alias,
            on
        ));
        self.bindings.extend(Clause::Join, compiled.bindings);
        self
    }

    // ---- WHERE ----

    fn add_where(mut self, connector: Connector, sql: String, bindings: Vec<Value>) -> Self {
        push_condition(&mut self.wheres, connector, sql);
        self.bindings.extend(Clause::Where, bindings);
        self
    }

    /// `column = ?`
    pub fn where_is(self, column: &str, value: impl Into<Value>) -> Self {
        self.where_op(column, "=", value)
    }

    pub fn or_where_is(self, column: &str, value: impl Into<Value>) -> Self {
        self.or_where_op(column, "=", value)
    }

    /// `column <operator> ?`
    pub fn where_op(self, column: &str, operator: &str, value: impl Into<Value>) -> Self {
        self.where_op_with(Connector::And, column, operator, value.into())
    }

    pub fn or_where_op(self, column: &str, operator: &str, value: impl Into<Value>) -> Self {
        self.where_op_with(Connector::Or, column, operator, value.into())
    }

    fn where_op_with(self, connector: Connector, column: &str, operator: &str, value: Value) -> Self {
        let sql = format!("{} {} ?", self.compile(column), operator.trim().to_uppercase());
        self.add_where(connector, sql, vec![value])
    }

    /// A raw condition such as `"age > ? AND name LIKE ?"`.
    pub fn where_condition(self, condition: &str, bindings: impl IntoIterator<Item = Value>) -> Self {
        let sql = self.compile(condition);
        self.add_where(Connector::And, sql, bindings.into_iter().collect())
    }

    pub fn or_where_condition(
        self,
        condition: &str,
        bindings: impl IntoIterator<Item = Value>,
    ) -> Self {
        let sql = self.compile(condition);
        self.add_where(Connector::Or, sql, bindings.into_iter().collect())
    }

    /// `column <operator> (subquery)`
    pub fn where_sub_query(self, column: &str, operator: &str, sub: QueryBuilder) -> Self {
        self.where_sub_query_with(Connector::And, column, operator, sub)
    }

    pub fn or_where_sub_query(self, column: &str, operator: &str, sub: QueryBuilder) -> Self {
        self.where_sub_query_with(Connector::Or, column, operator, sub)
    }

    fn where_sub_query_with(
        self,
        connector: Connector,
        column: &str,
        operator: &str,
        sub: QueryBuilder,
    ) -> Self {
        let compiled = sub.compiled();
        let sql = format!(
            "{} {} ({})",
            self.compile(column),
            operator.trim().to_uppercase(),
            compiled.sql
        );
        self.add_where(connector, sql, compiled.bindings)
    }

    pub fn where_exists(self, sub: QueryBuilder) -> Self {
        self.where_exists_with(Connector::And, "EXISTS", sub)
    }

    pub fn or_where_exists(self, sub: QueryBuilder) -> Self {
        self.where_exists_with(Connector::Or, "EXISTS", sub)
    }

    pub fn where_not_exists(self, sub: QueryBuilder) -> Self {
        self.where_exists_with(Connector::And, "NOT EXISTS", sub)
    }

    pub fn or_where_not_exists(self, sub: QueryBuilder) -> Self {
        self.where_exists_with(Connector::Or, "NOT EXISTS", sub)
    }

    fn where_exists_with(self, connector: Connector, keyword: &str, sub: QueryBuilder) -> Self {
        let compiled = sub.compiled();
        self.add_where(
            connector,
            format!("{} ({})", keyword, compiled.sql),
            compiled.bindings,
        )
    }

    /// `column IN (?, ?, …)`; an empty list matches nothing.
    pub fn where_in<V: Into<Value>>(self, column: &str, values: impl IntoIterator<Item = V>) -> Self {
        self.where_in_with(Connector::And, false, column, values)
    }

    pub fn or_where_in<V: Into<Value>>(
        self,
        column: &str,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        self.where_in_with(Connector::Or, false, column, values)
    }

    /// `column NOT IN (?, ?, …)`; an empty list matches everything.
    pub fn where_not_in<V: Into<Value>>(
        self,
        column: &str,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        self.where_in_with(Connector::And, true, column, values)
    }

    pub fn or_where_not_in<V: Into<Value>>(
        self,
        column: &str,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        self.where_in_with(Connector::Or, true, column, values)
    }

    fn where_in_with<V: Into<Value>>(
        self,
        connector: Connector,
        negate: bool,
        column: &str,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        let values: Vec<Value> = values.into_iter().map(Into::into).collect();
        if values.is_empty() {
            let always = if negate { "1 = 1" } else { "1 = 0" };
            return self.add_where(connector, always.to_owned(), Vec::new());
        }
        let placeholders = vec!["?"; values.len()].join(", ");
        let sql = format!(
            "{} {}IN ({})",
            self.compile(column),
            if negate { "NOT " } else { "" },
            placeholders
        );
        self.add_where(connector, sql, values)
    }

    pub fn where_between(self, column: &str, low: impl Into<Value>, high: impl Into<Value>) -> Self {
        self.where_between_with(Connector::And, false, column, low.into(), high.into())
    }

    pub fn or_where_between(
        self,
        column: &str,
        low: impl Into<Value>,
        high: impl Into<Value>,
    ) -> Self {
        self.where_between_with(Connector::Or, false, column, low.into(), high.into())
    }

    pub fn where_not_between(
        self,
        column: &str,
        low: impl Into<Value>,
        high: impl Into<Value>,
    ) -> Self {
        self.where_between_with(Connector::And, true, column, low.into(), high.into())
    }

    pub fn or_where_not_between(
        self,
        column: &str,
        low: impl Into<Value>,
        high: impl Into<Value>,
    ) -> Self {
        self.where_between_with(Connector::Or, true, column, low.into(), high.into())
    }

    fn where_between_with(
        self,
        connector: Connector,
        negate: bool,
        column: &str,
        low: Value,
        high: Value,
    ) -> Self {
        let sql = format!(
            "{} {}BETWEEN ? AND ?",
            self.compile(column),
            if negate { "NOT " } else { "" }
        );
        self.add_where(connector, sql, vec![low, high])
    }

    pub fn where_null(self, column: &str) -> Self {
        let sql = format!("{} IS NULL", self.compile(column));
        self.add_where(Connector::And, sql, Vec::new())
    }

    pub fn or_where_null(self, column: &str) -> Self {
        let sql = format!("{} IS NULL", self.compile(column));
        self.add_where(Connector::Or, sql, Vec::new())
    }

    pub fn where_not_null(self, column: &str) -> Self {
        let sql = format!("{} IS NOT NULL", self.compile(column));
        self.add_where(Connector::And, sql, Vec::new())
    }

    pub fn or_where_not_null(self, column: &str) -> Self {
        let sql = format!("{} IS NOT NULL", self.compile(column));
        self.add_where(Connector::Or, sql, Vec::new())
    }

    // ---- GROUP BY / HAVING / ORDER BY / LIMIT ----

    pub fn group_by(mut self, columns: &str) -> Self {
        let compiled = compile_list(self.dialect(), columns);
        self.group_by.extend(compiled);
        self
    }

    pub fn having(mut self, condition: &str, bindings: impl IntoIterator<Item = Value>) -> Self {
        let sql = self.compile(condition);
        push_condition(&mut self.having, Connector::And, sql);
        self.bindings.extend(Clause::Having, bindings);
        self
    }

    pub fn or_having(mut self, condition: &str, bindings: impl IntoIterator<Item = Value>) -> Self {
        let sql = self.compile(condition);
        push_condition(&mut self.having, Connector::Or, sql);
        self.bindings.extend(Clause::Having, bindings);
        self
    }

    /// Comma separated order terms, e.g. `"name DESC, id"`.
    pub fn order_by(mut self, columns: &str) -> Self {
        let compiled = compile_list(self.dialect(), columns);
        self.order_by.extend(compiled);
        self
    }

    /// An order expression carrying its own bindings.
    pub fn order_by_raw(mut self, expr: &str, bindings: impl IntoIterator<Item = Value>) -> Self {
        let compiled = self.compile(expr);
        self.order_by.push(compiled);
        self.bindings.extend(Clause::Order, bindings);
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Without a limit, the dialect's "no limit" sentinel is installed.
    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        if self.limit.is_none() {
            self.limit = Some(u64::MAX);
        }
        self
    }

    /// Relations to eager load after the main query, comma separated.
    /// Nested relations use dots: `"books.reviews"`.
    pub fn with(mut self, relations: &str) -> Self {
        for relation in relations.split(',') {
            let relation = relation.trim();
            if !relation.is_empty() && !self.with.iter().any(|w| w == relation) {
                self.with.push(relation.to_owned());
            }
        }
        self
    }

    pub fn disable_hooks(mut self) -> Self {
        self.hooks_enabled = false;
        self
    }

    pub fn enable_hooks(mut self) -> Self {
        self.hooks_enabled = true;
        self
    }

    // ---- Compilation ----

    pub(crate) fn parts(&self) -> SelectParts<'_> {
        SelectParts {
            distinct: self.distinct,
            columns: &self.columns,
            from: &self.from,
            joins: &self.joins,
            wheres: &self.wheres,
            group_by: &self.group_by,
            having: &self.having,
            order_by: &self.order_by,
            limit: self.limit,
            offset: self.offset,
            bindings: &self.bindings,
        }
    }

    /// SQL text and bindings, compiled without database round trips.
    pub fn compiled(&self) -> CompiledQuery {
        self.dialect()
            .compile_select(&self.parts(), &PageContext::default())
    }

    pub fn to_sql(&self) -> String {
        self.compiled().sql
    }

    /// Bindings in placeholder order.
    pub fn bindings(&self) -> Vec<Value> {
        self.compiled().bindings
    }

    /// Compiles, first asking the database for what the dialect's
    /// pagination needs (row count, identity column).
    async fn compiled_for_execution(&self) -> PletfixResult<CompiledQuery> {
        let dialect = self.dialect();
        let parts = self.parts();
        let mut page = PageContext::default();
        if dialect.needs_identity_column(&parts) {
            if let Some(table) = &self.table {
                let columns = self.db().schema_columns(table).await?;
                page.identity_column =
                    identity_column(&columns).map(|column| dialect.quote_identifier(&column.name));
            }
        }
        if dialect.needs_total_rows(&parts) {
            let count = self.total_rows_query();
            let total = self.db().scalar(&count.sql, &count.bindings).await?;
            page.total_rows = Some(total.as_i64().unwrap_or(0).max(0) as u64);
        }
        Ok(dialect.compile_select(&parts, &page))
    }

    // ---- Retrieval ----

    pub(crate) async fn fetch_rows(&self) -> PletfixResult<Vec<Row>> {
        let compiled = self.compiled_for_execution().await?;
        self.db().query(&compiled.sql, &compiled.bindings).await
    }

    /// Hydrated entities without eager loading.
    pub(crate) async fn fetch_entities(&self) -> PletfixResult<Vec<Entity>> {
        let rows = self.fetch_rows().await?;
        Ok(rows
            .into_iter()
            .map(|row| Entity::from_row(self.class.clone(), row))
            .collect())
    }

    /// Runs the query, then eager loads every relation named in `with`
    /// (one extra query per relation).
    #[tracing::instrument(skip(self), fields(table = self.table_label()))]
    pub async fn all(&self) -> PletfixResult<Vec<Entity>> {
        let class = match (&self.class, self.with.is_empty()) {
            (_, true) => None,
            (Some(class), false) => Some(Arc::clone(class)),
            (None, false) => {
                return Err(PletfixError::logic(
                    "eager loading requires a model class on the builder",
                ));
            }
        };
        let mut entities = self.fetch_entities().await?;
        if let Some(class) = class {
            relation::eager_load(&self.orm, &class, &mut entities, &self.with).await?;
        }
        Ok(entities)
    }

    /// Runs the query and deserializes every entity into `T`.
    pub async fn get_as<T: DeserializeOwned>(&self) -> PletfixResult<Vec<T>> {
        self.all()
            .await?
            .iter()
            .map(Entity::deserialize)
            .collect()
    }

    /// Streams entities one by one. Relations are not eager loaded.
    ///
    /// The stream holds the statement open; drop it to release it.
    #[tracing::instrument(skip(self), fields(table = self.table_label()))]
    pub async fn cursor(&self) -> PletfixResult<BoxStream<'_, PletfixResult<Entity>>> {
        let compiled = self.compiled_for_execution().await?;
        let class = self.class.clone();
        Ok(self
            .db()
            .cursor(compiled.sql, compiled.bindings)
            .map(move |row| row.map(|row| Entity::from_row(class.clone(), row)))
            .boxed())
    }

    pub async fn first(&self) -> PletfixResult<Option<Entity>> {
        Ok(self.clone().limit(1).all().await?.into_iter().next())
    }

    /// The entity whose primary key equals `id`.
    pub async fn find(&self, id: impl Into<Value>) -> PletfixResult<Option<Entity>> {
        let key = self
            .class
            .as_deref()
            .map(ModelClass::primary_key_name)
            .unwrap_or("id")
            .to_owned();
        self.find_by(&key, id).await
    }

    pub async fn find_by(&self, key: &str, value: impl Into<Value>) -> PletfixResult<Option<Entity>> {
        self.clone().where_is(key, value).first().await
    }

    /// First column of the first row, `NULL` if there is none.
    pub async fn value(&self) -> PletfixResult<Value> {
        let compiled = self.compiled_for_execution().await?;
        self.db().scalar(&compiled.sql, &compiled.bindings).await
    }

    // ---- Aggregates ----

    /// The sole selected column with any alias removed, if exactly one
    /// non-wildcard column is selected.
    fn sole_column(&self) -> Option<String> {
        let [column] = self.columns.as_slice() else {
            return None;
        };
        if column == "*" || column.ends_with(".*") {
            return None;
        }
        match column.rfind(" AS ") {
            Some(pos) if !column[pos..].contains(')') => Some(column[..pos].to_owned()),
            _ => Some(column.clone()),
        }
    }

    /// A copy summarizing the whole filtered set: grouping, having,
    /// ordering and pagination are dropped.
    fn aggregate_builder(&self, function: &str, column: Option<&str>) -> QueryBuilder {
        let mut sub = self.clone();
        let column = match column.map(|c| self.compile(c)) {
            Some(column) => {
                sub.bindings.clear(Clause::Select);
                column
            }
            None => self.sole_column().unwrap_or_else(|| {
                sub.bindings.clear(Clause::Select);
                "*".to_owned()
            }),
        };
        let distinct = if self.distinct && column != "*" { "DISTINCT " } else { "" };
        sub.columns = vec![format!("{}({}{})", function, distinct, column)];
        sub.distinct = false;
        sub.group_by.clear();
        sub.having.clear();
        sub.order_by.clear();
        sub.limit = None;
        sub.offset = None;
        sub.with.clear();
        sub.bindings.clear(Clause::Group);
        sub.bindings.clear(Clause::Having);
        sub.bindings.clear(Clause::Order);
        sub
    }

    /// Counts every row the query would page through, NULLs included.
    /// Distinct or grouped queries are counted over a derived table.
    fn total_rows_query(&self) -> CompiledQuery {
        let mut sub = self.clone();
        sub.order_by.clear();
        sub.bindings.clear(Clause::Order);
        sub.limit = None;
        sub.offset = None;
        sub.with.clear();
        if self.distinct || !self.group_by.is_empty() {
            let inner = sub.compiled();
            let alias = self.dialect().quote_identifier("_count");
            return CompiledQuery {
                sql: format!("SELECT COUNT(*) FROM ({}) AS {}", inner.sql, alias),
                bindings: inner.bindings,
            };
        }
        sub.columns = vec!["COUNT(*)".to_owned()];
        sub.bindings.clear(Clause::Select);
        sub.compiled()
    }

    async fn aggregate(&self, function: &str, column: Option<&str>) -> PletfixResult<Value> {
        self.aggregate_builder(function, column).value().await
    }

    #[tracing::instrument(skip(self), fields(table = self.table_label()))]
    pub async fn count(&self, column: Option<&str>) -> PletfixResult<u64> {
        let value = self.aggregate("COUNT", column).await?;
        Ok(value.as_i64().unwrap_or(0).max(0) as u64)
    }

    pub async fn max(&self, column: Option<&str>) -> PletfixResult<Value> {
        self.aggregate("MAX", column).await
    }

    pub async fn min(&self, column: Option<&str>) -> PletfixResult<Value> {
        self.aggregate("MIN", column).await
    }

    pub async fn avg(&self, column: Option<&str>) -> PletfixResult<Option<f64>> {
        Ok(self.aggregate("AVG", column).await?.as_f64())
    }

    pub async fn sum(&self, column: Option<&str>) -> PletfixResult<Value> {
        self.aggregate("SUM", column).await
    }

    // ---- Mutation ----

    /// Inserts one row and returns the generated id.
    ///
    /// An empty row inserts a row of defaults. `None` means a hook cancelled.
    #[tracing::instrument(skip(self, row), fields(table = self.table_label()))]
    pub async fn insert(&self, row: Row) -> PletfixResult<Option<i64>> {
        let mut entities = [Entity::new(self.class.clone(), row)];
        hooks::insert(self, &mut entities).await
    }

    /// Inserts several rows and returns the last generated id.
    #[tracing::instrument(skip(self, rows), fields(table = self.table_label(), rows = rows.len()))]
    pub async fn insert_many(&self, rows: Vec<Row>) -> PletfixResult<Option<i64>> {
        if rows.is_empty() {
            return Err(PletfixError::EmptyData("insert"));
        }
        let mut entities: Vec<Entity> = rows
            .into_iter()
            .map(|row| Entity::new(self.class.clone(), row))
            .collect();
        hooks::insert(self, &mut entities).await
    }

    /// Updates every matching row and returns the affected row count.
    #[tracing::instrument(skip(self, data), fields(table = self.table_label()))]
    pub async fn update(&self, data: Row) -> PletfixResult<Option<u64>> {
        if data.is_empty() {
            return Err(PletfixError::EmptyData("update"));
        }
        hooks::update(self, data).await
    }

    /// Deletes every matching row and returns the affected row count.
    #[tracing::instrument(skip(self), fields(table = self.table_label()))]
    pub async fn delete(&self) -> PletfixResult<Option<u64>> {
        hooks::delete(self).await
    }

    /// Empties the target table, resetting its autoincrement counter.
    #[tracing::instrument(skip(self), fields(table = self.table_label()))]
    pub async fn truncate(&self) -> PletfixResult<u64> {
        let table = self.target_table()?;
        let dialect = self.dialect();
        let sql = dialect.compile_truncate(&table);
        match dialect.truncate_strategy() {
            TruncateStrategy::Truncate => self.db().exec(&sql, &[]).await,
            TruncateStrategy::DeleteAndResetSequence { probe, reset } => {
                let db = self.db();
                db.begin().await?;
                let result = async {
                    let deleted = db.exec(&sql, &[]).await?;
                    if db.scalar(probe, &[]).await?.as_i64().unwrap_or(0) > 0 {
                        db.exec(reset, &[Value::from(table.as_str())]).await?;
                    }
                    Ok(deleted)
                }
                .await;
                hooks::finish_transaction(db, result).await
            }
        }
    }

    // ---- Physical statements, used by the hook dispatcher ----

    pub(crate) fn hooked_class(&self, before: HookKind, after: HookKind) -> Option<Arc<ModelClass>> {
        if !self.hooks_enabled {
            return None;
        }
        self.class
            .as_ref()
            .filter(|class| class.has_hook(before) || class.has_hook(after))
            .cloned()
    }

    fn target_table(&self) -> PletfixResult<String> {
        self.table
            .clone()
            .ok_or_else(|| PletfixError::logic("no target table set on the builder"))
    }

    pub(crate) fn database(&self) -> &dyn Database {
        self.db()
    }

    pub(crate) async fn insert_physical(&self, row: &Row) -> PletfixResult<i64> {
        let table = self.target_table()?;
        let dialect = self.dialect();
        let db = self.db();
        if row.is_empty() {
            let columns = if dialect.empty_insert_needs_schema() {
                db.schema_columns(&table).await?
            } else {
                Vec::new()
            };
            db.exec(&dialect.compile_insert_empty(&table, &columns), &[])
                .await?;
        } else {
            let columns: Vec<String> = row.keys().map(|c| dialect.quote_name(c)).collect();
            let sql = format!(
                "INSERT INTO {} ({}) VALUES ({})",
                dialect.quote_name(&table),
                columns.join(", "),
                vec!["?"; row.len()].join(", ")
            );
            let bindings: Vec<Value> = row.values().cloned().collect();
            db.exec(&sql, &bindings).await?;
        }
        db.last_insert_id().await
    }

    /// One multi-row `INSERT` in the column order of the first row; columns
    /// missing from later rows bind `NULL`.
    pub(crate) async fn insert_rows_physical(&self, rows: &[&Row]) -> PletfixResult<i64> {
        let Some(first) = rows.first() else {
            return Err(PletfixError::EmptyData("insert"));
        };
        if rows.len() == 1 || first.is_empty() {
            let mut id = 0;
            for row in rows {
                id = self.insert_physical(row).await?;
            }
            return Ok(id);
        }
        let table = self.target_table()?;
        let dialect = self.dialect();
        let names: Vec<&String> = first.keys().collect();
        let columns: Vec<String> = names.iter().map(|c| dialect.quote_name(c)).collect();
        let tuple = format!("({})", vec!["?"; names.len()].join(", "));
        let mut bindings = Vec::with_capacity(names.len() * rows.len());
        for row in rows {
            for name in &names {
                bindings.push(row.get(*name).cloned().unwrap_or_default());
            }
        }
        let sql = format!(
            "INSERT INTO {} ({}) VALUES {}",
            dialect.quote_name(&table),
            columns.join(", "),
            vec![tuple; rows.len()].join(", ")
        );
        let db = self.db();
        db.exec(&sql, &bindings).await?;
        db.last_insert_id().await
    }

    pub(crate) async fn update_physical(&self, data: &Row) -> PletfixResult<u64> {
        let dialect = self.dialect();
        if !self.joins.is_empty() && !dialect.supports_update_join() {
            return Err(PletfixError::logic(format!(
                "{} does not support UPDATE with joins",
                dialect.name()
            )));
        }
        if self.from.len() > 1 && !self.bindings.get(Clause::From).is_empty() {
            return Err(PletfixError::logic(
                "UPDATE writes the first FROM source only; other sources cannot carry bindings",
            ));
        }
        let target = match self.from.first() {
            Some(from) => from.clone(),
            None => dialect.quote_name(&self.target_table()?),
        };
        let assignments: Vec<String> = data
            .keys()
            .map(|column| format!("{} = ?", dialect.quote_name(column)))
            .collect();
        let parts = self.parts();
        let sql = format!(
            "UPDATE {}{} SET {}{}",
            target,
            parts.join_sql(),
            assignments.join(", "),
            parts.where_sql()
        );
        let mut bindings = parts.bindings_for(&[Clause::From, Clause::Join]);
        bindings.extend(data.values().cloned());
        self.bindings.collect_into(&[Clause::Where], &mut bindings);
        self.db().exec(&sql, &bindings).await
    }

    pub(crate) async fn delete_physical(&self) -> PletfixResult<u64> {
        let target = DeleteTarget {
            table: self.target_table()?,
            alias: self.alias.clone(),
        };
        let compiled = self.dialect().compile_delete(&target, &self.parts());
        self.db().exec(&compiled.sql, &compiled.bindings).await
    }

    /// The matching entities, for hooks to inspect before a bulk write.
    pub(crate) async fn entities_for_hooks(&self) -> PletfixResult<Vec<Entity>> {
        let mut plain = self.clone();
        plain.with.clear();
        plain.fetch_entities().await
    }
}

fn push_condition(list: &mut Vec<String>, connector: Connector, sql: String) {
    if list.is_empty() {
        list.push(sql);
    } else {
        let prefix = match connector {
            Connector::And => "AND ",
            Connector::Or => "OR ",
        };
        list.push(format!("{}{}", prefix, sql));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::{MySqlDialect, PostgresDialect, SqlServerDialect};
    use crate::row;
    use crate::test_utils::MockDatabase;

    fn orm() -> Orm {
        MockDatabase::new().into_orm()
    }

    #[test]
    fn where_or_where_example() {
        let q = orm().builder().from("t1").where_is("a", 11).or_where_is("b", 22);
        assert_eq!(q.to_sql(), "SELECT * FROM \"t1\" WHERE \"a\" = ? OR \"b\" = ?");
        assert_eq!(q.bindings(), vec![Value::Int(11), Value::Int(22)]);
    }

    #[test]
    fn compilation_is_idempotent() {
        let q = orm()
            .table("users")
            .select("id, name")
            .where_op("age", ">", 18)
            .order_by("name desc");
        assert_eq!(q.to_sql(), q.to_sql());
        assert_eq!(q.bindings(), q.bindings());
        assert_eq!(
            q.to_sql(),
            "SELECT \"id\", \"name\" FROM \"users\" WHERE \"age\" > ? ORDER BY \"name\" DESC"
        );
    }

    #[test]
    fn full_clause_order() {
        let q = orm()
            .builder()
            .select_raw("COALESCE(nick, ?) AS label", [Value::from("anon")])
            .distinct()
            .from("users")
            .left_join("posts", "posts.user_id = users.id")
            .where_not_null("users.email")
            .group_by("users.id")
            .having("COUNT(posts.id) > ?", [Value::from(2)])
            .order_by("users.id")
            .limit(10)
            .offset(20);
        assert_eq!(
            q.to_sql(),
            "SELECT DISTINCT COALESCE(\"nick\", ?) AS \"label\" FROM \"users\" \
             LEFT JOIN \"posts\" ON \"posts\".\"user_id\" = \"users\".\"id\" \
             WHERE \"users\".\"email\" IS NOT NULL GROUP BY \"users\".\"id\" \
             HAVING COUNT(\"posts\".\"id\") > ? ORDER BY \"users\".\"id\" LIMIT 10 OFFSET 20"
        );
        assert_eq!(q.bindings(), vec![Value::from("anon"), Value::from(2)]);
    }

    #[test]
    fn where_variants() {
        let q = orm()
            .table("t")
            .where_in("a", [1, 2])
            .or_where_not_in("b", Vec::<i64>::new())
            .where_between("c", 1, 5)
            .or_where_not_between("d", 6, 9)
            .where_null("e")
            .or_where_condition("f LIKE ?", [Value::from("x%")]);
        assert_eq!(
            q.to_sql(),
            "SELECT * FROM \"t\" WHERE \"a\" IN (?, ?) OR 1 = 1 AND \"c\" BETWEEN ? AND ? \
             OR \"d\" NOT BETWEEN ? AND ? AND \"e\" IS NULL OR \"f\" LIKE ?"
        );
        assert_eq!(q.bindings().len(), 7);
    }

    #[test]
    fn empty_where_in_matches_nothing() {
        let q = orm().table("t").where_in("id", Vec::<i64>::new());
        assert_eq!(q.to_sql(), "SELECT * FROM \"t\" WHERE 1 = 0");
        assert!(q.bindings().is_empty());
    }

    #[test]
    fn subqueries_carry_their_bindings() {
        let o = orm();
        let sub = o.table("orders").select("user_id").where_op("total", ">", 100);
        let exists = o.table("bans").where_condition("bans.user_id = users.id", []);
        let q = o
            .table("users")
            .where_is("active", true)
            .where_sub_query("id", "in", sub)
            .where_not_exists(exists);
        assert_eq!(
            q.to_sql(),
            "SELECT * FROM \"users\" WHERE \"active\" = ? AND \"id\" IN \
             (SELECT \"user_id\" FROM \"orders\" WHERE \"total\" > ?) AND NOT EXISTS \
             (SELECT * FROM \"bans\" WHERE \"bans\".\"user_id\" = \"users\".\"id\")"
        );
        assert_eq!(q.bindings(), vec![Value::Bool(true), Value::Int(100)]);
    }

    #[test]
    fn join_and_from_sub_bindings_precede_where() {
        let o = orm();
        let recent = o.table("posts").where_op("created_at", ">", "2024-01-01");
        let q = o
            .builder()
            .from_sub(o.table("users").where_is("active", 1), "u")
            .join_sub(JoinKind::Inner, recent, "p", "p.user_id = u.id")
            .where_is("u.role", "admin");
        assert_eq!(
            q.bindings(),
            vec![Value::Int(1), Value::from("2024-01-01"), Value::from("admin")]
        );
        assert!(q.to_sql().starts_with(
            "SELECT * FROM (SELECT * FROM \"users\" WHERE \"active\" = ?) AS \"u\" INNER JOIN (SELECT"
        ));
    }

    #[test]
    fn from_raw_bindings_follow_select_bindings() {
        let q = orm()
            .builder()
            .select_raw("? AS tag", [Value::from("x")])
            .from_raw("json_each(?)", Some("j"), [Value::from("[1,2]")])
            .where_op("j.value", ">", 1);
        assert_eq!(
            q.bindings(),
            vec![Value::from("x"), Value::from("[1,2]"), Value::Int(1)]
        );
    }

    #[tokio::test]
    async fn update_binds_from_source_first() {
        let db = MockDatabase::with_dialect(MySqlDialect);
        let o = db.clone().into_orm();
        o.builder()
            .from_raw("users_of(?)", Some("u"), [Value::from("acme")])
            .where_is("u.id", 7)
            .update(row! { "score" => 9 })
            .await
            .unwrap();
        let executed = db.executed();
        assert_eq!(
            executed[0].0,
            "UPDATE USERS_OF(?) AS `u` SET `score` = ? WHERE `u`.`id` = ?"
        );
        assert_eq!(
            executed[0].1,
            vec![Value::from("acme"), Value::Int(9), Value::Int(7)]
        );
    }

    #[tokio::test]
    async fn update_rejects_bound_secondary_sources() {
        let o = orm();
        let err = o
            .table("a")
            .from_raw("b(?)", None, [Value::Int(1)])
            .update(row! { "x" => 1 })
            .await
            .unwrap_err();
        assert!(err.is_logic());
    }

    #[test]
    fn table_replaces_first_from_entry() {
        let q = orm().builder().from("a").from("b").table("c");
        assert_eq!(q.to_sql(), "SELECT * FROM \"c\", \"b\"");
        assert_eq!(q.table_name(), Some("c"));
    }

    #[test]
    fn copy_is_independent_and_reset_empties() {
        let base = orm().table("t").where_is("a", 1);
        let copy = base.clone().where_is("b", 2);
        assert_eq!(base.bindings().len(), 1);
        assert_eq!(copy.bindings().len(), 2);

        let mut q = copy;
        q.reset();
        assert_eq!(q.to_sql(), "SELECT *");
        assert!(q.bindings().is_empty());
    }

    #[test]
    fn offset_only_installs_sentinel_per_dialect() {
        let sqlite = orm().table("t").offset(5);
        assert_eq!(sqlite.to_sql(), "SELECT * FROM \"t\" LIMIT -1 OFFSET 5");

        let pg = MockDatabase::with_dialect(PostgresDialect).into_orm();
        assert_eq!(
            pg.table("t").offset(5).to_sql(),
            "SELECT * FROM \"t\" LIMIT ALL OFFSET 5"
        );
    }

    #[test]
    fn sqlserver_offset_fetch_example() {
        let o = MockDatabase::with_dialect(SqlServerDialect::new(11)).into_orm();
        let q = o.table("t").limit(2).offset(3);
        assert_eq!(
            q.to_sql(),
            "SELECT * FROM [t] ORDER BY (SELECT 0) OFFSET 3 ROWS FETCH NEXT 2 ROWS ONLY"
        );
    }

    #[test]
    fn sole_column_strips_alias() {
        let q = orm().table("t").select("price * qty AS total");
        assert_eq!(q.sole_column().as_deref(), Some("\"price\" * \"qty\""));
        let q = orm().table("t").select("cast(a AS text)");
        assert_eq!(q.sole_column().as_deref(), Some("CAST(\"a\" AS \"text\")"));
        let q = orm().table("t").select("a, b");
        assert_eq!(q.sole_column(), None);
    }

    #[test]
    fn aggregate_drops_grouping_and_pagination() {
        let q = orm()
            .table("t")
            .select("score")
            .distinct()
            .where_op("score", ">", 1)
            .group_by("team")
            .having("COUNT(*) > ?", [Value::from(1)])
            .order_by_raw("ABS(score - ?)", [Value::from(5)])
            .limit(3);
        let agg = q.aggregate_builder("COUNT", None);
        assert_eq!(
            agg.to_sql(),
            "SELECT COUNT(DISTINCT \"score\") FROM \"t\" WHERE \"score\" > ?"
        );
        assert_eq!(agg.bindings(), vec![Value::Int(1)]);
    }

    #[tokio::test]
    async fn count_issues_single_aggregate_statement() {
        let db = MockDatabase::new();
        db.push_rows(vec![row! { "COUNT(*)" => 3 }]);
        let o = db.clone().into_orm();
        let n = o.table("t").where_is("a", 1).count(None).await.unwrap();
        assert_eq!(n, 3);
        assert_eq!(
            db.statements(),
            vec!["SELECT COUNT(*) FROM \"t\" WHERE \"a\" = ?".to_owned()]
        );
    }

    #[tokio::test]
    async fn sqlserver_2000_pagination_counts_and_reads_identity_first() {
        let db = MockDatabase::with_dialect(SqlServerDialect::new(8));
        db.set_columns(
            "t",
            vec![crate::schema::SchemaColumn::new("id", "int").primary_key().auto_increment()],
        );
        db.push_rows(vec![row! { "c" => 12 }]);
        db.push_rows(vec![]);
        let o = db.clone().into_orm();
        o.table("t").limit(5).offset(10).all().await.unwrap();
        let statements = db.statements();
        assert_eq!(statements.len(), 2);
        assert_eq!(statements[0], "SELECT COUNT(*) FROM [t]");
        assert_eq!(
            statements[1],
            "SELECT * FROM (SELECT TOP 2 * FROM (SELECT TOP 12 * FROM [t] ORDER BY [id]) \
             AS [_inner] ORDER BY [id] DESC) AS [_outer] ORDER BY [id] ASC"
        );
    }

    #[tokio::test]
    async fn sqlserver_2000_counts_all_rows_and_projects_order_column() {
        let db = MockDatabase::with_dialect(SqlServerDialect::new(8));
        db.push_rows(vec![row! { "c" => 3 }]);
        db.push_rows(vec![]);
        let o = db.clone().into_orm();
        o.table("users")
            .select("team")
            .order_by("id")
            .limit(10)
            .offset(1)
            .all()
            .await
            .unwrap();
        let statements = db.statements();
        assert_eq!(statements[0], "SELECT COUNT(*) FROM [users]");
        assert_eq!(
            statements[1],
            "SELECT [team] FROM (SELECT TOP 2 * FROM (SELECT TOP 3 [team], [id] FROM [users] \
             ORDER BY [id]) AS [_inner] ORDER BY [id] DESC) AS [_outer] ORDER BY [id] ASC"
        );
    }

    #[test]
    fn total_rows_of_distinct_query_use_derived_table() {
        let q = MockDatabase::with_dialect(SqlServerDialect::new(8))
            .into_orm()
            .table("users")
            .select("team")
            .distinct()
            .where_is("active", 1)
            .order_by("team")
            .offset(4);
        let count = q.total_rows_query();
        assert_eq!(
            count.sql,
            "SELECT COUNT(*) FROM (SELECT DISTINCT [team] FROM [users] WHERE [active] = ?) AS [_count]"
        );
        assert_eq!(count.bindings, vec![Value::Int(1)]);
    }

    #[tokio::test]
    async fn postgres_empty_insert_uses_identity_sequence() {
        let db = MockDatabase::with_dialect(PostgresDialect);
        db.set_columns(
            "t",
            vec![crate::schema::SchemaColumn::new("id", "serial").primary_key().auto_increment()],
        );
        let o = db.clone().into_orm();
        o.table("t").insert(Row::new()).await.unwrap();
        let executed = db.executed();
        assert_eq!(
            executed[0].0,
            "INSERT INTO \"t\" (\"id\") VALUES (nextval(pg_get_serial_sequence('t','id')))"
        );
        assert!(executed[0].1.is_empty());
    }

    #[tokio::test]
    async fn mysql_delete_with_join_repeats_target() {
        let db = MockDatabase::with_dialect(MySqlDialect);
        let o = db.clone().into_orm();
        o.table("books")
            .join("authors", "authors.id = books.author_id")
            .where_is("authors.name", "Ann")
            .delete()
            .await
            .unwrap();
        assert_eq!(
            db.executed()[0].0,
            "DELETE `books` FROM `books` INNER JOIN `authors` ON `authors`.`id` = `books`.`author_id` WHERE `authors`.`name` = ?"
        );
    }

    #[tokio::test]
    async fn update_binds_assignments_before_where() {
        let db = MockDatabase::new();
        let o = db.clone().into_orm();
        o.table("users")
            .where_is("id", 7)
            .update(row! { "name" => "Zed", "age" => 40 })
            .await
            .unwrap();
        let (sql, bindings) = db.executed()[0].clone();
        assert_eq!(sql, "UPDATE \"users\" SET \"name\" = ?, \"age\" = ? WHERE \"id\" = ?");
        assert_eq!(bindings, vec![Value::from("Zed"), Value::from(40), Value::from(7)]);
    }

    #[tokio::test]
    async fn empty_data_errors() {
        let o = orm();
        assert!(o.table("t").update(Row::new()).await.unwrap_err().is_empty_data());
        assert!(o.table("t").insert_many(Vec::new()).await.unwrap_err().is_empty_data());
    }

    #[tokio::test]
    async fn multi_row_insert_fills_missing_columns_with_null() {
        let db = MockDatabase::new();
        let o = db.clone().into_orm();
        o.table("t")
            .insert_many(vec![row! { "a" => 1, "b" => 2 }, row! { "a" => 3 }])
            .await
            .unwrap();
        let (sql, bindings) = db.executed()[0].clone();
        assert_eq!(sql, "INSERT INTO \"t\" (\"a\", \"b\") VALUES (?, ?), (?, ?)");
        assert_eq!(
            bindings,
            vec![Value::Int(1), Value::Int(2), Value::Int(3), Value::Null]
        );
    }

    #[tokio::test]
    async fn eager_loading_without_class_is_a_logic_error() {
        let err = orm().table("t").with("books").all().await.unwrap_err();
        assert!(err.is_logic());
    }
}
