//! Helpers for testing code built on pletfix without a database server.

use crate::database::Database;
use crate::dialect::{Dialect, SqliteDialect};
use crate::error::PletfixResult;
use crate::model::Registry;
use crate::orm::Orm;
use crate::schema::SchemaColumn;
use crate::value::{Row, Value};
use async_trait::async_trait;
use futures_util::future::BoxFuture;
use futures_util::stream::{self, BoxStream, StreamExt};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
struct MockState {
    statements: Vec<String>,
    executed: Vec<(String, Vec<Value>)>,
    results: VecDeque<Vec<Row>>,
    affected: VecDeque<u64>,
    columns: HashMap<String, Vec<SchemaColumn>>,
}

/// A recording [`Database`].
///
/// Every statement is logged. Queries pop queued result sets in order (an
/// empty set once the queue runs dry); `exec` pops queued affected-row counts
/// (default `0`). Clones share state, so keep one clone to inspect after
/// handing another to an [`Orm`].
#[derive(Debug, Clone)]
pub struct MockDatabase {
    dialect: Arc<dyn Dialect>,
    state: Arc<Mutex<MockState>>,
    last_insert_id: Arc<AtomicI64>,
}

impl Default for MockDatabase {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDatabase {
    /// A mock speaking the SQLite dialect.
    pub fn new() -> Self {
        Self::with_dialect(SqliteDialect)
    }

    pub fn with_dialect(dialect: impl Dialect + 'static) -> Self {
        Self {
            dialect: Arc::new(dialect),
            state: Arc::default(),
            last_insert_id: Arc::new(AtomicI64::new(0)),
        }
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// An [`Orm`] over this mock with no registered classes.
    pub fn into_orm(self) -> Orm {
        self.into_orm_with(Registry::new())
    }

    pub fn into_orm_with(self, registry: Registry) -> Orm {
        Orm::new(Arc::new(self), registry)
    }

    /// Queues the result set of the next query.
    pub fn push_rows(&self, rows: Vec<Row>) {
        self.state().results.push_back(rows);
    }

    /// Queues the affected-row count of the next `exec`.
    pub fn push_affected(&self, affected: u64) {
        self.state().affected.push_back(affected);
    }

    pub fn set_columns(&self, table: &str, columns: Vec<SchemaColumn>) {
        self.state().columns.insert(table.to_owned(), columns);
    }

    pub fn set_last_insert_id(&self, id: i64) {
        self.last_insert_id.store(id, Ordering::SeqCst);
    }

    /// Every statement so far, including `BEGIN`/`COMMIT`/`ROLLBACK`.
    pub fn statements(&self) -> Vec<String> {
        self.state().statements.clone()
    }

    /// Statements run through `exec`, with their bindings.
    pub fn executed(&self) -> Vec<(String, Vec<Value>)> {
        self.state().executed.clone()
    }

    pub fn clear(&self) {
        let mut state = self.state();
        state.statements.clear();
        state.executed.clear();
    }

    fn next_rows(&self, sql: &str) -> Vec<Row> {
        let mut state = self.state();
        state.statements.push(sql.to_owned());
        state.results.pop_front().unwrap_or_default()
    }

    fn record_control(&self, sql: &str) {
        self.state().statements.push(sql.to_owned());
    }
}

#[async_trait]
impl Database for MockDatabase {
    fn dialect(&self) -> &dyn Dialect {
        self.dialect.as_ref()
    }

    async fn exec(&self, sql: &str, bindings: &[Value]) -> PletfixResult<u64> {
        let mut state = self.state();
        state.statements.push(sql.to_owned());
        state.executed.push((sql.to_owned(), bindings.to_vec()));
        Ok(state.affected.pop_front().unwrap_or(0))
    }

    async fn query(&self, sql: &str, _bindings: &[Value]) -> PletfixResult<Vec<Row>> {
        Ok(self.next_rows(sql))
    }

    fn cursor(&self, sql: String, _bindings: Vec<Value>) -> BoxStream<'_, PletfixResult<Row>> {
        let rows = self.next_rows(&sql);
        stream::iter(rows.into_iter().map(Ok)).boxed()
    }

    async fn last_insert_id(&self) -> PletfixResult<i64> {
        Ok(self.last_insert_id.load(Ordering::SeqCst))
    }

    async fn begin(&self) -> PletfixResult<()> {
        self.record_control("BEGIN");
        Ok(())
    }

    async fn commit(&self) -> PletfixResult<()> {
        self.record_control("COMMIT");
        Ok(())
    }

    async fn rollback(&self) -> PletfixResult<()> {
        self.record_control("ROLLBACK");
        Ok(())
    }

    async fn schema_columns(&self, table: &str) -> PletfixResult<Vec<SchemaColumn>> {
        Ok(self.state().columns.get(table).cloned().unwrap_or_default())
    }
}

/// An [`Orm`] over a private in-memory SQLite database.
#[cfg(feature = "sqlite")]
pub async fn memory_sqlite(registry: Registry) -> PletfixResult<Orm> {
    let db = crate::sqlite::SqliteDatabase::memory().await?;
    Ok(Orm::new(Arc::new(db), registry))
}

/// Runs `f` inside a transaction that is always rolled back.
pub async fn with_test_transaction<'a, T, F>(db: &'a dyn Database, f: F) -> PletfixResult<T>
where
    F: FnOnce(&'a dyn Database) -> BoxFuture<'a, PletfixResult<T>>,
{
    db.begin().await?;
    let result = f(db).await;
    let rollback = db.rollback().await;
    match (result, rollback) {
        (Ok(value), Ok(())) => Ok(value),
        (Err(err), _) => Err(err),
        (Ok(_), Err(err)) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row;

    #[tokio::test]
    async fn queued_results_are_served_in_order() {
        let db = MockDatabase::new();
        db.push_rows(vec![row! { "a" => 1 }]);
        assert_eq!(db.query("SELECT 1", &[]).await.unwrap().len(), 1);
        assert!(db.query("SELECT 2", &[]).await.unwrap().is_empty());
        assert_eq!(db.statements(), vec!["SELECT 1".to_owned(), "SELECT 2".to_owned()]);
    }

    #[tokio::test]
    async fn test_transaction_always_rolls_back() {
        let db = MockDatabase::new();
        let value = with_test_transaction(&db, |db| {
            Box::pin(async move { db.exec("DELETE FROM t", &[]).await })
        })
        .await
        .unwrap();
        assert_eq!(value, 0);
        assert_eq!(
            db.statements(),
            vec!["BEGIN".to_owned(), "DELETE FROM t".to_owned(), "ROLLBACK".to_owned()]
        );
    }
}
