//! The database handle every builder executes through.

use crate::dialect::Dialect;
use crate::error::PletfixResult;
use crate::schema::SchemaColumn;
use crate::value::{Row, Value, format_bindings};
use async_trait::async_trait;
use futures_util::future::BoxFuture;
use futures_util::stream::BoxStream;
use std::fmt;
use std::time::Duration;

/// A connection to one database, together with its SQL dialect.
///
/// Implementations own the connection; builders only hold an
/// `Arc<dyn Database>`. Bindings are always positional (`?`).
#[async_trait]
pub trait Database: Send + Sync + fmt::Debug {
    /// The dialect statements are compiled with.
    fn dialect(&self) -> &dyn Dialect;

    /// Quotes a possibly qualified identifier.
    fn quote_name(&self, name: &str) -> String {
        self.dialect().quote_name(name)
    }

    /// Runs a statement and returns the number of affected rows.
    async fn exec(&self, sql: &str, bindings: &[Value]) -> PletfixResult<u64>;

    /// Runs a query and returns all rows.
    async fn query(&self, sql: &str, bindings: &[Value]) -> PletfixResult<Vec<Row>>;

    /// Runs a query and returns the first row, if any.
    async fn single(&self, sql: &str, bindings: &[Value]) -> PletfixResult<Option<Row>> {
        Ok(self.query(sql, bindings).await?.into_iter().next())
    }

    /// Runs a query and returns the first column of the first row (`NULL` if none).
    async fn scalar(&self, sql: &str, bindings: &[Value]) -> PletfixResult<Value> {
        Ok(self
            .single(sql, bindings)
            .await?
            .and_then(|row| row.into_iter().next().map(|(_, value)| value))
            .unwrap_or_default())
    }

    /// Runs a query and yields its rows one by one.
    ///
    /// The statement handle lives as long as the stream; dropping the stream
    /// early releases it.
    fn cursor(&self, sql: String, bindings: Vec<Value>) -> BoxStream<'_, PletfixResult<Row>>;

    /// The id generated by the last insert on this connection.
    async fn last_insert_id(&self) -> PletfixResult<i64>;

    async fn begin(&self) -> PletfixResult<()>;

    async fn commit(&self) -> PletfixResult<()>;

    async fn rollback(&self) -> PletfixResult<()>;

    /// Column metadata of `table`, in declaration order.
    async fn schema_columns(&self, table: &str) -> PletfixResult<Vec<SchemaColumn>>;
}

/// Runs `f` inside a transaction: commits when it returns `Ok`, rolls back
/// when it returns `Err`.
pub async fn transaction<'a, T, F>(db: &'a dyn Database, f: F) -> PletfixResult<T>
where
    F: FnOnce(&'a dyn Database) -> BoxFuture<'a, PletfixResult<T>>,
{
    db.begin().await?;
    match f(db).await {
        Ok(value) => {
            db.commit().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = db.rollback().await {
                tracing::warn!(error = %rollback_err, "pletfix rollback failed");
            }
            Err(err)
        }
    }
}

pub(crate) fn log_statement(operation: &str, sql: &str, bindings: &[Value]) {
    tracing::debug!(
        operation = operation,
        sql = %sql,
        bindings = %format_bindings(bindings),
        "pletfix query"
    );
}

#[cfg(feature = "metrics")]
pub(crate) fn record_query_metrics(operation: &'static str, elapsed: Duration) {
    let elapsed_ms = elapsed.as_secs_f64() * 1000.0;
    metrics::histogram!("pletfix.query.duration_ms", "operation" => operation).record(elapsed_ms);
    metrics::counter!("pletfix.query.count", "operation" => operation).increment(1);
}

#[cfg(not(feature = "metrics"))]
pub(crate) fn record_query_metrics(_operation: &'static str, _elapsed: Duration) {}
