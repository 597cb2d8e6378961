//! SQLite implementation of [`Database`], backed by a single sqlx connection.

use crate::config::DatabaseConfig;
use crate::database::{Database, log_statement, record_query_metrics};
use crate::dialect::{Dialect, SqliteDialect};
use crate::error::{PletfixError, PletfixResult};
use crate::schema::SchemaColumn;
use crate::value::{Row, Value};
use async_trait::async_trait;
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use sqlx::sqlite::{SqliteArguments, SqliteConnectOptions, SqliteConnection, SqliteRow};
use sqlx::{Column, ConnectOptions, Row as _, Sqlite, TypeInfo, ValueRef};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, MutexGuard};

type SqliteQuery<'q> = sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>;

/// A SQLite database handle.
///
/// One connection serves every statement. While a cursor is open it owns the
/// connection, and any other statement on the handle fails with a logic
/// error instead of waiting for the cursor to be dropped.
#[derive(Debug)]
pub struct SqliteDatabase {
    conn: Mutex<SqliteConnection>,
    cursor_open: AtomicBool,
    last_insert_id: AtomicI64,
    dialect: SqliteDialect,
}

/// Clears the open-cursor flag when the cursor stream is dropped.
struct CursorFlag<'a>(&'a AtomicBool);

impl Drop for CursorFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl SqliteDatabase {
    /// Opens `url`, creating the file if missing.
    pub async fn connect(url: &str) -> PletfixResult<Self> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(5));
        let conn = options.connect().await?;
        tracing::debug!(url = %url, "pletfix sqlite connected");
        Ok(Self {
            conn: Mutex::new(conn),
            cursor_open: AtomicBool::new(false),
            last_insert_id: AtomicI64::new(0),
            dialect: SqliteDialect,
        })
    }

    /// Opens a private in-memory database.
    pub async fn memory() -> PletfixResult<Self> {
        Self::connect("sqlite::memory:").await
    }

    pub async fn from_config(config: &DatabaseConfig) -> PletfixResult<Self> {
        if config.driver != "sqlite" {
            return Err(PletfixError::invalid_argument(format!(
                "driver `{}` is not served by the sqlite handle",
                config.driver
            )));
        }
        Self::connect(&config.connection_url()?).await
    }

    /// Waits for the connection unless an open cursor holds it.
    async fn acquire(&self) -> PletfixResult<MutexGuard<'_, SqliteConnection>> {
        if let Ok(conn) = self.conn.try_lock() {
            return Ok(conn);
        }
        if self.cursor_open.load(Ordering::SeqCst) {
            return Err(PletfixError::logic(
                "connection is busy with an open cursor; drop the cursor first",
            ));
        }
        Ok(self.conn.lock().await)
    }

    async fn run_raw(&self, sql: &'static str) -> PletfixResult<()> {
        log_statement("transaction", sql, &[]);
        let mut conn = self.acquire().await?;
        sqlx::query(sql).execute(&mut *conn).await?;
        Ok(())
    }
}

fn bind_value<'q>(query: SqliteQuery<'q>, value: &Value) -> SqliteQuery<'q> {
    match value.clone() {
        Value::Null => query.bind(Option::<i64>::None),
        Value::Bool(v) => query.bind(v),
        Value::Int(v) => query.bind(v),
        Value::Float(v) => query.bind(v),
        Value::Text(v) => query.bind(v),
        Value::Blob(v) => query.bind(v),
    }
}

/// Decodes by the storage class of each value, not the declared column type.
fn decode_row(row: &SqliteRow) -> PletfixResult<Row> {
    let mut out = Row::with_capacity(row.len());
    for (i, column) in row.columns().iter().enumerate() {
        let raw = row.try_get_raw(i)?;
        let value = if raw.is_null() {
            Value::Null
        } else {
            match raw.type_info().name() {
                "INTEGER" | "BOOLEAN" | "INT8" => Value::Int(row.try_get_unchecked::<i64, _>(i)?),
                "REAL" | "NUMERIC" => Value::Float(row.try_get_unchecked::<f64, _>(i)?),
                "BLOB" => Value::Blob(row.try_get_unchecked::<Vec<u8>, _>(i)?),
                "TEXT" | "DATETIME" | "DATE" | "TIME" => {
                    Value::Text(row.try_get_unchecked::<String, _>(i)?)
                }
                other => {
                    return Err(PletfixError::decode(
                        column.name(),
                        format!("unsupported storage class {}", other),
                    ));
                }
            }
        };
        out.insert(column.name().to_owned(), value);
    }
    Ok(out)
}

#[async_trait]
impl Database for SqliteDatabase {
    fn dialect(&self) -> &dyn Dialect {
        &self.dialect
    }

    async fn exec(&self, sql: &str, bindings: &[Value]) -> PletfixResult<u64> {
        log_statement("exec", sql, bindings);
        let start = Instant::now();
        let mut conn = self.acquire().await?;
        let query = bindings.iter().fold(sqlx::query(sql), bind_value);
        let result = query.execute(&mut *conn).await?;
        self.last_insert_id
            .store(result.last_insert_rowid(), Ordering::SeqCst);
        record_query_metrics("exec", start.elapsed());
        Ok(result.rows_affected())
    }

    async fn query(&self, sql: &str, bindings: &[Value]) -> PletfixResult<Vec<Row>> {
        log_statement("select", sql, bindings);
        let start = Instant::now();
        let mut conn = self.acquire().await?;
        let query = bindings.iter().fold(sqlx::query(sql), bind_value);
        let rows = query.fetch_all(&mut *conn).await?;
        record_query_metrics("select", start.elapsed());
        rows.iter().map(decode_row).collect()
    }

    fn cursor(&self, sql: String, bindings: Vec<Value>) -> BoxStream<'_, PletfixResult<Row>> {
        Box::pin(async_stream::try_stream! {
            log_statement("cursor", &sql, &bindings);
            let mut conn = self.acquire().await?;
            self.cursor_open.store(true, Ordering::SeqCst);
            let _open = CursorFlag(&self.cursor_open);
            let query = bindings.iter().fold(sqlx::query(&sql), bind_value);
            let mut rows = query.fetch(&mut *conn);
            while let Some(row) = rows.next().await {
                let row = row?;
                yield decode_row(&row)?;
            }
        })
    }

    async fn last_insert_id(&self) -> PletfixResult<i64> {
        Ok(self.last_insert_id.load(Ordering::SeqCst))
    }

    async fn begin(&self) -> PletfixResult<()> {
        self.run_raw("BEGIN").await
    }

    async fn commit(&self) -> PletfixResult<()> {
        self.run_raw("COMMIT").await
    }

    async fn rollback(&self) -> PletfixResult<()> {
        self.run_raw("ROLLBACK").await
    }

    async fn schema_columns(&self, table: &str) -> PletfixResult<Vec<SchemaColumn>> {
        let sql = format!("PRAGMA table_info({})", self.quote_name(table));
        log_statement("schema", &sql, &[]);
        let mut conn = self.acquire().await?;
        let rows: Vec<(i64, String, String, i64, Option<String>, i64)> =
            sqlx::query_as(&sql).fetch_all(&mut *conn).await?;
        let pk_count = rows.iter().filter(|row| row.5 > 0).count();
        Ok(rows
            .into_iter()
            .map(|(_cid, name, sql_type, notnull, default, pk)| {
                SchemaColumn::from_sqlite_pragma(name, sql_type, notnull, default, pk, pk_count)
            })
            .collect())
    }
}
