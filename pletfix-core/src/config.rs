use crate::dialect::{Dialect, MySqlDialect, PostgresDialect, SqlServerDialect, SqliteDialect};
use crate::error::{PletfixError, PletfixResult};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A server version, written either as a major number or a version string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServerVersion {
    Major(u32),
    Text(String),
}

/// Connection settings for one database store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// `sqlite`, `mysql`, `pgsql` or `sqlsrv`.
    pub driver: String,
    /// Full connection URL; takes precedence over `database`.
    #[serde(default)]
    pub url: Option<String>,
    /// Database name, or file path for SQLite (`:memory:` for in-memory).
    #[serde(default)]
    pub database: Option<String>,
    /// Server version, used by SQL Server to pick a pagination strategy.
    #[serde(default)]
    pub version: Option<ServerVersion>,
}

impl DatabaseConfig {
    pub fn sqlite(database: impl Into<String>) -> Self {
        Self {
            driver: "sqlite".to_owned(),
            url: None,
            database: Some(database.into()),
            version: None,
        }
    }

    /// Reads `DB_DRIVER` (default `sqlite`), `DATABASE_URL` and `DB_VERSION`.
    pub fn from_env() -> Self {
        Self {
            driver: std::env::var("DB_DRIVER").unwrap_or_else(|_| "sqlite".to_owned()),
            url: std::env::var("DATABASE_URL").ok(),
            database: None,
            version: std::env::var("DB_VERSION").ok().map(ServerVersion::Text),
        }
    }

    /// The URL to connect with.
    pub fn connection_url(&self) -> PletfixResult<String> {
        if let Some(url) = &self.url {
            return Ok(url.clone());
        }
        match (self.driver.as_str(), self.database.as_deref()) {
            ("sqlite", None | Some(":memory:")) => Ok("sqlite::memory:".to_owned()),
            ("sqlite", Some(path)) => Ok(format!("sqlite:{}", path)),
            (driver, _) => Err(PletfixError::invalid_argument(format!(
                "no connection url configured for driver `{}`",
                driver
            ))),
        }
    }

    fn sqlserver_dialect(&self) -> PletfixResult<SqlServerDialect> {
        match &self.version {
            None => Ok(SqlServerDialect::default()),
            Some(ServerVersion::Major(major)) => Ok(SqlServerDialect::new(*major)),
            Some(ServerVersion::Text(text)) => SqlServerDialect::from_version(text).ok_or_else(
                || PletfixError::invalid_argument(format!("invalid server version `{}`", text)),
            ),
        }
    }
}

/// Selects the dialect for a configured driver.
pub fn dialect_for(config: &DatabaseConfig) -> PletfixResult<Arc<dyn Dialect>> {
    let dialect: Arc<dyn Dialect> = match config.driver.as_str() {
        "sqlite" => Arc::new(SqliteDialect),
        "mysql" => Arc::new(MySqlDialect),
        "pgsql" => Arc::new(PostgresDialect),
        "sqlsrv" => Arc::new(config.sqlserver_dialect()?),
        other => {
            return Err(PletfixError::invalid_argument(format!(
                "unsupported database driver `{}`",
                other
            )));
        }
    };
    Ok(dialect)
}
