//! Error types for the query builder and relation engine.

use thiserror::Error;

/// Pletfix-specific error type with actionable variants.
///
/// Hook cancellation is not an error: a `before*`/`after*` hook returning
/// `false` surfaces as `None`/`false` from the mutating call.
#[derive(Debug, Error)]
pub enum PletfixError {
    /// `insert_many`/`update` was called without any column data.
    #[error("no data given for {0}")]
    EmptyData(&'static str),

    /// An argument could not be resolved (unknown driver, bad version string, ...).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Misuse of the model/relation layer (unknown relation, mixed morph types, ...).
    #[error("{0}")]
    Logic(String),

    /// Underlying driver error, passed through untranslated.
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),

    /// A column value could not be mapped.
    #[error("decode error on column '{column}': {message}")]
    Decode { column: String, message: String },

    /// JSON conversion of an entity failed.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl PletfixError {
    /// Create a logic error.
    pub fn logic(message: impl Into<String>) -> Self {
        Self::Logic(message.into())
    }

    /// Create an invalid-argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    /// Create a decode error for a specific column.
    pub fn decode(column: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Decode {
            column: column.into(),
            message: message.into(),
        }
    }

    /// Check if this is a logic error.
    pub fn is_logic(&self) -> bool {
        matches!(self, Self::Logic(_))
    }

    /// Check if this is an empty-data error.
    pub fn is_empty_data(&self) -> bool {
        matches!(self, Self::EmptyData(_))
    }
}

/// Result alias for Pletfix operations.
pub type PletfixResult<T> = Result<T, PletfixError>;
