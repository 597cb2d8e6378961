pub use async_trait;
pub use sqlx;

pub mod prelude {
    pub use crate::{
        Constraints, Database, Entity, HookKind, JoinKind, ModelClass, Orm, PletfixError,
        PletfixResult, QueryBuilder, Registry, Related, Relation, RelationDef, Row, Value,
    };
    pub use crate::row;
}

pub mod bindings;
pub mod config;
pub mod database;
pub mod dialect;
pub mod error;
pub mod expression;
mod hooks;
pub mod model;
pub mod orm;
pub mod query;
pub mod relation;
pub mod schema;
#[cfg(feature = "sqlite")]
pub mod sqlite;
pub mod test_utils;
pub mod value;

pub use bindings::{Bindings, Clause};
pub use config::{DatabaseConfig, ServerVersion, dialect_for};
pub use database::{Database, transaction};
pub use dialect::{CompiledQuery, Dialect};
pub use error::{PletfixError, PletfixResult};
pub use expression::compile_expression;
pub use model::{Entity, Hook, HookKind, ModelClass, Registry, Related};
pub use orm::Orm;
pub use query::{JoinKind, QueryBuilder};
pub use relation::{Constraints, Relation, RelationDef, RelationKind};
pub use schema::SchemaColumn;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteDatabase;
pub use value::{Row, Value, row_from_json};
