//! # Pletfix ORM
//!
//! A fluent SQL query builder with per-engine dialects, plus an
//! ActiveRecord-style layer of registered model classes, lifecycle hooks and
//! relations with N+1-free eager loading.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use pletfix_orm::prelude::*;
//!
//! # async fn example() -> Result<(), PletfixError> {
//! let registry = Registry::new()
//!     .register(ModelClass::new("Author").has_many("books", "Book"))
//!     .register(ModelClass::new("Book").belongs_to("author", "Author"));
//! let orm = pletfix_orm::test_utils::memory_sqlite(registry).await?;
//!
//! let authors = orm
//!     .query("Author")?
//!     .where_condition("name LIKE ?", [Value::from("A%")])
//!     .with("books")
//!     .all()
//!     .await?;
//! # let _ = authors;
//! # Ok(())
//! # }
//! ```
//!
//! ## Installation
//!
//! ```toml
//! [dependencies]
//! pletfix-orm = "0.4"
//! ```

pub use pletfix_core::*;

pub mod prelude {
    pub use pletfix_core::prelude::*;
}
