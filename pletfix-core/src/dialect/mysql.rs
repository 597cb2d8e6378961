use super::{CompiledQuery, DeleteTarget, Dialect, SelectParts};
use crate::bindings::Clause;
use crate::schema::SchemaColumn;

/// MySQL / MariaDB syntax.
#[derive(Debug, Clone, Copy, Default)]
pub struct MySqlDialect;

impl Dialect for MySqlDialect {
    fn name(&self) -> &'static str {
        "mysql"
    }

    fn quote_chars(&self) -> (char, char) {
        ('`', '`')
    }

    fn extra_keywords(&self) -> &'static [&'static str] {
        &["REGEXP", "RLIKE", "DIV", "XOR"]
    }

    fn compile_insert_empty(&self, table: &str, _columns: &[SchemaColumn]) -> String {
        format!("INSERT INTO {} () VALUES ()", self.quote_name(table))
    }

    fn supports_update_join(&self) -> bool {
        true
    }

    // With joins present MySQL needs the target repeated after DELETE.
    fn compile_delete(&self, target: &DeleteTarget, query: &SelectParts<'_>) -> CompiledQuery {
        let source = match query.from.first() {
            Some(from) => from.clone(),
            None => self.quote_name(&target.table),
        };
        let head = if query.joins.is_empty() {
            "DELETE".to_owned()
        } else {
            let name = target.alias.as_deref().unwrap_or(&target.table);
            format!("DELETE {}", self.quote_name(name))
        };
        CompiledQuery {
            sql: format!(
                "{} FROM {}{}{}",
                head,
                source,
                query.join_sql(),
                query.where_sql()
            ),
            bindings: query.bindings_for(&[Clause::From, Clause::Join, Clause::Where]),
        }
    }
}
