/// Metadata about a database column.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SchemaColumn {
    /// The name of the column.
    pub name: String,
    /// The SQL type of the column (e.g., "INTEGER", "TEXT").
    pub sql_type: String,
    /// Whether the column can contain NULL values.
    pub nullable: bool,
    /// Whether the column is part of the Primary Key.
    pub primary_key: bool,
    /// Whether the database generates the value (identity, serial, rowid alias).
    pub auto_increment: bool,
    /// The column default as SQL text, if any.
    pub default: Option<String>,
}

impl SchemaColumn {
    pub fn new(name: impl Into<String>, sql_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sql_type: sql_type.into(),
            nullable: true,
            ..Self::default()
        }
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.nullable = false;
        self
    }

    pub fn auto_increment(mut self) -> Self {
        self.auto_increment = true;
        self
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn with_default(mut self, default: impl Into<String>) -> Self {
        self.default = Some(default.into());
        self
    }

    /// Builds a column from one `PRAGMA table_info` row.
    ///
    /// A sole `INTEGER PRIMARY KEY` aliases the rowid and is reported as
    /// auto-increment.
    pub fn from_sqlite_pragma(
        name: String,
        sql_type: String,
        notnull: i64,
        default: Option<String>,
        pk: i64,
        pk_count: usize,
    ) -> Self {
        let is_pk = pk > 0;
        let auto_increment =
            is_pk && pk_count == 1 && normalize_sql_type(&sql_type) == "integer";
        Self {
            name,
            sql_type,
            nullable: !is_pk && notnull == 0,
            primary_key: is_pk,
            auto_increment,
            default,
        }
    }
}

/// The first auto-increment column of a table.
pub fn identity_column(columns: &[SchemaColumn]) -> Option<&SchemaColumn> {
    columns.iter().find(|c| c.auto_increment)
}

pub(crate) fn normalize_sql_type(sql_type: &str) -> String {
    let t = sql_type.trim().to_lowercase();
    if t.contains("int") || t.contains("serial") {
        return "integer".to_string();
    }
    if t.contains("char") || t.contains("text") || t.contains("clob") {
        return "text".to_string();
    }
    if t.contains("real")
        || t.contains("floa")
        || t.contains("doub")
        || t.contains("numeric")
        || t.contains("decimal")
    {
        return "real".to_string();
    }
    if t.contains("bool") {
        return "boolean".to_string();
    }
    t
}
