//! SQL dialect adapter: identifier escaping, placeholders, prefix matching, value coercion

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::domain::value::{ColumnType, Value};

/// Dialect capabilities consumed by the tree strategies.
pub trait Dialect: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    /// Quote an identifier.
    fn escape(&self, identifier: &str) -> String;

    /// Placeholder for the `index`-th bound parameter (1-based).
    fn placeholder(&self, index: usize) -> String;

    /// String concatenation of SQL expressions.
    fn concat(&self, parts: &[&str]) -> String;

    /// Character length of a string expression.
    fn length(&self, expression: &str) -> String {
        format!("LENGTH({})", expression)
    }

    /// Predicate: `candidate` starts with `prefix` (both SQL expressions).
    ///
    /// Exact and case-sensitive: no pattern characters are interpreted.
    fn starts_with(&self, candidate: &str, prefix: &str) -> String {
        format!(
            "SUBSTR({}, 1, {}) = {}",
            candidate,
            self.length(prefix),
            prefix
        )
    }

    /// Normalise a raw driver value to its declared column type.
    fn coerce(&self, value: Value, column_type: ColumnType) -> Value {
        value.coerce(column_type)
    }

    /// `"alias"."column"`
    fn qualify(&self, alias: &str, column: &str) -> String {
        format!("{}.{}", self.escape(alias), self.escape(column))
    }
}

fn escape_with(identifier: &str, quote: char) -> String {
    let doubled: String = identifier
        .chars()
        .flat_map(|c| {
            if c == quote {
                vec![c, c]
            } else {
                vec![c]
            }
        })
        .collect();
    format!("{quote}{doubled}{quote}")
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SqliteDialect;

impl Dialect for SqliteDialect {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn escape(&self, identifier: &str) -> String {
        escape_with(identifier, '"')
    }

    fn placeholder(&self, _index: usize) -> String {
        "?".to_string()
    }

    fn concat(&self, parts: &[&str]) -> String {
        parts.join(" || ")
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct PostgresDialect;

impl Dialect for PostgresDialect {
    fn name(&self) -> &'static str {
        "postgres"
    }

    fn escape(&self, identifier: &str) -> String {
        escape_with(identifier, '"')
    }

    fn placeholder(&self, index: usize) -> String {
        format!("${}", index)
    }

    fn concat(&self, parts: &[&str]) -> String {
        format!("CONCAT({})", parts.join(", "))
    }

    fn coerce(&self, value: Value, column_type: ColumnType) -> Value {
        // text-mode results render booleans as t/f
        match (column_type, value) {
            (ColumnType::Boolean, Value::Text(s)) if s == "t" => Value::Bool(true),
            (ColumnType::Boolean, Value::Text(s)) if s == "f" => Value::Bool(false),
            (ty, value) => value.coerce(ty),
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct MysqlDialect;

impl Dialect for MysqlDialect {
    fn name(&self) -> &'static str {
        "mysql"
    }

    fn escape(&self, identifier: &str) -> String {
        escape_with(identifier, '`')
    }

    fn placeholder(&self, _index: usize) -> String {
        "?".to_string()
    }

    fn concat(&self, parts: &[&str]) -> String {
        format!("CONCAT({})", parts.join(", "))
    }

    fn length(&self, expression: &str) -> String {
        format!("CHAR_LENGTH({})", expression)
    }

    // default collations compare case-insensitively
    fn starts_with(&self, candidate: &str, prefix: &str) -> String {
        format!(
            "SUBSTR({}, 1, {}) = BINARY {}",
            candidate,
            self.length(prefix),
            prefix
        )
    }
}

/// Dialect selector used in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DialectKind {
    #[default]
    Sqlite,
    Postgres,
    Mysql,
}

impl DialectKind {
    pub fn dialect(self) -> Arc<dyn Dialect> {
        match self {
            DialectKind::Sqlite => Arc::new(SqliteDialect),
            DialectKind::Postgres => Arc::new(PostgresDialect),
            DialectKind::Mysql => Arc::new(MysqlDialect),
        }
    }
}

impl std::str::FromStr for DialectKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sqlite" => Ok(DialectKind::Sqlite),
            "postgres" | "postgresql" => Ok(DialectKind::Postgres),
            "mysql" | "mariadb" => Ok(DialectKind::Mysql),
            other => Err(format!("unknown dialect: {}", other)),
        }
    }
}
