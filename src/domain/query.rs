//! Minimal statement construction: bound parameters, select queries and row writes
//!
//! Parameters are bound in the order their placeholders appear in the SQL
//! text, so positional (`?`) and numbered (`$n`) dialects both line up.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use itertools::Itertools;

use crate::domain::dialect::Dialect;
use crate::domain::entities::Record;
use crate::domain::metadata::{ColumnDef, TreeEncoding, TreeMetadata};
use crate::domain::value::{ColumnType, Value};

/// A rendered SQL statement with its bound parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<Value>,
}

impl Statement {
    pub fn new(sql: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.sql)?;
        if !self.params.is_empty() {
            write!(f, " -- [{}]", self.params.iter().join(", "))?;
        }
        Ok(())
    }
}

/// Ordered parameter bindings with unique names.
///
/// Several rows of a plan often bind the same logical column; names are salted
/// with a counter so a later binding can never shadow an earlier one.
#[derive(Debug, Clone)]
pub struct ParamSet {
    dialect: Arc<dyn Dialect>,
    names: Vec<String>,
    values: Vec<Value>,
    used: HashMap<String, usize>,
}

impl ParamSet {
    pub fn new(dialect: Arc<dyn Dialect>) -> Self {
        Self {
            dialect,
            names: Vec::new(),
            values: Vec::new(),
            used: HashMap::new(),
        }
    }

    /// Bind `value` under `name` and return its placeholder.
    pub fn bind(&mut self, name: &str, value: Value) -> String {
        let seen = self.used.entry(name.to_string()).or_insert(0);
        let unique = if *seen == 0 {
            name.to_string()
        } else {
            format!("{}_{}", name, seen)
        };
        *seen += 1;
        self.names.push(unique);
        self.values.push(value);
        self.dialect.placeholder(self.values.len())
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }
}

/// A composable SELECT over one aliased table.
#[derive(Debug, Clone)]
pub struct SelectQuery {
    dialect: Arc<dyn Dialect>,
    table: String,
    alias: String,
    selections: Vec<String>,
    joins: Vec<String>,
    conditions: Vec<String>,
    order_by: Vec<String>,
    params: ParamSet,
}

impl SelectQuery {
    pub fn from(dialect: Arc<dyn Dialect>, table: &str, alias: &str) -> Self {
        Self {
            params: ParamSet::new(dialect.clone()),
            dialect,
            table: table.to_string(),
            alias: alias.to_string(),
            selections: Vec::new(),
            joins: Vec::new(),
            conditions: Vec::new(),
            order_by: Vec::new(),
        }
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    pub fn dialect(&self) -> &Arc<dyn Dialect> {
        &self.dialect
    }

    /// `"alias"."column"`
    pub fn column(&self, alias: &str, column: &str) -> String {
        self.dialect.qualify(alias, column)
    }

    pub fn select(&mut self, expression: &str, as_alias: &str) -> &mut Self {
        self.selections
            .push(format!("{} AS {}", expression, self.dialect.escape(as_alias)));
        self
    }

    /// Select every hydratable column as `<alias>_<column>`.
    pub fn select_columns(&mut self, columns: &[ColumnDef]) -> &mut Self {
        let alias = self.alias.clone();
        for column in columns {
            let expression = self.column(&alias, &column.name);
            self.select(&expression, &column_alias(&alias, &column.name));
        }
        self
    }

    pub fn inner_join(&mut self, table: &str, alias: &str, on: &str) -> &mut Self {
        self.joins.push(format!(
            "INNER JOIN {} {} ON {}",
            self.dialect.escape(table),
            self.dialect.escape(alias),
            on
        ));
        self
    }

    pub fn and_where(&mut self, condition: impl Into<String>) -> &mut Self {
        self.conditions.push(condition.into());
        self
    }

    pub fn order_by(&mut self, expression: impl Into<String>) -> &mut Self {
        self.order_by.push(expression.into());
        self
    }

    pub fn bind(&mut self, name: &str, value: Value) -> String {
        self.params.bind(name, value)
    }

    pub fn params_mut(&mut self) -> &mut ParamSet {
        &mut self.params
    }

    pub fn params(&self) -> &ParamSet {
        &self.params
    }

    pub fn to_sql(&self) -> String {
        let selections = if self.selections.is_empty() {
            "*".to_string()
        } else {
            self.selections.join(", ")
        };
        let mut sql = format!(
            "SELECT {} FROM {} {}",
            selections,
            self.dialect.escape(&self.table),
            self.dialect.escape(&self.alias)
        );
        for join in &self.joins {
            sql.push(' ');
            sql.push_str(join);
        }
        if !self.conditions.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&self.conditions.join(" AND "));
        }
        if !self.order_by.is_empty() {
            sql.push_str(" ORDER BY ");
            sql.push_str(&self.order_by.join(", "));
        }
        sql
    }

    pub fn to_statement(&self) -> Statement {
        Statement::new(self.to_sql(), self.params.values().to_vec())
    }
}

/// Raw result alias of a selected column.
pub fn column_alias(alias: &str, column: &str) -> String {
    format!("{}_{}", alias, column)
}

/// `"a" = ? AND "b" = ?` over parallel column/value lists.
pub fn equals_all(columns: &[String], values: &[Value], name: &str, params: &mut ParamSet) -> String {
    columns
        .iter()
        .zip(values)
        .map(|(column, value)| format!("{} = {}", column, params.bind(name, value.clone())))
        .join(" AND ")
}

/// Match rows whose key columns equal any of `keys`.
///
/// Single-column keys render as an `IN` list, composite keys as an OR of
/// conjunctions. `keys` must not be empty.
pub fn matches_any(
    columns: &[String],
    keys: &[&[Value]],
    name: &str,
    params: &mut ParamSet,
) -> String {
    if columns.len() == 1 {
        let placeholders = keys
            .iter()
            .map(|key| params.bind(name, key[0].clone()))
            .join(", ");
        format!("{} IN ({})", columns[0], placeholders)
    } else {
        let groups = keys
            .iter()
            .map(|key| format!("({})", equals_all(columns, key, name, params)))
            .join(" OR ");
        format!("({})", groups)
    }
}

/// Negation of [`matches_any`]: rows whose key equals none of `keys`.
pub fn excludes_all(
    columns: &[String],
    keys: &[&[Value]],
    name: &str,
    params: &mut ParamSet,
) -> String {
    if columns.len() == 1 {
        let placeholders = keys
            .iter()
            .map(|key| params.bind(name, key[0].clone()))
            .join(", ");
        format!("{} NOT IN ({})", columns[0], placeholders)
    } else {
        format!("NOT {}", matches_any(columns, keys, name, params))
    }
}

/// `INSERT INTO table (cols) VALUES (...)` for a record.
pub fn insert_row(dialect: &Arc<dyn Dialect>, metadata: &TreeMetadata, record: &Record) -> Statement {
    let mut params = ParamSet::new(dialect.clone());
    let columns = record.columns().map(|c| dialect.escape(c)).join(", ");
    let values = record
        .iter()
        .map(|(column, value)| params.bind(column, value.clone()))
        .join(", ");
    Statement::new(
        format!(
            "INSERT INTO {} ({}) VALUES ({})",
            dialect.escape(&metadata.table),
            columns,
            values
        ),
        params.into_values(),
    )
}

/// `UPDATE table SET parent = ? WHERE pk = ?`; a `None` parent makes the entity a root.
pub fn update_parent(
    dialect: &Arc<dyn Dialect>,
    metadata: &TreeMetadata,
    key: &[Value],
    parent: Option<&[Value]>,
) -> Statement {
    let mut params = ParamSet::new(dialect.clone());
    let assignments = metadata
        .parent_columns_by_primary()
        .iter()
        .enumerate()
        .map(|(i, column)| {
            let value = parent
                .and_then(|p| p.get(i).cloned())
                .unwrap_or(Value::Null);
            format!("{} = {}", dialect.escape(column), params.bind(column, value))
        })
        .join(", ");
    let primary: Vec<String> = metadata
        .primary_columns
        .iter()
        .map(|c| dialect.escape(&c.name))
        .collect();
    let condition = equals_all(&primary, key, "id", &mut params);
    Statement::new(
        format!(
            "UPDATE {} SET {} WHERE {}",
            dialect.escape(&metadata.table),
            assignments,
            condition
        ),
        params.into_values(),
    )
}

/// `CREATE TABLE IF NOT EXISTS` for the entity table and its closure junction, if any.
pub fn create_tables(dialect: &Arc<dyn Dialect>, metadata: &TreeMetadata) -> Vec<Statement> {
    let sql_type = |ty: ColumnType| match ty {
        ColumnType::Integer => "INTEGER",
        ColumnType::Real => "REAL",
        ColumnType::Text => "TEXT",
        ColumnType::Boolean => "BOOLEAN",
    };
    let primary = metadata
        .primary_columns
        .iter()
        .map(|c| dialect.escape(&c.name))
        .join(", ");
    let columns = metadata
        .selectable_columns()
        .iter()
        .map(|c| format!("{} {}", dialect.escape(&c.name), sql_type(c.column_type)))
        .join(", ");
    let mut statements = vec![Statement::new(
        format!(
            "CREATE TABLE IF NOT EXISTS {} ({}, PRIMARY KEY ({}))",
            dialect.escape(&metadata.table),
            columns,
            primary
        ),
        Vec::new(),
    )];

    if let Some(TreeEncoding::ClosureTable(junction)) = &metadata.tree {
        let typed = |names: &[String]| {
            names
                .iter()
                .zip(&metadata.primary_columns)
                .map(|(name, pk)| format!("{} {} NOT NULL", dialect.escape(name), sql_type(pk.column_type)))
                .collect::<Vec<_>>()
        };
        let all = junction
            .ancestor_columns
            .iter()
            .chain(&junction.descendant_columns)
            .map(|c| dialect.escape(c))
            .join(", ");
        statements.push(Statement::new(
            format!(
                "CREATE TABLE IF NOT EXISTS {} ({}, PRIMARY KEY ({}))",
                dialect.escape(&junction.table),
                typed(junction.ancestor_columns.as_slice())
                    .into_iter()
                    .chain(typed(junction.descendant_columns.as_slice()))
                    .join(", "),
                all
            ),
            Vec::new(),
        ));
    }
    statements
}
