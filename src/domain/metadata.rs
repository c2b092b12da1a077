//! Column/relation descriptor for tree entities
//!
//! A `TreeMetadata` tells the tree machinery which table holds the entity,
//! which columns form its primary key and parent relation, and which
//! auxiliary structure (if any) encodes the hierarchy.

use serde::{Deserialize, Serialize};

use crate::domain::entities::Record;
use crate::domain::error::{DomainError, DomainResult};
use crate::domain::value::{ColumnType, EntityKey, Value};

/// A plain column with its declared type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    #[serde(default, rename = "type")]
    pub column_type: ColumnType,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
        }
    }
}

/// A join column of the parent relation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinColumn {
    /// Relation property name, e.g. `parent`
    #[serde(default = "default_relation")]
    pub relation: String,
    /// Explicit database column name, if one was given
    #[serde(default)]
    pub name: Option<String>,
    /// Primary column this join column references
    pub referenced_column: String,
}

fn default_relation() -> String {
    "parent".to_string()
}

impl JoinColumn {
    /// Database column name, falling back to `<relation>_<referenced>`.
    pub fn database_name(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| format!("{}_{}", self.relation, self.referenced_column))
    }
}

/// Closure junction table layout.
///
/// `ancestor_columns[i]` and `descendant_columns[i]` both reference primary column `i`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClosureJunction {
    pub table: String,
    pub ancestor_columns: Vec<String>,
    pub descendant_columns: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NestedSetColumns {
    #[serde(default = "default_left")]
    pub left: String,
    #[serde(default = "default_right")]
    pub right: String,
}

fn default_left() -> String {
    "nsleft".to_string()
}

fn default_right() -> String {
    "nsright".to_string()
}

impl Default for NestedSetColumns {
    fn default() -> Self {
        Self {
            left: default_left(),
            right: default_right(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathColumn {
    #[serde(default = "default_path")]
    pub column: String,
}

fn default_path() -> String {
    "mpath".to_string()
}

impl Default for PathColumn {
    fn default() -> Self {
        Self {
            column: default_path(),
        }
    }
}

/// Physical encoding of the hierarchy, fixed per entity type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum TreeEncoding {
    ClosureTable(ClosureJunction),
    NestedSet(NestedSetColumns),
    MaterializedPath(PathColumn),
}

impl TreeEncoding {
    pub fn kind(&self) -> &'static str {
        match self {
            TreeEncoding::ClosureTable(_) => "closure-table",
            TreeEncoding::NestedSet(_) => "nested-set",
            TreeEncoding::MaterializedPath(_) => "materialized-path",
        }
    }
}

/// Descriptor of a (possibly tree-shaped) entity type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeMetadata {
    /// Entity name used in errors, logs and the CLI
    pub entity: String,
    pub table: String,
    pub primary_columns: Vec<ColumnDef>,
    #[serde(default)]
    pub parent_columns: Vec<JoinColumn>,
    /// Further data columns to select and hydrate
    #[serde(default)]
    pub columns: Vec<ColumnDef>,
    #[serde(default)]
    pub tree: Option<TreeEncoding>,
}

impl TreeMetadata {
    pub fn new(entity: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            table: table.into(),
            primary_columns: Vec::new(),
            parent_columns: Vec::new(),
            columns: Vec::new(),
            tree: None,
        }
    }

    pub fn primary(mut self, name: impl Into<String>, column_type: ColumnType) -> Self {
        self.primary_columns.push(ColumnDef::new(name, column_type));
        self
    }

    /// Add a parent join column referencing `referenced_column`.
    pub fn parent(mut self, name: Option<&str>, referenced_column: impl Into<String>) -> Self {
        self.parent_columns.push(JoinColumn {
            relation: default_relation(),
            name: name.map(str::to_string),
            referenced_column: referenced_column.into(),
        });
        self
    }

    pub fn column(mut self, name: impl Into<String>, column_type: ColumnType) -> Self {
        self.columns.push(ColumnDef::new(name, column_type));
        self
    }

    /// Closure table encoding with the conventional `<table>_closure` junction.
    pub fn closure_table(mut self) -> Self {
        let junction = ClosureJunction {
            table: format!("{}_closure", self.table),
            ancestor_columns: self
                .primary_columns
                .iter()
                .map(|c| format!("{}_ancestor", c.name))
                .collect(),
            descendant_columns: self
                .primary_columns
                .iter()
                .map(|c| format!("{}_descendant", c.name))
                .collect(),
        };
        self.tree = Some(TreeEncoding::ClosureTable(junction));
        self
    }

    pub fn nested_set(mut self) -> Self {
        self.tree = Some(TreeEncoding::NestedSet(NestedSetColumns::default()));
        self
    }

    pub fn materialized_path(mut self) -> Self {
        self.tree = Some(TreeEncoding::MaterializedPath(PathColumn::default()));
        self
    }

    pub fn with_tree(mut self, encoding: TreeEncoding) -> Self {
        self.tree = Some(encoding);
        self
    }

    /// Check the descriptor for internal consistency.
    pub fn validate(&self) -> DomainResult<()> {
        let invalid = |message: String| DomainError::InvalidMetadata {
            entity: self.entity.clone(),
            message,
        };

        if self.primary_columns.is_empty() {
            return Err(invalid("no primary columns".into()));
        }
        for join in &self.parent_columns {
            if self.primary_column(&join.referenced_column).is_none() {
                return Err(invalid(format!(
                    "parent column {} references unknown column {}",
                    join.database_name(),
                    join.referenced_column
                )));
            }
        }
        if let Some(tree) = &self.tree {
            if self.parent_columns.len() != self.primary_columns.len() {
                return Err(invalid(format!(
                    "{} tree needs one parent column per primary column",
                    tree.kind()
                )));
            }
            if let TreeEncoding::ClosureTable(junction) = tree {
                if junction.ancestor_columns.len() != self.primary_columns.len()
                    || junction.descendant_columns.len() != self.primary_columns.len()
                {
                    return Err(invalid(format!(
                        "closure junction {} must mirror the primary key",
                        junction.table
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn primary_column(&self, name: &str) -> Option<&ColumnDef> {
        self.primary_columns.iter().find(|c| c.name == name)
    }

    /// Parent join columns with the type of the column they reference.
    pub fn parent_column_defs(&self) -> Vec<ColumnDef> {
        self.parent_columns
            .iter()
            .map(|join| {
                let ty = self
                    .primary_column(&join.referenced_column)
                    .map(|c| c.column_type)
                    .unwrap_or_default();
                ColumnDef::new(join.database_name(), ty)
            })
            .collect()
    }

    /// Parent join columns ordered to match the primary key.
    pub fn parent_columns_by_primary(&self) -> Vec<String> {
        self.primary_columns
            .iter()
            .filter_map(|pk| {
                self.parent_columns
                    .iter()
                    .find(|join| join.referenced_column == pk.name)
                    .map(JoinColumn::database_name)
            })
            .collect()
    }

    /// Every column the repository selects and hydrates, without duplicates.
    pub fn selectable_columns(&self) -> Vec<ColumnDef> {
        let mut all: Vec<ColumnDef> = Vec::new();
        let mut push = |def: ColumnDef| {
            if !all.iter().any(|c| c.name == def.name) {
                all.push(def);
            }
        };
        self.primary_columns.iter().cloned().for_each(&mut push);
        self.parent_column_defs().into_iter().for_each(&mut push);
        match &self.tree {
            Some(TreeEncoding::NestedSet(ns)) => {
                push(ColumnDef::new(&ns.left, ColumnType::Integer));
                push(ColumnDef::new(&ns.right, ColumnType::Integer));
            }
            Some(TreeEncoding::MaterializedPath(mp)) => {
                push(ColumnDef::new(&mp.column, ColumnType::Text))
            }
            _ => {}
        }
        self.columns.iter().cloned().for_each(&mut push);
        all
    }

    /// Primary key of a record; every primary column must be present and non-null.
    pub fn key_of(&self, record: &Record) -> DomainResult<EntityKey> {
        let mut values = Vec::with_capacity(self.primary_columns.len());
        for column in &self.primary_columns {
            match record.get(&column.name) {
                Some(value) if !value.is_null() => {
                    values.push(value.clone().coerce(column.column_type))
                }
                _ => {
                    return Err(DomainError::MissingPrimaryKey {
                        entity: self.entity.clone(),
                        column: column.name.clone(),
                    })
                }
            }
        }
        Ok(EntityKey::new(values))
    }

    /// Parent key of a record, `None` for roots (any parent column NULL or absent).
    pub fn parent_key_of(&self, record: &Record) -> Option<EntityKey> {
        let mut values = Vec::with_capacity(self.primary_columns.len());
        for (column, def) in self
            .parent_columns_by_primary()
            .iter()
            .zip(&self.primary_columns)
        {
            match record.get(column) {
                Some(value) if !value.is_null() => values.push(value.clone().coerce(def.column_type)),
                _ => return None,
            }
        }
        if values.is_empty() {
            None
        } else {
            Some(EntityKey::new(values))
        }
    }

    /// Integer value of `column`, used for nested-set bounds.
    pub fn integer_of(&self, record: &Record, column: &str) -> DomainResult<i64> {
        record
            .get(column)
            .and_then(Value::as_i64)
            .ok_or_else(|| DomainError::MissingColumn {
                entity: self.entity.clone(),
                column: column.to_string(),
            })
    }

    /// Text value of `column`, used for materialized paths.
    pub fn text_of(&self, record: &Record, column: &str) -> DomainResult<String> {
        record
            .get(column)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| DomainError::MissingColumn {
                entity: self.entity.clone(),
                column: column.to_string(),
            })
    }
}
