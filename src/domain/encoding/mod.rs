//! Tree encodings: one strategy per physical layout
//!
//! Each strategy restricts a query to the ancestors or descendants of an
//! entity and plans the writes that keep its auxiliary structure consistent
//! on insert and move. `strategy_for` is the only place that looks at the
//! declared encoding.

pub mod closure;
pub mod materialized_path;
pub mod nested_set;

use std::fmt;
use std::sync::Arc;

use crate::domain::dialect::Dialect;
use crate::domain::entities::Record;
use crate::domain::error::{DomainError, DomainResult};
use crate::domain::metadata::{TreeEncoding, TreeMetadata};
use crate::domain::query::{SelectQuery, Statement};
use crate::domain::value::{EntityKey, Value};

pub use closure::ClosureTableStrategy;
pub use materialized_path::MaterializedPathStrategy;
pub use nested_set::NestedSetStrategy;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ancestors,
    Descendants,
}

/// Which relatives to select, and whether the entity itself is among them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Scope {
    pub direction: Direction,
    pub inclusive: bool,
}

impl Scope {
    pub fn ancestors(inclusive: bool) -> Self {
        Self {
            direction: Direction::Ancestors,
            inclusive,
        }
    }

    pub fn descendants(inclusive: bool) -> Self {
        Self {
            direction: Direction::Descendants,
            inclusive,
        }
    }
}

/// Aliases supplied by the caller so fragments compose without collisions.
#[derive(Debug, Clone, Copy)]
pub struct FragmentAliases<'a> {
    /// Alias of the selected entity table
    pub target: &'a str,
    /// Alias for the junction, self-join or sub-query the strategy adds
    pub auxiliary: &'a str,
}

/// Snapshot a move is planned from; loaded inside the move transaction.
#[derive(Debug)]
pub struct MoveInput<'a> {
    /// Fresh row of the moved entity
    pub entity: &'a Record,
    /// Fresh row of the new parent, `None` to make the entity a root
    pub destination: Option<&'a Record>,
    /// Strict descendants of the entity
    pub descendants: &'a [Record],
    /// Ancestors of the destination, destination included
    pub destination_ancestors: &'a [Record],
    /// Strategy-specific extent (largest nested-set bound)
    pub extent: Option<i64>,
}

/// Snapshot an insert is planned from.
#[derive(Debug)]
pub struct InsertInput<'a> {
    pub entity: &'a Record,
    pub key: &'a EntityKey,
    /// Fresh row of the parent, `None` for roots
    pub parent: Option<&'a Record>,
    pub extent: Option<i64>,
}

/// Writes surrounding the row insert of a new tree entity.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct InsertPlan {
    /// Executed before the row is written
    pub before: Vec<Statement>,
    /// Auxiliary column values to store on the row itself
    pub assignments: Vec<(String, Value)>,
    /// Executed after the row is written
    pub after: Vec<Statement>,
}

/// Ordered writes relocating a subtree.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct MovePlan {
    statements: Vec<Statement>,
}

impl MovePlan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, statement: Statement) {
        self.statements.push(statement);
    }

    pub fn statements(&self) -> &[Statement] {
        &self.statements
    }

    pub fn len(&self) -> usize {
        self.statements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }
}

impl IntoIterator for MovePlan {
    type Item = Statement;
    type IntoIter = std::vec::IntoIter<Statement>;

    fn into_iter(self) -> Self::IntoIter {
        self.statements.into_iter()
    }
}

/// Capability shared by every encoding.
pub trait TreeStrategy: Send + Sync + fmt::Debug {
    fn encoding(&self) -> &'static str;

    /// Restrict `query` to the relatives of `key` described by `scope`.
    fn apply(
        &self,
        query: &mut SelectQuery,
        aliases: FragmentAliases<'_>,
        key: &EntityKey,
        scope: Scope,
    ) -> DomainResult<()>;

    /// Query returning a single `extent` column the planners need, if any.
    fn extent_query(&self) -> Option<Statement> {
        None
    }

    fn plan_insert(&self, input: &InsertInput<'_>) -> DomainResult<InsertPlan>;

    /// Writes relocating the entity's subtree, excluding the parent pointer update.
    fn plan_move(&self, input: &MoveInput<'_>) -> DomainResult<MovePlan>;
}

/// Pick the strategy for the entity's declared encoding.
pub fn strategy_for(
    metadata: Arc<TreeMetadata>,
    dialect: Arc<dyn Dialect>,
) -> DomainResult<Box<dyn TreeStrategy>> {
    metadata.validate()?;
    let strategy: Box<dyn TreeStrategy> = match metadata.tree.clone() {
        Some(TreeEncoding::ClosureTable(junction)) => {
            Box::new(ClosureTableStrategy::new(metadata, junction, dialect))
        }
        Some(TreeEncoding::NestedSet(columns)) => {
            Box::new(NestedSetStrategy::new(metadata, columns, dialect))
        }
        Some(TreeEncoding::MaterializedPath(column)) => {
            Box::new(MaterializedPathStrategy::new(metadata, column, dialect))
        }
        None => {
            return Err(DomainError::UnsupportedOperation {
                entity: metadata.entity.clone(),
                operation: "tree".to_string(),
            })
        }
    };
    Ok(strategy)
}

/// Qualified primary columns of `alias`.
pub(crate) fn primary_columns(query: &SelectQuery, metadata: &TreeMetadata, alias: &str) -> Vec<String> {
    metadata
        .primary_columns
        .iter()
        .map(|c| query.column(alias, &c.name))
        .collect()
}

/// Reject keys that do not line up with the primary key.
pub(crate) fn check_key(metadata: &TreeMetadata, key: &EntityKey) -> DomainResult<()> {
    if key.len() == metadata.primary_columns.len() && !key.values().iter().any(Value::is_null) {
        return Ok(());
    }
    let column = metadata
        .primary_columns
        .get(key.len().min(metadata.primary_columns.len().saturating_sub(1)))
        .map(|c| c.name.clone())
        .unwrap_or_default();
    Err(DomainError::MissingPrimaryKey {
        entity: metadata.entity.clone(),
        column,
    })
}

/// Keys of `records`, failing on rows without a primary key.
pub(crate) fn keys_of(metadata: &TreeMetadata, records: &[Record]) -> DomainResult<Vec<EntityKey>> {
    records.iter().map(|r| metadata.key_of(r)).collect()
}
