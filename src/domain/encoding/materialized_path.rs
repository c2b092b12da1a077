//! Materialized path encoding
//!
//! Each row stores the concatenated key segments of its ancestors and itself,
//! every segment terminated by `.`, so a root with key 1 has path `1.` and its
//! child with key 3 has path `1.3.`.

use std::sync::Arc;

use itertools::Itertools;
use tracing::debug;

use crate::domain::dialect::Dialect;
use crate::domain::encoding::{
    check_key, primary_columns, Direction, FragmentAliases, InsertInput, InsertPlan, MoveInput,
    MovePlan, Scope, TreeStrategy,
};
use crate::domain::error::DomainResult;
use crate::domain::metadata::{PathColumn, TreeMetadata};
use crate::domain::query::{equals_all, ParamSet, SelectQuery, Statement};
use crate::domain::value::{EntityKey, Value};

pub const SEPARATOR: char = '.';
const COMPONENT_SEPARATOR: char = '_';

/// Percent-encode the characters that delimit segments and key components.
fn escape_component(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '%' | SEPARATOR | COMPONENT_SEPARATOR => escaped.push_str(&format!("%{:02X}", c as u32)),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Path segment of one entity key.
///
/// Distinct keys always yield distinct segments, and a segment never
/// contains the separator except as its terminator.
pub fn segment(key: &EntityKey) -> String {
    let components = key
        .values()
        .iter()
        .map(|value| escape_component(&value.to_string()))
        .join(&COMPONENT_SEPARATOR.to_string());
    format!("{}{}", components, SEPARATOR)
}

#[derive(Debug)]
pub struct MaterializedPathStrategy {
    metadata: Arc<TreeMetadata>,
    path: PathColumn,
    dialect: Arc<dyn Dialect>,
}

impl MaterializedPathStrategy {
    pub fn new(metadata: Arc<TreeMetadata>, path: PathColumn, dialect: Arc<dyn Dialect>) -> Self {
        Self {
            metadata,
            path,
            dialect,
        }
    }
}

impl TreeStrategy for MaterializedPathStrategy {
    fn encoding(&self) -> &'static str {
        "materialized-path"
    }

    fn apply(
        &self,
        query: &mut SelectQuery,
        aliases: FragmentAliases<'_>,
        key: &EntityKey,
        scope: Scope,
    ) -> DomainResult<()> {
        check_key(&self.metadata, key)?;
        let target_path = query.column(aliases.target, &self.path.column);
        let anchor_path = query.column(aliases.auxiliary, &self.path.column);
        let on = match scope.direction {
            Direction::Descendants => self.dialect.starts_with(&target_path, &anchor_path),
            Direction::Ancestors => self.dialect.starts_with(&anchor_path, &target_path),
        };
        query.inner_join(&self.metadata.table, aliases.auxiliary, &on);

        let anchor_primary = primary_columns(query, &self.metadata, aliases.auxiliary);
        let condition = equals_all(&anchor_primary, key.values(), "key", query.params_mut());
        query.and_where(condition);

        if !scope.inclusive {
            let target_primary = primary_columns(query, &self.metadata, aliases.target);
            let same = equals_all(&target_primary, key.values(), "self", query.params_mut());
            let exclusion = if target_primary.len() == 1 {
                same.replacen(" = ", " <> ", 1)
            } else {
                format!("NOT ({})", same)
            };
            query.and_where(exclusion);
        }
        Ok(())
    }

    fn plan_insert(&self, input: &InsertInput<'_>) -> DomainResult<InsertPlan> {
        check_key(&self.metadata, input.key)?;
        let prefix = match input.parent {
            Some(parent) => self.metadata.text_of(parent, &self.path.column)?,
            None => String::new(),
        };
        Ok(InsertPlan {
            assignments: vec![(
                self.path.column.clone(),
                Value::Text(format!("{}{}", prefix, segment(input.key))),
            )],
            ..InsertPlan::default()
        })
    }

    /// Rewrite the path prefix of the entity and every descendant in one statement.
    fn plan_move(&self, input: &MoveInput<'_>) -> DomainResult<MovePlan> {
        let key = self.metadata.key_of(input.entity)?;
        let old_path = self.metadata.text_of(input.entity, &self.path.column)?;
        let new_path = match input.destination {
            Some(destination) => format!(
                "{}{}",
                self.metadata.text_of(destination, &self.path.column)?,
                segment(&key)
            ),
            None => segment(&key),
        };
        let length = old_path.chars().count() as i64;
        debug!("materialized path move: {} -> {}", old_path, new_path);

        let column = self.dialect.escape(&self.path.column);
        let mut params = ParamSet::new(self.dialect.clone());
        let prefix = params.bind("path", Value::Text(new_path));
        let rest = params.bind("start", Value::Integer(length + 1));
        let suffix = format!("SUBSTR({}, {})", column, rest);
        let assignment = self.dialect.concat(&[prefix.as_str(), suffix.as_str()]);
        let length = params.bind("length", Value::Integer(length));
        let old = params.bind("old_path", Value::Text(old_path));

        let mut plan = MovePlan::new();
        plan.push(Statement::new(
            format!(
                "UPDATE {table} SET {column} = {assignment} WHERE SUBSTR({column}, 1, {length}) = {old}",
                table = self.dialect.escape(&self.metadata.table),
                column = column,
                assignment = assignment,
                length = length,
                old = old
            ),
            params.into_values(),
        ));
        Ok(plan)
    }
}
