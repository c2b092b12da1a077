//! Closure table encoding
//!
//! A junction table holds one `(ancestor, descendant)` row for every pair in
//! the reflexive-transitive closure of the parent relation.

use std::sync::Arc;

use itertools::{iproduct, Itertools};
use tracing::debug;

use crate::domain::dialect::Dialect;
use crate::domain::encoding::{
    check_key, keys_of, Direction, FragmentAliases, InsertInput, InsertPlan, MoveInput, MovePlan,
    Scope, TreeStrategy,
};
use crate::domain::error::DomainResult;
use crate::domain::metadata::{ClosureJunction, TreeMetadata};
use crate::domain::query::{equals_all, excludes_all, matches_any, ParamSet, SelectQuery, Statement};
use crate::domain::value::{EntityKey, Value};

/// Host parameter limit of SQLite builds since 3.32; the other dialects allow more.
pub const MAX_BOUND_PARAMETERS: usize = 32_766;

#[derive(Debug)]
pub struct ClosureTableStrategy {
    metadata: Arc<TreeMetadata>,
    junction: ClosureJunction,
    dialect: Arc<dyn Dialect>,
}

impl ClosureTableStrategy {
    pub fn new(metadata: Arc<TreeMetadata>, junction: ClosureJunction, dialect: Arc<dyn Dialect>) -> Self {
        Self {
            metadata,
            junction,
            dialect,
        }
    }

    fn escaped(&self, columns: &[String]) -> Vec<String> {
        columns.iter().map(|c| self.dialect.escape(c)).collect()
    }

    fn junction_columns(&self) -> String {
        self.escaped(&self.junction.ancestor_columns)
            .into_iter()
            .chain(self.escaped(&self.junction.descendant_columns))
            .join(", ")
    }

    /// `INSERT INTO junction (...) VALUES (...), ...` for the given pairs.
    fn insert_pairs(&self, pairs: &[(&EntityKey, &EntityKey)]) -> Statement {
        let mut params = ParamSet::new(self.dialect.clone());
        let mut rows = Vec::with_capacity(pairs.len());
        for (ancestor, descendant) in pairs {
            let mut placeholders = Vec::with_capacity(ancestor.len() + descendant.len());
            for value in ancestor.values() {
                placeholders.push(params.bind(
                    &format!("ancestor_{}", ancestor.path_segment()),
                    value.clone(),
                ));
            }
            for value in descendant.values() {
                placeholders.push(params.bind(
                    &format!("descendant_{}", descendant.path_segment()),
                    value.clone(),
                ));
            }
            rows.push(format!("({})", placeholders.join(", ")));
        }
        Statement::new(
            format!(
                "INSERT INTO {} ({}) VALUES {}",
                self.dialect.escape(&self.junction.table),
                self.junction_columns(),
                rows.join(", ")
            ),
            params.into_values(),
        )
    }

    /// Copy every ancestor row of `parent` for the new `descendant`.
    fn insert_inherited(&self, descendant: &EntityKey, parent: &EntityKey) -> Statement {
        let mut params = ParamSet::new(self.dialect.clone());
        let selected = self
            .escaped(&self.junction.ancestor_columns)
            .into_iter()
            .chain(
                descendant
                    .values()
                    .iter()
                    .map(|v| params.bind("descendant", v.clone()))
                    .collect::<Vec<_>>(),
            )
            .join(", ");
        let condition = equals_all(
            &self.escaped(&self.junction.descendant_columns),
            parent.values(),
            "parent",
            &mut params,
        );
        Statement::new(
            format!(
                "INSERT INTO {table} ({columns}) SELECT {selected} FROM {table} WHERE {condition}",
                table = self.dialect.escape(&self.junction.table),
                columns = self.junction_columns(),
                selected = selected,
                condition = condition
            ),
            params.into_values(),
        )
    }
}

impl TreeStrategy for ClosureTableStrategy {
    fn encoding(&self) -> &'static str {
        "closure-table"
    }

    fn apply(
        &self,
        query: &mut SelectQuery,
        aliases: FragmentAliases<'_>,
        key: &EntityKey,
        scope: Scope,
    ) -> DomainResult<()> {
        check_key(&self.metadata, key)?;
        let (joined, filtered) = match scope.direction {
            Direction::Descendants => (&self.junction.descendant_columns, &self.junction.ancestor_columns),
            Direction::Ancestors => (&self.junction.ancestor_columns, &self.junction.descendant_columns),
        };

        let on = self
            .metadata
            .primary_columns
            .iter()
            .zip(joined)
            .map(|(pk, column)| {
                format!(
                    "{} = {}",
                    query.column(aliases.auxiliary, column),
                    query.column(aliases.target, &pk.name)
                )
            })
            .join(" AND ");
        query.inner_join(&self.junction.table, aliases.auxiliary, &on);

        let filter_columns: Vec<String> = filtered
            .iter()
            .map(|c| query.column(aliases.auxiliary, c))
            .collect();
        let condition = equals_all(&filter_columns, key.values(), "key", query.params_mut());
        query.and_where(condition);

        if !scope.inclusive {
            let reflexive = self
                .junction
                .ancestor_columns
                .iter()
                .zip(&self.junction.descendant_columns)
                .map(|(a, d)| {
                    format!(
                        "{} = {}",
                        query.column(aliases.auxiliary, a),
                        query.column(aliases.auxiliary, d)
                    )
                })
                .collect::<Vec<_>>();
            let exclusion = if reflexive.len() == 1 {
                reflexive[0].replacen(" = ", " <> ", 1)
            } else {
                format!("NOT ({})", reflexive.join(" AND "))
            };
            query.and_where(exclusion);
        }
        Ok(())
    }

    fn plan_insert(&self, input: &InsertInput<'_>) -> DomainResult<InsertPlan> {
        check_key(&self.metadata, input.key)?;
        let mut after = vec![self.insert_pairs(&[(input.key, input.key)])];
        if let Some(parent) = input.parent {
            let parent_key = self.metadata.key_of(parent)?;
            after.push(self.insert_inherited(input.key, &parent_key));
        }
        Ok(InsertPlan {
            after,
            ..InsertPlan::default()
        })
    }

    /// Detach the subtree from its old ancestor chain and attach it below the
    /// destination.
    ///
    /// Rows whose ancestor lies strictly inside the subtree are kept; every row
    /// pointing into the subtree from the entity or above is replaced by the
    /// product of the new ancestor chain (entity included) and the subtree.
    fn plan_move(&self, input: &MoveInput<'_>) -> DomainResult<MovePlan> {
        let entity = self.metadata.key_of(input.entity)?;
        let descendants = keys_of(&self.metadata, input.descendants)?;
        let mut ancestors = keys_of(&self.metadata, input.destination_ancestors)?;
        ancestors.push(entity.clone());

        let subtree: Vec<&EntityKey> = std::iter::once(&entity).chain(descendants.iter()).collect();
        debug!(
            "closure move: entity={} descendants={} new ancestors={}",
            entity,
            descendants.len(),
            ancestors.len()
        );

        let mut plan = MovePlan::new();

        let mut params = ParamSet::new(self.dialect.clone());
        let subtree_values: Vec<&[Value]> = subtree.iter().map(|k| k.values()).collect();
        let mut delete = format!(
            "DELETE FROM {} WHERE {}",
            self.dialect.escape(&self.junction.table),
            matches_any(
                &self.escaped(&self.junction.descendant_columns),
                &subtree_values,
                "descendant",
                &mut params
            )
        );
        if !descendants.is_empty() {
            let inner: Vec<&[Value]> = descendants.iter().map(EntityKey::values).collect();
            delete.push_str(" AND ");
            delete.push_str(&excludes_all(
                &self.escaped(&self.junction.ancestor_columns),
                &inner,
                "ancestor",
                &mut params,
            ));
        }
        plan.push(Statement::new(delete, params.into_values()));

        let pairs: Vec<(&EntityKey, &EntityKey)> =
            iproduct!(ancestors.iter(), subtree.iter().copied()).collect();
        let per_pair = 2 * self.metadata.primary_columns.len().max(1);
        let per_statement = (MAX_BOUND_PARAMETERS / per_pair).max(1);
        for chunk in pairs.chunks(per_statement) {
            plan.push(self.insert_pairs(chunk));
        }

        Ok(plan)
    }
}
