//! Nested set encoding
//!
//! Every node carries `left`/`right` bounds from one dense numbering that
//! starts at 1. A node's descendants are exactly the nodes whose left bound
//! falls strictly inside its interval. Several roots lie side by side.

use std::sync::Arc;

use tracing::debug;

use crate::domain::dialect::Dialect;
use crate::domain::encoding::{
    check_key, primary_columns, Direction, FragmentAliases, InsertInput, InsertPlan, MoveInput,
    MovePlan, Scope, TreeStrategy,
};
use crate::domain::error::DomainResult;
use crate::domain::metadata::{NestedSetColumns, TreeMetadata};
use crate::domain::query::{equals_all, ParamSet, SelectQuery, Statement};
use crate::domain::value::{EntityKey, Value};

#[derive(Debug)]
pub struct NestedSetStrategy {
    metadata: Arc<TreeMetadata>,
    columns: NestedSetColumns,
    dialect: Arc<dyn Dialect>,
}

impl NestedSetStrategy {
    pub fn new(metadata: Arc<TreeMetadata>, columns: NestedSetColumns, dialect: Arc<dyn Dialect>) -> Self {
        Self {
            metadata,
            columns,
            dialect,
        }
    }

    fn table(&self) -> String {
        self.dialect.escape(&self.metadata.table)
    }

    fn left(&self) -> String {
        self.dialect.escape(&self.columns.left)
    }

    fn right(&self) -> String {
        self.dialect.escape(&self.columns.right)
    }

    /// `UPDATE table SET <set> WHERE <condition>` with `params` bound in order.
    fn update(&self, set: String, condition: String, params: &[i64]) -> Statement {
        Statement::new(
            format!("UPDATE {} SET {} WHERE {}", self.table(), set, condition),
            params.iter().copied().map(Value::Integer).collect(),
        )
    }

    /// Shift every `column` bound matching `comparison` by `delta` (sign in `operator`).
    fn shift(&self, column: &str, operator: char, comparison: &str, delta: i64, pivot: i64) -> Statement {
        let mut params = ParamSet::new(self.dialect.clone());
        let by = params.bind("delta", Value::Integer(delta));
        let at = params.bind("pivot", Value::Integer(pivot));
        Statement::new(
            format!(
                "UPDATE {table} SET {column} = {column} {operator} {by} WHERE {column} {comparison} {at}",
                table = self.table(),
                column = column,
                operator = operator,
                by = by,
                comparison = comparison,
                at = at
            ),
            params.into_values(),
        )
    }
}

impl TreeStrategy for NestedSetStrategy {
    fn encoding(&self) -> &'static str {
        "nested-set"
    }

    fn apply(
        &self,
        query: &mut SelectQuery,
        aliases: FragmentAliases<'_>,
        key: &EntityKey,
        scope: Scope,
    ) -> DomainResult<()> {
        check_key(&self.metadata, key)?;
        let target_left = query.column(aliases.target, &self.columns.left);
        let target_right = query.column(aliases.target, &self.columns.right);
        let aux_left = query.column(aliases.auxiliary, &self.columns.left);
        let aux_right = query.column(aliases.auxiliary, &self.columns.right);

        // (inner, outer): the interval nested inside the other
        let ((inner_left, _), (outer_left, outer_right)) = match scope.direction {
            Direction::Descendants => ((&target_left, &target_right), (&aux_left, &aux_right)),
            Direction::Ancestors => ((&aux_left, &aux_right), (&target_left, &target_right)),
        };
        let on = if scope.inclusive {
            format!("{} BETWEEN {} AND {}", inner_left, outer_left, outer_right)
        } else {
            format!(
                "{inner} > {left} AND {inner} < {right}",
                inner = inner_left,
                left = outer_left,
                right = outer_right
            )
        };
        query.inner_join(&self.metadata.table, aliases.auxiliary, &on);

        let aux_primary = primary_columns(query, &self.metadata, aliases.auxiliary);
        let condition = equals_all(&aux_primary, key.values(), "key", query.params_mut());
        query.and_where(condition);
        Ok(())
    }

    fn extent_query(&self) -> Option<Statement> {
        Some(Statement::new(
            format!(
                "SELECT MAX({}) AS {} FROM {}",
                self.right(),
                self.dialect.escape("extent"),
                self.table()
            ),
            Vec::new(),
        ))
    }

    /// New nodes become the last child of their parent, or the last root.
    fn plan_insert(&self, input: &InsertInput<'_>) -> DomainResult<InsertPlan> {
        check_key(&self.metadata, input.key)?;
        let mut plan = InsertPlan::default();
        let left = match input.parent {
            Some(parent) => {
                let parent_right = self.metadata.integer_of(parent, &self.columns.right)?;
                plan.before
                    .push(self.shift(&self.right(), '+', ">=", 2, parent_right));
                plan.before
                    .push(self.shift(&self.left(), '+', ">", 2, parent_right));
                parent_right
            }
            None => input.extent.unwrap_or(0) + 1,
        };
        plan.assignments
            .push((self.columns.left.clone(), Value::Integer(left)));
        plan.assignments
            .push((self.columns.right.clone(), Value::Integer(left + 1)));
        Ok(plan)
    }

    /// Park the subtree on negated bounds, close its gap, open a gap of the
    /// same width at the target slot and land the subtree there.
    fn plan_move(&self, input: &MoveInput<'_>) -> DomainResult<MovePlan> {
        let left = self.metadata.integer_of(input.entity, &self.columns.left)?;
        let right = self.metadata.integer_of(input.entity, &self.columns.right)?;
        let width = right - left + 1;

        let slot = match input.destination {
            Some(destination) => {
                let destination_right = self.metadata.integer_of(destination, &self.columns.right)?;
                if destination_right > right {
                    destination_right - width
                } else {
                    destination_right
                }
            }
            None => {
                let extent = input.extent.unwrap_or(right);
                let last = if extent > right { extent - width } else { left - 1 };
                last + 1
            }
        };
        let offset = slot - left;
        debug!(
            "nested set move: bounds=({}, {}) width={} slot={} offset={}",
            left, right, width, slot, offset
        );

        let l = self.left();
        let r = self.right();
        let mut plan = MovePlan::new();
        let mut params = ParamSet::new(self.dialect.clone());
        let lower = params.bind("left", Value::Integer(left));
        let upper = params.bind("right", Value::Integer(right));
        plan.push(self.update(
            format!("{l} = -{l}, {r} = -{r}", l = l, r = r),
            format!("{} >= {} AND {} <= {}", l, lower, r, upper),
            &[left, right],
        ));
        plan.push(self.shift(&l, '-', ">", width, right));
        plan.push(self.shift(&r, '-', ">", width, right));
        plan.push(self.shift(&l, '+', ">=", width, slot));
        plan.push(self.shift(&r, '+', ">=", width, slot));

        let mut params = ParamSet::new(self.dialect.clone());
        let land_left = params.bind("offset", Value::Integer(offset));
        let land_right = params.bind("offset", Value::Integer(offset));
        plan.push(self.update(
            format!("{l} = {} - {l}, {r} = {} - {r}", land_left, land_right, l = l, r = r),
            format!("{} < 0", l),
            &[offset, offset],
        ));
        Ok(plan)
    }
}
