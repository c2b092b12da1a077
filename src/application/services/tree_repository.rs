//! Tree repository: the public tree operations for one entity type
//!
//! Reads go straight to the database. Inserts and moves load a fresh snapshot,
//! plan their writes and execute them inside a single transaction.

use std::sync::Arc;

use futures::future::try_join_all;
use tracing::{debug, info, instrument, warn};

use crate::application::error_ext::DriverResultExt;
use crate::application::{ApplicationError, ApplicationResult};
use crate::domain::arena::TreeArena;
use crate::domain::builder::TreeAssembler;
use crate::domain::dialect::Dialect;
use crate::domain::encoding::{strategy_for, FragmentAliases, InsertInput, MoveInput, Scope, TreeStrategy};
use crate::domain::entities::{RawRow, Record};
use crate::domain::error::DomainError;
use crate::domain::metadata::TreeMetadata;
use crate::domain::query::{equals_all, insert_row, update_parent, SelectQuery, Statement};
use crate::domain::value::{EntityKey, Value};
use crate::infrastructure::traits::{Database, Executor, Transaction};

/// Alias of the entity table in every query the repository issues.
pub const TREE_ALIAS: &str = "tree";
/// Alias for the junction, self-join or sub-query added by an encoding.
pub const AUXILIARY_ALIAS: &str = "tree_aux";

const COUNT_COLUMN: &str = "count";

/// Tree operations over one entity type.
pub struct TreeRepository {
    metadata: Arc<TreeMetadata>,
    dialect: Arc<dyn Dialect>,
    db: Arc<dyn Database>,
    strategy: Option<Box<dyn TreeStrategy>>,
    assembler: TreeAssembler,
}

impl std::fmt::Debug for TreeRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TreeRepository")
            .field("entity", &self.metadata.entity)
            .field("dialect", &self.dialect.name())
            .field("strategy", &self.strategy)
            .finish_non_exhaustive()
    }
}

impl TreeRepository {
    /// Create a repository; entities without a tree encoding are accepted,
    /// but every tree operation on them fails.
    pub fn new(
        metadata: TreeMetadata,
        dialect: Arc<dyn Dialect>,
        db: Arc<dyn Database>,
    ) -> ApplicationResult<Self> {
        metadata.validate()?;
        let metadata = Arc::new(metadata);
        let strategy = match metadata.tree {
            Some(_) => Some(strategy_for(metadata.clone(), dialect.clone())?),
            None => None,
        };
        let assembler = TreeAssembler::new(metadata.clone(), dialect.clone(), TREE_ALIAS);
        Ok(Self {
            metadata,
            dialect,
            db,
            strategy,
            assembler,
        })
    }

    pub fn metadata(&self) -> &TreeMetadata {
        &self.metadata
    }

    /// Encoding name, `None` for plain entities.
    pub fn encoding(&self) -> Option<&'static str> {
        self.strategy.as_ref().map(|s| s.encoding())
    }

    fn strategy(&self, operation: &str) -> ApplicationResult<&dyn TreeStrategy> {
        self.strategy.as_deref().ok_or_else(|| {
            DomainError::UnsupportedOperation {
                entity: self.metadata.entity.clone(),
                operation: operation.to_string(),
            }
            .into()
        })
    }

    fn aliases() -> FragmentAliases<'static> {
        FragmentAliases {
            target: TREE_ALIAS,
            auxiliary: AUXILIARY_ALIAS,
        }
    }

    /// Base select of every hydratable column under `alias`.
    fn select(&self, alias: &str) -> SelectQuery {
        let mut query = SelectQuery::from(self.dialect.clone(), &self.metadata.table, alias);
        query.select_columns(&self.metadata.selectable_columns());
        query
    }

    fn order_by_key(&self, query: &mut SelectQuery) {
        let alias = query.alias().to_string();
        for column in &self.metadata.primary_columns {
            let expression = query.column(&alias, &column.name);
            query.order_by(expression);
        }
    }

    fn relatives_query(
        &self,
        strategy: &dyn TreeStrategy,
        key: &EntityKey,
        scope: Scope,
    ) -> ApplicationResult<SelectQuery> {
        let mut query = self.select(TREE_ALIAS);
        strategy.apply(&mut query, Self::aliases(), key, scope)?;
        self.order_by_key(&mut query);
        Ok(query)
    }

    fn count_query(
        &self,
        strategy: &dyn TreeStrategy,
        key: &EntityKey,
        scope: Scope,
    ) -> ApplicationResult<Statement> {
        let mut query = SelectQuery::from(self.dialect.clone(), &self.metadata.table, TREE_ALIAS);
        query.select("COUNT(*)", COUNT_COLUMN);
        strategy.apply(&mut query, Self::aliases(), key, scope)?;
        Ok(query.to_statement())
    }

    /// Composable query over `entity` and its descendants.
    ///
    /// Columns are selected as `<target>_<column>`; the caller may add
    /// conditions, ordering or further joins.
    pub fn descendants_query(
        &self,
        entity: &Record,
        aliases: FragmentAliases<'_>,
    ) -> ApplicationResult<SelectQuery> {
        self.composable_query(entity, aliases, Scope::descendants(true), "descendants query")
    }

    /// Composable query over `entity` and its ancestors.
    pub fn ancestors_query(
        &self,
        entity: &Record,
        aliases: FragmentAliases<'_>,
    ) -> ApplicationResult<SelectQuery> {
        self.composable_query(entity, aliases, Scope::ancestors(true), "ancestors query")
    }

    fn composable_query(
        &self,
        entity: &Record,
        aliases: FragmentAliases<'_>,
        scope: Scope,
        operation: &str,
    ) -> ApplicationResult<SelectQuery> {
        let strategy = self.strategy(operation)?;
        let key = self.metadata.key_of(entity)?;
        let mut query = self.select(aliases.target);
        strategy.apply(&mut query, aliases, &key, scope)?;
        Ok(query)
    }

    // ============================================================
    // Reads
    // ============================================================

    /// Entities without a parent, ordered by key.
    #[instrument(level = "debug", skip(self))]
    pub async fn find_roots(&self) -> ApplicationResult<Vec<Record>> {
        self.strategy("find roots")?;
        let mut query = self.select(TREE_ALIAS);
        for column in self.metadata.parent_columns_by_primary() {
            let expression = query.column(TREE_ALIAS, &column);
            query.and_where(format!("{} IS NULL", expression));
        }
        self.order_by_key(&mut query);
        let rows = fetch(&*self.db, &query.to_statement(), "find roots").await?;
        Ok(self.assembler.hydrate_all(&rows))
    }

    /// Every root with its full descendant tree; roots are fetched concurrently.
    #[instrument(level = "debug", skip(self))]
    pub async fn find_trees(&self) -> ApplicationResult<Vec<TreeArena>> {
        let roots = self.find_roots().await?;
        debug!("find_trees: {} roots", roots.len());
        try_join_all(roots.iter().map(|root| self.find_descendants_tree(root))).await
    }

    /// Strict descendants of `entity`, ordered by key.
    #[instrument(level = "debug", skip_all)]
    pub async fn find_descendants(&self, entity: &Record) -> ApplicationResult<Vec<Record>> {
        self.find_relatives(entity, Scope::descendants(false), "find descendants")
            .await
    }

    /// Tree rooted at `entity`; the caller's record is left untouched.
    #[instrument(level = "debug", skip_all)]
    pub async fn find_descendants_tree(&self, entity: &Record) -> ApplicationResult<TreeArena> {
        let rows = self
            .fetch_relatives(entity, Scope::descendants(true), "find descendants tree")
            .await?;
        Ok(self.assembler.build_descendants(entity, &rows)?)
    }

    #[instrument(level = "debug", skip_all)]
    pub async fn count_descendants(&self, entity: &Record) -> ApplicationResult<u64> {
        self.count_relatives(entity, Scope::descendants(false), "count descendants")
            .await
    }

    /// Strict ancestors of `entity`, ordered by key.
    #[instrument(level = "debug", skip_all)]
    pub async fn find_ancestors(&self, entity: &Record) -> ApplicationResult<Vec<Record>> {
        self.find_relatives(entity, Scope::ancestors(false), "find ancestors")
            .await
    }

    /// Chain from the root down to `entity`, focused on `entity`.
    #[instrument(level = "debug", skip_all)]
    pub async fn find_ancestors_tree(&self, entity: &Record) -> ApplicationResult<TreeArena> {
        let rows = self
            .fetch_relatives(entity, Scope::ancestors(true), "find ancestors tree")
            .await?;
        Ok(self.assembler.build_ancestors(entity, &rows)?)
    }

    #[instrument(level = "debug", skip_all)]
    pub async fn count_ancestors(&self, entity: &Record) -> ApplicationResult<u64> {
        self.count_relatives(entity, Scope::ancestors(false), "count ancestors")
            .await
    }

    /// Load one entity by primary key.
    #[instrument(level = "debug", skip(self))]
    pub async fn find_by_key(&self, key: &EntityKey) -> ApplicationResult<Option<Record>> {
        self.load(&*self.db, key).await
    }

    async fn fetch_relatives(
        &self,
        entity: &Record,
        scope: Scope,
        operation: &str,
    ) -> ApplicationResult<Vec<RawRow>> {
        let strategy = self.strategy(operation)?;
        let key = self.metadata.key_of(entity)?;
        let statement = self.relatives_query(strategy, &key, scope)?.to_statement();
        fetch(&*self.db, &statement, operation).await
    }

    async fn find_relatives(
        &self,
        entity: &Record,
        scope: Scope,
        operation: &str,
    ) -> ApplicationResult<Vec<Record>> {
        let rows = self.fetch_relatives(entity, scope, operation).await?;
        Ok(self.assembler.hydrate_all(&rows))
    }

    async fn count_relatives(
        &self,
        entity: &Record,
        scope: Scope,
        operation: &str,
    ) -> ApplicationResult<u64> {
        let strategy = self.strategy(operation)?;
        let key = self.metadata.key_of(entity)?;
        let statement = self.count_query(strategy, &key, scope)?;
        let rows = fetch(&*self.db, &statement, operation).await?;
        let count = rows
            .first()
            .and_then(|row| row.get(COUNT_COLUMN))
            .and_then(Value::as_i64)
            .ok_or_else(|| DomainError::MissingColumn {
                entity: self.metadata.entity.clone(),
                column: COUNT_COLUMN.to_string(),
            })?;
        u64::try_from(count).map_err(|e| ApplicationError::OperationFailed {
            context: format!("{}: negative count {}", operation, count),
            source: Box::new(e),
        })
    }

    async fn load<E: Executor + ?Sized>(
        &self,
        executor: &E,
        key: &EntityKey,
    ) -> ApplicationResult<Option<Record>> {
        let mut query = self.select(TREE_ALIAS);
        let columns: Vec<String> = self
            .metadata
            .primary_columns
            .iter()
            .map(|c| query.column(TREE_ALIAS, &c.name))
            .collect();
        let condition = equals_all(&columns, key.values(), "id", query.params_mut());
        query.and_where(condition);
        let rows = fetch(executor, &query.to_statement(), "load entity").await?;
        Ok(rows.first().map(|row| self.assembler.hydrate(row)))
    }

    async fn load_existing<E: Executor + ?Sized>(
        &self,
        executor: &E,
        key: &EntityKey,
    ) -> ApplicationResult<Record> {
        self.load(executor, key)
            .await?
            .ok_or_else(|| ApplicationError::NotFound {
                entity: self.metadata.entity.clone(),
                key: key.to_string(),
            })
    }

    async fn extent<E: Executor + ?Sized>(
        &self,
        executor: &E,
        strategy: &dyn TreeStrategy,
    ) -> ApplicationResult<Option<i64>> {
        match strategy.extent_query() {
            Some(statement) => {
                let rows = fetch(executor, &statement, "read extent").await?;
                Ok(rows
                    .first()
                    .and_then(|row| row.get("extent"))
                    .and_then(Value::as_i64))
            }
            None => Ok(None),
        }
    }

    // ============================================================
    // Writes
    // ============================================================

    /// Persist a new entity together with its tree bookkeeping.
    ///
    /// The record must carry its primary key; its parent columns pick the
    /// parent, NULL making it a root. Returns the row as written.
    #[instrument(level = "debug", skip_all)]
    pub async fn insert(&self, record: &Record) -> ApplicationResult<Record> {
        let strategy = self.strategy("insert")?;
        let key = self.metadata.key_of(record)?;
        let tx = self.db.begin().await.map_err(|e| ApplicationError::OperationFailed {
            context: "begin transaction".to_string(),
            source: e,
        })?;
        let result = self.insert_in(&*tx, strategy, record, &key).await;
        let written = finish(tx, result).await?;
        info!("inserted {} {}", self.metadata.entity, key);
        Ok(written)
    }

    async fn insert_in(
        &self,
        tx: &dyn Transaction,
        strategy: &dyn TreeStrategy,
        record: &Record,
        key: &EntityKey,
    ) -> ApplicationResult<Record> {
        let parent = match self.metadata.parent_key_of(record) {
            Some(parent_key) => Some(self.load_existing(tx, &parent_key).await?),
            None => None,
        };
        let extent = self.extent(tx, strategy).await?;
        let plan = strategy.plan_insert(&InsertInput {
            entity: record,
            key,
            parent: parent.as_ref(),
            extent,
        })?;

        for statement in &plan.before {
            execute(tx, statement, "insert").await?;
        }
        let mut row = record.clone();
        for (column, value) in plan.assignments {
            row.set(column, value);
        }
        execute(tx, &insert_row(&self.dialect, &self.metadata, &row), "insert").await?;
        for statement in &plan.after {
            execute(tx, statement, "insert").await?;
        }
        Ok(row)
    }

    /// Re-parent `entity` and its whole subtree under `to`, or make it a root.
    ///
    /// Runs in one transaction: either every statement of the plan commits,
    /// or none does.
    #[instrument(level = "debug", skip_all)]
    pub async fn move_to(&self, entity: &Record, to: Option<&Record>) -> ApplicationResult<()> {
        let strategy = self.strategy("move")?;
        let key = self.metadata.key_of(entity)?;
        let destination = to.map(|r| self.metadata.key_of(r)).transpose()?;
        let tx = self.db.begin().await.map_err(|e| ApplicationError::OperationFailed {
            context: "begin transaction".to_string(),
            source: e,
        })?;
        let result = self
            .move_in(&*tx, strategy, &key, destination.as_ref())
            .await;
        finish(tx, result).await?;
        match &destination {
            Some(to) => info!("moved {} {} under {}", self.metadata.entity, key, to),
            None => info!("moved {} {} to root", self.metadata.entity, key),
        }
        Ok(())
    }

    async fn move_in(
        &self,
        tx: &dyn Transaction,
        strategy: &dyn TreeStrategy,
        key: &EntityKey,
        destination_key: Option<&EntityKey>,
    ) -> ApplicationResult<()> {
        let entity = self.load_existing(tx, key).await?;
        let destination = match destination_key {
            Some(to) => Some(self.load_existing(tx, to).await?),
            None => None,
        };

        let descendants = self
            .read_relatives(tx, strategy, key, Scope::descendants(false))
            .await?;
        let destination_ancestors = match destination_key {
            Some(to) => {
                self.read_relatives(tx, strategy, to, Scope::ancestors(true))
                    .await?
            }
            None => Vec::new(),
        };
        for ancestor in &destination_ancestors {
            if self.metadata.key_of(ancestor)? == *key {
                return Err(DomainError::CyclicMove {
                    entity: self.metadata.entity.clone(),
                    key: key.to_string(),
                }
                .into());
            }
        }
        let extent = self.extent(tx, strategy).await?;

        let mut plan = strategy.plan_move(&MoveInput {
            entity: &entity,
            destination: destination.as_ref(),
            descendants: &descendants,
            destination_ancestors: &destination_ancestors,
            extent,
        })?;
        plan.push(update_parent(
            &self.dialect,
            &self.metadata,
            key.values(),
            destination_key.map(EntityKey::values),
        ));
        debug!(
            "move plan for {} {}: {} statements",
            self.metadata.entity,
            key,
            plan.len()
        );

        for statement in plan {
            execute(tx, &statement, "move").await?;
        }
        Ok(())
    }

    async fn read_relatives(
        &self,
        tx: &dyn Transaction,
        strategy: &dyn TreeStrategy,
        key: &EntityKey,
        scope: Scope,
    ) -> ApplicationResult<Vec<Record>> {
        let statement = self.relatives_query(strategy, key, scope)?.to_statement();
        let rows = fetch(tx, &statement, "read move snapshot").await?;
        Ok(self.assembler.hydrate_all(&rows))
    }
}

async fn fetch<E: Executor + ?Sized>(
    executor: &E,
    statement: &Statement,
    action: &str,
) -> ApplicationResult<Vec<RawRow>> {
    executor
        .query(statement)
        .await
        .with_sql_context(action, statement)
}

async fn execute<E: Executor + ?Sized>(
    executor: &E,
    statement: &Statement,
    action: &str,
) -> ApplicationResult<u64> {
    executor
        .execute(statement)
        .await
        .with_sql_context(action, statement)
}

/// Commit on success, roll back on failure; the original error wins.
async fn finish<T>(tx: Box<dyn Transaction>, result: ApplicationResult<T>) -> ApplicationResult<T> {
    match result {
        Ok(value) => {
            tx.commit()
                .await
                .map_err(|e| ApplicationError::OperationFailed {
                    context: "commit transaction".to_string(),
                    source: e,
                })?;
            Ok(value)
        }
        Err(e) => {
            warn!("rolling back: {}", e);
            if let Err(rollback) = tx.rollback().await {
                warn!("rollback failed: {}", rollback);
            }
            Err(e)
        }
    }
}
