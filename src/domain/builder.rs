//! Tree assembler: turns flat query results into owned trees.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, instrument, warn};

use crate::domain::arena::TreeArena;
use crate::domain::dialect::Dialect;
use crate::domain::entities::{RawRow, Record, RelationEntry};
use crate::domain::error::DomainResult;
use crate::domain::metadata::TreeMetadata;
use crate::domain::query::column_alias;
use crate::domain::value::EntityKey;

/// Result type for tree operations.
pub type TreeResult<T> = DomainResult<T>;

/// Hydrates raw rows selected under one alias and links them into trees.
#[derive(Debug, Clone)]
pub struct TreeAssembler {
    metadata: Arc<TreeMetadata>,
    dialect: Arc<dyn Dialect>,
    alias: String,
}

impl TreeAssembler {
    pub fn new(metadata: Arc<TreeMetadata>, dialect: Arc<dyn Dialect>, alias: &str) -> Self {
        Self {
            metadata,
            dialect,
            alias: alias.to_string(),
        }
    }

    /// Strip the `<alias>_` prefix and coerce each value to its declared type.
    pub fn hydrate(&self, row: &RawRow) -> Record {
        self.metadata
            .selectable_columns()
            .into_iter()
            .filter_map(|column| {
                row.get(&column_alias(&self.alias, &column.name)).map(|value| {
                    let value = self.dialect.coerce(value.clone(), column.column_type);
                    (column.name, value)
                })
            })
            .collect()
    }

    pub fn hydrate_all(&self, rows: &[RawRow]) -> Vec<Record> {
        rows.iter().map(|row| self.hydrate(row)).collect()
    }

    /// `(id, parent id)` of every row, in row order.
    pub fn relation_map(&self, rows: &[RawRow]) -> TreeResult<Vec<RelationEntry>> {
        rows.iter()
            .map(|row| {
                let record = self.hydrate(row);
                Ok(RelationEntry {
                    id: self.metadata.key_of(&record)?,
                    parent_id: self.metadata.parent_key_of(&record),
                })
            })
            .collect()
    }

    /// Tree rooted at `entity` from an inclusive descendants fetch.
    ///
    /// Only rows reachable from `entity` through fetched parent links are
    /// placed; anything else in `rows` is ignored.
    #[instrument(level = "debug", skip(self, entity, rows), fields(rows = rows.len()))]
    pub fn build_descendants(&self, entity: &Record, rows: &[RawRow]) -> TreeResult<TreeArena> {
        let root_key = self.metadata.key_of(entity)?;
        let records = self.hydrate_all(rows);
        let relations = self.relation_map(rows)?;

        let mut by_key: HashMap<EntityKey, Record> = HashMap::with_capacity(records.len());
        let mut children: HashMap<EntityKey, Vec<EntityKey>> = HashMap::new();
        for (relation, record) in relations.into_iter().zip(records) {
            if let Some(parent) = relation.parent_id {
                if relation.id != root_key {
                    children.entry(parent).or_default().push(relation.id.clone());
                }
            }
            by_key.insert(relation.id, record);
        }

        let mut tree = TreeArena::new();
        let mut visited: HashSet<EntityKey> = HashSet::new();
        let mut stack = vec![(root_key, None)];

        while let Some((key, parent_idx)) = stack.pop() {
            if !visited.insert(key.clone()) {
                warn!("skipping repeated node {}", key);
                continue;
            }
            let data = match by_key.remove(&key) {
                Some(record) => record,
                None => entity.clone(),
            };
            let idx = tree.insert_node(key.clone(), data, parent_idx);
            if parent_idx.is_none() {
                tree.set_focus(idx);
            }
            if let Some(kids) = children.get(&key) {
                for child in kids.iter().rev() {
                    stack.push((child.clone(), Some(idx)));
                }
            }
        }

        debug!("descendants tree: {} nodes, depth {}", tree.len(), tree.depth());
        Ok(tree)
    }

    /// Chain from the topmost fetched ancestor down to `entity`.
    #[instrument(level = "debug", skip(self, entity, rows), fields(rows = rows.len()))]
    pub fn build_ancestors(&self, entity: &Record, rows: &[RawRow]) -> TreeResult<TreeArena> {
        let entity_key = self.metadata.key_of(entity)?;
        let records = self.hydrate_all(rows);
        let relations = self.relation_map(rows)?;

        let mut by_key: HashMap<EntityKey, (Record, Option<EntityKey>)> =
            HashMap::with_capacity(records.len());
        for (relation, record) in relations.into_iter().zip(records) {
            by_key.insert(relation.id, (record, relation.parent_id));
        }

        let (entity_record, mut parent) = by_key
            .remove(&entity_key)
            .unwrap_or_else(|| (entity.clone(), self.metadata.parent_key_of(entity)));
        let mut chain = vec![(entity_key.clone(), entity_record)];
        let mut visited: HashSet<EntityKey> = HashSet::from([entity_key]);

        while let Some(key) = parent.take() {
            if !visited.insert(key.clone()) {
                warn!("ancestor chain revisits {}", key);
                break;
            }
            match by_key.remove(&key) {
                Some((record, next)) => {
                    chain.push((key, record));
                    parent = next;
                }
                None => break,
            }
        }

        let mut tree = TreeArena::new();
        let mut parent_idx = None;
        for (key, record) in chain.into_iter().rev() {
            parent_idx = Some(tree.insert_node(key, record, parent_idx));
        }
        if let Some(idx) = parent_idx {
            tree.set_focus(idx);
        }

        debug!("ancestors chain: {} nodes", tree.len());
        Ok(tree)
    }
}
