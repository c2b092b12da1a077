//! Shared fixtures: an in-memory SQLite store seeded with a small category tree,
//! wrapped so tests can inspect every write that reaches the driver.
//!
//! Seed tree (same for every encoding):
//!
//! ```text
//! A(1)
//! ├── B(2)
//! └── C(3)
//!     └── D(4)
//! ```

#![allow(dead_code)]

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use arborist::application::TreeRepository;
use arborist::domain::dialect::{Dialect, SqliteDialect};
use arborist::domain::entities::{RawRow, Record};
use arborist::domain::metadata::TreeMetadata;
use arborist::domain::query::{create_tables, Statement};
use arborist::domain::value::{EntityKey, Value};
use arborist::infrastructure::sqlite::SqliteDatabase;
use arborist::infrastructure::traits::{Database, DriverResult, Executor, Transaction};
use arborist::util::testing::{category, category_with, init_test_setup};
use itertools::Itertools;

pub const ENCODINGS: [&str; 3] = ["closure-table", "nested-set", "materialized-path"];

/// Database wrapper recording write statements, optionally failing on a SQL fragment.
pub struct RecordingDatabase {
    inner: SqliteDatabase,
    writes: Arc<Mutex<Vec<Statement>>>,
    fail_on: Arc<Mutex<Option<String>>>,
}

impl RecordingDatabase {
    pub fn new(inner: SqliteDatabase) -> Self {
        Self {
            inner,
            writes: Arc::new(Mutex::new(Vec::new())),
            fail_on: Arc::new(Mutex::new(None)),
        }
    }

    /// Writes seen so far, in execution order.
    pub fn writes(&self) -> Vec<Statement> {
        self.writes.lock().clone()
    }

    pub fn clear(&self) {
        self.writes.lock().clear();
    }

    /// Make every write whose SQL contains `fragment` fail.
    pub fn fail_when(&self, fragment: &str) {
        *self.fail_on.lock() = Some(fragment.to_string());
    }
}

fn record_write(
    writes: &Mutex<Vec<Statement>>,
    fail_on: &Mutex<Option<String>>,
    statement: &Statement,
) -> DriverResult<()> {
    writes.lock().push(statement.clone());
    match fail_on.lock().as_deref() {
        Some(fragment) if statement.sql.contains(fragment) => {
            Err(format!("injected failure on: {}", statement.sql).into())
        }
        _ => Ok(()),
    }
}

#[async_trait]
impl Executor for RecordingDatabase {
    async fn query(&self, statement: &Statement) -> DriverResult<Vec<RawRow>> {
        self.inner.query(statement).await
    }

    async fn execute(&self, statement: &Statement) -> DriverResult<u64> {
        record_write(&self.writes, &self.fail_on, statement)?;
        self.inner.execute(statement).await
    }
}

#[async_trait]
impl Database for RecordingDatabase {
    async fn begin(&self) -> DriverResult<Box<dyn Transaction>> {
        let inner = self.inner.begin().await?;
        Ok(Box::new(RecordingTransaction {
            inner,
            writes: self.writes.clone(),
            fail_on: self.fail_on.clone(),
        }))
    }
}

struct RecordingTransaction {
    inner: Box<dyn Transaction>,
    writes: Arc<Mutex<Vec<Statement>>>,
    fail_on: Arc<Mutex<Option<String>>>,
}

#[async_trait]
impl Executor for RecordingTransaction {
    async fn query(&self, statement: &Statement) -> DriverResult<Vec<RawRow>> {
        self.inner.query(statement).await
    }

    async fn execute(&self, statement: &Statement) -> DriverResult<u64> {
        record_write(&self.writes, &self.fail_on, statement)?;
        self.inner.execute(statement).await
    }
}

#[async_trait]
impl Transaction for RecordingTransaction {
    async fn commit(self: Box<Self>) -> DriverResult<()> {
        let this = *self;
        this.inner.commit().await
    }

    async fn rollback(self: Box<Self>) -> DriverResult<()> {
        let this = *self;
        this.inner.rollback().await
    }
}

pub fn dialect() -> Arc<dyn Dialect> {
    Arc::new(SqliteDialect)
}

/// Empty store with the tables of `metadata`.
pub async fn empty_store(metadata: &TreeMetadata) -> Arc<RecordingDatabase> {
    init_test_setup();
    let db = SqliteDatabase::open_in_memory().expect("open in-memory database");
    for statement in create_tables(&dialect(), metadata) {
        db.execute(&statement).await.expect("create tables");
    }
    Arc::new(RecordingDatabase::new(db))
}

pub fn node(id: i64, parent: Option<i64>, name: &str) -> Record {
    Record::new()
        .with("id", id)
        .with("parent_id", parent)
        .with("name", name)
}

/// Repository for `encoding` over the seeded tree; the write log starts empty.
pub async fn seeded(encoding: &str) -> (TreeRepository, Arc<RecordingDatabase>) {
    let metadata = category_with(encoding);
    let db = empty_store(&metadata).await;
    let repository =
        TreeRepository::new(metadata, dialect(), db.clone()).expect("valid metadata");
    for record in [
        node(1, None, "A"),
        node(2, Some(1), "B"),
        node(3, Some(1), "C"),
        node(4, Some(3), "D"),
    ] {
        repository.insert(&record).await.expect("seed insert");
    }
    db.clear();
    (repository, db)
}

/// Repository for the plain, non-tree category entity.
pub async fn plain() -> TreeRepository {
    let metadata = category();
    let db = empty_store(&metadata).await;
    db.execute(&Statement::new(
        "INSERT INTO \"category\" (\"id\", \"parent_id\", \"name\") VALUES (1, NULL, 'A')",
        Vec::new(),
    ))
    .await
    .expect("seed plain row");
    TreeRepository::new(metadata, dialect(), db).expect("valid metadata")
}

pub async fn get(repository: &TreeRepository, id: i64) -> Record {
    repository
        .find_by_key(&EntityKey::from(id))
        .await
        .expect("find by key")
        .unwrap_or_else(|| panic!("no row with id {}", id))
}

pub fn id_of(record: &Record) -> i64 {
    record
        .get("id")
        .and_then(Value::as_i64)
        .unwrap_or_else(|| panic!("record without id: {}", record))
}

pub fn ids(records: &[Record]) -> Vec<i64> {
    records.iter().map(id_of).collect()
}

pub fn id_set<'a>(records: impl IntoIterator<Item = &'a Record>) -> BTreeSet<i64> {
    records.into_iter().map(id_of).collect()
}

/// Every (id, parent) pair as stored in the parent column.
pub async fn parent_links(db: &RecordingDatabase) -> Vec<(i64, Option<i64>)> {
    let rows = db
        .query(&Statement::new(
            "SELECT \"id\", \"parent_id\" FROM \"category\" ORDER BY \"id\"",
            Vec::new(),
        ))
        .await
        .expect("read parent links");
    rows.iter()
        .map(|row| {
            (
                row["id"].as_i64().unwrap_or_default(),
                row["parent_id"].as_i64(),
            )
        })
        .collect()
}

/// Strict ancestors of `id` derived from the parent column alone.
pub fn ancestors_by_parent(links: &[(i64, Option<i64>)], id: i64) -> BTreeSet<i64> {
    let mut result = BTreeSet::new();
    let mut current = id;
    while let Some(parent) = links
        .iter()
        .find(|(child, _)| *child == current)
        .and_then(|(_, parent)| *parent)
    {
        if !result.insert(parent) {
            break;
        }
        current = parent;
    }
    result
}

/// Strict descendants of `id` derived from the parent column alone.
pub fn descendants_by_parent(links: &[(i64, Option<i64>)], id: i64) -> BTreeSet<i64> {
    links
        .iter()
        .map(|(child, _)| *child)
        .filter(|child| ancestors_by_parent(links, *child).contains(&id))
        .collect()
}

/// Repository over an empty store for any descriptor.
pub async fn repository_for(metadata: TreeMetadata) -> (TreeRepository, Arc<RecordingDatabase>) {
    let db = empty_store(&metadata).await;
    let repository =
        TreeRepository::new(metadata, dialect(), db.clone()).expect("valid metadata");
    (repository, db)
}

/// Row of the text-keyed `tag` fixture.
pub fn tag(code: &str, parent: Option<&str>, label: &str) -> Record {
    Record::new()
        .with("code", code)
        .with("parent_code", parent)
        .with("label", label)
}

/// Row of the composite-keyed `region` fixture.
pub fn region(a: i64, b: &str, parent: Option<(i64, &str)>, name: &str) -> Record {
    Record::new()
        .with("a", a)
        .with("b", b)
        .with("parent_a", parent.map(|(pa, _)| pa))
        .with("parent_b", parent.map(|(_, pb)| pb))
        .with("name", name)
}

pub fn text_key(code: &str) -> EntityKey {
    EntityKey::from(Value::from(code))
}

pub fn key_set(metadata: &TreeMetadata, records: &[Record]) -> HashSet<EntityKey> {
    records
        .iter()
        .map(|r| metadata.key_of(r).expect("record key"))
        .collect()
}

/// Every (key, parent key) pair of `metadata`'s table, read from the parent columns.
pub async fn key_links(
    db: &RecordingDatabase,
    metadata: &TreeMetadata,
) -> Vec<(EntityKey, Option<EntityKey>)> {
    let d = dialect();
    let primary: Vec<String> = metadata.primary_columns.iter().map(|c| c.name.clone()).collect();
    let parents = metadata.parent_columns_by_primary();
    let columns = primary.iter().chain(&parents).map(|c| d.escape(c)).join(", ");
    let rows = db
        .query(&Statement::new(
            format!("SELECT {} FROM {}", columns, d.escape(&metadata.table)),
            Vec::new(),
        ))
        .await
        .expect("read key links");
    rows.iter()
        .map(|row| {
            let key = EntityKey::new(primary.iter().map(|c| row[c].clone()).collect());
            let parent_values: Vec<Value> = parents.iter().map(|c| row[c].clone()).collect();
            let parent = if parent_values.iter().any(Value::is_null) {
                None
            } else {
                Some(EntityKey::new(parent_values))
            };
            (key, parent)
        })
        .collect()
}

/// Strict ancestors of `key` following the parent columns.
pub fn key_ancestors(links: &[(EntityKey, Option<EntityKey>)], key: &EntityKey) -> HashSet<EntityKey> {
    let mut result = HashSet::new();
    let mut current = key.clone();
    while let Some(parent) = links
        .iter()
        .find(|(child, _)| *child == current)
        .and_then(|(_, parent)| parent.clone())
    {
        if !result.insert(parent.clone()) {
            break;
        }
        current = parent;
    }
    result
}

/// Strict descendants of `key` following the parent columns.
pub fn key_descendants(links: &[(EntityKey, Option<EntityKey>)], key: &EntityKey) -> HashSet<EntityKey> {
    links
        .iter()
        .map(|(child, _)| child.clone())
        .filter(|child| key_ancestors(links, child).contains(key))
        .collect()
}
