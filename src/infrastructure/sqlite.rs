//! SQLite executor backed by a single rusqlite connection

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::types::{ToSql, ToSqlOutput, Value as SqlValue, ValueRef};
use rusqlite::{params_from_iter, Connection};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, instrument, trace, warn};

use crate::domain::entities::RawRow;
use crate::domain::query::Statement;
use crate::domain::value::Value;
use crate::infrastructure::error::{InfraError, InfraResult};
use crate::infrastructure::traits::{Database, DriverResult, Executor, Transaction};

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Null => ToSqlOutput::Owned(SqlValue::Null),
            Value::Bool(b) => ToSqlOutput::Owned(SqlValue::Integer(i64::from(*b))),
            Value::Integer(i) => ToSqlOutput::Owned(SqlValue::Integer(*i)),
            Value::Real(f) => ToSqlOutput::Owned(SqlValue::Real(*f)),
            Value::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
        })
    }
}

fn from_sql(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Integer(i),
        ValueRef::Real(f) => Value::Real(f),
        ValueRef::Text(t) | ValueRef::Blob(t) => Value::Text(String::from_utf8_lossy(t).into_owned()),
    }
}

fn run_query(conn: &Connection, statement: &Statement) -> rusqlite::Result<Vec<RawRow>> {
    trace!("query: {}", statement);
    let mut prepared = conn.prepare(&statement.sql)?;
    let names: Vec<String> = prepared.column_names().into_iter().map(String::from).collect();
    let mut rows = prepared.query(params_from_iter(statement.params.iter()))?;

    let mut result = Vec::new();
    while let Some(row) = rows.next()? {
        let mut raw = RawRow::new();
        for (i, name) in names.iter().enumerate() {
            raw.insert(name.clone(), from_sql(row.get_ref(i)?));
        }
        result.push(raw);
    }
    Ok(result)
}

fn run_execute(conn: &Connection, statement: &Statement) -> rusqlite::Result<u64> {
    trace!("execute: {}", statement);
    let affected = conn.execute(&statement.sql, params_from_iter(statement.params.iter()))?;
    Ok(affected as u64)
}

/// SQLite database; statements are serialised through one connection.
#[derive(Clone)]
pub struct SqliteDatabase {
    conn: Arc<AsyncMutex<Connection>>,
}

impl std::fmt::Debug for SqliteDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteDatabase").finish_non_exhaustive()
    }
}

impl SqliteDatabase {
    #[instrument(level = "debug")]
    pub fn open(path: &Path) -> InfraResult<Self> {
        let conn = Connection::open(path)
            .map_err(|e| InfraError::sqlite(format!("open {}", path.display()), e))?;
        Ok(Self::from_connection(conn))
    }

    pub fn open_in_memory() -> InfraResult<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| InfraError::sqlite("open in-memory database", e))?;
        Ok(Self::from_connection(conn))
    }

    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(AsyncMutex::new(conn)),
        }
    }

    /// Run several `;`-separated statements, e.g. a schema script.
    pub async fn execute_batch(&self, sql: &str) -> InfraResult<()> {
        let conn = self.conn.lock().await;
        conn.execute_batch(sql)
            .map_err(|e| InfraError::sqlite("execute batch", e))
    }
}

#[async_trait]
impl Executor for SqliteDatabase {
    async fn query(&self, statement: &Statement) -> DriverResult<Vec<RawRow>> {
        let conn = self.conn.lock().await;
        Ok(run_query(&conn, statement)?)
    }

    async fn execute(&self, statement: &Statement) -> DriverResult<u64> {
        let conn = self.conn.lock().await;
        Ok(run_execute(&conn, statement)?)
    }
}

#[async_trait]
impl Database for SqliteDatabase {
    async fn begin(&self) -> DriverResult<Box<dyn Transaction>> {
        let guard = self.conn.clone().lock_owned().await;
        guard.execute_batch("BEGIN IMMEDIATE")?;
        debug!("transaction started");
        Ok(Box::new(SqliteTransaction {
            conn: Mutex::new(Some(guard)),
        }))
    }
}

/// Holds the connection for the lifetime of the transaction.
pub struct SqliteTransaction {
    conn: Mutex<Option<OwnedMutexGuard<Connection>>>,
}

impl SqliteTransaction {
    fn finish(&self, sql: &str) -> DriverResult<()> {
        let guard = self
            .conn
            .lock()
            .take()
            .ok_or("transaction already finished")?;
        guard.execute_batch(sql)?;
        debug!("transaction finished: {}", sql);
        Ok(())
    }
}

#[async_trait]
impl Executor for SqliteTransaction {
    async fn query(&self, statement: &Statement) -> DriverResult<Vec<RawRow>> {
        let slot = self.conn.lock();
        let conn = slot.as_ref().ok_or("transaction already finished")?;
        Ok(run_query(conn, statement)?)
    }

    async fn execute(&self, statement: &Statement) -> DriverResult<u64> {
        let slot = self.conn.lock();
        let conn = slot.as_ref().ok_or("transaction already finished")?;
        Ok(run_execute(conn, statement)?)
    }
}

#[async_trait]
impl Transaction for SqliteTransaction {
    async fn commit(self: Box<Self>) -> DriverResult<()> {
        self.finish("COMMIT")
    }

    async fn rollback(self: Box<Self>) -> DriverResult<()> {
        self.finish("ROLLBACK")
    }
}

impl Drop for SqliteTransaction {
    fn drop(&mut self) {
        if let Some(guard) = self.conn.get_mut().take() {
            warn!("transaction dropped without commit, rolling back");
            if let Err(e) = guard.execute_batch("ROLLBACK") {
                warn!("rollback failed: {}", e);
            }
        }
    }
}
