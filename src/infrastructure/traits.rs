//! Query execution and transaction boundary traits
//!
//! These traits abstract the database, allowing the tree repository to be
//! tested against an in-memory store or a statement-recording wrapper.

use async_trait::async_trait;

use crate::domain::entities::RawRow;
use crate::domain::query::Statement;

/// Error raised by a driver; propagated to callers unmodified.
pub type DriverError = Box<dyn std::error::Error + Send + Sync>;

pub type DriverResult<T> = Result<T, DriverError>;

/// Runs statements with their bound parameters.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Run a query; each row maps result column aliases to values.
    async fn query(&self, statement: &Statement) -> DriverResult<Vec<RawRow>>;

    /// Run a write; returns the number of affected rows.
    async fn execute(&self, statement: &Statement) -> DriverResult<u64>;
}

/// A unit of work. Dropping it without `commit` rolls it back.
#[async_trait]
pub trait Transaction: Executor {
    async fn commit(self: Box<Self>) -> DriverResult<()>;

    async fn rollback(self: Box<Self>) -> DriverResult<()>;
}

/// Connection-level executor that can open transactions.
#[async_trait]
pub trait Database: Executor {
    async fn begin(&self) -> DriverResult<Box<dyn Transaction>>;
}
