//! Error conversion helpers for driver calls
//!
//! Provides an extension trait for cleaner error handling with SQL context.

use crate::application::{ApplicationError, ApplicationResult};
use crate::domain::query::Statement;
use crate::infrastructure::traits::DriverResult;

/// Extension trait for converting `DriverResult` to `ApplicationResult` with context.
pub trait DriverResultExt<T> {
    /// Add the failing action and SQL text to a driver error.
    ///
    /// # Example
    /// ```ignore
    /// tx.execute(&statement)
    ///     .await
    ///     .with_sql_context("move subtree", &statement)?;
    /// ```
    fn with_sql_context(self, action: &str, statement: &Statement) -> ApplicationResult<T>;
}

impl<T> DriverResultExt<T> for DriverResult<T> {
    fn with_sql_context(self, action: &str, statement: &Statement) -> ApplicationResult<T> {
        self.map_err(|e| ApplicationError::OperationFailed {
            context: format!("{}: {}", action, statement.sql),
            source: e,
        })
    }
}
