//! arborist: tree repositories over relational tables
//!
//! Hierarchies are stored as a closure table, nested set or materialized path
//! next to a plain parent column. The domain layer renders statements, the
//! application layer runs them through an executor, and the infrastructure
//! layer provides SQLite and wiring.

pub mod application;
pub mod cli;
pub mod config;
pub mod domain;
pub mod exitcode;
pub mod infrastructure;
pub mod util;
