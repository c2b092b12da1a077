//! Application services
//!
//! Concrete service implementations that orchestrate domain logic.
//! Services depend on I/O boundary traits (Database, Executor, Transaction)
//! but are themselves concrete structs, not traits.

mod tree_repository;

pub use tree_repository::{TreeRepository, AUXILIARY_ALIAS, TREE_ALIAS};
