//! Domain layer: tree descriptors, encodings and tree assembly
//!
//! This layer is independent of external concerns (no I/O, no CLI, no config loading).
//! It renders statements; executing them is the caller's business.

pub mod arena;
pub mod builder;
pub mod dialect;
pub mod encoding;
pub mod entities;
pub mod error;
pub mod metadata;
pub mod query;
pub mod value;

pub use arena::{TreeArena, TreeNode};
pub use builder::TreeAssembler;
pub use dialect::{Dialect, DialectKind, MysqlDialect, PostgresDialect, SqliteDialect};
pub use encoding::{strategy_for, Direction, FragmentAliases, MovePlan, Scope, TreeStrategy};
pub use entities::*;
pub use error::{DomainError, DomainResult};
pub use metadata::{ClosureJunction, ColumnDef, JoinColumn, NestedSetColumns, PathColumn, TreeEncoding, TreeMetadata};
pub use query::{SelectQuery, Statement};
pub use value::{ColumnType, EntityKey, Value};
