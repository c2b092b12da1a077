//! Infrastructure layer: database drivers and DI container
//!
//! This layer implements the executor traits and wires up services.

pub mod di;
pub mod error;
pub mod sqlite;
pub mod traits;

pub use error::{InfraError, InfraResult};
