//! Domain-level errors (no external dependencies)

use thiserror::Error;

/// Domain errors represent tree invariants and descriptor violations.
/// These are independent of how statements get executed.
#[derive(Error, Debug)]
pub enum DomainError {
    #[error("tree operation '{operation}' is not supported for entity {entity}")]
    UnsupportedOperation { entity: String, operation: String },

    #[error("invalid tree metadata for {entity}: {message}")]
    InvalidMetadata { entity: String, message: String },

    #[error("entity {entity} has no value for primary column {column}")]
    MissingPrimaryKey { entity: String, column: String },

    #[error("entity {entity} has no usable value in column {column}")]
    MissingColumn { entity: String, column: String },

    #[error("cannot move {entity} {key} beneath itself or one of its descendants")]
    CyclicMove { entity: String, key: String },
}

/// Result type for domain operations.
pub type DomainResult<T> = Result<T, DomainError>;
