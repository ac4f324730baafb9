//! Domain error types for the evaluation engines and store adapters.
//!
//! Every variant maps onto one stable, wire-visible error code via
//! [`DomainError::code`]. Transport layers translate codes to their own
//! status spaces; the engines never convert a transient failure into a
//! DENY verdict.

use thiserror::Error;

/// Domain-specific errors for authorization operations.
#[derive(Debug, Error)]
pub enum DomainError {
    /// Caller is not authenticated.
    #[error("unauthenticated")]
    Unauthenticated,

    /// Caller did not present a bearer token.
    #[error("missing bearer token")]
    MissingBearerToken,

    /// No schema exists for the tenant/version pair.
    #[error("schema not found for tenant '{tenant}' version '{version}'")]
    SchemaNotFound { tenant: String, version: String },

    /// Entity type is not defined in the schema.
    #[error("entity definition not found: {entity_type}")]
    EntityDefinitionNotFound { entity_type: String },

    /// Relation is not defined on the entity type.
    #[error("relation '{relation}' not found on entity '{entity_type}'")]
    RelationDefinitionNotFound {
        entity_type: String,
        relation: String,
    },

    /// Permission is not defined on the entity type.
    #[error("permission '{permission}' not found on entity '{entity_type}'")]
    PermissionDefinitionNotFound {
        entity_type: String,
        permission: String,
    },

    /// Pagination cursor could not be decoded.
    #[error("invalid continuous token: {token}")]
    InvalidContinuousToken { token: String },

    /// Request depth budget is not a usable value.
    ///
    /// Raised for `depth == 0` requests before any store call. Exhaustion
    /// during evaluation is not an error; the affected branch denies and
    /// the response reports `remaining_depth == 0`.
    #[error("depth exceeded")]
    DepthExceeded,

    /// The store circuit breaker is open; the query was not executed.
    #[error("circuit open for store operation '{operation}'")]
    CircuitOpen { operation: String },

    /// The store failed while executing a query.
    #[error("store execution failed: {message}")]
    StoreExecution { message: String },

    /// A value could not be converted between representations
    /// (snapshot token payloads, iterator element shapes).
    #[error("type conversion failed: {message}")]
    TypeConversion { message: String },

    /// A direct (user) subject carried a relation on write.
    #[error("subject relation must be empty for user subjects")]
    SubjectRelationMustBeEmpty,

    /// The query deadline fired before evaluation finished.
    #[error("deadline exceeded after {duration_ms}ms")]
    DeadlineExceeded { duration_ms: u64 },

    /// The caller cancelled the query; no verdict was produced.
    #[error("query cancelled")]
    Cancelled,
}

impl DomainError {
    /// Returns the stable error code identifier for this error.
    ///
    /// Codes are part of the public surface and never change meaning.
    pub fn code(&self) -> &'static str {
        match self {
            DomainError::Unauthenticated => "UNAUTHENTICATED",
            DomainError::MissingBearerToken => "MISSING_BEARER_TOKEN",
            DomainError::SchemaNotFound { .. } => "SCHEMA_NOT_FOUND",
            DomainError::EntityDefinitionNotFound { .. } => "ENTITY_DEFINITION_NOT_FOUND",
            DomainError::RelationDefinitionNotFound { .. } => "RELATION_DEFINITION_NOT_FOUND",
            DomainError::PermissionDefinitionNotFound { .. } => "PERMISSION_DEFINITION_NOT_FOUND",
            DomainError::InvalidContinuousToken { .. } => "INVALID_CONTINUOUS_TOKEN",
            DomainError::DepthExceeded => "DEPTH_EXCEEDED",
            DomainError::CircuitOpen { .. } => "CIRCUIT_OPEN",
            DomainError::StoreExecution { .. } => "STORE_EXECUTION",
            DomainError::TypeConversion { .. } => "TYPE_CONVERSION",
            DomainError::SubjectRelationMustBeEmpty => "SUBJECT_RELATION_MUST_BE_EMPTY",
            DomainError::DeadlineExceeded { .. } => "DEADLINE_EXCEEDED",
            DomainError::Cancelled => "CANCELLED",
        }
    }

    /// True for transient failures that may succeed on a later attempt.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            DomainError::CircuitOpen { .. }
                | DomainError::StoreExecution { .. }
                | DomainError::DeadlineExceeded { .. }
        )
    }
}

/// Result type for domain operations.
pub type DomainResult<T> = Result<T, DomainError>;
