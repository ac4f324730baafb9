//! warden-domain: core permission evaluation engine.
//!
//! A Zanzibar-style authorization core: a compiled schema of entity
//! types, relations and derived permissions; relation tuples queried at a
//! snapshot; and a family of engines answering four query shapes.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────┐
//! │                  warden-domain                    │
//! ├──────────────────────────────────────────────────┤
//! │  tuple     - entity/subject/tuple model          │
//! │  schema/   - compiled schema, view, builder      │
//! │  store     - reader/writer traits, tokens        │
//! │  cache/    - request fingerprint, result cache   │
//! │  engine/   - check, expand, linked,              │
//! │              lookup-entity, lookup-schema        │
//! └──────────────────────────────────────────────────┘
//! ```
//!
//! The DSL compiler, persistent stores, transport, and caller
//! authentication are external collaborators; `warden-storage` provides
//! the in-memory store implementations.

pub mod cache;
pub mod engine;
pub mod error;
pub mod schema;
pub mod store;
pub mod tuple;
mod tuple_proptest;

// Re-export commonly used types at the crate root
pub use cache::{
    register_cache_metrics, CachedCheck, CheckCache, CheckCacheConfig, CheckFingerprint,
    MokaCheckCache, NoopCheckCache,
};
pub use engine::{
    CheckEngine, CheckMetadata, CheckRequest, CheckResponse, CheckVerdict, EngineConfig,
    ExpandEngine, ExpandMetadata, ExpandNode, ExpandRequest, ExpandTarget, LinkedEntityEngine,
    LinkedEntityRequest, LookupEntityEngine, LookupEntityRequest, LookupEntityResponse,
    LookupMetadata,
    LookupSchemaEngine, LookupSchemaRequest, LookupSchemaResponse, DEFAULT_DEPTH,
};
pub use error::{DomainError, DomainResult};
pub use schema::{SchemaBuilder, SchemaDefinition, SchemaView};
pub use store::{
    ContinuousToken, EntityFilter, RelationshipReader, RelationshipWriter, SchemaReader,
    SchemaWriter, SnapshotToken, SubjectFilter, TupleFilter, TupleIterator,
};
pub use tuple::{validate_tuple_for_write, Entity, RelationTuple, Subject, ELLIPSIS};
