//! Permission evaluation engines.
//!
//! Four query shapes over the same compiled schema and relationship
//! store: [`check`](check::CheckEngine) answers ALLOWED/DENIED,
//! [`expand`](expand::ExpandEngine) materializes the proof tree,
//! [`lookup_entity`](lookup_entity::LookupEntityEngine) enumerates entity
//! ids satisfying a permission (via the
//! [`linked`](linked::LinkedEntityEngine) reverse walk), and
//! [`lookup_schema`](lookup_schema::LookupSchemaEngine) evaluates
//! permissions against caller-asserted relations.

pub mod check;
pub mod expand;
pub mod linked;
pub mod lookup_entity;
pub mod lookup_schema;

#[cfg(test)]
pub(crate) mod testing;

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::store::SnapshotToken;
use crate::tuple::{Entity, Subject};

pub use check::CheckEngine;
pub use expand::{ExpandEngine, ExpandNode, ExpandTarget};
pub use linked::{LinkedEntityEngine, LinkedEntityRequest};
pub use lookup_entity::LookupEntityEngine;
pub use lookup_schema::LookupSchemaEngine;

/// Default recursion budget when a request does not carry one.
pub const DEFAULT_DEPTH: u32 = 20;

/// Outcome of a permission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CheckVerdict {
    Allowed,
    Denied,
}

impl CheckVerdict {
    pub fn is_allowed(self) -> bool {
        self == CheckVerdict::Allowed
    }

    /// The complement verdict.
    pub fn invert(self) -> Self {
        match self {
            CheckVerdict::Allowed => CheckVerdict::Denied,
            CheckVerdict::Denied => CheckVerdict::Allowed,
        }
    }
}

impl From<bool> for CheckVerdict {
    fn from(allowed: bool) -> Self {
        if allowed {
            CheckVerdict::Allowed
        } else {
            CheckVerdict::Denied
        }
    }
}

/// Shared engine tuning knobs; injected at construction, never global.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Cap on simultaneous store-touching leaf evaluations within one
    /// request.
    pub concurrency_limit: usize,
    /// Cap on in-flight candidate checks during lookup-entity.
    pub bulk_limit: usize,
    /// Deadline applied to a whole query when the request carries none.
    pub timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            concurrency_limit: 100,
            bulk_limit: 100,
            timeout: Duration::from_secs(10),
        }
    }
}

impl EngineConfig {
    pub fn with_concurrency_limit(mut self, limit: usize) -> Self {
        self.concurrency_limit = limit;
        self
    }

    pub fn with_bulk_limit(mut self, limit: usize) -> Self {
        self.bulk_limit = limit;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Metadata of a check request.
#[derive(Debug, Clone)]
pub struct CheckMetadata {
    pub snapshot: SnapshotToken,
    pub schema_version: String,
    pub depth: u32,
    /// Complements the final verdict of this (sub-)request; participates
    /// in the request fingerprint.
    pub exclusion: bool,
}

impl Default for CheckMetadata {
    fn default() -> Self {
        Self {
            snapshot: SnapshotToken::noop(),
            schema_version: String::new(),
            depth: DEFAULT_DEPTH,
            exclusion: false,
        }
    }
}

/// A permission check request.
#[derive(Debug, Clone)]
pub struct CheckRequest {
    pub tenant: String,
    pub entity: Entity,
    pub permission: String,
    pub subject: Subject,
    pub metadata: CheckMetadata,
}

/// A permission check response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckResponse {
    pub can: CheckVerdict,
    /// Depth budget left along the decisive path; zero flags an answer
    /// that may be incomplete.
    pub remaining_depth: u32,
}

/// Metadata of an expand request.
#[derive(Debug, Clone, Default)]
pub struct ExpandMetadata {
    pub snapshot: SnapshotToken,
    pub schema_version: String,
}

/// A proof-tree expansion request.
#[derive(Debug, Clone)]
pub struct ExpandRequest {
    pub tenant: String,
    pub entity: Entity,
    pub permission: String,
    pub metadata: ExpandMetadata,
}

/// Metadata of a lookup-entity request.
#[derive(Debug, Clone)]
pub struct LookupMetadata {
    pub snapshot: SnapshotToken,
    pub schema_version: String,
    pub depth: u32,
}

impl Default for LookupMetadata {
    fn default() -> Self {
        Self {
            snapshot: SnapshotToken::noop(),
            schema_version: String::new(),
            depth: DEFAULT_DEPTH,
        }
    }
}

/// A lookup-entity request: which entities of `entity_type` does the
/// subject hold `permission` on?
#[derive(Debug, Clone)]
pub struct LookupEntityRequest {
    pub tenant: String,
    pub entity_type: String,
    pub permission: String,
    pub subject: Subject,
    pub metadata: LookupMetadata,
}

/// A lookup-entity response: matching entity ids, sorted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupEntityResponse {
    pub entity_ids: Vec<String>,
}

/// A lookup-schema request: which permissions on the entity follow from
/// the asserted relations alone?
#[derive(Debug, Clone)]
pub struct LookupSchemaRequest {
    pub tenant: String,
    pub entity_type: String,
    pub asserted_relations: std::collections::HashMap<String, Vec<Subject>>,
    pub schema_version: String,
}

/// A lookup-schema response: permission names evaluating ALLOWED, sorted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupSchemaResponse {
    pub permissions: Vec<String>,
}
