//! Store-adapter traits the engines evaluate against.
//!
//! The engines own these traits; concrete stores (in-memory, relational)
//! implement them in `warden-storage`. Readers serve a fixed snapshot;
//! writers return the snapshot their transaction produced. Everything is
//! safe for concurrent readers.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::DomainResult;
use crate::schema::{SchemaDefinition, SchemaView};
use crate::tuple::RelationTuple;

/// Opaque, totally-ordered snapshot reference.
///
/// Persistent stores wrap a transaction id, the in-memory store a logical
/// timestamp. The engines treat tokens as opaque except for equality in
/// cache keys; the empty token means "head at evaluation start".
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SnapshotToken(pub String);

impl SnapshotToken {
    /// The noop token: resolved to the store head when evaluation begins.
    pub fn noop() -> Self {
        Self(String::new())
    }

    pub fn is_noop(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for SnapshotToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque pagination cursor, returned verbatim to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContinuousToken(pub String);

/// Filter on the entity side of tuples. An empty id list matches any id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntityFilter {
    pub entity_type: String,
    pub ids: Vec<String>,
}

impl EntityFilter {
    pub fn for_type(entity_type: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            ids: Vec::new(),
        }
    }

    pub fn for_entity(entity_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            ids: vec![id.into()],
        }
    }
}

/// Filter on the subject side. `relation == None` leaves the subject
/// relation unconstrained; an empty id list matches any id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubjectFilter {
    pub subject_type: String,
    pub ids: Vec<String>,
    pub relation: Option<String>,
}

/// Tuple query filter: entity shape, optional relation, optional subject.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TupleFilter {
    pub entity: EntityFilter,
    pub relation: Option<String>,
    pub subject: Option<SubjectFilter>,
}

impl TupleFilter {
    /// Filter for `(entity, relation, *)`, the leaf-walk query shape.
    pub fn entity_relation(
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        relation: impl Into<String>,
    ) -> Self {
        Self {
            entity: EntityFilter::for_entity(entity_type, entity_id),
            relation: Some(relation.into()),
            subject: None,
        }
    }
}

/// Finite, forward-only iterator over tuples produced by a query.
#[derive(Debug, Default)]
pub struct TupleIterator {
    tuples: VecDeque<RelationTuple>,
}

impl TupleIterator {
    pub fn new(tuples: Vec<RelationTuple>) -> Self {
        Self {
            tuples: tuples.into(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tuples.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tuples.len()
    }
}

impl Iterator for TupleIterator {
    type Item = RelationTuple;

    fn next(&mut self) -> Option<RelationTuple> {
        self.tuples.pop_front()
    }
}

/// Read access to the relationship store at a snapshot.
#[async_trait]
pub trait RelationshipReader: Send + Sync {
    /// Queries tuples matching the filter, visible at `snapshot`.
    async fn query_relationships(
        &self,
        tenant: &str,
        filter: &TupleFilter,
        snapshot: &SnapshotToken,
    ) -> DomainResult<TupleIterator>;

    /// Paginated variant; the returned cursor fetches the next page.
    async fn read_relationships(
        &self,
        tenant: &str,
        filter: &TupleFilter,
        snapshot: &SnapshotToken,
        page_size: usize,
        cursor: Option<&ContinuousToken>,
    ) -> DomainResult<(Vec<RelationTuple>, Option<ContinuousToken>)>;

    /// The current head snapshot of the tenant.
    async fn head_snapshot(&self, tenant: &str) -> DomainResult<SnapshotToken>;
}

/// Write access to the relationship store.
#[async_trait]
pub trait RelationshipWriter: Send + Sync {
    /// Inserts tuples; returns the snapshot produced by the write.
    async fn write_relationships(
        &self,
        tenant: &str,
        tuples: Vec<RelationTuple>,
    ) -> DomainResult<SnapshotToken>;

    /// Tombstones tuples matching the filter; returns the new snapshot.
    async fn delete_relationships(
        &self,
        tenant: &str,
        filter: &TupleFilter,
    ) -> DomainResult<SnapshotToken>;
}

/// Read access to compiled schemas.
#[async_trait]
pub trait SchemaReader: Send + Sync {
    /// Returns the schema view for a tenant/version; an empty version
    /// resolves to the head version.
    async fn read_schema(&self, tenant: &str, version: &str) -> DomainResult<Arc<SchemaView>>;

    /// The latest schema version written for the tenant.
    async fn head_version(&self, tenant: &str) -> DomainResult<String>;
}

/// Write access to compiled schemas. Versions are write-once.
#[async_trait]
pub trait SchemaWriter: Send + Sync {
    async fn write_schema(
        &self,
        tenant: &str,
        version: &str,
        definition: SchemaDefinition,
    ) -> DomainResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tuple::{Entity, Subject};

    #[test]
    fn test_noop_token() {
        assert!(SnapshotToken::noop().is_noop());
        assert!(!SnapshotToken("MTA=".into()).is_noop());
    }

    #[test]
    fn test_entity_relation_filter_shape() {
        let filter = TupleFilter::entity_relation("doc", "1", "owner");
        assert_eq!(filter.entity.entity_type, "doc");
        assert_eq!(filter.entity.ids, vec!["1".to_string()]);
        assert_eq!(filter.relation.as_deref(), Some("owner"));
        assert!(filter.subject.is_none());
    }

    #[test]
    fn test_tuple_iterator_is_forward_only() {
        let tuples = vec![
            RelationTuple::new(Entity::new("doc", "1"), "owner", Subject::user("user", "1")),
            RelationTuple::new(Entity::new("doc", "1"), "owner", Subject::user("user", "2")),
        ];
        let mut iterator = TupleIterator::new(tuples);
        assert_eq!(iterator.len(), 2);
        assert_eq!(iterator.next().unwrap().subject.subject_id, "1");
        assert_eq!(iterator.next().unwrap().subject.subject_id, "2");
        assert!(iterator.next().is_none());
    }
}
