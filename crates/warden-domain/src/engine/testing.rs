//! Shared in-memory mocks for engine unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{DomainError, DomainResult};
use crate::schema::SchemaView;
use crate::store::{
    ContinuousToken, RelationshipReader, SchemaReader, SnapshotToken, TupleFilter, TupleIterator,
};
use crate::tuple::RelationTuple;

/// Schema reader serving one fixed view for every tenant/version.
pub struct MockSchemaReader {
    view: Arc<SchemaView>,
}

impl MockSchemaReader {
    pub fn new(view: SchemaView) -> Arc<Self> {
        Arc::new(Self {
            view: Arc::new(view),
        })
    }
}

#[async_trait]
impl SchemaReader for MockSchemaReader {
    async fn read_schema(&self, _tenant: &str, _version: &str) -> DomainResult<Arc<SchemaView>> {
        Ok(Arc::clone(&self.view))
    }

    async fn head_version(&self, _tenant: &str) -> DomainResult<String> {
        Ok("v1".to_string())
    }
}

/// Relationship reader over a fixed tuple list, counting queries and
/// optionally failing or stalling to drive error-path tests.
#[derive(Default)]
pub struct MockRelationshipReader {
    tuples: Vec<RelationTuple>,
    queries: AtomicUsize,
    fail_with_store_error: bool,
    delay: Option<Duration>,
}

impl MockRelationshipReader {
    pub fn new(tuples: Vec<RelationTuple>) -> Arc<Self> {
        Arc::new(Self {
            tuples,
            ..Default::default()
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            fail_with_store_error: true,
            ..Default::default()
        })
    }

    pub fn stalling(tuples: Vec<RelationTuple>, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            tuples,
            delay: Some(delay),
            ..Default::default()
        })
    }

    /// Parses `entity:id#relation@subject` strings into a reader.
    pub fn from_specs(specs: &[&str]) -> Arc<Self> {
        let tuples = specs
            .iter()
            .map(|spec| RelationTuple::parse(spec).expect("test tuple spec"))
            .collect();
        Self::new(tuples)
    }

    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }
}

/// True when the tuple matches the filter; mirrors the store contract.
pub fn filter_matches(filter: &TupleFilter, tuple: &RelationTuple) -> bool {
    if tuple.entity.entity_type != filter.entity.entity_type {
        return false;
    }
    if !filter.entity.ids.is_empty() && !filter.entity.ids.contains(&tuple.entity.entity_id) {
        return false;
    }
    if let Some(relation) = &filter.relation {
        if &tuple.relation != relation {
            return false;
        }
    }
    if let Some(subject) = &filter.subject {
        if tuple.subject.subject_type != subject.subject_type {
            return false;
        }
        if !subject.ids.is_empty() && !subject.ids.contains(&tuple.subject.subject_id) {
            return false;
        }
        if let Some(relation) = &subject.relation {
            if tuple.subject.relation.as_deref() != Some(relation.as_str()) {
                return false;
            }
        }
    }
    true
}

#[async_trait]
impl RelationshipReader for MockRelationshipReader {
    async fn query_relationships(
        &self,
        _tenant: &str,
        filter: &TupleFilter,
        _snapshot: &SnapshotToken,
    ) -> DomainResult<TupleIterator> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_with_store_error {
            return Err(DomainError::StoreExecution {
                message: "mock store failure".to_string(),
            });
        }
        let matched = self
            .tuples
            .iter()
            .filter(|tuple| filter_matches(filter, tuple))
            .cloned()
            .collect();
        Ok(TupleIterator::new(matched))
    }

    async fn read_relationships(
        &self,
        tenant: &str,
        filter: &TupleFilter,
        snapshot: &SnapshotToken,
        page_size: usize,
        _cursor: Option<&ContinuousToken>,
    ) -> DomainResult<(Vec<RelationTuple>, Option<ContinuousToken>)> {
        let all: Vec<_> = self
            .query_relationships(tenant, filter, snapshot)
            .await?
            .collect();
        Ok((all.into_iter().take(page_size).collect(), None))
    }

    async fn head_snapshot(&self, _tenant: &str) -> DomainResult<SnapshotToken> {
        Ok(SnapshotToken("1".to_string()))
    }
}
