//! Linked-entity engine: reverse walk from a subject toward candidate
//! entities.
//!
//! Starting from the target subject's shape, the walk follows the schema
//! view's reverse index: direct relation references are joined through
//! tuples, computed-userset edges promote the same entity id, and
//! tuple-to-userset edges join through the tupleset relation. Every
//! discovered `(entity, name)` pair re-enters the walk as a userset
//! subject, so chained indirections are followed transitively.
//!
//! Candidates stream into a push channel as they are found. The stream
//! may contain false positives (and duplicates); consumers verify each
//! candidate with the check engine. A closed receiver stops the walk.

use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tracing::instrument;

use crate::error::{DomainError, DomainResult};
use crate::schema::{LinkedEdge, LinkedEdgeKind, SchemaView};
use crate::store::{
    EntityFilter, RelationshipReader, SchemaReader, SnapshotToken, SubjectFilter, TupleFilter,
};
use crate::tuple::{Entity, Subject};

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A candidate-enumeration request.
#[derive(Debug, Clone)]
pub struct LinkedEntityRequest {
    pub tenant: String,
    pub subject: Subject,
    /// Entity type the candidates must have.
    pub entity_type: String,
    /// Permission the candidates are evaluated against downstream.
    pub permission: String,
    pub snapshot: SnapshotToken,
    pub schema_version: String,
}

type VisitKey = (String, String, Option<String>);

#[derive(Clone)]
struct WalkContext {
    tenant: Arc<str>,
    snapshot: Arc<SnapshotToken>,
    schema: Arc<SchemaView>,
    target_type: Arc<str>,
    /// Names on the target type that can contribute to the permission.
    support: Arc<HashSet<String>>,
    /// Subjects already walked; the walk is sequential, the lock is never
    /// held across an await.
    visited: Arc<Mutex<HashSet<VisitKey>>>,
}

/// Reverse-graph candidate enumerator.
pub struct LinkedEntityEngine<S, R> {
    schema_reader: Arc<S>,
    relationship_reader: Arc<R>,
}

impl<S, R> LinkedEntityEngine<S, R>
where
    S: SchemaReader + 'static,
    R: RelationshipReader + 'static,
{
    pub fn new(schema_reader: Arc<S>, relationship_reader: Arc<R>) -> Self {
        Self {
            schema_reader,
            relationship_reader,
        }
    }

    /// Streams candidate entities into `sink`. Returns when the walk is
    /// exhausted or the receiver is dropped.
    #[instrument(skip(self, request, sink), fields(tenant = %request.tenant, subject = %request.subject, entity_type = %request.entity_type, permission = %request.permission))]
    pub async fn run(
        &self,
        request: &LinkedEntityRequest,
        sink: mpsc::Sender<Entity>,
    ) -> DomainResult<()> {
        let schema_version = if request.schema_version.is_empty() {
            self.schema_reader.head_version(&request.tenant).await?
        } else {
            request.schema_version.clone()
        };
        let schema = self
            .schema_reader
            .read_schema(&request.tenant, &schema_version)
            .await?;
        let snapshot = if request.snapshot.is_noop() {
            self.relationship_reader
                .head_snapshot(&request.tenant)
                .await?
        } else {
            request.snapshot.clone()
        };

        let support = schema.permission_support_set(&request.entity_type, &request.permission)?;

        let ctx = WalkContext {
            tenant: Arc::from(request.tenant.as_str()),
            snapshot: Arc::new(snapshot),
            schema,
            target_type: Arc::from(request.entity_type.as_str()),
            support: Arc::new(support),
            visited: Arc::new(Mutex::new(HashSet::new())),
        };

        match self.walk(request.subject.clone(), ctx, sink).await {
            // A dropped receiver is normal termination for a lazy stream.
            Err(DomainError::Cancelled) => Ok(()),
            other => other,
        }
    }

    /// Collects all candidates; test and small-result convenience.
    pub async fn collect(&self, request: &LinkedEntityRequest) -> DomainResult<Vec<Entity>> {
        let (tx, mut rx) = mpsc::channel(64);
        let walk = self.run(request, tx);
        let drain = async {
            let mut found = Vec::new();
            while let Some(entity) = rx.recv().await {
                found.push(entity);
            }
            found
        };
        let (result, found) = tokio::join!(walk, drain);
        result?;
        Ok(found)
    }

    fn walk(
        &self,
        subject: Subject,
        ctx: WalkContext,
        sink: mpsc::Sender<Entity>,
    ) -> BoxFuture<'_, DomainResult<()>> {
        Box::pin(async move {
            let key = (
                subject.subject_type.clone(),
                subject.subject_id.clone(),
                subject.relation.clone(),
            );
            {
                let mut visited = ctx.visited.lock().expect("visited lock");
                if !visited.insert(key) {
                    return Ok(());
                }
            }

            let edges: Vec<LinkedEdge> = ctx
                .schema
                .linked_schema(&subject.subject_type, subject.relation.as_deref())
                .cloned()
                .collect();

            for edge in edges {
                match &edge.kind {
                    LinkedEdgeKind::Relation => {
                        let filter = TupleFilter {
                            entity: EntityFilter::for_type(edge.entity_type.clone()),
                            relation: Some(edge.name.clone()),
                            subject: Some(SubjectFilter {
                                subject_type: subject.subject_type.clone(),
                                ids: vec![subject.subject_id.clone()],
                                relation: subject.relation.clone(),
                            }),
                        };
                        let tuples = self
                            .relationship_reader
                            .query_relationships(&ctx.tenant, &filter, &ctx.snapshot)
                            .await?;
                        for tuple in tuples {
                            self.emit_and_recurse(tuple.entity, &edge.name, &ctx, &sink)
                                .await?;
                        }
                    }
                    LinkedEdgeKind::ComputedUserSet => {
                        // Same entity, no tuple hop: the subject's entity
                        // id carries the permission name upward.
                        let found =
                            Entity::new(edge.entity_type.clone(), subject.subject_id.clone());
                        self.emit_and_recurse(found, &edge.name, &ctx, &sink).await?;
                    }
                    LinkedEdgeKind::TupleToUserSet { tupleset } => {
                        let filter = TupleFilter {
                            entity: EntityFilter::for_type(edge.entity_type.clone()),
                            relation: Some(tupleset.clone()),
                            subject: Some(SubjectFilter {
                                subject_type: subject.subject_type.clone(),
                                ids: vec![subject.subject_id.clone()],
                                // Tupleset tuples reference the entity with
                                // no indirection; leave unconstrained.
                                relation: None,
                            }),
                        };
                        let tuples = self
                            .relationship_reader
                            .query_relationships(&ctx.tenant, &filter, &ctx.snapshot)
                            .await?;
                        for tuple in tuples {
                            self.emit_and_recurse(tuple.entity, &edge.name, &ctx, &sink)
                                .await?;
                        }
                    }
                }
            }

            Ok(())
        })
    }

    /// Emits the entity when it matches the target gate, then re-enters
    /// the walk with the discovered userset.
    async fn emit_and_recurse(
        &self,
        entity: Entity,
        name: &str,
        ctx: &WalkContext,
        sink: &mpsc::Sender<Entity>,
    ) -> DomainResult<()> {
        if entity.entity_type == *ctx.target_type && ctx.support.contains(name) {
            if sink.send(entity.clone()).await.is_err() {
                return Err(DomainError::Cancelled);
            }
        }
        let next = Subject::userset(entity.entity_type, entity.entity_id, name);
        self.walk(next, ctx.clone(), sink.clone()).await
    }
}
