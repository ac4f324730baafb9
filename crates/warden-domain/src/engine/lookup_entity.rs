//! Lookup-entity engine: candidate enumeration verified by check.
//!
//! The linked-entity walk produces candidates (possibly false positives)
//! into a channel; a worker pool bounded by `bulk_limit` verifies each
//! one with the check engine at the pinned snapshot and schema version.
//! The batch variant returns deduplicated, sorted ids; the streaming
//! variant pushes ids as their checks complete. A per-candidate failure
//! is logged and the candidate omitted; a failure of the candidate
//! stream itself aborts the call.

use std::collections::HashSet;
use std::sync::Arc;

use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::{mpsc, Semaphore};
use tracing::{instrument, warn};

use crate::cache::CheckCache;
use crate::error::{DomainError, DomainResult};
use crate::store::{RelationshipReader, SchemaReader, SnapshotToken};
use crate::tuple::Entity;

use super::check::CheckEngine;
use super::linked::{LinkedEntityEngine, LinkedEntityRequest};
use super::{
    CheckMetadata, CheckRequest, CheckVerdict, EngineConfig, LookupEntityRequest,
    LookupEntityResponse,
};

/// Entity-id enumeration engine.
pub struct LookupEntityEngine<S, R> {
    schema_reader: Arc<S>,
    relationship_reader: Arc<R>,
    check: Arc<CheckEngine<S, R>>,
    linked: Arc<LinkedEntityEngine<S, R>>,
    config: EngineConfig,
}

impl<S, R> LookupEntityEngine<S, R>
where
    S: SchemaReader + 'static,
    R: RelationshipReader + 'static,
{
    pub fn new(
        schema_reader: Arc<S>,
        relationship_reader: Arc<R>,
        cache: Arc<dyn CheckCache>,
    ) -> Self {
        Self::with_config(
            schema_reader,
            relationship_reader,
            cache,
            EngineConfig::default(),
        )
    }

    pub fn with_config(
        schema_reader: Arc<S>,
        relationship_reader: Arc<R>,
        cache: Arc<dyn CheckCache>,
        config: EngineConfig,
    ) -> Self {
        let check = Arc::new(CheckEngine::with_config(
            Arc::clone(&schema_reader),
            Arc::clone(&relationship_reader),
            cache,
            config.clone(),
        ));
        let linked = Arc::new(LinkedEntityEngine::new(
            Arc::clone(&schema_reader),
            Arc::clone(&relationship_reader),
        ));
        Self {
            schema_reader,
            relationship_reader,
            check,
            linked,
            config,
        }
    }

    /// Returns the sorted ids of entities the subject holds the
    /// permission on.
    #[instrument(skip(self, request), fields(tenant = %request.tenant, entity_type = %request.entity_type, permission = %request.permission, subject = %request.subject))]
    pub async fn lookup_entity(
        &self,
        request: &LookupEntityRequest,
    ) -> DomainResult<LookupEntityResponse> {
        let (tx, mut rx) = mpsc::channel::<String>(self.config.bulk_limit.max(1));
        let drive = self.drive(request, tx);
        let drain = async {
            let mut ids = Vec::new();
            while let Some(id) = rx.recv().await {
                ids.push(id);
            }
            ids
        };
        let (result, mut entity_ids) = tokio::join!(drive, drain);
        result?;
        entity_ids.sort();
        Ok(LookupEntityResponse { entity_ids })
    }

    /// Streams matching ids into `sink` as their checks complete. Returns
    /// once the candidate source is exhausted or the receiver is dropped.
    pub async fn lookup_entity_stream(
        &self,
        request: &LookupEntityRequest,
        sink: mpsc::Sender<String>,
    ) -> DomainResult<()> {
        match self.drive(request, sink).await {
            Err(DomainError::Cancelled) => Ok(()),
            other => other,
        }
    }

    /// Shared pipeline: enumerate candidates, verify each under the bulk
    /// cap, emit allowed ids deduplicated.
    async fn drive(
        &self,
        request: &LookupEntityRequest,
        sink: mpsc::Sender<String>,
    ) -> DomainResult<()> {
        // Pin snapshot and version once so every candidate check sees the
        // same store state.
        let schema_version = if request.metadata.schema_version.is_empty() {
            self.schema_reader.head_version(&request.tenant).await?
        } else {
            request.metadata.schema_version.clone()
        };
        let snapshot = if request.metadata.snapshot.is_noop() {
            self.relationship_reader
                .head_snapshot(&request.tenant)
                .await?
        } else {
            request.metadata.snapshot.clone()
        };

        let linked_request = LinkedEntityRequest {
            tenant: request.tenant.clone(),
            subject: request.subject.clone(),
            entity_type: request.entity_type.clone(),
            permission: request.permission.clone(),
            snapshot: snapshot.clone(),
            schema_version: schema_version.clone(),
        };
        let (candidate_tx, mut candidate_rx) = mpsc::channel::<Entity>(self.config.bulk_limit.max(1));
        let producer = {
            let linked = Arc::clone(&self.linked);
            tokio::spawn(async move { linked.run(&linked_request, candidate_tx).await })
        };

        let semaphore = Arc::new(Semaphore::new(self.config.bulk_limit));
        let mut checks = FuturesUnordered::new();
        let mut seen: HashSet<String> = HashSet::new();
        let mut emitted: HashSet<String> = HashSet::new();
        let mut open = true;

        while open || !checks.is_empty() {
            tokio::select! {
                candidate = candidate_rx.recv(), if open => match candidate {
                    Some(entity) => {
                        if !seen.insert(entity.entity_id.clone()) {
                            continue;
                        }
                        checks.push(self.spawn_check(
                            request,
                            entity,
                            snapshot.clone(),
                            schema_version.clone(),
                            Arc::clone(&semaphore),
                        ));
                    }
                    None => open = false,
                },
                Some((entity_id, result)) = checks.next(), if !checks.is_empty() => {
                    match result {
                        Ok(response) if response.can == CheckVerdict::Allowed => {
                            if emitted.insert(entity_id.clone())
                                && sink.send(entity_id).await.is_err()
                            {
                                // Caller went away: abort outstanding work.
                                return Err(DomainError::Cancelled);
                            }
                        }
                        Ok(_) => {}
                        Err(error) => {
                            // Per-candidate failures omit the candidate.
                            warn!(%entity_id, %error, "candidate check failed");
                        }
                    }
                }
            }
        }

        match producer.await {
            Ok(result) => result,
            Err(_) => Err(DomainError::Cancelled),
        }
    }

    fn spawn_check(
        &self,
        request: &LookupEntityRequest,
        entity: Entity,
        snapshot: SnapshotToken,
        schema_version: String,
        semaphore: Arc<Semaphore>,
    ) -> impl std::future::Future<Output = (String, DomainResult<super::CheckResponse>)> {
        let check = Arc::clone(&self.check);
        let check_request = CheckRequest {
            tenant: request.tenant.clone(),
            entity: entity.clone(),
            permission: request.permission.clone(),
            subject: request.subject.clone(),
            metadata: CheckMetadata {
                snapshot,
                schema_version,
                depth: request.metadata.depth,
                exclusion: false,
            },
        };
        async move {
            let _permit = match semaphore.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return (entity.entity_id, Err(DomainError::Cancelled)),
            };
            let result = check.check(&check_request).await;
            (entity.entity_id, result)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::NoopCheckCache;
    use crate::engine::testing::{MockRelationshipReader, MockSchemaReader};
    use crate::engine::LookupMetadata;
    use crate::schema::{computed, intersection, tuple_to_userset, union, SchemaBuilder, SchemaView};
    use crate::tuple::Subject;

    fn drive_view() -> SchemaView {
        SchemaBuilder::new()
            .entity("user", |e| e)
            .entity("organization", |e| e.relation("admin", &["user"]))
            .entity("folder", |e| {
                e.relation("org", &["organization"])
                    .relation("collaborator", &["user"])
            })
            .entity("doc", |e| {
                e.relation("org", &["organization"])
                    .relation("parent", &["folder"])
                    .relation("owner", &["user"])
                    .permission(
                        "read",
                        union(vec![
                            union(vec![
                                computed("owner"),
                                tuple_to_userset("parent", "collaborator"),
                            ]),
                            tuple_to_userset("org", "admin"),
                        ]),
                    )
                    .permission(
                        "update",
                        intersection(vec![computed("owner"), tuple_to_userset("org", "admin")]),
                    )
            })
            .build_view()
    }

    fn engine(
        view: SchemaView,
        reader: Arc<MockRelationshipReader>,
    ) -> LookupEntityEngine<MockSchemaReader, MockRelationshipReader> {
        LookupEntityEngine::new(MockSchemaReader::new(view), reader, Arc::new(NoopCheckCache))
    }

    fn request(subject: &str, entity_type: &str, permission: &str) -> LookupEntityRequest {
        LookupEntityRequest {
            tenant: "t1".to_string(),
            entity_type: entity_type.to_string(),
            permission: permission.to_string(),
            subject: Subject::parse(subject).unwrap(),
            metadata: LookupMetadata::default(),
        }
    }

    #[tokio::test]
    async fn test_lookup_returns_only_matching_doc() {
        let reader = MockRelationshipReader::from_specs(&[
            "doc:1#owner@user:2",
            "doc:1#parent@folder:1",
            "folder:1#collaborator@user:1",
            "folder:1#collaborator@user:3",
            "doc:1#org@organization:1",
            "organization:1#admin@user:1",
            "doc:2#owner@user:9",
        ]);
        let engine = engine(drive_view(), reader);

        let response = engine.lookup_entity(&request("user:1", "doc", "read")).await.unwrap();

        assert_eq!(response.entity_ids, vec!["1".to_string()]);
    }

    #[tokio::test]
    async fn test_lookup_results_are_sorted_and_deduplicated() {
        let reader = MockRelationshipReader::from_specs(&[
            "doc:3#owner@user:2",
            "doc:1#owner@user:2",
            "doc:2#owner@user:2",
            // doc:1 also reachable through the admin path.
            "doc:1#org@organization:1",
            "organization:1#admin@user:2",
        ]);
        let engine = engine(drive_view(), reader);

        let response = engine.lookup_entity(&request("user:2", "doc", "read")).await.unwrap();

        assert_eq!(
            response.entity_ids,
            vec!["1".to_string(), "2".to_string(), "3".to_string()]
        );
    }

    #[tokio::test]
    async fn test_false_positive_candidates_are_filtered_by_check() {
        // The walk reaches doc:2 through the owner edge, but update also
        // requires org.admin, which user:2 lacks there.
        let reader = MockRelationshipReader::from_specs(&[
            "doc:1#owner@user:2",
            "doc:1#org@organization:1",
            "organization:1#admin@user:2",
            "doc:2#owner@user:2",
        ]);
        let engine = engine(drive_view(), reader);

        let response = engine
            .lookup_entity(&request("user:2", "doc", "update"))
            .await
            .unwrap();

        assert_eq!(response.entity_ids, vec!["1".to_string()]);
    }

    #[tokio::test]
    async fn test_stream_emits_ids_and_honours_cancellation() {
        let reader = MockRelationshipReader::from_specs(&[
            "doc:1#owner@user:2",
            "doc:2#owner@user:2",
        ]);
        let engine = engine(drive_view(), reader);

        // Full stream first.
        let (tx, mut rx) = mpsc::channel(8);
        engine
            .lookup_entity_stream(&request("user:2", "doc", "read"), tx)
            .await
            .unwrap();
        let mut streamed = Vec::new();
        while let Some(id) = rx.recv().await {
            streamed.push(id);
        }
        streamed.sort();
        assert_eq!(streamed, vec!["1".to_string(), "2".to_string()]);

        // A dropped receiver terminates cleanly.
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let result = engine
            .lookup_entity_stream(&request("user:2", "doc", "read"), tx)
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_store_failure_aborts_lookup() {
        let engine = engine(drive_view(), MockRelationshipReader::failing());

        let err = engine
            .lookup_entity(&request("user:2", "doc", "read"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "STORE_EXECUTION");
    }
}
