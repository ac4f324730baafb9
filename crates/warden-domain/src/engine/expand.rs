//! Expand engine: the check walk, materialized as a proof tree.
//!
//! Expansion performs the same traversal as check but never
//! short-circuits and never consults the cache: every branch is
//! materialized. Relation leaves report the full observed subject set,
//! userset subjects included, without evaluating them. Children appear in
//! schema source order regardless of task completion order.

use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::Semaphore;
use tracing::instrument;

use crate::error::{DomainError, DomainResult};
use crate::schema::{PermissionNode, ReferenceKind, RewriteOp, SchemaView};
use crate::store::{RelationshipReader, SchemaReader, SnapshotToken, TupleFilter};
use crate::tuple::{Entity, Subject};

use super::{EngineConfig, ExpandRequest};

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// The entity/relation pair a tree node explains.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpandTarget {
    pub entity: Entity,
    /// Relation or permission name; tuple-to-userset nodes use the DSL
    /// `tupleset.computed` spelling.
    pub relation: String,
}

/// A node of the expansion tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExpandNode {
    /// Combination of child expansions.
    Expand {
        target: ExpandTarget,
        op: RewriteOp,
        children: Vec<ExpandNode>,
    },
    /// The observed subject set of one relation on one entity.
    Leaf {
        target: ExpandTarget,
        subjects: Vec<Subject>,
    },
}

impl ExpandNode {
    pub fn target(&self) -> &ExpandTarget {
        match self {
            ExpandNode::Expand { target, .. } | ExpandNode::Leaf { target, .. } => target,
        }
    }

    /// All leaves of this subtree, in source order.
    pub fn leaves(&self) -> Vec<&ExpandNode> {
        match self {
            ExpandNode::Leaf { .. } => vec![self],
            ExpandNode::Expand { children, .. } => {
                children.iter().flat_map(ExpandNode::leaves).collect()
            }
        }
    }

    /// Union of all leaf subject sets.
    pub fn leaf_subjects(&self) -> Vec<&Subject> {
        self.leaves()
            .into_iter()
            .flat_map(|leaf| match leaf {
                ExpandNode::Leaf { subjects, .. } => subjects.iter(),
                ExpandNode::Expand { .. } => unreachable!("leaves() returns leaves only"),
            })
            .collect()
    }
}

type VisitKey = (String, String, String);

#[derive(Clone)]
struct ExpandContext {
    tenant: Arc<str>,
    snapshot: Arc<SnapshotToken>,
    schema: Arc<SchemaView>,
    visited: Arc<HashSet<VisitKey>>,
    permits: Arc<Semaphore>,
}

impl ExpandContext {
    fn with_visited(&self, key: VisitKey) -> Self {
        let mut visited = (*self.visited).clone();
        visited.insert(key);
        Self {
            visited: Arc::new(visited),
            ..self.clone()
        }
    }
}

/// Proof-tree builder over the same walk as the check engine.
pub struct ExpandEngine<S, R> {
    schema_reader: Arc<S>,
    relationship_reader: Arc<R>,
    config: EngineConfig,
}

impl<S, R> ExpandEngine<S, R>
where
    S: SchemaReader + 'static,
    R: RelationshipReader + 'static,
{
    pub fn new(schema_reader: Arc<S>, relationship_reader: Arc<R>) -> Self {
        Self {
            schema_reader,
            relationship_reader,
            config: EngineConfig::default(),
        }
    }

    pub fn with_config(
        schema_reader: Arc<S>,
        relationship_reader: Arc<R>,
        config: EngineConfig,
    ) -> Self {
        Self {
            schema_reader,
            relationship_reader,
            config,
        }
    }

    /// Materializes the proof tree for a permission on an entity.
    #[instrument(skip(self, request), fields(tenant = %request.tenant, entity = %request.entity, permission = %request.permission))]
    pub async fn expand(&self, request: &ExpandRequest) -> DomainResult<ExpandNode> {
        let schema_version = if request.metadata.schema_version.is_empty() {
            self.schema_reader.head_version(&request.tenant).await?
        } else {
            request.metadata.schema_version.clone()
        };
        let schema = self
            .schema_reader
            .read_schema(&request.tenant, &schema_version)
            .await?;
        let snapshot = if request.metadata.snapshot.is_noop() {
            self.relationship_reader
                .head_snapshot(&request.tenant)
                .await?
        } else {
            request.metadata.snapshot.clone()
        };

        let ctx = ExpandContext {
            tenant: Arc::from(request.tenant.as_str()),
            snapshot: Arc::new(snapshot),
            schema,
            visited: Arc::new(HashSet::new()),
            permits: Arc::new(Semaphore::new(self.config.concurrency_limit)),
        };

        self.expand_reference(request.entity.clone(), request.permission.clone(), ctx)
            .await
    }

    /// Expands a relation or permission name on an entity.
    fn expand_reference(
        &self,
        entity: Entity,
        name: String,
        ctx: ExpandContext,
    ) -> BoxFuture<'_, DomainResult<ExpandNode>> {
        Box::pin(async move {
            let key = (
                entity.entity_type.clone(),
                entity.entity_id.clone(),
                name.clone(),
            );
            if ctx.visited.contains(&key) {
                // Cycle: close the branch with an empty leaf.
                return Ok(ExpandNode::Leaf {
                    target: ExpandTarget {
                        entity,
                        relation: name,
                    },
                    subjects: Vec::new(),
                });
            }
            let ctx = ctx.with_visited(key);

            let entity_def = ctx.schema.get_entity(&entity.entity_type)?;
            match entity_def.classify(&name) {
                ReferenceKind::Permission => {
                    let child = ctx
                        .schema
                        .get_permission(&entity.entity_type, &name)?
                        .child
                        .clone();
                    self.expand_node(child, entity, name, ctx).await
                }
                ReferenceKind::Relation => self.expand_relation_leaf(entity, name, ctx).await,
                ReferenceKind::Unknown => Err(DomainError::PermissionDefinitionNotFound {
                    entity_type: entity.entity_type.clone(),
                    permission: name,
                }),
            }
        })
    }

    fn expand_node(
        &self,
        node: PermissionNode,
        entity: Entity,
        name: String,
        ctx: ExpandContext,
    ) -> BoxFuture<'_, DomainResult<ExpandNode>> {
        Box::pin(async move {
            match node {
                PermissionNode::Rewrite { op, children, .. } => {
                    // join_all keeps schema source order for the children.
                    let results = join_all(children.into_iter().map(|child| {
                        self.expand_node(child, entity.clone(), name.clone(), ctx.clone())
                    }))
                    .await;
                    let children = results.into_iter().collect::<DomainResult<Vec<_>>>()?;
                    Ok(ExpandNode::Expand {
                        target: ExpandTarget {
                            entity,
                            relation: name,
                        },
                        op,
                        children,
                    })
                }
                PermissionNode::ComputedUserSet { relation, .. } => {
                    self.expand_reference(entity, relation, ctx).await
                }
                PermissionNode::TupleToUserSet {
                    tupleset, computed, ..
                } => {
                    self.expand_tuple_to_userset(entity, tupleset, computed, ctx)
                        .await
                }
            }
        })
    }

    /// Leaf: the full observed subject set, usersets unevaluated.
    async fn expand_relation_leaf(
        &self,
        entity: Entity,
        relation: String,
        ctx: ExpandContext,
    ) -> DomainResult<ExpandNode> {
        ctx.schema.get_relation(&entity.entity_type, &relation)?;

        let filter = TupleFilter::entity_relation(
            entity.entity_type.clone(),
            entity.entity_id.clone(),
            relation.clone(),
        );
        let tuples = {
            let _permit = ctx
                .permits
                .acquire()
                .await
                .map_err(|_| DomainError::Cancelled)?;
            self.relationship_reader
                .query_relationships(&ctx.tenant, &filter, &ctx.snapshot)
                .await?
        };

        Ok(ExpandNode::Leaf {
            target: ExpandTarget { entity, relation },
            subjects: tuples.map(|tuple| tuple.subject).collect(),
        })
    }

    /// Dereferences the tupleset and unions the computed expansions of
    /// every referenced entity. A single referenced entity collapses to
    /// its expansion directly.
    async fn expand_tuple_to_userset(
        &self,
        entity: Entity,
        tupleset: String,
        computed: String,
        ctx: ExpandContext,
    ) -> DomainResult<ExpandNode> {
        ctx.schema.get_relation(&entity.entity_type, &tupleset)?;

        let filter = TupleFilter::entity_relation(
            entity.entity_type.clone(),
            entity.entity_id.clone(),
            tupleset.clone(),
        );
        let tuples = {
            let _permit = ctx
                .permits
                .acquire()
                .await
                .map_err(|_| DomainError::Cancelled)?;
            self.relationship_reader
                .query_relationships(&ctx.tenant, &filter, &ctx.snapshot)
                .await?
        };

        let referenced: Vec<Entity> = tuples.map(|tuple| tuple.subject.entity()).collect();
        let results = join_all(
            referenced
                .into_iter()
                .map(|target| self.expand_reference(target, computed.clone(), ctx.clone())),
        )
        .await;
        let mut children = results.into_iter().collect::<DomainResult<Vec<_>>>()?;

        if children.len() == 1 {
            return Ok(children.remove(0));
        }
        Ok(ExpandNode::Expand {
            target: ExpandTarget {
                entity,
                relation: format!("{tupleset}.{computed}"),
            },
            op: RewriteOp::Union,
            children,
        })
    }
}
