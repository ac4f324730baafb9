//! Check engine: recursive boolean evaluation of a permission.
//!
//! The engine walks the compiled permission expression for the target
//! entity. Relation leaves query the store and match or recurse through
//! userset subjects; tuple-to-userset leaves dereference a relation and
//! evaluate on the referenced entities; rewrites combine children with
//! union/intersection semantics, short-circuiting as soon as the outcome
//! is determined. Store fan-out within one request is bounded by a
//! semaphore; the whole evaluation runs under the query deadline.
//!
//! Depth decrements on every hop that touches the store or crosses an
//! entity; intra-entity combinator descent is free. An exhausted branch
//! denies with `remaining_depth == 0` rather than erroring, so a sibling
//! union branch can still allow. Cycles are cut by a copy-on-write
//! visited set; a revisited `(entity, name)` pair denies that branch.

use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::Semaphore;
use tokio::time::timeout;
use tracing::instrument;

use crate::cache::{CachedCheck, CheckCache, CheckFingerprint};
use crate::error::{DomainError, DomainResult};
use crate::schema::{PermissionNode, ReferenceKind, RewriteOp, SchemaView};
use crate::store::{RelationshipReader, SchemaReader, SnapshotToken, TupleFilter};
use crate::tuple::{Entity, Subject};

use super::{CheckRequest, CheckResponse, CheckVerdict, EngineConfig};

/// Type alias for boxed futures, needed for async recursion.
type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Verdict plus the depth budget left on the decisive path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Decision {
    verdict: CheckVerdict,
    remaining_depth: u32,
}

impl Decision {
    fn allowed(remaining_depth: u32) -> Self {
        Self {
            verdict: CheckVerdict::Allowed,
            remaining_depth,
        }
    }

    fn denied(remaining_depth: u32) -> Self {
        Self {
            verdict: CheckVerdict::Denied,
            remaining_depth,
        }
    }

    fn negated(self, negated: bool) -> Self {
        if negated {
            Self {
                verdict: self.verdict.invert(),
                remaining_depth: self.remaining_depth,
            }
        } else {
            self
        }
    }
}

type VisitKey = (String, String, String);

/// Per-request traversal state; cheap to clone across branches.
#[derive(Clone)]
struct ResolveContext {
    tenant: Arc<str>,
    snapshot: Arc<SnapshotToken>,
    schema: Arc<SchemaView>,
    subject: Arc<Subject>,
    /// Visited `(entity_type, entity_id, name)` nodes, copy-on-write.
    visited: Arc<HashSet<VisitKey>>,
    /// Bounds concurrent store-touching leaf evaluations per request.
    permits: Arc<Semaphore>,
}

impl ResolveContext {
    fn with_visited(&self, key: VisitKey) -> Self {
        let mut visited = (*self.visited).clone();
        visited.insert(key);
        Self {
            visited: Arc::new(visited),
            ..self.clone()
        }
    }
}

/// Recursive permission evaluator.
pub struct CheckEngine<S, R> {
    schema_reader: Arc<S>,
    relationship_reader: Arc<R>,
    cache: Arc<dyn CheckCache>,
    config: EngineConfig,
}

impl<S, R> CheckEngine<S, R>
where
    S: SchemaReader + 'static,
    R: RelationshipReader + 'static,
{
    /// Creates a new check engine with default configuration.
    pub fn new(
        schema_reader: Arc<S>,
        relationship_reader: Arc<R>,
        cache: Arc<dyn CheckCache>,
    ) -> Self {
        Self {
            schema_reader,
            relationship_reader,
            cache,
            config: EngineConfig::default(),
        }
    }

    /// Creates a new check engine with custom configuration.
    pub fn with_config(
        schema_reader: Arc<S>,
        relationship_reader: Arc<R>,
        cache: Arc<dyn CheckCache>,
        config: EngineConfig,
    ) -> Self {
        Self {
            schema_reader,
            relationship_reader,
            cache,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Performs a permission check.
    #[instrument(skip(self, request), fields(tenant = %request.tenant, entity = %request.entity, permission = %request.permission, subject = %request.subject))]
    pub async fn check(&self, request: &CheckRequest) -> DomainResult<CheckResponse> {
        if request.metadata.depth == 0 {
            return Err(DomainError::DepthExceeded);
        }

        // Pin schema version and snapshot for the whole evaluation; the
        // noop forms resolve to head.
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

        let fingerprint = CheckFingerprint::compute(
            &request.tenant,
            &schema_version,
            &snapshot,
            &request.entity,
            &request.permission,
            &request.subject,
            request.metadata.exclusion,
        );

        // Single-flight: only one evaluation per fingerprint; waiters
        // re-consult the cache once the permit is granted.
        let _flight = self.cache.begin(&fingerprint).await;
        if let Some(entry) = self.cache.get(&fingerprint).await {
            // Reuse only results computed with at least our budget.
            if entry.depth >= request.metadata.depth {
                let remaining_depth = if entry.remaining_depth == 0 {
                    0
                } else {
                    request.metadata.depth
                };
                return Ok(CheckResponse {
                    can: entry.verdict,
                    remaining_depth,
                });
            }
        }

        let ctx = ResolveContext {
            tenant: Arc::from(request.tenant.as_str()),
            snapshot: Arc::new(snapshot),
            schema,
            subject: Arc::new(request.subject.clone()),
            visited: Arc::new(HashSet::new()),
            permits: Arc::new(Semaphore::new(self.config.concurrency_limit)),
        };

        let evaluation = self.resolve_reference(
            request.entity.clone(),
            request.permission.clone(),
            request.metadata.depth,
            ctx,
        );
        let decision = match timeout(self.config.timeout, evaluation).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(DomainError::DeadlineExceeded {
                    duration_ms: self.config.timeout.as_millis() as u64,
                })
            }
        };
        let decision = decision.negated(request.metadata.exclusion);

        self.cache
            .insert(
                fingerprint,
                CachedCheck {
                    verdict: decision.verdict,
                    depth: request.metadata.depth,
                    remaining_depth: decision.remaining_depth,
                },
            )
            .await;

        Ok(CheckResponse {
            can: decision.verdict,
            remaining_depth: decision.remaining_depth,
        })
    }

    /// Evaluates a relation or permission name on an entity.
    ///
    /// This is the cross-entity recursion point: userset and
    /// tuple-to-userset hops re-enter here with a decremented budget.
    fn resolve_reference(
        &self,
        entity: Entity,
        name: String,
        depth: u32,
        ctx: ResolveContext,
    ) -> BoxFuture<'_, DomainResult<Decision>> {
        Box::pin(async move {
            if depth == 0 {
                // Exhausted branch: deny, flag via remaining_depth.
                return Ok(Decision::denied(0));
            }

            let key = (
                entity.entity_type.clone(),
                entity.entity_id.clone(),
                name.clone(),
            );
            if ctx.visited.contains(&key) {
                // Cycle revisit denies this branch.
                return Ok(Decision::denied(depth));
            }
            let ctx = ctx.with_visited(key);

            let entity_def = ctx.schema.get_entity(&entity.entity_type)?;
            match entity_def.classify(&name) {
                ReferenceKind::Permission => {
                    // Intra-entity descent into the expression: free.
                    let child = ctx.schema.get_permission(&entity.entity_type, &name)?.child.clone();
                    self.resolve_node(child, entity, depth, ctx).await
                }
                ReferenceKind::Relation => {
                    self.resolve_relation_leaf(entity, name, depth, ctx).await
                }
                ReferenceKind::Unknown => Err(DomainError::PermissionDefinitionNotFound {
                    entity_type: entity.entity_type.clone(),
                    permission: name,
                }),
            }
        })
    }

    /// Evaluates one AST node, applying its negation flag to the result.
    fn resolve_node(
        &self,
        node: PermissionNode,
        entity: Entity,
        depth: u32,
        ctx: ResolveContext,
    ) -> BoxFuture<'_, DomainResult<Decision>> {
        Box::pin(async move {
            match node {
                PermissionNode::Rewrite {
                    op,
                    children,
                    negated,
                } => {
                    let decision = self.resolve_rewrite(op, children, entity, depth, ctx).await?;
                    Ok(decision.negated(negated))
                }
                PermissionNode::ComputedUserSet { relation, negated } => {
                    let decision = self
                        .resolve_reference(entity, relation, depth, ctx)
                        .await?;
                    Ok(decision.negated(negated))
                }
                PermissionNode::TupleToUserSet {
                    tupleset,
                    computed,
                    negated,
                } => {
                    let decision = self
                        .resolve_tuple_to_userset(entity, tupleset, computed, depth, ctx)
                        .await?;
                    Ok(decision.negated(negated))
                }
            }
        })
    }

    /// Combines rewrite children, short-circuiting once the outcome is
    /// determined. Dropping the stream cancels outstanding siblings.
    async fn resolve_rewrite(
        &self,
        op: RewriteOp,
        children: Vec<PermissionNode>,
        entity: Entity,
        depth: u32,
        ctx: ResolveContext,
    ) -> DomainResult<Decision> {
        let mut branches: FuturesUnordered<_> = children
            .into_iter()
            .map(|child| self.resolve_node(child, entity.clone(), depth, ctx.clone()))
            .collect();

        let mut remaining_min = depth;
        while let Some(result) = branches.next().await {
            let decision = result?;
            remaining_min = remaining_min.min(decision.remaining_depth);
            match (op, decision.verdict) {
                (RewriteOp::Union, CheckVerdict::Allowed) => return Ok(decision),
                (RewriteOp::Intersection, CheckVerdict::Denied) => return Ok(decision),
                _ => {}
            }
        }

        // No branch decided the outcome: union denies, intersection allows.
        match op {
            RewriteOp::Union => Ok(Decision::denied(remaining_min)),
            RewriteOp::Intersection => Ok(Decision::allowed(remaining_min)),
        }
    }

    /// Walks `(entity, relation, *)` tuples: a direct subject match
    /// allows; userset subjects recurse with a decremented budget.
    async fn resolve_relation_leaf(
        &self,
        entity: Entity,
        relation: String,
        depth: u32,
        ctx: ResolveContext,
    ) -> DomainResult<Decision> {
        ctx.schema.get_relation(&entity.entity_type, &relation)?;

        let filter = TupleFilter::entity_relation(
            entity.entity_type.clone(),
            entity.entity_id.clone(),
            relation,
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

        let mut usersets = Vec::new();
        for tuple in tuples {
            if tuple.subject == *ctx.subject {
                return Ok(Decision::allowed(depth - 1));
            }
            if !tuple.subject.is_user() {
                usersets.push(tuple.subject);
            }
        }
        if usersets.is_empty() {
            return Ok(Decision::denied(depth - 1));
        }

        // Userset hops are cross-entity recursions; union semantics.
        let mut branches: FuturesUnordered<_> = usersets
            .into_iter()
            .map(|subject| {
                let relation = subject.relation.clone().unwrap_or_default();
                self.resolve_reference(subject.entity(), relation, depth - 1, ctx.clone())
            })
            .collect();

        let mut remaining_min = depth - 1;
        while let Some(result) = branches.next().await {
            let decision = result?;
            if decision.verdict.is_allowed() {
                return Ok(decision);
            }
            remaining_min = remaining_min.min(decision.remaining_depth);
        }
        Ok(Decision::denied(remaining_min))
    }

    /// Dereferences `tupleset` tuples, then evaluates `computed` on each
    /// referenced entity; union semantics over the referenced entities.
    async fn resolve_tuple_to_userset(
        &self,
        entity: Entity,
        tupleset: String,
        computed: String,
        depth: u32,
        ctx: ResolveContext,
    ) -> DomainResult<Decision> {
        ctx.schema.get_relation(&entity.entity_type, &tupleset)?;

        let filter = TupleFilter::entity_relation(
            entity.entity_type.clone(),
            entity.entity_id.clone(),
            tupleset,
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
        if referenced.is_empty() {
            return Ok(Decision::denied(depth - 1));
        }

        let mut branches: FuturesUnordered<_> = referenced
            .into_iter()
            .map(|target| {
                self.resolve_reference(target, computed.clone(), depth - 1, ctx.clone())
            })
            .collect();

        let mut remaining_min = depth - 1;
        while let Some(result) = branches.next().await {
            let decision = result?;
            if decision.verdict.is_allowed() {
                return Ok(decision);
            }
            remaining_min = remaining_min.min(decision.remaining_depth);
        }
        Ok(Decision::denied(remaining_min))
    }
}
