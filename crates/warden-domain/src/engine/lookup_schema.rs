//! Lookup-schema engine: which permissions follow from asserted
//! relations alone.
//!
//! The caller supplies a `relation → subjects` map it claims holds for a
//! concrete entity (what-if queries, schema tests). Each permission AST
//! is evaluated against that map without any store access: a relation
//! leaf is satisfied iff the map carries at least one subject for it;
//! permission references recurse; tuple-to-userset leaves cannot be
//! satisfied from assertions and evaluate false.

use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;

use tracing::instrument;

use crate::error::DomainResult;
use crate::schema::{EntityDefinition, PermissionNode, ReferenceKind, RewriteOp};
use crate::store::SchemaReader;
use crate::tuple::Subject;

use super::{LookupSchemaRequest, LookupSchemaResponse};

/// Store-free permission evaluator over asserted relations.
pub struct LookupSchemaEngine<S> {
    schema_reader: Arc<S>,
}

impl<S> LookupSchemaEngine<S>
where
    S: SchemaReader + 'static,
{
    pub fn new(schema_reader: Arc<S>) -> Self {
        Self { schema_reader }
    }

    /// Returns the permission names that evaluate ALLOWED, sorted.
    #[instrument(skip(self, request), fields(tenant = %request.tenant, entity_type = %request.entity_type))]
    pub async fn lookup_schema(
        &self,
        request: &LookupSchemaRequest,
    ) -> DomainResult<LookupSchemaResponse> {
        let schema_version = if request.schema_version.is_empty() {
            self.schema_reader.head_version(&request.tenant).await?
        } else {
            request.schema_version.clone()
        };
        let schema = self
            .schema_reader
            .read_schema(&request.tenant, &schema_version)
            .await?;
        let entity = schema.get_entity(&request.entity_type)?;

        let mut permissions: Vec<String> = entity
            .permissions
            .values()
            .filter(|permission| {
                let mut visiting = HashSet::new();
                visiting.insert(permission.name.clone());
                evaluate(
                    &permission.child,
                    entity,
                    &request.asserted_relations,
                    &mut visiting,
                )
            })
            .map(|permission| permission.name.clone())
            .collect();
        permissions.sort();

        Ok(LookupSchemaResponse { permissions })
    }
}

fn evaluate(
    node: &PermissionNode,
    entity: &EntityDefinition,
    asserted: &HashMap<String, Vec<Subject>>,
    visiting: &mut HashSet<String>,
) -> bool {
    let inner = match node {
        PermissionNode::Rewrite { op, children, .. } => match op {
            RewriteOp::Union => children
                .iter()
                .any(|child| evaluate(child, entity, asserted, visiting)),
            RewriteOp::Intersection => children
                .iter()
                .all(|child| evaluate(child, entity, asserted, visiting)),
        },
        PermissionNode::ComputedUserSet { relation, .. } => match entity.classify(relation) {
            ReferenceKind::Relation => asserted
                .get(relation)
                .map(|subjects| !subjects.is_empty())
                .unwrap_or(false),
            ReferenceKind::Permission => {
                if visiting.insert(relation.clone()) {
                    let result = evaluate(
                        &entity.permissions[relation].child,
                        entity,
                        asserted,
                        visiting,
                    );
                    visiting.remove(relation);
                    result
                } else {
                    // Cycle revisit denies this branch.
                    false
                }
            }
            ReferenceKind::Unknown => false,
        },
        // Needs the store; never satisfiable from assertions.
        PermissionNode::TupleToUserSet { .. } => false,
    };
    if node.negated() {
        !inner
    } else {
        inner
    }
}
