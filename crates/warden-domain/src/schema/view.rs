//! Read-only accessor over a compiled schema.
//!
//! The view is built once per schema version and shared (`Arc`) across
//! concurrent evaluations. Besides name lookup and classification it
//! precomputes the reverse index consumed by the linked-entity engine:
//! for a subject shape `(type, relation?)`, which entity/relation or
//! entity/permission pairs can be reached through it, and by what kind of
//! hop.

use std::collections::{HashMap, HashSet};

use crate::error::{DomainError, DomainResult};
use crate::schema::types::{
    EntityDefinition, PermissionDefinition, PermissionNode, ReferenceKind, RelationDefinition,
    SchemaDefinition,
};

/// How a linked-schema edge is traversed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkedEdgeKind {
    /// The subject shape is directly assignable to the relation.
    Relation,
    /// The permission computes over a relation the subject shape holds on
    /// the same entity; no tuple hop is needed.
    ComputedUserSet,
    /// The permission dereferences `tupleset` tuples on the owning entity
    /// to reach the subject's entity.
    TupleToUserSet { tupleset: String },
}

/// One entry of the reverse index: the subject shape keyed on reaches
/// `entity_type` through `name` (a relation or permission).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkedEdge {
    pub entity_type: String,
    pub name: String,
    pub kind: LinkedEdgeKind,
}

type SubjectShape = (String, Option<String>);

/// Shared, immutable schema accessor.
#[derive(Debug)]
pub struct SchemaView {
    definition: SchemaDefinition,
    linked: HashMap<SubjectShape, Vec<LinkedEdge>>,
}

impl SchemaView {
    /// Builds a view, precomputing the reverse index.
    pub fn new(definition: SchemaDefinition) -> Self {
        let mut linked: HashMap<SubjectShape, Vec<LinkedEdge>> = HashMap::new();

        for entity in definition.entities.values() {
            for relation in entity.relations.values() {
                for reference in &relation.references {
                    let key = (reference.entity_type.clone(), reference.relation.clone());
                    linked.entry(key).or_default().push(LinkedEdge {
                        entity_type: entity.name.clone(),
                        name: relation.name.clone(),
                        kind: LinkedEdgeKind::Relation,
                    });
                }
            }

            for permission in entity.permissions.values() {
                index_permission_leaves(entity, permission, &permission.child, &mut linked);
            }
        }

        Self { definition, linked }
    }

    /// Returns the entity definition for a type.
    pub fn get_entity(&self, entity_type: &str) -> DomainResult<&EntityDefinition> {
        self.definition
            .entity(entity_type)
            .ok_or_else(|| DomainError::EntityDefinitionNotFound {
                entity_type: entity_type.to_string(),
            })
    }

    /// Returns a relation definition.
    pub fn get_relation(
        &self,
        entity_type: &str,
        relation: &str,
    ) -> DomainResult<&RelationDefinition> {
        self.get_entity(entity_type)?
            .relations
            .get(relation)
            .ok_or_else(|| DomainError::RelationDefinitionNotFound {
                entity_type: entity_type.to_string(),
                relation: relation.to_string(),
            })
    }

    /// Returns a permission definition.
    pub fn get_permission(
        &self,
        entity_type: &str,
        permission: &str,
    ) -> DomainResult<&PermissionDefinition> {
        self.get_entity(entity_type)?
            .permissions
            .get(permission)
            .ok_or_else(|| DomainError::PermissionDefinitionNotFound {
                entity_type: entity_type.to_string(),
                permission: permission.to_string(),
            })
    }

    /// Classifies a name on an entity; Unknown when the entity is missing.
    pub fn classify(&self, entity_type: &str, name: &str) -> ReferenceKind {
        match self.definition.entity(entity_type) {
            Some(entity) => entity.classify(name),
            None => ReferenceKind::Unknown,
        }
    }

    /// Reverse-index lookup: edges reachable from a subject shape.
    pub fn linked_schema(
        &self,
        subject_type: &str,
        subject_relation: Option<&str>,
    ) -> impl Iterator<Item = &LinkedEdge> {
        let key = (
            subject_type.to_string(),
            subject_relation.map(str::to_string),
        );
        self.linked.get(&key).into_iter().flatten()
    }

    /// Names on `entity_type` that can contribute to `permission`: the
    /// permission itself plus the transitive intra-entity names its AST
    /// references. Used as the candidate-emission gate of the
    /// linked-entity walk; over-approximation is acceptable there.
    pub fn permission_support_set(
        &self,
        entity_type: &str,
        permission: &str,
    ) -> DomainResult<HashSet<String>> {
        let entity = self.get_entity(entity_type)?;
        let mut support = HashSet::new();
        let mut stack = vec![permission.to_string()];
        while let Some(name) = stack.pop() {
            if !support.insert(name.clone()) {
                continue;
            }
            if let Some(definition) = entity.permissions.get(&name) {
                collect_intra_entity_names(&definition.child, &mut stack);
            }
        }
        Ok(support)
    }
}

fn collect_intra_entity_names(node: &PermissionNode, out: &mut Vec<String>) {
    match node {
        PermissionNode::Rewrite { children, .. } => {
            for child in children {
                collect_intra_entity_names(child, out);
            }
        }
        PermissionNode::ComputedUserSet { relation, .. } => out.push(relation.clone()),
        PermissionNode::TupleToUserSet { .. } => {}
    }
}

/// Adds reverse edges for every leaf of a permission AST.
fn index_permission_leaves(
    entity: &EntityDefinition,
    permission: &PermissionDefinition,
    node: &PermissionNode,
    linked: &mut HashMap<SubjectShape, Vec<LinkedEdge>>,
) {
    match node {
        PermissionNode::Rewrite { children, .. } => {
            for child in children {
                index_permission_leaves(entity, permission, child, linked);
            }
        }
        PermissionNode::ComputedUserSet { relation, .. } => {
            // A subject holding `relation` on this entity can hold the
            // permission on the same entity id.
            let key = (entity.name.clone(), Some(relation.clone()));
            linked.entry(key).or_default().push(LinkedEdge {
                entity_type: entity.name.clone(),
                name: permission.name.clone(),
                kind: LinkedEdgeKind::ComputedUserSet,
            });
        }
        PermissionNode::TupleToUserSet {
            tupleset, computed, ..
        } => {
            // A subject holding `computed` on a referenced entity can hold
            // the permission on entities linked through `tupleset`.
            if let Some(relation) = entity.relations.get(tupleset) {
                for reference in &relation.references {
                    let key = (reference.entity_type.clone(), Some(computed.clone()));
                    linked.entry(key).or_default().push(LinkedEdge {
                        entity_type: entity.name.clone(),
                        name: permission.name.clone(),
                        kind: LinkedEdgeKind::TupleToUserSet {
                            tupleset: tupleset.clone(),
                        },
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::builder::{computed, tuple_to_userset, union, SchemaBuilder};

    fn drive_schema() -> SchemaView {
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
            })
            .build_view()
    }

    #[test]
    fn test_lookup_and_classify() {
        let view = drive_schema();

        assert!(view.get_entity("doc").is_ok());
        assert!(view.get_relation("doc", "owner").is_ok());
        assert!(view.get_permission("doc", "read").is_ok());

        assert_eq!(view.classify("doc", "owner"), ReferenceKind::Relation);
        assert_eq!(view.classify("doc", "read"), ReferenceKind::Permission);
        assert_eq!(view.classify("doc", "nope"), ReferenceKind::Unknown);
        assert_eq!(view.classify("ghost", "x"), ReferenceKind::Unknown);
    }

    #[test]
    fn test_not_found_errors_carry_codes() {
        let view = drive_schema();

        let err = view.get_entity("ghost").unwrap_err();
        assert_eq!(err.code(), "ENTITY_DEFINITION_NOT_FOUND");

        let err = view.get_relation("doc", "ghost").unwrap_err();
        assert_eq!(err.code(), "RELATION_DEFINITION_NOT_FOUND");

        let err = view.get_permission("doc", "ghost").unwrap_err();
        assert_eq!(err.code(), "PERMISSION_DEFINITION_NOT_FOUND");
    }

    #[test]
    fn test_linked_schema_direct_relation_edges() {
        let view = drive_schema();

        // A concrete user can enter through owner, collaborator and admin.
        let edges: Vec<_> = view.linked_schema("user", None).collect();
        let names: Vec<_> = edges
            .iter()
            .map(|e| (e.entity_type.as_str(), e.name.as_str()))
            .collect();
        assert!(names.contains(&("doc", "owner")));
        assert!(names.contains(&("folder", "collaborator")));
        assert!(names.contains(&("organization", "admin")));
    }

    #[test]
    fn test_linked_schema_tuple_to_userset_edges() {
        let view = drive_schema();

        // folder#collaborator holders reach doc.read through the parent
        // tupleset.
        let edges: Vec<_> = view.linked_schema("folder", Some("collaborator")).collect();
        assert!(edges.iter().any(|e| {
            e.entity_type == "doc"
                && e.name == "read"
                && e.kind
                    == LinkedEdgeKind::TupleToUserSet {
                        tupleset: "parent".to_string(),
                    }
        }));

        let edges: Vec<_> = view.linked_schema("organization", Some("admin")).collect();
        assert!(edges.iter().any(|e| {
            e.entity_type == "doc"
                && e.name == "read"
                && e.kind
                    == LinkedEdgeKind::TupleToUserSet {
                        tupleset: "org".to_string(),
                    }
        }));
    }

    #[test]
    fn test_permission_support_set_is_transitive() {
        let view = SchemaBuilder::new()
            .entity("user", |e| e)
            .entity("doc", |e| {
                e.relation("owner", &["user"])
                    .relation("editor", &["user"])
                    .permission("write", computed("editor"))
                    .permission("manage", union(vec![computed("owner"), computed("write")]))
            })
            .build_view();

        let support = view.permission_support_set("doc", "manage").unwrap();
        assert!(support.contains("manage"));
        assert!(support.contains("owner"));
        assert!(support.contains("write"));
        assert!(support.contains("editor"));
        assert!(!support.contains("ghost"));
    }
}
