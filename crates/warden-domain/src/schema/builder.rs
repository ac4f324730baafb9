//! Programmatic schema construction.
//!
//! The DSL compiler is an external collaborator; embedders and tests
//! assemble compiled definitions through this builder instead. Relation
//! references use the `type` or `type#relation` spelling of the DSL.

use crate::schema::types::{
    EntityDefinition, PermissionDefinition, PermissionNode, RelationDefinition, RelationReference,
    RewriteOp, SchemaDefinition,
};
use crate::schema::view::SchemaView;

/// Fluent builder for a [`SchemaDefinition`].
#[derive(Debug, Default)]
pub struct SchemaBuilder {
    definition: SchemaDefinition,
}

impl SchemaBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an entity definition built by `f`.
    pub fn entity(
        mut self,
        name: impl Into<String>,
        f: impl FnOnce(EntityBuilder) -> EntityBuilder,
    ) -> Self {
        let name = name.into();
        let builder = f(EntityBuilder::new(name.clone()));
        self.definition.entities.insert(name, builder.entity);
        self
    }

    pub fn build(self) -> SchemaDefinition {
        self.definition
    }

    /// Builds the definition and wraps it in a [`SchemaView`].
    pub fn build_view(self) -> SchemaView {
        SchemaView::new(self.definition)
    }
}

/// Builder for one entity definition.
#[derive(Debug)]
pub struct EntityBuilder {
    entity: EntityDefinition,
}

impl EntityBuilder {
    fn new(name: String) -> Self {
        Self {
            entity: EntityDefinition {
                name,
                ..Default::default()
            },
        }
    }

    /// Adds a relation. References use `type` or `type#relation` spelling.
    pub fn relation(mut self, name: impl Into<String>, references: &[&str]) -> Self {
        let name = name.into();
        let references = references
            .iter()
            .map(|spec| match spec.split_once('#') {
                Some((entity_type, relation)) => RelationReference::userset(entity_type, relation),
                None => RelationReference::direct(*spec),
            })
            .collect();
        self.entity.relations.insert(
            name.clone(),
            RelationDefinition { name, references },
        );
        self
    }

    /// Adds a permission with the given expression.
    pub fn permission(mut self, name: impl Into<String>, child: PermissionNode) -> Self {
        let name = name.into();
        self.entity
            .permissions
            .insert(name.clone(), PermissionDefinition { name, child });
        self
    }
}

/// `a or b or ...`
pub fn union(children: Vec<PermissionNode>) -> PermissionNode {
    PermissionNode::Rewrite {
        op: RewriteOp::Union,
        children,
        negated: false,
    }
}

/// `a and b and ...`
pub fn intersection(children: Vec<PermissionNode>) -> PermissionNode {
    PermissionNode::Rewrite {
        op: RewriteOp::Intersection,
        children,
        negated: false,
    }
}

/// A reference to a relation or permission on the same entity.
pub fn computed(relation: impl Into<String>) -> PermissionNode {
    PermissionNode::ComputedUserSet {
        relation: relation.into(),
        negated: false,
    }
}

/// `tupleset.computed`: dereference through a relation, then evaluate on
/// the referenced entity.
pub fn tuple_to_userset(
    tupleset: impl Into<String>,
    computed: impl Into<String>,
) -> PermissionNode {
    PermissionNode::TupleToUserSet {
        tupleset: tupleset.into(),
        computed: computed.into(),
        negated: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_assembles_references() {
        let schema = SchemaBuilder::new()
            .entity("user", |e| e)
            .entity("repository", |e| {
                e.relation("owner", &["user", "organization#admin"])
                    .permission("push", computed("owner"))
            })
            .build();

        let repository = schema.entity("repository").unwrap();
        let owner = &repository.relations["owner"];
        assert_eq!(owner.references.len(), 2);
        assert_eq!(owner.references[0], RelationReference::direct("user"));
        assert_eq!(
            owner.references[1],
            RelationReference::userset("organization", "admin")
        );
        assert!(repository.permissions.contains_key("push"));
    }

    #[test]
    fn test_expression_helpers_compose() {
        // (owner or parent.collaborator) and not banned
        let expr = intersection(vec![
            union(vec![
                computed("owner"),
                tuple_to_userset("parent", "collaborator"),
            ]),
            computed("banned").negate(),
        ]);

        match expr {
            PermissionNode::Rewrite { op, children, .. } => {
                assert_eq!(op, RewriteOp::Intersection);
                assert_eq!(children.len(), 2);
                assert!(children[1].negated());
            }
            _ => panic!("expected rewrite"),
        }
    }
}
