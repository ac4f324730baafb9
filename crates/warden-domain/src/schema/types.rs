//! Compiled schema data model.
//!
//! The DSL parser and compiler are external collaborators; this module
//! defines the compiled form the engines walk. Cross-entity references are
//! held by name, never by pointer, so schema graphs may contain cycles
//! without ownership knots.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A compiled schema: entity definitions keyed by type name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchemaDefinition {
    pub entities: HashMap<String, EntityDefinition>,
}

impl SchemaDefinition {
    /// Returns the entity definition for a type, if present.
    pub fn entity(&self, entity_type: &str) -> Option<&EntityDefinition> {
        self.entities.get(entity_type)
    }
}

/// Classification of a name on an entity definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReferenceKind {
    Relation,
    Permission,
    Unknown,
}

/// An entity type: its relations, permissions, and name classification.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntityDefinition {
    pub name: String,
    pub relations: HashMap<String, RelationDefinition>,
    pub permissions: HashMap<String, PermissionDefinition>,
}

impl EntityDefinition {
    /// Classifies `name` as a relation, a permission, or unknown.
    pub fn classify(&self, name: &str) -> ReferenceKind {
        if self.relations.contains_key(name) {
            ReferenceKind::Relation
        } else if self.permissions.contains_key(name) {
            ReferenceKind::Permission
        } else {
            ReferenceKind::Unknown
        }
    }
}

/// A directly-stored relation and the subject shapes allowed to fill it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationDefinition {
    pub name: String,
    pub references: Vec<RelationReference>,
}

/// A subject shape a relation accepts: a type, optionally narrowed to a
/// userset relation on that type (`@organization#admin`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RelationReference {
    pub entity_type: String,
    pub relation: Option<String>,
}

impl RelationReference {
    pub fn direct(entity_type: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            relation: None,
        }
    }

    pub fn userset(entity_type: impl Into<String>, relation: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            relation: Some(relation.into()),
        }
    }
}

/// A derived permission: a named boolean expression over relations and
/// other permissions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionDefinition {
    pub name: String,
    pub child: PermissionNode,
}

/// Combining operator of a rewrite node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RewriteOp {
    Union,
    Intersection,
}

/// Permission expression AST.
///
/// Negation lives on the node itself rather than as a wrapper kind: a
/// negated child contributes the complement of its inner verdict to the
/// combining rewrite, matching the compiled form of `... and not x`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PermissionNode {
    /// Boolean combination of children.
    Rewrite {
        op: RewriteOp,
        children: Vec<PermissionNode>,
        negated: bool,
    },
    /// The subject-set of this entity under `relation` (which may itself
    /// name another permission on the same entity).
    ComputedUserSet { relation: String, negated: bool },
    /// Walk `tupleset` tuples on this entity, then evaluate `computed` on
    /// each referenced entity.
    TupleToUserSet {
        tupleset: String,
        computed: String,
        negated: bool,
    },
}

impl PermissionNode {
    /// Whether this node contributes its complement to the parent rewrite.
    pub fn negated(&self) -> bool {
        match self {
            PermissionNode::Rewrite { negated, .. }
            | PermissionNode::ComputedUserSet { negated, .. }
            | PermissionNode::TupleToUserSet { negated, .. } => *negated,
        }
    }

    /// Returns a copy of this node with the negation flag set.
    pub fn negate(mut self) -> Self {
        match &mut self {
            PermissionNode::Rewrite { negated, .. }
            | PermissionNode::ComputedUserSet { negated, .. }
            | PermissionNode::TupleToUserSet { negated, .. } => *negated = true,
        }
        self
    }

    /// True if any node in this subtree is negated.
    pub fn contains_negation(&self) -> bool {
        if self.negated() {
            return true;
        }
        match self {
            PermissionNode::Rewrite { children, .. } => {
                children.iter().any(PermissionNode::contains_negation)
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify() {
        let mut entity = EntityDefinition {
            name: "doc".into(),
            ..Default::default()
        };
        entity.relations.insert(
            "owner".into(),
            RelationDefinition {
                name: "owner".into(),
                references: vec![RelationReference::direct("user")],
            },
        );
        entity.permissions.insert(
            "read".into(),
            PermissionDefinition {
                name: "read".into(),
                child: PermissionNode::ComputedUserSet {
                    relation: "owner".into(),
                    negated: false,
                },
            },
        );

        assert_eq!(entity.classify("owner"), ReferenceKind::Relation);
        assert_eq!(entity.classify("read"), ReferenceKind::Permission);
        assert_eq!(entity.classify("nope"), ReferenceKind::Unknown);
    }

    #[test]
    fn test_negate_sets_flag_on_every_variant() {
        let leaf = PermissionNode::ComputedUserSet {
            relation: "owner".into(),
            negated: false,
        }
        .negate();
        assert!(leaf.negated());

        let ttu = PermissionNode::TupleToUserSet {
            tupleset: "parent".into(),
            computed: "member".into(),
            negated: false,
        }
        .negate();
        assert!(ttu.negated());

        let rewrite = PermissionNode::Rewrite {
            op: RewriteOp::Union,
            children: vec![leaf],
            negated: false,
        };
        assert!(!rewrite.negated());
        assert!(rewrite.contains_negation());
    }
}
