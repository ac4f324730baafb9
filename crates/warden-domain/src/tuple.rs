//! Relation tuple and subject model.
//!
//! A tuple asserts `entity:id#relation@subject`. Subjects are either a
//! concrete user `(type, id)` or a userset `(type, id, relation)` meaning
//! "every subject holding `relation` on that entity". The reserved
//! ellipsis relation `...` marks "no further indirection" and is
//! equivalent to an absent relation for identity and matching.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};

/// Reserved relation marking "no further indirection" on a subject.
pub const ELLIPSIS: &str = "...";

/// Reserved subject type for concrete end users.
pub const USER_TYPE: &str = "user";

/// A typed object that can be the target of relations.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Entity {
    /// The type portion (e.g. "doc").
    pub entity_type: String,
    /// The ID portion (e.g. "1").
    pub entity_id: String,
}

impl Entity {
    /// Creates a new Entity from type and ID.
    pub fn new(entity_type: impl Into<String>, entity_id: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
        }
    }

    /// Parses an entity from "type:id" form.
    pub fn parse(value: &str) -> DomainResult<Self> {
        let (entity_type, entity_id) =
            value
                .split_once(':')
                .ok_or_else(|| DomainError::TypeConversion {
                    message: format!("entity must be in 'type:id' form: '{value}'"),
                })?;
        if entity_type.is_empty() || entity_id.is_empty() {
            return Err(DomainError::TypeConversion {
                message: format!("entity type and id cannot be empty: '{value}'"),
            });
        }
        Ok(Self::new(entity_type, entity_id))
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.entity_type, self.entity_id)
    }
}

/// A subject of a relation tuple: a concrete user or a userset.
///
/// `relation == None` denotes a concrete user. The ellipsis relation is
/// normalized away at construction so identity never depends on which of
/// the two "no indirection" spellings was stored.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Subject {
    pub subject_type: String,
    pub subject_id: String,
    pub relation: Option<String>,
}

impl Subject {
    /// Creates a concrete (user) subject.
    pub fn user(subject_type: impl Into<String>, subject_id: impl Into<String>) -> Self {
        Self {
            subject_type: subject_type.into(),
            subject_id: subject_id.into(),
            relation: None,
        }
    }

    /// Creates a userset subject; ellipsis and empty normalize to None.
    pub fn userset(
        subject_type: impl Into<String>,
        subject_id: impl Into<String>,
        relation: impl Into<String>,
    ) -> Self {
        Self {
            subject_type: subject_type.into(),
            subject_id: subject_id.into(),
            relation: normalize_relation(relation.into()),
        }
    }

    /// Parses a subject from "type:id" or "type:id#relation" form.
    pub fn parse(value: &str) -> DomainResult<Self> {
        match value.split_once('#') {
            Some((entity, relation)) => {
                let entity = Entity::parse(entity)?;
                Ok(Self::userset(entity.entity_type, entity.entity_id, relation))
            }
            None => {
                let entity = Entity::parse(value)?;
                Ok(Self::user(entity.entity_type, entity.entity_id))
            }
        }
    }

    /// True when the subject is a concrete user rather than a userset.
    pub fn is_user(&self) -> bool {
        self.relation.is_none()
    }

    /// The entity this subject refers to.
    pub fn entity(&self) -> Entity {
        Entity::new(self.subject_type.clone(), self.subject_id.clone())
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.relation {
            Some(relation) => write!(f, "{}:{}#{}", self.subject_type, self.subject_id, relation),
            None => write!(f, "{}:{}", self.subject_type, self.subject_id),
        }
    }
}

fn normalize_relation(relation: String) -> Option<String> {
    if relation.is_empty() || relation == ELLIPSIS {
        None
    } else {
        Some(relation)
    }
}

/// A stored relationship: `entity:id#relation@subject`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RelationTuple {
    pub entity: Entity,
    pub relation: String,
    pub subject: Subject,
}

impl RelationTuple {
    /// Creates a new tuple.
    pub fn new(entity: Entity, relation: impl Into<String>, subject: Subject) -> Self {
        Self {
            entity,
            relation: relation.into(),
            subject,
        }
    }

    /// Parses a tuple from "type:id#relation@subject" form.
    pub fn parse(value: &str) -> DomainResult<Self> {
        let (target, subject) =
            value
                .split_once('@')
                .ok_or_else(|| DomainError::TypeConversion {
                    message: format!("tuple must be in 'entity#relation@subject' form: '{value}'"),
                })?;
        let (entity, relation) =
            target
                .split_once('#')
                .ok_or_else(|| DomainError::TypeConversion {
                    message: format!("tuple target must be in 'type:id#relation' form: '{target}'"),
                })?;
        if relation.is_empty() {
            return Err(DomainError::TypeConversion {
                message: format!("tuple relation cannot be empty: '{value}'"),
            });
        }
        Ok(Self::new(
            Entity::parse(entity)?,
            relation,
            Subject::parse(subject)?,
        ))
    }
}

impl fmt::Display for RelationTuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}@{}", self.entity, self.relation, self.subject)
    }
}

/// Validates a tuple for write: user subjects must not carry a relation.
///
/// The ellipsis spelling normalizes to no relation before this check, so
/// `user:1#...` remains writable.
pub fn validate_tuple_for_write(tuple: &RelationTuple) -> DomainResult<()> {
    if tuple.subject.subject_type == USER_TYPE && !tuple.subject.is_user() {
        return Err(DomainError::SubjectRelationMustBeEmpty);
    }
    Ok(())
}
