//! Shared fixtures for the scenario suite.
//!
//! The fixture schemas mirror the three reference setups used throughout
//! the scenario tests: a drive (docs/folders/organizations), a
//! github-style repository graph with chained usersets, and a repo graph
//! with an exclusion permission.

// Each test binary compiles this module separately and uses a subset.
#![allow(dead_code)]

use std::sync::Arc;

use warden_domain::cache::{CheckCache, NoopCheckCache};
use warden_domain::engine::{
    CheckEngine, CheckMetadata, CheckRequest, CheckResponse, ExpandEngine, LookupEntityEngine,
    LookupSchemaEngine,
};
use warden_domain::error::DomainResult;
use warden_domain::schema::{
    computed, intersection, tuple_to_userset, union, SchemaBuilder, SchemaDefinition,
};
use warden_domain::store::{RelationshipWriter, SchemaWriter, SnapshotToken};
use warden_domain::tuple::{Entity, RelationTuple, Subject};
use warden_storage::{MemoryRelationshipStore, MemorySchemaStore};

pub const TENANT: &str = "t1";
pub const SCHEMA_VERSION: &str = "v1";

/// A seeded schema + relationship store pair with engine constructors.
pub struct Harness {
    pub schema_store: Arc<MemorySchemaStore>,
    pub relationship_store: Arc<MemoryRelationshipStore>,
}

impl Harness {
    /// Writes the schema as `v1` and seeds the tuples.
    pub async fn new(definition: SchemaDefinition, tuples: &[&str]) -> Self {
        let schema_store = Arc::new(MemorySchemaStore::new());
        schema_store
            .write_schema(TENANT, SCHEMA_VERSION, definition)
            .await
            .expect("fixture schema");

        let relationship_store = Arc::new(MemoryRelationshipStore::new());
        let harness = Self {
            schema_store,
            relationship_store,
        };
        harness.write(tuples).await;
        harness
    }

    /// Writes additional tuples; returns the produced snapshot.
    pub async fn write(&self, tuples: &[&str]) -> SnapshotToken {
        let parsed: Vec<RelationTuple> = tuples
            .iter()
            .map(|spec| RelationTuple::parse(spec).expect("fixture tuple"))
            .collect();
        self.relationship_store
            .write_relationships(TENANT, parsed)
            .await
            .expect("fixture write")
    }

    pub fn check_engine(&self) -> CheckEngine<MemorySchemaStore, MemoryRelationshipStore> {
        self.check_engine_with_cache(Arc::new(NoopCheckCache))
    }

    pub fn check_engine_with_cache(
        &self,
        cache: Arc<dyn CheckCache>,
    ) -> CheckEngine<MemorySchemaStore, MemoryRelationshipStore> {
        CheckEngine::new(
            Arc::clone(&self.schema_store),
            Arc::clone(&self.relationship_store),
            cache,
        )
    }

    pub fn expand_engine(&self) -> ExpandEngine<MemorySchemaStore, MemoryRelationshipStore> {
        ExpandEngine::new(
            Arc::clone(&self.schema_store),
            Arc::clone(&self.relationship_store),
        )
    }

    pub fn lookup_engine(&self) -> LookupEntityEngine<MemorySchemaStore, MemoryRelationshipStore> {
        LookupEntityEngine::new(
            Arc::clone(&self.schema_store),
            Arc::clone(&self.relationship_store),
            Arc::new(NoopCheckCache),
        )
    }

    pub fn lookup_schema_engine(&self) -> LookupSchemaEngine<MemorySchemaStore> {
        LookupSchemaEngine::new(Arc::clone(&self.schema_store))
    }

    /// Convenience check at head snapshot with default depth.
    pub async fn check(
        &self,
        entity: &str,
        permission: &str,
        subject: &str,
    ) -> DomainResult<CheckResponse> {
        self.check_at(entity, permission, subject, SnapshotToken::noop())
            .await
    }

    /// Convenience check pinned at a snapshot.
    pub async fn check_at(
        &self,
        entity: &str,
        permission: &str,
        subject: &str,
        snapshot: SnapshotToken,
    ) -> DomainResult<CheckResponse> {
        self.check_engine()
            .check(&CheckRequest {
                tenant: TENANT.to_string(),
                entity: Entity::parse(entity)?,
                permission: permission.to_string(),
                subject: Subject::parse(subject)?,
                metadata: CheckMetadata {
                    snapshot,
                    ..CheckMetadata::default()
                },
            })
            .await
    }
}

/// Drive: docs in folders under organizations.
///
/// ```text
/// entity user {}
/// entity organization { relation admin @user }
/// entity folder {
///     relation org @organization
///     relation collaborator @user
/// }
/// entity doc {
///     relation org @organization
///     relation parent @folder
///     relation owner @user
///     permission read   = (owner or parent.collaborator) or org.admin
///     permission update = owner and org.admin
///     permission delete = owner or org.admin
/// }
/// ```
pub fn drive_schema() -> SchemaDefinition {
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
                .permission(
                    "delete",
                    union(vec![computed("owner"), tuple_to_userset("org", "admin")]),
                )
        })
        .build()
}

pub fn drive_tuples() -> Vec<&'static str> {
    vec![
        "doc:1#owner@user:2",
        "doc:1#parent@folder:1",
        "folder:1#collaborator@user:1",
        "folder:1#collaborator@user:3",
        "doc:1#org@organization:1",
        "organization:1#admin@user:1",
    ]
}

/// Github-style: repository ownership through chained org usersets.
pub fn github_schema() -> SchemaDefinition {
    SchemaBuilder::new()
        .entity("user", |e| e)
        .entity("organization", |e| {
            e.relation("member", &["user", "organization#member"])
                .relation("admin", &["user", "organization#member"])
        })
        .entity("repository", |e| {
            e.relation("parent", &["organization"])
                .relation("owner", &["user", "organization#admin"])
                .permission("push", computed("owner"))
        })
        .build()
}

pub fn github_tuples() -> Vec<&'static str> {
    vec![
        "repository:1#owner@organization:2#admin",
        "organization:2#admin@organization:3#member",
        "organization:3#member@user:1",
    ]
}

/// Exclusion: push requires org membership minus parent membership.
pub fn exclusion_schema() -> SchemaDefinition {
    SchemaBuilder::new()
        .entity("user", |e| e)
        .entity("organization", |e| e.relation("member", &["user"]))
        .entity("parent", |e| e.relation("member", &["user"]))
        .entity("repo", |e| {
            e.relation("org", &["organization"])
                .relation("parent", &["parent"])
                .permission(
                    "push",
                    intersection(vec![
                        tuple_to_userset("org", "member"),
                        tuple_to_userset("parent", "member").negate(),
                    ]),
                )
        })
        .build()
}

pub fn exclusion_tuples() -> Vec<&'static str> {
    vec![
        "organization:1#member@user:1",
        "organization:1#member@user:2",
        "parent:1#member@user:1",
        "repo:1#org@organization:1",
        "repo:1#parent@parent:1",
    ]
}
