//! In-memory versioned schema store.
//!
//! Versions are write-once: readers pin a version for a whole evaluation
//! and a published version never changes under them. The head version is
//! the most recently written one.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::instrument;

use warden_domain::error::{DomainError, DomainResult};
use warden_domain::schema::{SchemaDefinition, SchemaView};
use warden_domain::store::{SchemaReader, SchemaWriter};

#[derive(Debug, Default)]
struct TenantSchemas {
    versions: HashMap<String, Arc<SchemaView>>,
    head: String,
}

/// Tenant-scoped, write-once schema registry.
#[derive(Debug, Default)]
pub struct MemorySchemaStore {
    tenants: DashMap<String, TenantSchemas>,
}

impl MemorySchemaStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SchemaWriter for MemorySchemaStore {
    #[instrument(skip(self, definition), fields(tenant = %tenant, version = %version))]
    async fn write_schema(
        &self,
        tenant: &str,
        version: &str,
        definition: SchemaDefinition,
    ) -> DomainResult<()> {
        let mut schemas = self.tenants.entry(tenant.to_string()).or_default();
        if schemas.versions.contains_key(version) {
            return Err(DomainError::StoreExecution {
                message: format!("schema version '{version}' already exists for tenant '{tenant}'"),
            });
        }
        schemas
            .versions
            .insert(version.to_string(), Arc::new(SchemaView::new(definition)));
        schemas.head = version.to_string();
        Ok(())
    }
}

#[async_trait]
impl SchemaReader for MemorySchemaStore {
    async fn read_schema(&self, tenant: &str, version: &str) -> DomainResult<Arc<SchemaView>> {
        let schemas = self
            .tenants
            .get(tenant)
            .ok_or_else(|| DomainError::SchemaNotFound {
                tenant: tenant.to_string(),
                version: version.to_string(),
            })?;
        let version = if version.is_empty() {
            schemas.head.clone()
        } else {
            version.to_string()
        };
        schemas
            .versions
            .get(&version)
            .map(Arc::clone)
            .ok_or_else(|| DomainError::SchemaNotFound {
                tenant: tenant.to_string(),
                version,
            })
    }

    async fn head_version(&self, tenant: &str) -> DomainResult<String> {
        self.tenants
            .get(tenant)
            .filter(|schemas| !schemas.head.is_empty())
            .map(|schemas| schemas.head.clone())
            .ok_or_else(|| DomainError::SchemaNotFound {
                tenant: tenant.to_string(),
                version: String::new(),
            })
    }
}
