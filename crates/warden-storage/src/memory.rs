//! In-memory MVCC relationship store.
//!
//! Tuples are tenant-sharded and versioned: each carries the logical
//! transaction that created it and, once deleted, the transaction that
//! tombstoned it. Snapshot tokens wrap the logical clock, so readers at
//! an older token never observe later writes. Three secondary indexes
//! (entity-type, entity-type+relation, entity+id+relation) serve
//! arbitrary filters without full scans; iteration order is insertion
//! order, which keeps query results deterministic.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use dashmap::DashMap;
use tracing::instrument;

use warden_domain::error::{DomainError, DomainResult};
use warden_domain::store::{
    ContinuousToken, RelationshipReader, RelationshipWriter, SnapshotToken, TupleFilter,
    TupleIterator,
};
use warden_domain::tuple::{validate_tuple_for_write, RelationTuple};

/// A stored tuple with MVCC visibility bounds.
#[derive(Debug, Clone)]
struct VersionedTuple {
    tuple: RelationTuple,
    created_tx: u64,
    /// Zero while live; the tombstoning transaction afterwards.
    expired_tx: u64,
}

impl VersionedTuple {
    fn visible_at(&self, snapshot: u64) -> bool {
        self.created_tx <= snapshot && (self.expired_tx == 0 || self.expired_tx > snapshot)
    }
}

/// Per-tenant tuple log plus secondary indexes into it.
#[derive(Debug, Default)]
struct TenantShard {
    tuples: Vec<VersionedTuple>,
    by_type: HashMap<String, BTreeSet<usize>>,
    by_type_relation: HashMap<(String, String), BTreeSet<usize>>,
    by_entity_relation: HashMap<(String, String, String), BTreeSet<usize>>,
}

impl TenantShard {
    fn index(&mut self, position: usize) {
        let tuple = &self.tuples[position].tuple;
        self.by_type
            .entry(tuple.entity.entity_type.clone())
            .or_default()
            .insert(position);
        self.by_type_relation
            .entry((tuple.entity.entity_type.clone(), tuple.relation.clone()))
            .or_default()
            .insert(position);
        self.by_entity_relation
            .entry((
                tuple.entity.entity_type.clone(),
                tuple.entity.entity_id.clone(),
                tuple.relation.clone(),
            ))
            .or_default()
            .insert(position);
    }

    /// Positions worth examining for a filter, narrowest index first.
    fn candidates(&self, filter: &TupleFilter) -> Vec<usize> {
        let positions = if filter.entity.ids.len() == 1 && filter.relation.is_some() {
            self.by_entity_relation.get(&(
                filter.entity.entity_type.clone(),
                filter.entity.ids[0].clone(),
                filter.relation.clone().expect("relation checked above"),
            ))
        } else if let Some(relation) = &filter.relation {
            self.by_type_relation
                .get(&(filter.entity.entity_type.clone(), relation.clone()))
        } else {
            self.by_type.get(&filter.entity.entity_type)
        };
        positions
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// All tuples matching the filter and visible at the snapshot, in
    /// insertion order.
    fn matching(&self, filter: &TupleFilter, snapshot: u64) -> Vec<RelationTuple> {
        self.candidates(filter)
            .into_iter()
            .map(|position| &self.tuples[position])
            .filter(|versioned| versioned.visible_at(snapshot))
            .filter(|versioned| filter_matches(filter, &versioned.tuple))
            .map(|versioned| versioned.tuple.clone())
            .collect()
    }
}

/// True when the tuple satisfies every constrained filter field.
fn filter_matches(filter: &TupleFilter, tuple: &RelationTuple) -> bool {
    if tuple.entity.entity_type != filter.entity.entity_type {
        return false;
    }
    if !filter.entity.ids.is_empty() && !filter.entity.ids.contains(&tuple.entity.entity_id) {
        return false;
    }
    if let Some(relation) = &filter.relation {
        if &tuple.relation != relation {
            return false;
        }
    }
    if let Some(subject) = &filter.subject {
        if tuple.subject.subject_type != subject.subject_type {
            return false;
        }
        if !subject.ids.is_empty() && !subject.ids.contains(&tuple.subject.subject_id) {
            return false;
        }
        if let Some(relation) = &subject.relation {
            if tuple.subject.relation.as_deref() != Some(relation.as_str()) {
                return false;
            }
        }
    }
    true
}

/// Tenant-sharded in-memory store with a global logical clock.
#[derive(Debug, Default)]
pub struct MemoryRelationshipStore {
    shards: DashMap<String, TenantShard>,
    clock: AtomicU64,
}

impl MemoryRelationshipStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn encode_snapshot(&self, tx: u64) -> SnapshotToken {
        SnapshotToken(STANDARD.encode(tx.to_string()))
    }

    fn decode_snapshot(&self, token: &SnapshotToken) -> DomainResult<u64> {
        if token.is_noop() {
            return Ok(self.clock.load(Ordering::SeqCst));
        }
        let bytes = STANDARD
            .decode(&token.0)
            .map_err(|_| DomainError::TypeConversion {
                message: format!("snapshot token is not base64: '{}'", token.0),
            })?;
        let text = String::from_utf8(bytes).map_err(|_| DomainError::TypeConversion {
            message: format!("snapshot token payload is not utf-8: '{}'", token.0),
        })?;
        text.parse().map_err(|_| DomainError::TypeConversion {
            message: format!("snapshot token payload is not numeric: '{text}'"),
        })
    }

    fn next_tx(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::SeqCst) + 1
    }
}

#[async_trait]
impl RelationshipReader for MemoryRelationshipStore {
    #[instrument(skip(self, filter, snapshot), fields(tenant = %tenant))]
    async fn query_relationships(
        &self,
        tenant: &str,
        filter: &TupleFilter,
        snapshot: &SnapshotToken,
    ) -> DomainResult<TupleIterator> {
        let snapshot = self.decode_snapshot(snapshot)?;
        let matched = match self.shards.get(tenant) {
            Some(shard) => shard.matching(filter, snapshot),
            None => Vec::new(),
        };
        Ok(TupleIterator::new(matched))
    }

    async fn read_relationships(
        &self,
        tenant: &str,
        filter: &TupleFilter,
        snapshot: &SnapshotToken,
        page_size: usize,
        cursor: Option<&ContinuousToken>,
    ) -> DomainResult<(Vec<RelationTuple>, Option<ContinuousToken>)> {
        let snapshot_tx = self.decode_snapshot(snapshot)?;
        let matched = match self.shards.get(tenant) {
            Some(shard) => shard.matching(filter, snapshot_tx),
            None => Vec::new(),
        };

        let offset = match cursor {
            Some(cursor) => decode_cursor(cursor)?,
            None => 0,
        };
        let page: Vec<RelationTuple> =
            matched.iter().skip(offset).take(page_size).cloned().collect();
        let next = offset + page.len();
        let next_cursor = if next < matched.len() {
            Some(encode_cursor(next))
        } else {
            None
        };
        Ok((page, next_cursor))
    }

    async fn head_snapshot(&self, _tenant: &str) -> DomainResult<SnapshotToken> {
        Ok(self.encode_snapshot(self.clock.load(Ordering::SeqCst)))
    }
}

#[async_trait]
impl RelationshipWriter for MemoryRelationshipStore {
    #[instrument(skip(self, tuples), fields(tenant = %tenant, count = tuples.len()))]
    async fn write_relationships(
        &self,
        tenant: &str,
        tuples: Vec<RelationTuple>,
    ) -> DomainResult<SnapshotToken> {
        for tuple in &tuples {
            validate_tuple_for_write(tuple)?;
        }

        let tx = self.next_tx();
        let mut shard = self.shards.entry(tenant.to_string()).or_default();
        for tuple in tuples {
            // (tenant, 6-tuple) identity is unique among live tuples;
            // re-writing one is a no-op.
            let duplicate = shard
                .tuples
                .iter()
                .any(|versioned| versioned.expired_tx == 0 && versioned.tuple == tuple);
            if duplicate {
                continue;
            }
            shard.tuples.push(VersionedTuple {
                tuple,
                created_tx: tx,
                expired_tx: 0,
            });
            let position = shard.tuples.len() - 1;
            shard.index(position);
        }
        Ok(self.encode_snapshot(tx))
    }

    #[instrument(skip(self, filter), fields(tenant = %tenant))]
    async fn delete_relationships(
        &self,
        tenant: &str,
        filter: &TupleFilter,
    ) -> DomainResult<SnapshotToken> {
        let tx = self.next_tx();
        if let Some(mut shard) = self.shards.get_mut(tenant) {
            let positions = shard.candidates(filter);
            for position in positions {
                let versioned = &mut shard.tuples[position];
                if versioned.expired_tx == 0 && filter_matches(filter, &versioned.tuple) {
                    versioned.expired_tx = tx;
                }
            }
        }
        Ok(self.encode_snapshot(tx))
    }
}

fn encode_cursor(offset: usize) -> ContinuousToken {
    ContinuousToken(STANDARD.encode(offset.to_string()))
}

fn decode_cursor(cursor: &ContinuousToken) -> DomainResult<usize> {
    let invalid = || DomainError::InvalidContinuousToken {
        token: cursor.0.clone(),
    };
    let bytes = STANDARD.decode(&cursor.0).map_err(|_| invalid())?;
    let text = String::from_utf8(bytes).map_err(|_| invalid())?;
    text.parse().map_err(|_| invalid())
}
