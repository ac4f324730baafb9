//! Request fingerprinting and check-result caching.
//!
//! A fingerprint is a SHA-256 digest of the canonical request encoding;
//! semantically-equal requests (ellipsis vs. absent subject relation,
//! resolved snapshot and schema version) collide by construction. The
//! cache is bounded and frequency-admitted (Moka's TinyLFU) and keyed per
//! tenant and per snapshot through the fingerprint itself.
//!
//! Single-flight: at most one evaluation runs per fingerprint. Callers
//! acquire a [`FlightPermit`] before computing; concurrent callers with
//! the same fingerprint wait on the permit, then re-consult the cache.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use moka::future::Cache;
use sha2::{Digest, Sha256};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::engine::CheckVerdict;
use crate::store::SnapshotToken;
use crate::tuple::{Entity, Subject};

/// Canonical digest identifying a check request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CheckFingerprint([u8; 32]);

impl CheckFingerprint {
    /// Computes the fingerprint over resolved request fields.
    ///
    /// `snapshot` and `schema_version` must already be resolved (never the
    /// noop forms); otherwise equal requests arriving before and after a
    /// head change would collide.
    pub fn compute(
        tenant: &str,
        schema_version: &str,
        snapshot: &SnapshotToken,
        entity: &Entity,
        permission: &str,
        subject: &Subject,
        exclusion: bool,
    ) -> Self {
        let mut hasher = Sha256::new();
        // Field separators keep adjacent fields from sliding into each
        // other ("ab"+"c" vs "a"+"bc").
        hasher.update(tenant.as_bytes());
        hasher.update([0x1f]);
        hasher.update(schema_version.as_bytes());
        hasher.update([0x1f]);
        hasher.update(snapshot.0.as_bytes());
        hasher.update([0x1f]);
        hasher.update(entity.to_string().as_bytes());
        hasher.update([0x1f]);
        hasher.update(permission.as_bytes());
        hasher.update([0x1f]);
        // Display normalizes ellipsis/empty subject relations.
        hasher.update(subject.to_string().as_bytes());
        hasher.update([0x1f]);
        hasher.update([exclusion as u8]);
        Self(hasher.finalize().into())
    }
}

impl fmt::Display for CheckFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// A cached verdict together with the depth budget it was computed under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachedCheck {
    pub verdict: CheckVerdict,
    /// Depth budget of the evaluation that produced the verdict.
    pub depth: u32,
    /// Budget left when the verdict was reached; zero flags a possibly
    /// depth-truncated answer.
    pub remaining_depth: u32,
}

/// Exclusive right to evaluate one fingerprint.
///
/// Dropping the permit releases waiting callers; they re-consult the
/// cache before computing themselves.
pub struct FlightPermit {
    _guard: Option<OwnedMutexGuard<()>>,
    slot: Option<(Arc<DashMap<CheckFingerprint, Arc<Mutex<()>>>>, CheckFingerprint)>,
}

impl FlightPermit {
    /// Permit that guards nothing, for the noop cache.
    fn inert() -> Self {
        Self {
            _guard: None,
            slot: None,
        }
    }
}

impl Drop for FlightPermit {
    fn drop(&mut self) {
        if let Some((in_flight, fingerprint)) = self.slot.take() {
            // Last holder cleans the slot up; waiters still hold clones of
            // the mutex and proceed unaffected.
            in_flight.remove_if(&fingerprint, |_, mutex| Arc::strong_count(mutex) <= 2);
        }
    }
}

/// Deduplicating cache of check results.
#[async_trait]
pub trait CheckCache: Send + Sync {
    /// Returns the cached entry for a fingerprint, if any.
    async fn get(&self, fingerprint: &CheckFingerprint) -> Option<CachedCheck>;

    /// Publishes a computed entry.
    async fn insert(&self, fingerprint: CheckFingerprint, value: CachedCheck);

    /// Acquires the single-flight permit for a fingerprint.
    async fn begin(&self, fingerprint: &CheckFingerprint) -> FlightPermit;
}

/// Configuration for [`MokaCheckCache`].
#[derive(Debug, Clone)]
pub struct CheckCacheConfig {
    /// Maximum number of cached verdicts.
    pub max_capacity: u64,
    /// Upper bound on entry lifetime; snapshot-keyed entries never go
    /// stale, the bound reclaims memory held by dead snapshots.
    pub time_to_live: Duration,
}

impl Default for CheckCacheConfig {
    fn default() -> Self {
        Self {
            max_capacity: 100_000,
            time_to_live: Duration::from_secs(300),
        }
    }
}

/// Bounded, frequency-admitted check cache with single-flight keyed on
/// the fingerprint.
pub struct MokaCheckCache {
    cache: Cache<CheckFingerprint, CachedCheck>,
    in_flight: Arc<DashMap<CheckFingerprint, Arc<Mutex<()>>>>,
}

impl MokaCheckCache {
    pub fn new(config: CheckCacheConfig) -> Self {
        let cache = Cache::builder()
            .max_capacity(config.max_capacity)
            .time_to_live(config.time_to_live)
            .build();
        Self {
            cache,
            in_flight: Arc::new(DashMap::new()),
        }
    }

    /// Approximate number of cached entries.
    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }

    /// Runs pending maintenance; useful when asserting on eviction.
    pub async fn run_pending_tasks(&self) {
        self.cache.run_pending_tasks().await;
    }
}

impl Default for MokaCheckCache {
    fn default() -> Self {
        Self::new(CheckCacheConfig::default())
    }
}

#[async_trait]
impl CheckCache for MokaCheckCache {
    async fn get(&self, fingerprint: &CheckFingerprint) -> Option<CachedCheck> {
        let result = self.cache.get(fingerprint).await;
        if result.is_some() {
            metrics::counter!("warden_check_cache_hits_total").increment(1);
        } else {
            metrics::counter!("warden_check_cache_misses_total").increment(1);
        }
        result
    }

    async fn insert(&self, fingerprint: CheckFingerprint, value: CachedCheck) {
        self.cache.insert(fingerprint, value).await;
    }

    async fn begin(&self, fingerprint: &CheckFingerprint) -> FlightPermit {
        let mutex = self
            .in_flight
            .entry(fingerprint.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = mutex.lock_owned().await;
        FlightPermit {
            _guard: Some(guard),
            slot: Some((Arc::clone(&self.in_flight), fingerprint.clone())),
        }
    }
}

/// Cache that never hits and never stores; every operation is a miss.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCheckCache;

#[async_trait]
impl CheckCache for NoopCheckCache {
    async fn get(&self, _fingerprint: &CheckFingerprint) -> Option<CachedCheck> {
        None
    }

    async fn insert(&self, _fingerprint: CheckFingerprint, _value: CachedCheck) {}

    async fn begin(&self, _fingerprint: &CheckFingerprint) -> FlightPermit {
        FlightPermit::inert()
    }
}

/// Registers metric descriptions for the check cache.
pub fn register_cache_metrics() {
    metrics::describe_counter!(
        "warden_check_cache_hits_total",
        "Total number of check cache hits"
    );
    metrics::describe_counter!(
        "warden_check_cache_misses_total",
        "Total number of check cache misses"
    );
}
