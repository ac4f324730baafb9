//! Circuit-breaker decorator for relationship readers.
//!
//! Wraps any reader and converts operation timeouts into `CIRCUIT_OPEN`
//! errors that the engines surface without retrying; timeouts never
//! degrade into a silent DENY. After a run of consecutive failures the
//! breaker opens and fails fast until a cooldown elapses, at which point
//! traffic probes the store again.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::time::timeout;
use tracing::warn;

use warden_domain::error::{DomainError, DomainResult};
use warden_domain::store::{
    ContinuousToken, RelationshipReader, SnapshotToken, TupleFilter, TupleIterator,
};
use warden_domain::tuple::RelationTuple;

/// Tuning for [`CircuitBreakerReader`].
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Per-operation timeout before the call counts as failed.
    pub operation_timeout: Duration,
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,
    /// How long the circuit stays open before probing again.
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            operation_timeout: Duration::from_secs(1),
            failure_threshold: 5,
            cooldown: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Default)]
struct BreakerState {
    consecutive_failures: u32,
    open_until: Option<Instant>,
}

/// Reader decorator that fails fast when the store misbehaves.
pub struct CircuitBreakerReader<R> {
    inner: R,
    config: CircuitBreakerConfig,
    state: Mutex<BreakerState>,
}

impl<R> CircuitBreakerReader<R> {
    pub fn new(inner: R) -> Self {
        Self::with_config(inner, CircuitBreakerConfig::default())
    }

    pub fn with_config(inner: R, config: CircuitBreakerConfig) -> Self {
        Self {
            inner,
            config,
            state: Mutex::new(BreakerState::default()),
        }
    }

    fn check_open(&self, operation: &str) -> DomainResult<()> {
        let mut state = self.state.lock().expect("breaker state lock");
        if let Some(open_until) = state.open_until {
            if Instant::now() < open_until {
                return Err(DomainError::CircuitOpen {
                    operation: operation.to_string(),
                });
            }
            // Cooldown elapsed: let traffic probe the store again.
            state.open_until = None;
        }
        Ok(())
    }

    fn record_success(&self) {
        let mut state = self.state.lock().expect("breaker state lock");
        state.consecutive_failures = 0;
    }

    fn record_failure(&self, operation: &str) {
        let mut state = self.state.lock().expect("breaker state lock");
        state.consecutive_failures += 1;
        if state.consecutive_failures >= self.config.failure_threshold {
            warn!(operation, failures = state.consecutive_failures, "circuit opened");
            state.open_until = Some(Instant::now() + self.config.cooldown);
            state.consecutive_failures = 0;
        }
    }

    async fn guard<T>(
        &self,
        operation: &str,
        call: impl std::future::Future<Output = DomainResult<T>>,
    ) -> DomainResult<T> {
        self.check_open(operation)?;
        match timeout(self.config.operation_timeout, call).await {
            Ok(Ok(value)) => {
                self.record_success();
                Ok(value)
            }
            Ok(Err(error)) => {
                self.record_failure(operation);
                Err(error)
            }
            Err(_) => {
                self.record_failure(operation);
                Err(DomainError::CircuitOpen {
                    operation: operation.to_string(),
                })
            }
        }
    }
}

#[async_trait]
impl<R> RelationshipReader for CircuitBreakerReader<R>
where
    R: RelationshipReader,
{
    async fn query_relationships(
        &self,
        tenant: &str,
        filter: &TupleFilter,
        snapshot: &SnapshotToken,
    ) -> DomainResult<TupleIterator> {
        self.guard(
            "query_relationships",
            self.inner.query_relationships(tenant, filter, snapshot),
        )
        .await
    }

    async fn read_relationships(
        &self,
        tenant: &str,
        filter: &TupleFilter,
        snapshot: &SnapshotToken,
        page_size: usize,
        cursor: Option<&ContinuousToken>,
    ) -> DomainResult<(Vec<RelationTuple>, Option<ContinuousToken>)> {
        self.guard(
            "read_relationships",
            self.inner
                .read_relationships(tenant, filter, snapshot, page_size, cursor),
        )
        .await
    }

    async fn head_snapshot(&self, tenant: &str) -> DomainResult<SnapshotToken> {
        self.guard("head_snapshot", self.inner.head_snapshot(tenant))
            .await
    }
}
