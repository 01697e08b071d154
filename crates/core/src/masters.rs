//! Connection pooling for a set of independent Redis masters.
//!
//! Each master gets its own `deadpool-redis` pool. [`MasterSet::fan_out`] is
//! the shared fan-out-with-majority building block: it issues one future per
//! master in parallel, bounds each by an optional per-attempt timeout, and
//! hands every per-master outcome back to the caller so the quorum decision
//! stays with the primitive.

use std::future::Future;
use std::time::Duration;

use deadpool_redis::{Config, Pool, Runtime};
use futures::future::join_all;
use tracing::debug;

use crate::error::CoreError;

/// Configuration for a single Redis master endpoint.
#[derive(Debug, Clone)]
pub struct MasterConfig {
    /// Redis connection URL (e.g. `redis://127.0.0.1:6379`).
    pub url: String,

    /// Number of connections in the `deadpool-redis` pool.
    pub pool_size: usize,

    /// Timeout for acquiring a pooled connection.
    pub connection_timeout: Duration,
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            url: String::from("redis://127.0.0.1:6379"),
            pool_size: 10,
            connection_timeout: Duration::from_secs(5),
        }
    }
}

impl MasterConfig {
    /// Create a configuration for the given URL with default pool settings.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    /// Build a connection pool for this endpoint.
    ///
    /// Pool construction is lazy; no connection is opened until first use.
    pub fn build_pool(&self) -> Result<Pool, CoreError> {
        let cfg = Config::from_url(&self.url);
        cfg.builder()
            .map(|b| {
                b.max_size(self.pool_size)
                    .wait_timeout(Some(self.connection_timeout))
                    .runtime(Runtime::Tokio1)
                    .build()
            })
            .map_err(|e| CoreError::Connection(e.to_string()))?
            .map_err(|e| CoreError::Connection(e.to_string()))
    }
}

/// The set of independent Redis masters a primitive coordinates across.
#[derive(Clone, Debug)]
pub struct MasterSet {
    pools: Vec<Pool>,
}

impl MasterSet {
    /// Build one pool per configured endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Connection`] if any pool cannot be created, and
    /// [`CoreError::Backend`] if no endpoints are given.
    pub fn new(configs: &[MasterConfig]) -> Result<Self, CoreError> {
        if configs.is_empty() {
            return Err(CoreError::Backend(
                "a master set needs at least one endpoint".into(),
            ));
        }
        let pools = configs
            .iter()
            .map(MasterConfig::build_pool)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { pools })
    }

    /// Convenience constructor for the single-master degenerate case.
    pub fn single(config: &MasterConfig) -> Result<Self, CoreError> {
        Self::new(std::slice::from_ref(config))
    }

    /// Number of configured masters.
    pub fn len(&self) -> usize {
        self.pools.len()
    }

    /// Whether the set is empty. Always `false` for a constructed set.
    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }

    /// Strict majority of the configured masters: ⌊N/2⌋+1.
    pub fn quorum(&self) -> usize {
        self.pools.len() / 2 + 1
    }

    /// The per-master pools, indexed in configuration order.
    pub fn pools(&self) -> &[Pool] {
        &self.pools
    }

    /// Run `op` against every master in parallel and join the results.
    ///
    /// Each attempt is bounded by `per_attempt` when given; an attempt that
    /// exceeds the budget yields [`CoreError::Timeout`] for that master.
    /// Failures never short-circuit the others: the returned vector has one
    /// slot per master, in configuration order.
    pub async fn fan_out<T, F, Fut>(
        &self,
        per_attempt: Option<Duration>,
        op: F,
    ) -> Vec<Result<T, CoreError>>
    where
        F: Fn(usize, Pool) -> Fut,
        Fut: Future<Output = Result<T, CoreError>>,
    {
        let attempts = self.pools.iter().cloned().enumerate().map(|(index, pool)| {
            let attempt = op(index, pool);
            async move {
                let outcome = match per_attempt {
                    Some(budget) => match tokio::time::timeout(budget, attempt).await {
                        Ok(result) => result,
                        Err(_) => Err(CoreError::Timeout(budget)),
                    },
                    None => attempt.await,
                };
                if let Err(e) = &outcome {
                    debug!(master = index, error = %e, "master attempt failed");
                }
                outcome
            }
        });

        join_all(attempts).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set_of(n: usize) -> MasterSet {
        let configs: Vec<MasterConfig> = (0..n)
            .map(|i| MasterConfig::new(format!("redis://127.0.0.1:{}", 6379 + i)))
            .collect();
        MasterSet::new(&configs).expect("pool creation is lazy and should succeed")
    }

    #[test]
    fn default_endpoint() {
        let cfg = MasterConfig::default();
        assert_eq!(cfg.url, "redis://127.0.0.1:6379");
        assert_eq!(cfg.pool_size, 10);
        assert_eq!(cfg.connection_timeout, Duration::from_secs(5));
    }

    #[test]
    fn quorum_is_strict_majority() {
        assert_eq!(set_of(1).quorum(), 1);
        assert_eq!(set_of(3).quorum(), 2);
        assert_eq!(set_of(5).quorum(), 3);
        assert_eq!(set_of(7).quorum(), 4);
    }

    #[test]
    fn empty_master_set_is_rejected() {
        let err = MasterSet::new(&[]).expect_err("no endpoints should be rejected");
        assert!(matches!(err, CoreError::Backend(_)));
    }

    #[tokio::test]
    async fn fan_out_returns_one_slot_per_master() {
        let set = set_of(3);
        let results = set
            .fan_out(None, |index, _pool| async move { Ok::<_, CoreError>(index) })
            .await;
        assert_eq!(results.len(), 3);
        for (index, result) in results.iter().enumerate() {
            assert_eq!(*result.as_ref().expect("no I/O involved"), index);
        }
    }

    #[tokio::test]
    async fn fan_out_times_out_slow_attempts() {
        let set = set_of(3);
        let results = set
            .fan_out(Some(Duration::from_millis(10)), |index, _pool| async move {
                if index == 1 {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                }
                Ok::<_, CoreError>(index)
            })
            .await;
        assert!(results[0].is_ok());
        assert!(matches!(results[1], Err(CoreError::Timeout(_))));
        assert!(results[2].is_ok());
    }
}
