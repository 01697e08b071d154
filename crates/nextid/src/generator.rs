use deadpool_redis::{Connection, Pool};
use redis::Script;
use tracing::debug;

use conclave_core::{CoreError, MasterSet, RetryStrategy, optimistic};

use crate::error::IdError;
use crate::scripts;

/// Redis key prefix namespacing ID sequences away from other keys.
const KEY_PREFIX: &str = "nextid:";

/// A quorum-coordinated generator of monotonically increasing integers.
///
/// Handles are independent; any number of processes may generate from the
/// same sequence concurrently. A fresh sequence yields 1 on its first call.
pub struct NextId {
    masters: MasterSet,
    key: String,
    retry: RetryStrategy,
}

impl NextId {
    /// Create a generator for the named sequence with the default retry
    /// strategy.
    pub fn new(name: &str, masters: MasterSet) -> Self {
        Self::with_retry(name, masters, RetryStrategy::default())
    }

    /// Create a generator with an explicit retry strategy, used both for the
    /// per-master optimistic scopes and for whole-round retries.
    pub fn with_retry(name: &str, masters: MasterSet, retry: RetryStrategy) -> Self {
        Self {
            masters,
            key: format!("{KEY_PREFIX}{name}"),
            retry,
        }
    }

    /// The namespaced Redis key backing this sequence.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Produce the next identifier.
    ///
    /// Advances the counter on every master in parallel, each inside its own
    /// optimistic scope. The round succeeds when a strict majority committed;
    /// the returned ID is the maximum committed value, and lagging masters
    /// are raised to it in the background.
    ///
    /// # Errors
    ///
    /// [`IdError::QuorumNotAchieved`] once the round retries are exhausted.
    pub async fn next(&self) -> Result<i64, IdError> {
        let quorum = self.masters.quorum();
        let mut attempt = 0u32;
        loop {
            let results = self
                .masters
                .fan_out(None, |_, pool| self.advance_on(pool))
                .await;

            let committed: Vec<i64> = results
                .iter()
                .filter_map(|r| r.as_ref().ok().copied())
                .collect();
            if committed.len() >= quorum {
                if let Some(id) = committed.iter().copied().max() {
                    self.propagate(id, &results);
                    return Ok(id);
                }
            }

            if attempt >= self.retry.max_retries {
                return Err(IdError::QuorumNotAchieved {
                    granted: committed.len(),
                    quorum,
                    masters: self.masters.len(),
                });
            }
            self.retry.sleep_for(attempt).await;
            attempt += 1;
        }
    }

    /// Advance the counter on one master: watch the key, read the current
    /// value (absent means 0), stage `current + 1`, commit. A commit aborted
    /// by a concurrent writer retries within the scope; exhausted retries
    /// surface as this master's failure for the round.
    async fn advance_on(&self, pool: Pool) -> Result<i64, CoreError> {
        let mut conn = pool
            .get()
            .await
            .map_err(|e| CoreError::Connection(e.to_string()))?;
        let key = self.key.clone();
        let watched = [self.key.clone()];
        optimistic(&mut conn, &watched, &self.retry, move |conn: &mut Connection| {
            let key = key.clone();
            Box::pin(async move {
                let current: Option<i64> = redis::cmd("GET")
                    .arg(&key)
                    .query_async(&mut *conn)
                    .await
                    .map_err(|e| CoreError::Backend(e.to_string()))?;
                let target = current.unwrap_or(0) + 1;
                let committed: Option<(i64,)> = redis::pipe()
                    .atomic()
                    .set(&key, target)
                    .ignore()
                    .get(&key)
                    .query_async(&mut *conn)
                    .await
                    .map_err(|e| CoreError::Backend(e.to_string()))?;
                Ok(committed.map(|(value,)| value))
            })
        })
        .await
    }

    /// Raise lagging masters to `id` in the background. Failures are logged
    /// and otherwise ignored; a master that stays behind is raised again by
    /// a later round.
    fn propagate(&self, id: i64, results: &[Result<i64, CoreError>]) {
        for (index, result) in results.iter().enumerate() {
            let lagging = match result {
                Ok(value) => *value < id,
                Err(_) => true,
            };
            if !lagging {
                continue;
            }

            let pool = self.masters.pools()[index].clone();
            let key = self.key.clone();
            tokio::spawn(async move {
                let outcome = async {
                    let mut conn = pool
                        .get()
                        .await
                        .map_err(|e| CoreError::Connection(e.to_string()))?;
                    let _: i64 = Script::new(scripts::RAISE_TO)
                        .key(&key)
                        .arg(id)
                        .invoke_async(&mut conn)
                        .await
                        .map_err(|e| CoreError::Backend(e.to_string()))?;
                    Ok::<_, CoreError>(())
                }
                .await;
                if let Err(e) = outcome {
                    debug!(master = index, key = %key, error = %e, "forward propagation failed");
                }
            });
        }
    }
}
