use std::time::{Duration, Instant};

use rand::Rng;
use redis::Script;
use tracing::debug;
use uuid::Uuid;

use conclave_core::{CoreError, MasterSet};

use crate::config::LockConfig;
use crate::error::LockError;
use crate::scripts;

/// State carried while the handle holds the lock.
#[derive(Debug, Clone)]
struct Held {
    token: String,
    acquired_at: Instant,
    validity: Duration,
    extensions_used: u32,
}

impl Held {
    /// Whether the safe portion of the lease has already elapsed. The handle
    /// treats a lapsed lease as released.
    fn lapsed(&self) -> bool {
        self.acquired_at.elapsed() >= self.validity
    }
}

/// Outcome of one quorum acquisition attempt.
enum Attempt {
    Granted(Held),
    Refused { granted: usize },
}

/// Outcome of an acquisition loop (one or more attempts).
enum AcquireOutcome {
    Acquired,
    Refused { granted: usize },
}

/// A distributed mutex held by quorum across independent Redis masters.
///
/// Each handle is an independent participant: it carries its own fencing
/// token while the lock is held and moves through
/// unacquired → acquiring → held → released. Misusing the state machine
/// (acquiring while held, releasing while not held) is reported as an error
/// rather than silently tolerated.
#[derive(Debug)]
pub struct Redlock {
    masters: MasterSet,
    config: LockConfig,
    state: Option<Held>,
}

impl Redlock {
    /// Create a handle for the configured resource.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::EvenMasters`] unless the master count is odd
    /// (production guidance is five).
    pub fn new(masters: MasterSet, config: LockConfig) -> Result<Self, LockError> {
        if masters.len() % 2 == 0 {
            return Err(LockError::EvenMasters(masters.len()));
        }
        Ok(Self {
            masters,
            config,
            state: None,
        })
    }

    /// The configured resource name.
    pub fn key(&self) -> &str {
        &self.config.key
    }

    /// Make a single acquisition attempt without retrying.
    ///
    /// Returns `false` when the lock is contended.
    ///
    /// # Errors
    ///
    /// [`LockError::AlreadyAcquired`] if this handle already holds the lock.
    pub async fn try_acquire(&mut self) -> Result<bool, LockError> {
        self.ensure_not_held()?;
        match self.attempt().await {
            Attempt::Granted(held) => {
                self.state = Some(held);
                Ok(true)
            }
            Attempt::Refused { .. } => Ok(false),
        }
    }

    /// Acquire the lock, honoring the configured `blocking` / `timeout`
    /// options. Returns `false` when the lock could not be acquired.
    ///
    /// # Errors
    ///
    /// [`LockError::AlreadyAcquired`] if this handle already holds the lock.
    pub async fn acquire(&mut self) -> Result<bool, LockError> {
        self.ensure_not_held()?;
        let blocking = self.config.blocking;
        let timeout = self.config.timeout;
        match self.acquire_loop(blocking, timeout).await {
            AcquireOutcome::Acquired => Ok(true),
            AcquireOutcome::Refused { .. } => Ok(false),
        }
    }

    /// Acquire the lock and return a guard scoping the critical section,
    /// honoring the `context_manager_blocking` / `context_manager_timeout`
    /// options.
    ///
    /// # Errors
    ///
    /// [`LockError::QuorumNotAchieved`] when the lock could not be acquired;
    /// [`LockError::AlreadyAcquired`] if this handle already holds it.
    pub async fn hold(&mut self) -> Result<RedlockGuard<'_>, LockError> {
        self.ensure_not_held()?;
        let blocking = self.config.context_manager_blocking;
        let timeout = self.config.context_manager_timeout;
        match self.acquire_loop(blocking, timeout).await {
            AcquireOutcome::Acquired => Ok(RedlockGuard { lock: self }),
            AcquireOutcome::Refused { granted } => Err(LockError::QuorumNotAchieved {
                granted,
                quorum: self.masters.quorum(),
                masters: self.masters.len(),
            }),
        }
    }

    /// Release the lock: compare-and-delete on every master.
    ///
    /// # Errors
    ///
    /// [`LockError::ReleaseUnlocked`] if this handle does not hold the lock,
    /// or if fewer than a quorum of masters still recognized its token (the
    /// lease lapsed before the explicit release).
    pub async fn release(&mut self) -> Result<(), LockError> {
        let Some(held) = self.state.take() else {
            return Err(LockError::ReleaseUnlocked);
        };
        let confirmed = self.release_token(&held.token).await;
        if confirmed >= self.masters.quorum() {
            Ok(())
        } else {
            Err(LockError::ReleaseUnlocked)
        }
    }

    /// Extend the acquisition's lease back to the full `auto_release_time`.
    ///
    /// # Errors
    ///
    /// [`LockError::ExtensionLimit`] once `num_extensions` extensions have
    /// been used; [`LockError::ExtendUnlocked`] if this handle does not hold
    /// the lock or a quorum no longer recognizes its token.
    pub async fn extend(&mut self) -> Result<(), LockError> {
        let (token, extensions_used) = match &self.state {
            Some(held) => (held.token.clone(), held.extensions_used),
            None => return Err(LockError::ExtendUnlocked),
        };
        if extensions_used >= self.config.num_extensions {
            return Err(LockError::ExtensionLimit(extensions_used));
        }

        let started = Instant::now();
        let ttl_ms = self.lease_millis();
        let key = self.config.key.clone();
        let script_token = token.clone();
        let results = self
            .masters
            .fan_out(None, |_, pool| {
                let key = key.clone();
                let token = script_token.clone();
                async move {
                    let mut conn = pool
                        .get()
                        .await
                        .map_err(|e| CoreError::Connection(e.to_string()))?;
                    let extended: i64 = Script::new(scripts::EXTEND)
                        .key(&key)
                        .arg(&token)
                        .arg(ttl_ms)
                        .invoke_async(&mut conn)
                        .await
                        .map_err(|e| CoreError::Backend(e.to_string()))?;
                    Ok(extended == 1)
                }
            })
            .await;

        let granted = results.iter().filter(|r| matches!(r, Ok(true))).count();
        let validity = self.validity_window(started.elapsed());

        if granted >= self.masters.quorum() && validity > Duration::ZERO {
            if let Some(held) = &mut self.state {
                held.acquired_at = started;
                held.validity = validity;
                held.extensions_used += 1;
            }
            Ok(())
        } else {
            Err(LockError::ExtendUnlocked)
        }
    }

    /// Remaining validity of this handle's acquisition.
    ///
    /// Fans out a token-checked `PTTL` to every master; the result is the
    /// quorum minimum minus the drift allowance and the query's own elapsed
    /// time. Returns zero when the handle does not hold the lock or fewer
    /// than a quorum of masters still recognize its token.
    pub async fn locked(&self) -> Duration {
        let Some(held) = &self.state else {
            return Duration::ZERO;
        };

        let started = Instant::now();
        let key = self.config.key.clone();
        let token = held.token.clone();
        let results = self
            .masters
            .fan_out(None, |_, pool| {
                let key = key.clone();
                let token = token.clone();
                async move {
                    let mut conn = pool
                        .get()
                        .await
                        .map_err(|e| CoreError::Connection(e.to_string()))?;
                    let remaining: i64 = Script::new(scripts::REMAINING)
                        .key(&key)
                        .arg(&token)
                        .invoke_async(&mut conn)
                        .await
                        .map_err(|e| CoreError::Backend(e.to_string()))?;
                    Ok(remaining)
                }
            })
            .await;

        let ttls: Vec<u64> = results
            .into_iter()
            .filter_map(Result::ok)
            .filter_map(|ms| u64::try_from(ms).ok())
            .collect();
        if ttls.len() < self.masters.quorum() {
            return Duration::ZERO;
        }

        let min_ttl = Duration::from_millis(ttls.iter().copied().min().unwrap_or(0));
        min_ttl
            .saturating_sub(self.drift_allowance())
            .saturating_sub(started.elapsed())
    }

    /// Reject reuse while held; clear state whose safe window lapsed.
    fn ensure_not_held(&mut self) -> Result<(), LockError> {
        if let Some(held) = &self.state {
            if !held.lapsed() {
                return Err(LockError::AlreadyAcquired);
            }
            self.state = None;
        }
        Ok(())
    }

    /// Acquisition loop: attempt, and while blocking and within the deadline
    /// retry after a randomized delay in `[0, retry_delay)`.
    async fn acquire_loop(&mut self, blocking: bool, timeout: Option<Duration>) -> AcquireOutcome {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            match self.attempt().await {
                Attempt::Granted(held) => {
                    self.state = Some(held);
                    return AcquireOutcome::Acquired;
                }
                Attempt::Refused { granted } => {
                    debug!(
                        key = %self.config.key,
                        granted,
                        quorum = self.masters.quorum(),
                        "acquisition attempt refused"
                    );
                    if !blocking {
                        return AcquireOutcome::Refused { granted };
                    }
                    if let Some(d) = deadline {
                        if Instant::now() >= d {
                            return AcquireOutcome::Refused { granted };
                        }
                    }
                    let cap = u64::try_from(self.config.retry_delay.as_millis())
                        .unwrap_or(u64::MAX)
                        .max(1);
                    let mut delay = Duration::from_millis(rand::thread_rng().gen_range(0..cap));
                    if let Some(d) = deadline {
                        delay = delay.min(d.saturating_duration_since(Instant::now()));
                    }
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// One quorum acquisition round: fresh token, parallel set-if-absent on
    /// every master, grant count plus validity window decide the outcome.
    /// A refused round releases the token on every master best-effort.
    async fn attempt(&self) -> Attempt {
        let token = Uuid::new_v4().simple().to_string();
        let started = Instant::now();
        let ttl_ms = self.lease_millis();
        // A slow master must not consume the whole lease.
        let per_attempt =
            self.config.auto_release_time / u32::try_from(self.masters.len()).unwrap_or(u32::MAX);

        let key = self.config.key.clone();
        let script_token = token.clone();
        let results = self
            .masters
            .fan_out(Some(per_attempt), |_, pool| {
                let key = key.clone();
                let token = script_token.clone();
                async move {
                    let mut conn = pool
                        .get()
                        .await
                        .map_err(|e| CoreError::Connection(e.to_string()))?;
                    let granted: i64 = Script::new(scripts::ACQUIRE)
                        .key(&key)
                        .arg(&token)
                        .arg(ttl_ms)
                        .invoke_async(&mut conn)
                        .await
                        .map_err(|e| CoreError::Backend(e.to_string()))?;
                    Ok(granted == 1)
                }
            })
            .await;

        let granted = results.iter().filter(|r| matches!(r, Ok(true))).count();
        let validity = self.validity_window(started.elapsed());

        if granted >= self.masters.quorum() && validity > Duration::ZERO {
            Attempt::Granted(Held {
                token,
                acquired_at: started,
                validity,
                extensions_used: 0,
            })
        } else {
            self.release_token(&token).await;
            Attempt::Refused { granted }
        }
    }

    /// Best-effort compare-and-delete of `token` on every master. Returns
    /// how many masters confirmed the delete.
    async fn release_token(&self, token: &str) -> usize {
        let key = self.config.key.clone();
        let token = token.to_string();
        let results = self
            .masters
            .fan_out(None, |_, pool| {
                let key = key.clone();
                let token = token.clone();
                async move {
                    let mut conn = pool
                        .get()
                        .await
                        .map_err(|e| CoreError::Connection(e.to_string()))?;
                    let released: i64 = Script::new(scripts::RELEASE)
                        .key(&key)
                        .arg(&token)
                        .invoke_async(&mut conn)
                        .await
                        .map_err(|e| CoreError::Backend(e.to_string()))?;
                    Ok(released == 1)
                }
            })
            .await;
        results.iter().filter(|r| matches!(r, Ok(true))).count()
    }

    /// The portion of the lease still safely usable after `elapsed`:
    /// `auto_release_time - elapsed - drift - 2 ms`, floored at zero.
    fn validity_window(&self, elapsed: Duration) -> Duration {
        self.config
            .auto_release_time
            .saturating_sub(elapsed)
            .saturating_sub(self.drift_allowance())
            .saturating_sub(Duration::from_millis(2))
    }

    fn drift_allowance(&self) -> Duration {
        self.config
            .auto_release_time
            .mul_f64(self.config.clock_drift_factor)
    }

    fn lease_millis(&self) -> i64 {
        i64::try_from(self.config.auto_release_time.as_millis()).unwrap_or(i64::MAX)
    }
}

/// A held lock scoping a critical section.
///
/// Dropping the guard without calling [`release`](Self::release) is safe:
/// the lease expires on its own. Explicit release is preferred for prompt
/// handover.
#[derive(Debug)]
pub struct RedlockGuard<'a> {
    lock: &'a mut Redlock,
}

impl RedlockGuard<'_> {
    /// Remaining validity of the guarded acquisition.
    pub async fn locked(&self) -> Duration {
        self.lock.locked().await
    }

    /// Extend the guarded acquisition's lease.
    pub async fn extend(&mut self) -> Result<(), LockError> {
        self.lock.extend().await
    }

    /// Release the lock and end the critical section.
    pub async fn release(self) -> Result<(), LockError> {
        self.lock.release().await
    }
}

#[cfg(test)]
mod tests {
    use conclave_core::MasterConfig;

    use super::*;

    fn masters(n: usize) -> MasterSet {
        let configs: Vec<MasterConfig> = (0..n)
            .map(|i| MasterConfig::new(format!("redis://127.0.0.1:{}", 6379 + i)))
            .collect();
        MasterSet::new(&configs).expect("pool creation is lazy and should succeed")
    }

    #[test]
    fn even_master_counts_are_rejected() {
        let err = Redlock::new(masters(2), LockConfig::new("r")).expect_err("2 is even");
        assert!(matches!(err, LockError::EvenMasters(2)));
        assert!(Redlock::new(masters(1), LockConfig::new("r")).is_ok());
        assert!(Redlock::new(masters(5), LockConfig::new("r")).is_ok());
    }

    #[test]
    fn validity_window_subtracts_elapsed_and_drift() {
        let lock = Redlock::new(masters(1), LockConfig::new("r")).expect("valid config");
        // 10_000ms lease - 100ms drift - 2ms margin
        assert_eq!(
            lock.validity_window(Duration::ZERO),
            Duration::from_millis(9_898)
        );
        assert_eq!(
            lock.validity_window(Duration::from_secs(1)),
            Duration::from_millis(8_898)
        );
    }

    #[test]
    fn validity_window_saturates_at_zero() {
        let lock = Redlock::new(masters(1), LockConfig::new("r")).expect("valid config");
        assert_eq!(
            lock.validity_window(Duration::from_secs(11)),
            Duration::ZERO
        );
    }

    #[tokio::test]
    async fn release_without_acquire_is_an_error() {
        let mut lock = Redlock::new(masters(1), LockConfig::new("r")).expect("valid config");
        let err = lock.release().await.expect_err("nothing to release");
        assert!(matches!(err, LockError::ReleaseUnlocked));
    }

    #[tokio::test]
    async fn extend_without_acquire_is_an_error() {
        let mut lock = Redlock::new(masters(1), LockConfig::new("r")).expect("valid config");
        let err = lock.extend().await.expect_err("nothing to extend");
        assert!(matches!(err, LockError::ExtendUnlocked));
    }

    #[tokio::test]
    async fn locked_without_acquire_is_zero() {
        let lock = Redlock::new(masters(1), LockConfig::new("r")).expect("valid config");
        assert_eq!(lock.locked().await, Duration::ZERO);
    }
}
