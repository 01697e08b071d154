use std::time::Duration;

/// Configuration for a [`Redlock`](crate::Redlock) handle.
#[derive(Debug, Clone)]
pub struct LockConfig {
    /// Resource name; used verbatim as the Redis key on every master.
    pub key: String,

    /// Lease duration. Controls both the key TTL and the per-master attempt
    /// budget (`auto_release_time / N`).
    pub auto_release_time: Duration,

    /// Whether `acquire` retries while the lock is contended.
    pub blocking: bool,

    /// Maximum wall time `acquire` waits when blocking. `None` retries
    /// forever.
    pub timeout: Option<Duration>,

    /// Whether [`hold`](crate::Redlock::hold) retries while the lock is
    /// contended.
    pub context_manager_blocking: bool,

    /// Maximum wall time [`hold`](crate::Redlock::hold) waits when blocking.
    pub context_manager_timeout: Option<Duration>,

    /// Upper bound on how many times a single acquisition may be extended.
    pub num_extensions: u32,

    /// Fractional allowance for clock skew between masters, subtracted from
    /// the validity window as `clock_drift_factor * auto_release_time`.
    pub clock_drift_factor: f64,

    /// Upper bound of the randomized delay between acquisition attempts.
    pub retry_delay: Duration,
}

impl LockConfig {
    /// Create a configuration for the given resource name with defaults:
    /// 10 s lease, blocking acquire without timeout, 3 extensions, 1% clock
    /// drift allowance.
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            auto_release_time: Duration::from_millis(10_000),
            blocking: true,
            timeout: None,
            context_manager_blocking: true,
            context_manager_timeout: None,
            num_extensions: 3,
            clock_drift_factor: 0.01,
            retry_delay: Duration::from_millis(200),
        }
    }
}
