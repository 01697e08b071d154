use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::{Connection, Pool};
use redis::AsyncCommands;
use serde_json::Value;

use conclave_core::{CoreError, encoding};

use crate::arguments::Arguments;
use crate::error::CacheError;

/// Hash field holding the cumulative hit counter.
const HITS_FIELD: &str = "__hits__";
/// Hash field holding the cumulative miss counter.
const MISSES_FIELD: &str = "__misses__";

/// The callable seam a [`CachedFunction`] wraps.
///
/// Implementations are required to be pure: the cache assumes that equal
/// arguments always produce an equal return value.
#[async_trait]
pub trait Callable: Send + Sync {
    /// Invoke the wrapped function with the given arguments.
    async fn invoke(&self, args: &Arguments) -> Result<Value, CacheError>;
}

/// Cumulative cache statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheInfo {
    pub hits: i64,
    pub misses: i64,
    /// Number of cached entries, excluding the counter fields.
    pub size: i64,
}

/// A function-result cache backed by a single Redis hash.
///
/// Field names are argument fingerprints; field values are canonical
/// encodings of return values.
pub struct CachedFunction {
    pool: Pool,
    key: String,
    timeout: Option<Duration>,
    func: Arc<dyn Callable>,
}

impl CachedFunction {
    /// Wrap `func`, caching its results in the hash at `key`.
    ///
    /// When `timeout` is set, the whole hash expires that long after the
    /// most recent write.
    pub fn new(
        pool: Pool,
        key: impl Into<String>,
        timeout: Option<Duration>,
        func: Arc<dyn Callable>,
    ) -> Self {
        Self {
            pool,
            key: key.into(),
            timeout,
            func,
        }
    }

    /// The Redis hash backing this cache.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Serve `args` from the cache, invoking the wrapped function on a miss.
    ///
    /// # Errors
    ///
    /// Unrepresentable arguments surface the encoding error before any I/O;
    /// failures of the wrapped function are propagated without writing.
    pub async fn call(&self, args: &Arguments) -> Result<Value, CacheError> {
        let field = args.fingerprint()?;
        let mut conn = self.conn().await?;

        let cached: Option<String> = conn
            .hget(&self.key, &field)
            .await
            .map_err(|e| CoreError::Backend(e.to_string()))?;
        if let Some(raw) = cached {
            let value = encoding::decode(&raw)?;
            let _: i64 = conn
                .hincr(&self.key, HITS_FIELD, 1)
                .await
                .map_err(|e| CoreError::Backend(e.to_string()))?;
            return Ok(value);
        }

        let value = self.func.invoke(args).await?;
        let encoded = encoding::encode(&value)?;
        redis::pipe()
            .hset(&self.key, &field, encoded)
            .ignore()
            .hincr(&self.key, MISSES_FIELD, 1)
            .ignore()
            .exec_async(&mut conn)
            .await
            .map_err(|e| CoreError::Backend(e.to_string()))?;
        self.refresh_ttl(&mut conn).await?;

        Ok(value)
    }

    /// Invoke the wrapped function unconditionally and refresh the cached
    /// entry. The hit/miss counters are not touched.
    pub async fn bypass(&self, args: &Arguments) -> Result<Value, CacheError> {
        let field = args.fingerprint()?;
        let value = self.func.invoke(args).await?;
        let encoded = encoding::encode(&value)?;

        let mut conn = self.conn().await?;
        let _: i64 = conn
            .hset(&self.key, &field, encoded)
            .await
            .map_err(|e| CoreError::Backend(e.to_string()))?;
        self.refresh_ttl(&mut conn).await?;

        Ok(value)
    }

    /// Cumulative hits and misses, and the number of cached entries.
    pub async fn info(&self) -> Result<CacheInfo, CacheError> {
        let mut conn = self.conn().await?;
        let (hits, misses, len): (Option<i64>, Option<i64>, i64) = redis::pipe()
            .hget(&self.key, HITS_FIELD)
            .hget(&self.key, MISSES_FIELD)
            .hlen(&self.key)
            .query_async(&mut conn)
            .await
            .map_err(|e| CoreError::Backend(e.to_string()))?;

        let counter_fields = i64::from(hits.is_some()) + i64::from(misses.is_some());
        Ok(CacheInfo {
            hits: hits.unwrap_or(0),
            misses: misses.unwrap_or(0),
            size: len - counter_fields,
        })
    }

    /// Drop every cached entry, counters included.
    pub async fn clear(&self) -> Result<(), CacheError> {
        let mut conn = self.conn().await?;
        let _: i64 = conn
            .del(&self.key)
            .await
            .map_err(|e| CoreError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn conn(&self) -> Result<Connection, CacheError> {
        self.pool
            .get()
            .await
            .map_err(|e| CacheError::Core(CoreError::Connection(e.to_string())))
    }

    async fn refresh_ttl(&self, conn: &mut Connection) -> Result<(), CacheError> {
        if let Some(timeout) = self.timeout {
            let ms = i64::try_from(timeout.as_millis()).unwrap_or(i64::MAX);
            let _: bool = conn
                .pexpire(&self.key, ms)
                .await
                .map_err(|e| CoreError::Backend(e.to_string()))?;
        }
        Ok(())
    }
}

#[cfg(all(test, feature = "integration"))]
mod integration_tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use conclave_core::MasterConfig;

    use super::*;

    /// Identity on the first positional argument, counting invocations.
    struct Identity {
        invocations: AtomicU32,
    }

    impl Identity {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                invocations: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl Callable for Identity {
        async fn invoke(&self, args: &Arguments) -> Result<Value, CacheError> {
            self.invocations.fetch_add(1, Ordering::SeqCst);
            Ok(args.positional()[0].clone())
        }
    }

    fn test_pool() -> Pool {
        let url =
            std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
        MasterConfig::new(url).build_pool().expect("pool should build")
    }

    fn test_key(name: &str) -> String {
        format!("conclave-test:cache:{}:{}", name, uuid::Uuid::new_v4())
    }

    fn int_args(n: i64) -> Arguments {
        Arguments::new().arg(&n).expect("plain int")
    }

    #[tokio::test]
    async fn hit_and_miss_accounting() {
        let func = Identity::new();
        let cache = CachedFunction::new(test_pool(), test_key("accounting"), None, func.clone());

        assert_eq!(cache.call(&int_args(5)).await.expect("miss"), Value::from(5));
        let info = cache.info().await.expect("info");
        assert_eq!((info.hits, info.misses, info.size), (0, 1, 1));

        assert_eq!(cache.call(&int_args(5)).await.expect("hit"), Value::from(5));
        let info = cache.info().await.expect("info");
        assert_eq!((info.hits, info.misses, info.size), (1, 1, 1));

        assert_eq!(cache.call(&int_args(6)).await.expect("miss"), Value::from(6));
        let info = cache.info().await.expect("info");
        assert_eq!((info.hits, info.misses, info.size), (1, 2, 2));

        // The hit was served from Redis, not recomputed.
        assert_eq!(func.invocations.load(Ordering::SeqCst), 2);

        cache.clear().await.expect("clear");
        let info = cache.info().await.expect("info");
        assert_eq!((info.hits, info.misses, info.size), (0, 0, 0));
    }

    #[tokio::test]
    async fn bypass_recomputes_without_counting() {
        let func = Identity::new();
        let cache = CachedFunction::new(test_pool(), test_key("bypass"), None, func.clone());

        cache.call(&int_args(1)).await.expect("miss");
        cache.bypass(&int_args(1)).await.expect("bypass");

        assert_eq!(func.invocations.load(Ordering::SeqCst), 2);
        let info = cache.info().await.expect("info");
        assert_eq!((info.hits, info.misses, info.size), (0, 1, 1));

        cache.clear().await.expect("cleanup");
    }

    #[tokio::test]
    async fn timeout_sets_a_hash_ttl() {
        let cache = CachedFunction::new(
            test_pool(),
            test_key("ttl"),
            Some(Duration::from_secs(30)),
            Identity::new(),
        );

        cache.call(&int_args(9)).await.expect("miss");

        let mut conn = cache.pool.get().await.expect("redis should be reachable");
        let ttl: i64 = redis::cmd("PTTL")
            .arg(cache.key())
            .query_async(&mut conn)
            .await
            .expect("PTTL");
        assert!(ttl > 0, "hash should carry a TTL, got {ttl}");

        cache.clear().await.expect("cleanup");
    }
}
