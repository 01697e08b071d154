//! Scoped optimistic transactions.
//!
//! A scope watches one or more keys, reads their current values, stages an
//! atomic `MULTI`/`EXEC` pipeline, and commits. The commit succeeds only if
//! none of the watched keys changed in between; otherwise the whole scope is
//! retried from the top under a [`RetryStrategy`], and exhausting the retries
//! surfaces [`CoreError::Contention`].

use deadpool_redis::Connection;
use futures::future::BoxFuture;

use crate::error::CoreError;
use crate::retry::RetryStrategy;

/// Run an optimistic transaction scope on `conn`.
///
/// `body` is invoked with the keys in `watched` under `WATCH`. It reads
/// whatever state it needs, stages an atomic pipeline, and returns
/// `Ok(Some(value))` when `EXEC` committed or `Ok(None)` when `EXEC` reported
/// that a watched key changed (a `nil` reply). On `None` the scope backs off
/// and retries from the top.
///
/// # Errors
///
/// [`CoreError::Contention`] once `retry.max_retries` retries are exhausted;
/// any error from `body` is surfaced as-is after the watch is dropped.
pub async fn optimistic<T, F>(
    conn: &mut Connection,
    watched: &[String],
    retry: &RetryStrategy,
    mut body: F,
) -> Result<T, CoreError>
where
    F: for<'c> FnMut(&'c mut Connection) -> BoxFuture<'c, Result<Option<T>, CoreError>>,
{
    let mut attempt = 0u32;
    loop {
        let () = redis::cmd("WATCH")
            .arg(watched)
            .query_async(&mut *conn)
            .await
            .map_err(|e| CoreError::Backend(e.to_string()))?;

        match body(conn).await {
            Ok(Some(value)) => return Ok(value),
            Ok(None) => {
                // EXEC observed a concurrent write and aborted; the watch is
                // already cleared. Fall through to retry.
            }
            Err(e) => {
                let _: Result<(), _> = redis::cmd("UNWATCH").query_async(&mut *conn).await;
                return Err(e);
            }
        }

        if attempt >= retry.max_retries {
            return Err(CoreError::Contention { retries: attempt });
        }
        retry.sleep_for(attempt).await;
        attempt += 1;
    }
}
