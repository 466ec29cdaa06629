//! Bounded retry for writes that hit SQLite lock contention

use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::config::WriteRetryConfig;
use crate::error::{EmberError, Result};

/// Why a single write attempt failed
#[derive(Debug)]
pub enum WriteFailure {
    /// Database error; retried when it signals contention
    Db(sqlx::Error),
    /// Deliberate abort (e.g. a stale batch); never retried
    Abort(EmberError),
}

impl From<sqlx::Error> for WriteFailure {
    fn from(e: sqlx::Error) -> Self {
        WriteFailure::Db(e)
    }
}

/// Whether an error means another writer held the lock
///
/// SQLITE_BUSY (5) and SQLITE_LOCKED (6), including their extended codes.
pub fn is_contention(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => {
            if let Some(code) = db.code().and_then(|c| c.parse::<i64>().ok()) {
                if matches!(code & 0xff, 5 | 6) {
                    return true;
                }
            }
            let msg = db.message().to_lowercase();
            msg.contains("locked") || msg.contains("busy")
        }
        sqlx::Error::PoolTimedOut => true,
        _ => false,
    }
}

/// Delay before retry number `attempt` (0-based), capped at `max_delay_ms`
pub fn compute_delay(policy: &WriteRetryConfig, attempt: u32) -> Duration {
    let base = policy.initial_delay_ms as f64 * policy.backoff_multiplier.powi(attempt as i32);
    let capped = base.min(policy.max_delay_ms as f64).max(0.0);
    Duration::from_millis(capped as u64)
}

/// Run `op` until it succeeds, fails for a reason other than contention,
/// or exhausts `policy.max_retries` retries
pub async fn with_write_retry<T, F, Fut>(
    policy: &WriteRetryConfig,
    operation: &str,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, WriteFailure>>,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(WriteFailure::Abort(e)) => return Err(e),
            Err(WriteFailure::Db(e)) if is_contention(&e) => {
                if attempt >= policy.max_retries {
                    return Err(EmberError::StoreWriteConflict {
                        attempts: attempt + 1,
                        message: format!("{operation}: {e}"),
                    });
                }
                let delay = compute_delay(policy, attempt);
                warn!(
                    operation,
                    attempt = attempt + 1,
                    max_retries = policy.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Database locked, retrying write"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(WriteFailure::Db(e)) => return Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_retries: u32) -> WriteRetryConfig {
        WriteRetryConfig {
            max_retries,
            initial_delay_ms: 1,
            max_delay_ms: 5,
            backoff_multiplier: 2.0,
        }
    }

    #[test]
    fn test_compute_delay_grows_and_caps() {
        let policy = WriteRetryConfig::default();
        assert_eq!(compute_delay(&policy, 0), Duration::from_millis(100));
        assert_eq!(compute_delay(&policy, 1), Duration::from_millis(200));
        assert_eq!(compute_delay(&policy, 3), Duration::from_millis(800));
        assert_eq!(compute_delay(&policy, 20), Duration::from_millis(10_000));
    }

    #[test]
    fn test_pool_timeout_counts_as_contention() {
        assert!(is_contention(&sqlx::Error::PoolTimedOut));
        assert!(!is_contention(&sqlx::Error::RowNotFound));
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let calls = AtomicU32::new(0);
        let result = with_write_retry(&fast_policy(5), "test", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(WriteFailure::Db(sqlx::Error::PoolTimedOut))
                } else {
                    Ok(n)
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(result, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhaustion_is_write_conflict() {
        let calls = AtomicU32::new(0);
        let err = with_write_retry(&fast_policy(2), "test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(WriteFailure::Db(sqlx::Error::PoolTimedOut)) }
        })
        .await
        .unwrap_err();

        assert!(matches!(err, EmberError::StoreWriteConflict { attempts: 3, .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_abort_is_not_retried() {
        let calls = AtomicU32::new(0);
        let err = with_write_retry(&fast_policy(5), "test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(WriteFailure::Abort(EmberError::StaleBatch("x".into()))) }
        })
        .await
        .unwrap_err();

        assert!(matches!(err, EmberError::StaleBatch(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_other_database_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let err = with_write_retry(&fast_policy(5), "test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(WriteFailure::Db(sqlx::Error::RowNotFound)) }
        })
        .await
        .unwrap_err();

        assert!(matches!(err, EmberError::Storage(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
