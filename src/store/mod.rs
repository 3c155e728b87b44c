//! Durable stores over the Postgres schema.
//!
//! Every pool-level operation takes a caller-supplied [`Deadline`]; expiry
//! aborts the in-flight query and surfaces [`StoreError::Timeout`].
//! Transient failures are retried once with a jittered backoff.
//! Transaction-scoped variants (used by the matcher's fill path) live as
//! associated functions on the stores and run inside the caller's
//! transaction.

mod account_store;
mod order_store;
mod trade_store;

pub use account_store::AccountStore;
pub use order_store::{GroupedLevel, OrderStore, OwnedOrderRef};
pub use trade_store::TradeStore;

use rand::Rng;
use std::future::Future;
use std::time::{Duration, Instant};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store operation timed out")]
    Timeout,

    #[error("rejected: {0}")]
    Rejected(&'static str),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Absolute cutoff for a store operation, supplied by the caller.
#[derive(Debug, Clone, Copy)]
pub struct Deadline(Instant);

impl Deadline {
    pub fn after(timeout: Duration) -> Self {
        Deadline(Instant::now() + timeout)
    }

    /// Time left before expiry, or `Timeout` if already past.
    pub fn remaining(&self) -> Result<Duration, StoreError> {
        self.0
            .checked_duration_since(Instant::now())
            .filter(|d| !d.is_zero())
            .ok_or(StoreError::Timeout)
    }
}

fn is_transient(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed
    )
}

/// Runs `op` under the deadline, retrying exactly once on a transient
/// failure with a 10-50ms jittered backoff.
pub(crate) async fn with_retry<T, F, Fut>(deadline: Deadline, op: F) -> Result<T, StoreError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, sqlx::Error>>,
{
    match tokio::time::timeout(deadline.remaining()?, op()).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) if is_transient(&err) => {
            let backoff = Duration::from_millis(rand::thread_rng().gen_range(10..=50));
            tracing::warn!(error = %err, backoff_ms = backoff.as_millis() as u64, "transient store failure, retrying once");
            tokio::time::sleep(backoff).await;
            match tokio::time::timeout(deadline.remaining()?, op()).await {
                Ok(result) => result.map_err(StoreError::Database),
                Err(_) => Err(StoreError::Timeout),
            }
        }
        Ok(Err(err)) => Err(StoreError::Database(err)),
        Err(_) => Err(StoreError::Timeout),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deadline_expires() {
        let d = Deadline::after(Duration::from_millis(0));
        assert!(matches!(d.remaining(), Err(StoreError::Timeout)));

        let d = Deadline::after(Duration::from_secs(60));
        assert!(d.remaining().unwrap() > Duration::from_secs(59));
    }
}
