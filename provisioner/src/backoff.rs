// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Retrying idempotent, read-only lookups with exponential backoff.
//!
//! Only lookups go through here. Create calls carry no idempotency key and
//! are never retried.

use crate::Error;
use serde::Deserialize;
use serde::Serialize;
use slog::warn;
use slog::Logger;
use slog_error_chain::InlineErrorChain;
use std::future::Future;
use std::time::Duration;

pub use ::backoff::future::retry_notify;
pub use ::backoff::Error as BackoffError;
pub use ::backoff::ExponentialBackoff;

/// `[lookup_retry]` configuration.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct LookupRetryConfig {
    pub initial_interval_ms: u64,
    pub max_interval_ms: u64,
    /// Give up retrying once this much time has passed since the first
    /// attempt.
    pub max_elapsed_secs: u64,
}

impl Default for LookupRetryConfig {
    fn default() -> Self {
        LookupRetryConfig {
            initial_interval_ms: 250,
            max_interval_ms: 5000,
            max_elapsed_secs: 30,
        }
    }
}

impl LookupRetryConfig {
    /// Return a backoff policy for read-only lookups against a cloud API.
    pub fn policy(&self) -> ExponentialBackoff {
        let initial_interval = Duration::from_millis(self.initial_interval_ms);
        ::backoff::ExponentialBackoff {
            current_interval: initial_interval,
            initial_interval,
            multiplier: 2.0,
            max_interval: Duration::from_millis(self.max_interval_ms),
            max_elapsed_time: Some(Duration::from_secs(self.max_elapsed_secs)),
            ..::backoff::ExponentialBackoff::default()
        }
    }
}

/// Runs `lookup` until it succeeds, fails with a non-retryable error, or the
/// policy gives up, in which case the last error is returned.
pub async fn retry_lookup<T, F, Fut>(
    log: &Logger,
    config: &LookupRetryConfig,
    operation: &str,
    mut lookup: F,
) -> Result<T, Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, Error>>,
{
    let attempt = || {
        let fut = lookup();
        async move {
            fut.await.map_err(|error| {
                if error.retryable() {
                    BackoffError::transient(error)
                } else {
                    BackoffError::permanent(error)
                }
            })
        }
    };
    let log_failure = |error: Error, delay: Duration| {
        warn!(
            log,
            "transient failure during lookup, will retry";
            "operation" => operation,
            "retry_after" => ?delay,
            InlineErrorChain::new(&error),
        );
    };
    retry_notify(config.policy(), attempt, log_failure).await
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;

    fn fast_config() -> LookupRetryConfig {
        LookupRetryConfig {
            initial_interval_ms: 1,
            max_interval_ms: 2,
            max_elapsed_secs: 5,
        }
    }

    fn test_logger() -> Logger {
        Logger::root(slog::Discard, slog::o!())
    }

    #[tokio::test]
    async fn test_transient_errors_are_retried() {
        let calls = AtomicUsize::new(0);
        let result = retry_lookup(&test_logger(), &fast_config(), "list", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(Error::unavailable("list", "throttled"))
                } else {
                    Ok(n)
                }
            }
        })
        .await;
        assert_eq!(result, Ok(2));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_errors_are_not_retried() {
        let calls = AtomicUsize::new(0);
        let result: Result<(), Error> =
            retry_lookup(&test_logger(), &fast_config(), "list", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(Error::rejected("list", "forbidden")) }
            })
            .await;
        assert!(matches!(result, Err(Error::RemoteRejected { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_policy_from_config() {
        let policy = LookupRetryConfig::default().policy();
        assert_eq!(policy.initial_interval, Duration::from_millis(250));
        assert_eq!(policy.max_interval, Duration::from_secs(5));
        assert_eq!(policy.max_elapsed_time, Some(Duration::from_secs(30)));
    }
}
