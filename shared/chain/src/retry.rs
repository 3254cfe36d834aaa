use std::future::Future;
use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use tracing::warn;

use crate::ChainError;

const DEFAULT_MAX_TIMES: usize = 3;
const DEFAULT_INITIAL_BACKOFF_MS: u64 = 200;
const DEFAULT_MAX_BACKOFF_MS: u64 = 5000; // 5 seconds
const DEFAULT_BACKOFF_FACTOR: f32 = 1.5;

// JSON-RPC "limit exceeded", returned by most hosted nodes when throttling.
const RPC_LIMIT_EXCEEDED: i64 = -32005;

#[derive(Debug)]
pub enum RetryError<E> {
    Retryable(E),
    NonRetryable(E),
}

impl<E> RetryError<E> {
    pub fn into_inner(self) -> E {
        match self {
            RetryError::Retryable(e) | RetryError::NonRetryable(e) => e,
        }
    }
}

impl<E: std::fmt::Display> std::fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            RetryError::Retryable(e) => write!(f, "{}", e),
            RetryError::NonRetryable(e) => write!(f, "{}", e),
        }
    }
}

impl From<ChainError> for RetryError<ChainError> {
    fn from(e: ChainError) -> Self {
        match e {
            ChainError::Transport(_) => RetryError::Retryable(e),
            ChainError::Rpc { code, ref message } => {
                if let -32602..=-32600 = code {
                    // Invalid requests/params
                    return RetryError::NonRetryable(e);
                }
                if code == RPC_LIMIT_EXCEEDED
                    || message.contains("timeout")
                    || message.contains("header not found")
                {
                    RetryError::Retryable(e)
                } else {
                    RetryError::NonRetryable(e)
                }
            }
            ChainError::Unavailable(_) | ChainError::Rejected(_) | ChainError::Malformed(_) => {
                RetryError::NonRetryable(e)
            }
        }
    }
}

/// Backoff for idempotent chain reads. Transaction sends are never retried.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub min_delay: Duration,
    pub max_delay: Duration,
    pub factor: f32,
    pub max_times: usize,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            min_delay: Duration::from_millis(DEFAULT_INITIAL_BACKOFF_MS),
            max_delay: Duration::from_millis(DEFAULT_MAX_BACKOFF_MS),
            factor: DEFAULT_BACKOFF_FACTOR,
            max_times: DEFAULT_MAX_TIMES,
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_times: 0,
            ..Default::default()
        }
    }
}

pub async fn retry_function<FutureFn, Fut, T, E>(
    log_str: &str,
    policy: RetryPolicy,
    function: FutureFn,
) -> Result<T, RetryError<E>>
where
    Fut: Future<Output = Result<T, RetryError<E>>>,
    FutureFn: FnMut() -> Fut,
{
    let backoff = ExponentialBuilder::default()
        .with_min_delay(policy.min_delay)
        .with_max_times(policy.max_times)
        .with_factor(policy.factor)
        .with_max_delay(policy.max_delay);

    function
        .retry(backoff)
        .sleep(tokio::time::sleep)
        .when(|e| matches!(e, RetryError::Retryable(_)))
        .notify(|_err: &RetryError<E>, dur: Duration| {
            warn!("[RETRY] {} retrying after {:?}", log_str, dur);
        })
        .await
}
