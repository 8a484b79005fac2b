use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::error::{ProviderError, RetrievalError};

/// Timeout and retry policy applied to every collaborator call a stage makes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallPolicy {
    /// Upper bound on a single attempt.
    pub timeout: Duration,
    /// Total attempts, including the first. Zero is treated as one.
    pub max_attempts: u32,
    /// Delay before the first retry; doubles on each subsequent retry.
    pub backoff: Duration,
}

/// Why a policy-governed call gave up.
#[derive(Debug)]
pub enum CallFailure<E> {
    /// The last attempt returned an error.
    Failed(E),
    /// The last attempt exceeded the timeout.
    TimedOut { timeout_ms: u64 },
}

impl CallPolicy {
    /// A policy with a single attempt and the given timeout.
    pub fn single(timeout: Duration) -> Self {
        Self {
            timeout,
            max_attempts: 1,
            backoff: Duration::ZERO,
        }
    }

    fn backoff_for(&self, attempt: u32) -> Duration {
        self.backoff
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
    }

    /// Run `op` under the policy, retrying failures and timeouts.
    pub async fn call<T, E, F, Fut>(&self, label: &str, mut op: F) -> Result<T, CallFailure<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            let failure = match tokio::time::timeout(self.timeout, op()).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e)) => CallFailure::Failed(e),
                Err(_) => CallFailure::TimedOut {
                    timeout_ms: self.timeout.as_millis() as u64,
                },
            };

            if attempt >= attempts {
                return Err(failure);
            }

            let delay = self.backoff_for(attempt);
            warn!(
                call = label,
                attempt,
                delay_ms = delay.as_millis(),
                error = %failure,
                "Collaborator call failed, retrying"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

impl<E: Display> Display for CallFailure<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CallFailure::Failed(e) => write!(f, "{}", e),
            CallFailure::TimedOut { timeout_ms } => write!(f, "timed out after {}ms", timeout_ms),
        }
    }
}

impl From<CallFailure<ProviderError>> for ProviderError {
    fn from(failure: CallFailure<ProviderError>) -> Self {
        match failure {
            CallFailure::Failed(e) => e,
            CallFailure::TimedOut { timeout_ms } => ProviderError::Timeout { timeout_ms },
        }
    }
}

impl From<CallFailure<RetrievalError>> for RetrievalError {
    fn from(failure: CallFailure<RetrievalError>) -> Self {
        match failure {
            CallFailure::Failed(e) => e,
            CallFailure::TimedOut { timeout_ms } => RetrievalError::Timeout { timeout_ms },
        }
    }
}
