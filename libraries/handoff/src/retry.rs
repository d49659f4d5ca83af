use std::time::Duration;

use crate::error::{Error, RemoteError};

/// Errors that can tell whether trying again might help.
pub trait Transient {
    fn is_transient(&self) -> bool;
}

const TRANSIENT_MESSAGES: &[&str] = &[
    "network",
    "failed to fetch",
    "timeout",
    "timed out",
    "connection refused",
    "connection reset",
    "econnrefused",
    "etimedout",
    "enotfound",
    "dns",
    "error sending request",
];

const TRANSIENT_CODES: &[&str] = &[
    "NETWORK_ERROR",
    "ETIMEDOUT",
    "ECONNREFUSED",
    "ECONNRESET",
    "ENOTFOUND",
];

impl Transient for RemoteError {
    fn is_transient(&self) -> bool {
        if let Some(code) = &self.code {
            if TRANSIENT_CODES.contains(&code.as_str()) {
                return true;
            }
        }
        let message = self.message.to_lowercase();
        TRANSIENT_MESSAGES.iter().any(|m| message.contains(m))
    }
}

impl Transient for Error {
    fn is_transient(&self) -> bool {
        match self {
            Error::Remote(e) => e.is_transient(),
            _ => false,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RetryPolicy {
    /// Retries after the first attempt; total attempts are `max_retries + 1`.
    pub max_retries: u32,
    /// Fixed pause before each retry.
    #[serde(with = "millis")]
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            delay: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, delay: Duration) -> Self {
        Self { max_retries, delay }
    }

    /// Runs `operation`, retrying transient failures.
    ///
    /// Non-transient errors are returned at once. When retries run out the last
    /// error is returned as-is.
    pub async fn run<T, E, F, Fut>(&self, mut operation: F) -> Result<T, E>
    where
        E: Transient + std::fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 0;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < self.max_retries && e.is_transient() => {
                    attempt += 1;
                    log::warn!(
                        "Transient failure ({e}), retrying in {}ms (attempt {attempt} of {})",
                        self.delay.as_millis(),
                        self.max_retries
                    );
                    tokio::time::sleep(self.delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Shorthand for [`RetryPolicy::run`] with an ad-hoc policy.
pub async fn retry<T, E, F, Fut>(operation: F, max_retries: u32, delay_ms: u64) -> Result<T, E>
where
    E: Transient + std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    RetryPolicy::new(max_retries, Duration::from_millis(delay_ms))
        .run(operation)
        .await
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(delay: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(delay.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn network_error(message: &str) -> RemoteError {
        RemoteError::new(message)
    }

    #[test]
    fn test_classification() {
        assert!(network_error("Network request failed").is_transient());
        assert!(network_error("Failed to fetch").is_transient());
        assert!(network_error("operation timed out").is_transient());
        assert!(RemoteError::new("Something").with_code("NETWORK_ERROR").is_transient());
        assert!(RemoteError::new("lookup").with_code("ENOTFOUND").is_transient());

        assert!(!network_error("Authentication failed").is_transient());
        assert!(!RemoteError::new("bad").with_code("VALIDATION_ERROR").is_transient());
        assert!(!Error::Auth.is_transient());
        assert!(Error::Remote(network_error("Network request failed")).is_transient());
    }

    #[tokio::test]
    async fn test_first_attempt_success() {
        let calls = Cell::new(0);
        let result: Result<&str, RemoteError> = retry(
            || {
                calls.set(calls.get() + 1);
                async { Ok("success") }
            },
            2,
            10,
        )
        .await;

        assert_eq!(result, Ok("success"));
        assert_eq!(calls.get(), 1);
    }

    #[tokio::test]
    async fn test_transient_then_success() {
        let calls = Cell::new(0);
        let result = retry(
            || {
                calls.set(calls.get() + 1);
                let attempt = calls.get();
                async move {
                    if attempt == 1 {
                        Err(network_error("Network timeout"))
                    } else {
                        Ok(42)
                    }
                }
            },
            2,
            10,
        )
        .await;

        assert_eq!(result, Ok(42));
        assert_eq!(calls.get(), 2);
    }

    #[tokio::test]
    async fn test_non_transient_short_circuits() {
        let calls = Cell::new(0);
        let result: Result<(), RemoteError> = retry(
            || {
                calls.set(calls.get() + 1);
                async { Err(RemoteError::new("invalid input").with_code("VALIDATION_ERROR")) }
            },
            2,
            10,
        )
        .await;

        assert_eq!(
            result,
            Err(RemoteError::new("invalid input").with_code("VALIDATION_ERROR"))
        );
        assert_eq!(calls.get(), 1);
    }

    #[tokio::test]
    async fn test_exhaustion_returns_last_error() {
        let calls = Cell::new(0);
        let result: Result<(), RemoteError> = retry(
            || {
                calls.set(calls.get() + 1);
                let attempt = calls.get();
                async move {
                    if attempt < 3 {
                        Err(network_error("Network request failed"))
                    } else {
                        Err(network_error("Final network error"))
                    }
                }
            },
            2,
            10,
        )
        .await;

        assert_eq!(calls.get(), 3);
        assert_eq!(result.unwrap_err().message, "Final network error");
    }

    #[tokio::test]
    async fn test_custom_retry_count() {
        let calls = Cell::new(0);
        let result: Result<(), RemoteError> = retry(
            || {
                calls.set(calls.get() + 1);
                async { Err(network_error("Network request failed")) }
            },
            1,
            10,
        )
        .await;

        assert!(result.is_err());
        assert_eq!(calls.get(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_the_fixed_delay_between_attempts() {
        let calls = Cell::new(0);
        let started = tokio::time::Instant::now();
        let policy = RetryPolicy::new(2, Duration::from_millis(2000));

        let result: Result<(), RemoteError> = policy
            .run(|| {
                calls.set(calls.get() + 1);
                async { Err(network_error("Network request failed")) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.get(), 3);
        assert_eq!(started.elapsed(), Duration::from_millis(4000));
    }

    #[test]
    fn test_policy_serializes_delay_as_millis() {
        let json = serde_json::to_value(RetryPolicy::default()).unwrap();
        assert_eq!(json, serde_json::json!({ "max_retries": 2, "delay": 1000 }));
    }
}
