//! Retry of optimistic-concurrency conflicts

use crate::error::RemediationError;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Backoff policy for conflicting updates
///
/// The defaults follow the Kubernetes client's default conflict retry:
/// five attempts, 10ms apart.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub steps: u32,
    pub backoff: Duration,
    /// Multiplier applied to the backoff after each attempt
    pub factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            steps: 5,
            backoff: Duration::from_millis(10),
            factor: 1.0,
        }
    }
}

/// Run `op` until it succeeds, fails with a non-conflict error, or the
/// policy is exhausted
///
/// `op` receives the 1-based attempt number. Returns the value together with
/// the number of attempts it took.
pub async fn retry_on_conflict<T, F, Fut>(
    policy: &RetryPolicy,
    deployment: &str,
    mut op: F,
) -> Result<(T, u32), RemediationError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, RemediationError>>,
{
    let steps = policy.steps.max(1);
    let mut backoff = policy.backoff;

    for attempt in 1..steps {
        match op(attempt).await {
            Ok(value) => return Ok((value, attempt)),
            Err(e) if e.is_conflict() => {
                debug!(attempt, backoff_ms = backoff.as_millis() as u64, "Update conflicted, retrying");
                tokio::time::sleep(backoff).await;
                backoff = next_backoff(backoff, policy.factor);
            }
            Err(e) => return Err(e),
        }
    }

    match op(steps).await {
        Ok(value) => Ok((value, steps)),
        Err(e) if e.is_conflict() => Err(RemediationError::RetryExhausted {
            deployment: deployment.to_string(),
            attempts: steps,
        }),
        Err(e) => Err(e),
    }
}

/// Grow `backoff` by `factor` (at least 1), saturating at `Duration::MAX`
fn next_backoff(backoff: Duration, factor: f64) -> Duration {
    Duration::try_from_secs_f64(backoff.as_secs_f64() * factor.max(1.0)).unwrap_or(Duration::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ClusterError;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn conflict() -> RemediationError {
        RemediationError::Update {
            deployment: "coredns".to_string(),
            source: ClusterError::Conflict("modified".to_string()),
        }
    }

    fn fast_policy(steps: u32) -> RetryPolicy {
        RetryPolicy {
            steps,
            backoff: Duration::from_millis(1),
            factor: 1.0,
        }
    }

    #[tokio::test]
    async fn test_first_success_takes_one_attempt() {
        let (value, attempts) = retry_on_conflict(&fast_policy(5), "coredns", |_| async {
            Ok::<_, RemediationError>(7)
        })
        .await
        .unwrap();

        assert_eq!(value, 7);
        assert_eq!(attempts, 1);
    }

    #[tokio::test]
    async fn test_retries_conflicts_until_success() {
        let calls = AtomicU32::new(0);

        let (_, attempts) = retry_on_conflict(&fast_policy(5), "coredns", |attempt| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 3 {
                    Err(conflict())
                } else {
                    Ok(())
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhaustion_reports_attempts() {
        let result = retry_on_conflict(&fast_policy(4), "coredns", |_| async {
            Err::<(), _>(conflict())
        })
        .await;

        assert!(matches!(
            result,
            Err(RemediationError::RetryExhausted { attempts: 4, .. })
        ));
    }

    #[tokio::test]
    async fn test_other_errors_are_not_retried() {
        let calls = AtomicU32::new(0);

        let result = retry_on_conflict(&fast_policy(5), "coredns", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err::<(), _>(RemediationError::ContainerMissing {
                    deployment: "coredns".to_string(),
                    index: 0,
                })
            }
        })
        .await;

        assert!(matches!(result, Err(RemediationError::ContainerMissing { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_backoff_growth_saturates() {
        let base = Duration::from_millis(10);

        assert_eq!(next_backoff(base, 1.0), base);
        assert_eq!(next_backoff(base, 2.0), Duration::from_millis(20));
        // Factors below 1 never shrink the backoff
        assert_eq!(next_backoff(base, 0.5), base);
        assert_eq!(next_backoff(Duration::from_secs(u64::MAX / 2), 1e300), Duration::MAX);
        assert_eq!(next_backoff(base, f64::INFINITY), Duration::MAX);
    }

    #[tokio::test]
    async fn test_single_step_policy_exhausts_on_first_conflict() {
        let result = retry_on_conflict(&fast_policy(1), "coredns", |_| async {
            Err::<(), _>(conflict())
        })
        .await;

        assert!(matches!(
            result,
            Err(RemediationError::RetryExhausted { attempts: 1, .. })
        ));
    }
}
