use std::time::Duration;

use sia_core::SiaClient;

/// Bounded retry schedule for periodic cycles: a short pause before the
/// first retry, a longer fixed pause before every later one.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub first_delay: Duration,
    pub later_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            first_delay: Duration::from_millis(500),
            later_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    pub fn delay_before_retry(&self, retry: u32) -> Duration {
        if retry == 0 {
            self.first_delay
        } else {
            self.later_delay
        }
    }

    #[cfg(test)]
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            first_delay: Duration::ZERO,
            later_delay: Duration::ZERO,
        }
    }
}

/// Decides whether a failed unit of work is worth re-invoking. This is the
/// seam for bringing the daemon back before the next attempt.
pub trait Recovery<E> {
    fn recover(&self, retry: u32, error: &E) -> impl Future<Output = bool> + Send;
}

/// Recovery that waits out the scheduled delay and then probes the daemon's
/// version endpoint; retrying is pointless while the daemon is unreachable.
pub struct DaemonProbeRecovery {
    client: SiaClient,
    policy: RetryPolicy,
}

impl DaemonProbeRecovery {
    pub fn new(client: SiaClient, policy: RetryPolicy) -> Self {
        Self { client, policy }
    }
}

impl<E: std::fmt::Display + Sync> Recovery<E> for DaemonProbeRecovery {
    async fn recover(&self, retry: u32, error: &E) -> bool {
        eprintln!("[siasyncd] cycle failed (retry {retry}): {error}");
        tokio::time::sleep(self.policy.delay_before_retry(retry)).await;
        self.client.daemon_version().await.is_ok()
    }
}

/// Recovery that always permits another attempt after the scheduled delay.
pub struct AlwaysRetry(pub RetryPolicy);

impl<E: Sync> Recovery<E> for AlwaysRetry {
    async fn recover(&self, retry: u32, _error: &E) -> bool {
        tokio::time::sleep(self.0.delay_before_retry(retry)).await;
        true
    }
}

/// Runs `work`; on failure consults `recovery` and re-invokes up to
/// `policy.max_retries` times. A unit of work that always fails is invoked
/// exactly `max_retries + 1` times before its last error surfaces.
pub async fn run_with_recovery<T, E, W, Fut, R>(
    policy: RetryPolicy,
    recovery: &R,
    mut work: W,
) -> Result<T, E>
where
    W: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    R: Recovery<E>,
{
    let mut retry = 0u32;
    loop {
        match work().await {
            Ok(value) => return Ok(value),
            Err(error) => {
                if retry >= policy.max_retries || !recovery.recover(retry, &error).await {
                    return Err(error);
                }
                retry += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Never;

    impl<E: Sync> Recovery<E> for Never {
        async fn recover(&self, _retry: u32, _error: &E) -> bool {
            false
        }
    }

    #[tokio::test]
    async fn success_returns_without_recovery() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, &str> =
            run_with_recovery(RetryPolicy::immediate(3), &AlwaysRetry(RetryPolicy::immediate(3)), || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(7) }
            })
            .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn always_failing_work_runs_max_retries_plus_one_times() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::immediate(3);
        let result: Result<(), &str> = run_with_recovery(policy, &AlwaysRetry(policy), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err("down") }
        })
        .await;

        assert_eq!(result.unwrap_err(), "down");
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn declined_recovery_stops_after_first_attempt() {
        let calls = AtomicU32::new(0);
        let result: Result<(), &str> = run_with_recovery(RetryPolicy::immediate(5), &Never, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err("down") }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn recovery_can_rescue_a_flaky_unit() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::immediate(2);
        let result: Result<u32, &str> = run_with_recovery(policy, &AlwaysRetry(policy), || {
            let attempt = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 2 {
                    Err("flaky")
                } else {
                    Ok(attempt)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn delay_schedule_is_short_then_long() {
        let policy = RetryPolicy {
            max_retries: 3,
            first_delay: Duration::from_millis(100),
            later_delay: Duration::from_secs(9),
        };
        assert_eq!(policy.delay_before_retry(0), Duration::from_millis(100));
        assert_eq!(policy.delay_before_retry(1), Duration::from_secs(9));
        assert_eq!(policy.delay_before_retry(2), Duration::from_secs(9));
    }
}
