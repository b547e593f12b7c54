//! Retry policy for transient external failures.
//!
//! Exponential backoff with ±25% jitter, delay capped at `max_delay`.
//! Non-retryable errors are surfaced immediately.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay_secs: f64, max_delay_secs: f64) -> Self {
        Self {
            max_retries,
            base_delay: Duration::from_secs_f64(base_delay_secs),
            max_delay: Duration::from_secs_f64(max_delay_secs),
        }
    }

    /// Backoff delay for attempt `n` (0-based): base · 2ⁿ, capped, ±25% jitter.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self.base_delay.as_secs_f64() * 2f64.powi(attempt as i32);
        let capped = exp.min(self.max_delay.as_secs_f64());
        let jitter = capped * 0.25 * (2.0 * rand::thread_rng().gen::<f64>() - 1.0);
        Duration::from_secs_f64((capped + jitter).max(0.0))
    }

    /// Run `op` up to `max_retries` times, sleeping between attempts.
    ///
    /// `is_retryable` decides per-error whether another attempt is worthwhile
    /// (transport errors, 5xx, 429). The last error is returned when attempts
    /// are exhausted.
    pub async fn run<T, E, F, Fut, P>(&self, service: &str, is_retryable: P, mut op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
        E: std::fmt::Display,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(e) if is_retryable(&e) && attempt + 1 < self.max_retries => {
                    let delay = self.delay_for(attempt);
                    warn!(
                        service,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "transient failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn delay_grows_and_caps() {
        let p = RetryPolicy::new(10, 1.0, 10.0);
        // jitter is ±25%, so bound checks are loose
        let d0 = p.delay_for(0).as_secs_f64();
        assert!((0.75..=1.25).contains(&d0), "d0={d0}");
        let d3 = p.delay_for(3).as_secs_f64();
        assert!((6.0..=10.0).contains(&d3), "d3={d3}");
        let d8 = p.delay_for(8).as_secs_f64();
        assert!(d8 <= 12.5, "d8={d8}"); // cap 10s + 25% jitter
    }

    #[tokio::test]
    async fn retries_transient_then_succeeds() {
        let p = RetryPolicy::new(3, 0.001, 0.002);
        let calls = AtomicU32::new(0);
        let result: Result<u32, String> = p
            .run("test", |_| true, || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err("boom".to_string())
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_surfaces_immediately() {
        let p = RetryPolicy::new(5, 0.001, 0.002);
        let calls = AtomicU32::new(0);
        let result: Result<(), String> = p
            .run("test", |_| false, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("fatal".to_string()) }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausts_attempts() {
        let p = RetryPolicy::new(3, 0.001, 0.002);
        let calls = AtomicU32::new(0);
        let result: Result<(), String> = p
            .run("test", |_| true, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("still down".to_string()) }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
