//! Retry state machine with exponential backoff.
//!
//! ```text
//! Attempting(n) ── ok ──────────────▶ Succeeded
//!      │ transient, n <= max_retries
//!      ▼
//! Retrying{n, delay} ── slept ──────▶ Attempting(n + 1)
//!      │ transient, n > max_retries   │ permanent
//!      ▼                              ▼
//!  Exhausted                       Aborted
//! ```

use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, warn};
use vsum_media::wait_for_cancel;

use super::provider::InvocationError;
use crate::config::PipelineConfig;
use crate::metrics;

// =============================================================================
// Configuration
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            max_retries: config.ai_max_retries,
            base_delay: config.ai_retry_base_delay,
            max_delay: config.ai_retry_max_delay,
        }
    }

    /// Backoff before attempt `failed_attempt + 1`: `base * 2^(failed_attempt - 1)`, capped.
    pub fn delay_after(&self, failed_attempt: u32) -> Duration {
        let exponent = failed_attempt.saturating_sub(1).min(20);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }
}

// =============================================================================
// State machine
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryState {
    Attempting(u32),
    Retrying { attempt: u32, delay: Duration },
    Succeeded { attempts: u32 },
    Exhausted { attempts: u32 },
    Aborted { attempts: u32 },
}

impl RetryState {
    pub fn start() -> Self {
        RetryState::Attempting(1)
    }

    pub fn on_success(self) -> Self {
        match self {
            RetryState::Attempting(n) => RetryState::Succeeded { attempts: n },
            other => other,
        }
    }

    pub fn on_failure(self, policy: &RetryPolicy, transient: bool) -> Self {
        match self {
            RetryState::Attempting(n) if !transient => RetryState::Aborted { attempts: n },
            RetryState::Attempting(n) if n > policy.max_retries => RetryState::Exhausted { attempts: n },
            RetryState::Attempting(n) => RetryState::Retrying {
                attempt: n,
                delay: policy.delay_after(n),
            },
            other => other,
        }
    }

    pub fn after_backoff(self) -> Self {
        match self {
            RetryState::Retrying { attempt, .. } => RetryState::Attempting(attempt + 1),
            other => other,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RetryState::Succeeded { .. } | RetryState::Exhausted { .. } | RetryState::Aborted { .. }
        )
    }

    /// Attempts started so far.
    pub fn attempts(&self) -> u32 {
        match *self {
            RetryState::Attempting(n) => n,
            RetryState::Retrying { attempt, .. } => attempt,
            RetryState::Succeeded { attempts }
            | RetryState::Exhausted { attempts }
            | RetryState::Aborted { attempts } => attempts,
        }
    }
}

// =============================================================================
// Driver
// =============================================================================

/// Run `op` until it succeeds, fails permanently or retries run out.
///
/// `op` receives the 1-based attempt number. Returns the value with the
/// number of attempts made. After exhaustion the returned error is the last
/// transient one, so `is_transient()` tells exhaustion from a permanent
/// failure. Backoff sleeps end early on cancellation.
pub async fn run_with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    cancel: Option<watch::Receiver<bool>>,
    mut op: F,
) -> Result<(T, u32), InvocationError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, InvocationError>>,
{
    let mut cancel_rx = cancel;
    let mut state = RetryState::start();
    let mut last_error = None;

    loop {
        match state {
            RetryState::Attempting(attempt) => match op(attempt).await {
                Ok(value) => {
                    state = state.on_success();
                    debug!(provider = %label, attempts = state.attempts(), "Invocation succeeded");
                    return Ok((value, state.attempts()));
                }
                Err(InvocationError::Cancelled) => return Err(InvocationError::Cancelled),
                Err(e) => {
                    state = state.on_failure(policy, e.is_transient());
                    last_error = Some(e);
                }
            },
            RetryState::Retrying { attempt, delay } => {
                warn!(
                    provider = %label,
                    attempt = attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Invocation failed, retrying: {}",
                    last_error.as_ref().map(|e| e.to_string()).unwrap_or_default()
                );
                metrics::record_ai_retry(label);

                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = wait_for_cancel(cancel_rx.as_mut()) => return Err(InvocationError::Cancelled),
                }
                state = state.after_backoff();
            }
            RetryState::Exhausted { attempts } | RetryState::Aborted { attempts } => {
                debug!(provider = %label, attempts = attempts, state = ?state, "Giving up");
                return Err(last_error
                    .unwrap_or_else(|| InvocationError::Permanent("no attempt was made".to_string())));
            }
            RetryState::Succeeded { .. } => {
                return Err(InvocationError::Permanent("retry loop ended without a value".to_string()));
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
        }
    }

    #[test]
    fn test_delay_doubles_and_caps() {
        let policy = RetryPolicy {
            max_retries: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
        };
        assert_eq!(policy.delay_after(1), Duration::from_millis(100));
        assert_eq!(policy.delay_after(2), Duration::from_millis(200));
        assert_eq!(policy.delay_after(3), Duration::from_millis(350));
        assert_eq!(policy.delay_after(40), Duration::from_millis(350));
    }

    #[test]
    fn test_state_transitions() {
        let policy = fast_policy(1);
        let state = RetryState::start().on_failure(&policy, true);
        assert!(matches!(state, RetryState::Retrying { attempt: 1, .. }));
        let state = state.after_backoff();
        assert_eq!(state, RetryState::Attempting(2));
        assert_eq!(state.on_failure(&policy, true), RetryState::Exhausted { attempts: 2 });
        assert_eq!(
            RetryState::start().on_failure(&policy, false),
            RetryState::Aborted { attempts: 1 }
        );
        assert!(RetryState::start().on_success().is_terminal());
    }

    #[tokio::test]
    async fn test_succeeds_on_third_attempt() {
        let calls = AtomicU32::new(0);
        let result = run_with_retry(&fast_policy(3), "test", None, |_| {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if n < 3 {
                    Err(InvocationError::Transient("429 Too Many Requests".into()))
                } else {
                    Ok("done")
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(result, ("done", 3));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhaustion_keeps_last_error() {
        let calls = AtomicU32::new(0);
        let err = run_with_retry::<(), _, _>(&fast_policy(2), "test", None, |attempt| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move { Err(InvocationError::Transient(format!("overloaded #{}", attempt))) }
        })
        .await
        .unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(err.is_transient());
        assert!(err.to_string().contains("#3"));
    }

    #[tokio::test]
    async fn test_permanent_failure_is_not_retried() {
        let calls = AtomicU32::new(0);
        let err = run_with_retry::<(), _, _>(&fast_policy(3), "test", None, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(InvocationError::Malformed("empty output".into())) }
        })
        .await
        .unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_cancel_interrupts_backoff() {
        let policy = RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_secs(3600),
            max_delay: Duration::from_secs(3600),
        };
        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();
        let err = run_with_retry::<(), _, _>(&policy, "test", Some(rx), |_| async {
            Err(InvocationError::Transient("503".into()))
        })
        .await
        .unwrap_err();
        assert!(matches!(err, InvocationError::Cancelled));
    }
}
