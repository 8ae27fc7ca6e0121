//! Bounded retry with a fixed pause between attempts.
//!
//! The loop is an explicit state machine:
//! `Attempting(n) -> Succeeded | Attempting(n + 1) | Failed`.
//! Waiting goes through [`Sleeper`] so tests can drive it without real time.

use async_trait::async_trait;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Sleeps on the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            delay: Duration::from_secs(10),
        }
    }
}

#[derive(Debug)]
enum AttemptState<T> {
    Attempting(u32),
    Succeeded { value: T, attempts: u32 },
    Failed { last_error: String, attempts: u32 },
}

/// Terminal state of a retry run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryOutcome<T> {
    Succeeded { value: T, attempts: u32 },
    Failed { last_error: String, attempts: u32 },
}

impl RetryPolicy {
    #[must_use]
    pub const fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }

    /// Runs `operation` until it succeeds or `max_attempts` is reached.
    ///
    /// Every error is retried the same way. `operation` receives the 1-based
    /// attempt number.
    pub async fn run<T, E, F, Fut>(&self, sleeper: &dyn Sleeper, mut operation: F) -> RetryOutcome<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut state = AttemptState::Attempting(1);

        loop {
            state = match state {
                AttemptState::Attempting(attempt) => match operation(attempt).await {
                    Ok(value) => AttemptState::Succeeded {
                        value,
                        attempts: attempt,
                    },
                    Err(e) => {
                        let last_error = e.to_string();
                        if attempt < max_attempts {
                            warn!(
                                attempt,
                                error = %last_error,
                                next_attempt_in_secs = self.delay.as_secs(),
                                "Attempt failed, retrying"
                            );
                            sleeper.sleep(self.delay).await;
                            AttemptState::Attempting(attempt + 1)
                        } else {
                            warn!(attempt, error = %last_error, "Final attempt failed");
                            AttemptState::Failed {
                                last_error,
                                attempts: attempt,
                            }
                        }
                    }
                },
                AttemptState::Succeeded { value, attempts } => {
                    return RetryOutcome::Succeeded { value, attempts };
                }
                AttemptState::Failed {
                    last_error,
                    attempts,
                } => {
                    return RetryOutcome::Failed {
                        last_error,
                        attempts,
                    };
                }
            };
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::RecordingSleeper;
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    async fn run_with_failures(failures: u32, policy: RetryPolicy) -> (RetryOutcome<u32>, u32, usize) {
        let sleeper = RecordingSleeper::default();
        let calls = AtomicU32::new(0);

        let outcome = policy
            .run(&sleeper, |attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt <= failures {
                        Err(format!("failure #{attempt}"))
                    } else {
                        Ok(attempt)
                    }
                }
            })
            .await;

        (outcome, calls.load(Ordering::SeqCst), sleeper.count())
    }

    #[tokio::test]
    async fn first_attempt_success_never_sleeps() {
        let (outcome, calls, sleeps) = run_with_failures(0, RetryPolicy::default()).await;
        assert_eq!(
            outcome,
            RetryOutcome::Succeeded {
                value: 1,
                attempts: 1
            }
        );
        assert_eq!(calls, 1);
        assert_eq!(sleeps, 0);
    }

    #[tokio::test]
    async fn recovers_after_transient_failures() {
        let (outcome, calls, sleeps) = run_with_failures(3, RetryPolicy::default()).await;
        assert_eq!(
            outcome,
            RetryOutcome::Succeeded {
                value: 4,
                attempts: 4
            }
        );
        assert_eq!(calls, 4);
        assert_eq!(sleeps, 3);
    }

    #[tokio::test]
    async fn exhausts_after_max_attempts_with_last_error() {
        for failures in [5, 6, 50] {
            let (outcome, calls, sleeps) = run_with_failures(failures, RetryPolicy::default()).await;
            assert_eq!(
                outcome,
                RetryOutcome::Failed {
                    last_error: "failure #5".to_string(),
                    attempts: 5
                }
            );
            assert_eq!(calls, 5);
            assert_eq!(sleeps, 4);
        }
    }

    #[tokio::test]
    async fn delay_is_fixed_between_attempts() {
        let sleeper = RecordingSleeper::default();
        let policy = RetryPolicy::new(3, Duration::from_secs(7));

        let _ = policy
            .run(&sleeper, |_| async { Err::<(), _>("nope") })
            .await;

        assert_eq!(
            *sleeper.sleeps.lock().unwrap(),
            vec![Duration::from_secs(7), Duration::from_secs(7)]
        );
    }

    #[tokio::test]
    async fn zero_attempts_still_tries_once() {
        let (outcome, calls, sleeps) = run_with_failures(10, RetryPolicy::new(0, Duration::ZERO)).await;
        assert!(matches!(outcome, RetryOutcome::Failed { attempts: 1, .. }));
        assert_eq!(calls, 1);
        assert_eq!(sleeps, 0);
    }
}
