//! The promdelta retry mechanism
//!
//! This library supplies the retry policy used when pushing series to a remote
//! monitoring backend. Waiting is done through a [`Clock`] so that callers --
//! and tests -- control how time passes.

#![deny(clippy::all)]
#![deny(clippy::cargo)]
#![deny(clippy::pedantic)]
#![deny(clippy::print_stdout)]
#![deny(clippy::print_stderr)]
#![deny(clippy::dbg_macro)]
#![deny(clippy::unwrap_used)]
#![deny(unused_extern_crates)]
#![deny(unused_allocation)]
#![deny(unused_assignments)]
#![deny(unused_comparisons)]
#![deny(unreachable_pub)]
#![deny(missing_docs)]
#![deny(missing_copy_implementations)]
#![deny(missing_debug_implementations)]
#![allow(clippy::multiple_crate_versions)]

use std::{future::Future, num::NonZeroU32};

use async_trait::async_trait;
use tokio::time::{self, Duration};
use tracing::warn;

/// Errors produced by [`Policy`].
#[derive(thiserror::Error, Debug)]
#[error("gave up after {attempts} attempts: {last}")]
pub struct Exhausted<E> {
    /// The number of attempts made before giving up.
    pub attempts: u32,
    /// The error returned by the final attempt.
    pub last: E,
}

#[async_trait]
/// The `Clock` used for every retry policy
pub trait Clock {
    /// Wait for `duration` to pass
    async fn wait(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
/// A clock that operates with respect to real-clock time.
pub struct RealClock;

#[async_trait]
impl Clock for RealClock {
    async fn wait(&self, duration: Duration) {
        time::sleep(duration).await;
    }
}

/// How long to wait between two attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Retry immediately.
    None,
    /// Wait `step * attempt` after the `attempt`-th failure.
    Linear {
        /// The wait added per failed attempt.
        step: Duration,
    },
}

impl Backoff {
    /// The delay to apply after `attempt` failed attempts.
    #[must_use]
    pub fn delay(self, attempt: NonZeroU32) -> Duration {
        match self {
            Backoff::None => Duration::ZERO,
            Backoff::Linear { step } => step.saturating_mul(attempt.get()),
        }
    }
}

/// A retry policy: an attempt budget and a backoff function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Policy {
    max_attempts: NonZeroU32,
    backoff: Backoff,
}

impl Policy {
    /// Create a new `Policy`
    #[must_use]
    pub fn new(max_attempts: NonZeroU32, backoff: Backoff) -> Self {
        Self {
            max_attempts,
            backoff,
        }
    }

    /// Create a policy with linear backoff of `step` per failed attempt.
    #[must_use]
    pub fn linear(max_attempts: NonZeroU32, step: Duration) -> Self {
        Self::new(max_attempts, Backoff::Linear { step })
    }

    /// The total number of attempts this policy allows.
    #[must_use]
    pub fn max_attempts(&self) -> NonZeroU32 {
        self.max_attempts
    }

    /// Return how long to wait after `attempt` has failed, or `None` if the
    /// attempt budget is spent and the caller must give up.
    #[must_use]
    pub fn next_delay(&self, attempt: NonZeroU32) -> Option<Duration> {
        if attempt >= self.max_attempts {
            None
        } else {
            Some(self.backoff.delay(attempt))
        }
    }

    /// Run `operation` until it succeeds or the attempt budget is spent.
    ///
    /// The operation is passed the 1-based attempt number. Between failures
    /// the policy waits on `clock`.
    ///
    /// # Errors
    ///
    /// Returns [`Exhausted`] carrying the last error if no attempt succeeded.
    pub async fn run<C, F, Fut, T, E>(&self, clock: &C, mut operation: F) -> Result<T, Exhausted<E>>
    where
        C: Clock + Sync,
        F: FnMut(NonZeroU32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let mut attempt = NonZeroU32::MIN;
        loop {
            match operation(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    let Some(delay) = self.next_delay(attempt) else {
                        return Err(Exhausted {
                            attempts: attempt.get(),
                            last: err,
                        });
                    };
                    warn!("attempt {attempt} failed: {err}, trying again in {delay:?}");
                    clock.wait(delay).await;
                    attempt = attempt.saturating_add(1);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        num::NonZeroU32,
        sync::{
            Mutex,
            atomic::{AtomicU32, Ordering},
        },
    };

    use async_trait::async_trait;
    use proptest::prelude::*;
    use tokio::time::Duration;

    use super::{Backoff, Clock, Policy};

    #[derive(Debug, Default)]
    struct RecordingClock {
        waits: Mutex<Vec<Duration>>,
    }

    #[async_trait]
    impl Clock for RecordingClock {
        async fn wait(&self, duration: Duration) {
            self.waits.lock().expect("poisoned").push(duration);
        }
    }

    fn ten_attempts() -> Policy {
        Policy::linear(
            NonZeroU32::new(10).expect("non-zero"),
            Duration::from_secs(10),
        )
    }

    #[tokio::test]
    async fn succeeds_without_waiting() {
        let clock = RecordingClock::default();
        let res: Result<u32, _> = ten_attempts()
            .run(&clock, |_| async { Ok::<_, String>(7) })
            .await;

        assert_eq!(res.expect("should succeed"), 7);
        assert!(clock.waits.lock().expect("poisoned").is_empty());
    }

    #[tokio::test]
    async fn waits_linearly_between_failures() {
        let clock = RecordingClock::default();
        let calls = AtomicU32::new(0);
        let res = ten_attempts()
            .run(&clock, |attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt.get() < 3 {
                        Err("unavailable".to_string())
                    } else {
                        Ok(attempt.get())
                    }
                }
            })
            .await;

        assert_eq!(res.expect("third attempt succeeds"), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(
            *clock.waits.lock().expect("poisoned"),
            vec![Duration::from_secs(10), Duration::from_secs(20)]
        );
    }

    #[tokio::test]
    async fn gives_up_after_budget() {
        let clock = RecordingClock::default();
        let calls = AtomicU32::new(0);
        let res: Result<(), _> = ten_attempts()
            .run(&clock, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("unavailable".to_string()) }
            })
            .await;

        let err = res.expect_err("every attempt fails");
        assert_eq!(err.attempts, 10);
        assert_eq!(err.last, "unavailable");
        assert_eq!(calls.load(Ordering::SeqCst), 10);

        let waits = clock.waits.lock().expect("poisoned");
        assert_eq!(waits.len(), 9);
        assert_eq!(waits.last(), Some(&Duration::from_secs(90)));
    }

    #[test]
    fn no_backoff_is_zero() {
        let one = NonZeroU32::MIN;
        assert_eq!(Backoff::None.delay(one), Duration::ZERO);
    }

    proptest! {
        #[test]
        fn delays_stop_at_budget(max in 1_u32..64, step_ms in 0_u64..10_000) {
            let max_attempts = NonZeroU32::new(max).expect("non-zero");
            let step = Duration::from_millis(step_ms);
            let policy = Policy::linear(max_attempts, step);

            for attempt in 1..=max {
                let attempt = NonZeroU32::new(attempt).expect("non-zero");
                let delay = policy.next_delay(attempt);
                if attempt < max_attempts {
                    prop_assert_eq!(delay, Some(step * attempt.get()));
                } else {
                    prop_assert_eq!(delay, None);
                }
            }
        }
    }
}
