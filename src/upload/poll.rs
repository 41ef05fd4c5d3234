//! Fixed-delay polling with an optional attempt cap and cancellation.

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

/// How often to poll and how many attempts to make.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PollPolicy {
    interval: Duration,
    max_attempts: Option<u32>,
}

impl PollPolicy {
    /// Policy with an explicit attempt cap (`None` polls until done).
    #[must_use]
    pub const fn new(interval: Duration, max_attempts: Option<u32>) -> Self {
        Self {
            interval,
            max_attempts,
        }
    }

    /// Policy built from a configured cap where `0` means unbounded.
    #[must_use]
    pub const fn from_config(interval: Duration, max_attempts: u32) -> Self {
        let cap = if max_attempts == 0 {
            None
        } else {
            Some(max_attempts)
        };
        Self::new(interval, cap)
    }

    /// Delay between attempts.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        self.interval
    }

    /// Attempt cap, if any.
    #[must_use]
    pub const fn max_attempts(&self) -> Option<u32> {
        self.max_attempts
    }
}

/// Result of one poll attempt.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Poll<T, S = ()> {
    /// The awaited condition holds.
    Ready(T),
    /// Not yet; carries the state for the next attempt.
    Pending(S),
}

/// Reasons a poll loop stops without a value.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum PollError<E> {
    /// The check itself failed.
    Failed(E),
    /// The attempt cap was reached.
    Exhausted {
        /// Attempts made.
        attempts: u32,
    },
    /// The cancellation token fired.
    Cancelled,
}

/// Runs `check` until it reports [`Poll::Ready`], sleeping `policy.interval()`
/// between attempts.
///
/// `initial` is handed to the first attempt and each [`Poll::Pending`] value
/// to the next one. Cancellation is observed before every attempt and while
/// sleeping.
///
/// # Errors
///
/// Returns [`PollError::Failed`] when `check` fails, [`PollError::Exhausted`]
/// when the attempt cap is reached, and [`PollError::Cancelled`] when `cancel`
/// fires.
pub async fn poll_until<T, S, E, F, Fut>(
    policy: PollPolicy,
    cancel: &CancellationToken,
    initial: S,
    mut check: F,
) -> Result<T, PollError<E>>
where
    F: FnMut(S) -> Fut,
    Fut: Future<Output = Result<Poll<T, S>, E>>,
{
    let mut pending = initial;
    let mut attempts: u32 = 0;
    loop {
        if cancel.is_cancelled() {
            return Err(PollError::Cancelled);
        }
        attempts = attempts.saturating_add(1);
        match check(pending).await.map_err(PollError::Failed)? {
            Poll::Ready(value) => return Ok(value),
            Poll::Pending(next) => pending = next,
        }
        if policy.max_attempts.is_some_and(|max| attempts >= max) {
            return Err(PollError::Exhausted { attempts });
        }
        tracing::debug!(attempt = attempts, "condition not met yet; sleeping");
        tokio::select! {
            () = cancel.cancelled() => return Err(PollError::Cancelled),
            () = sleep(policy.interval) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const FAST: Duration = Duration::from_millis(1);

    #[rstest]
    #[tokio::test]
    async fn returns_ready_value_after_pending_attempts() {
        let result: Result<u32, PollError<()>> =
            poll_until(PollPolicy::new(FAST, None), &CancellationToken::new(), 0, |seen| async move {
                if seen == 3 {
                    Ok(Poll::Ready(seen * 10))
                } else {
                    Ok(Poll::Pending(seen + 1))
                }
            })
            .await;
        assert_eq!(result, Ok(30));
    }

    #[rstest]
    #[tokio::test]
    async fn check_failure_stops_polling() {
        let result: Result<(), PollError<&str>> = poll_until(
            PollPolicy::new(FAST, None),
            &CancellationToken::new(),
            (),
            |()| async { Err("boom") },
        )
        .await;
        assert_eq!(result, Err(PollError::Failed("boom")));
    }

    #[rstest]
    #[tokio::test]
    async fn cap_limits_attempts() {
        let mut calls = 0_u32;
        let result: Result<(), PollError<()>> = poll_until(
            PollPolicy::from_config(FAST, 3),
            &CancellationToken::new(),
            (),
            |()| {
                calls += 1;
                async { Ok(Poll::Pending(())) }
            },
        )
        .await;
        assert_eq!(result, Err(PollError::Exhausted { attempts: 3 }));
        assert_eq!(calls, 3);
    }

    #[rstest]
    fn zero_cap_means_unbounded() {
        assert_eq!(PollPolicy::from_config(FAST, 0).max_attempts(), None);
    }

    #[rstest]
    #[tokio::test]
    async fn cancelled_token_stops_before_first_attempt() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result: Result<(), PollError<()>> =
            poll_until(PollPolicy::new(FAST, None), &cancel, (), |()| async {
                Ok(Poll::Ready(()))
            })
            .await;
        assert_eq!(result, Err(PollError::Cancelled));
    }

    #[rstest]
    #[tokio::test]
    async fn cancellation_interrupts_sleep() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let result: Result<(), PollError<()>> = poll_until(
            PollPolicy::new(Duration::from_secs(3600), None),
            &cancel,
            (),
            move |()| {
                trigger.cancel();
                async { Ok(Poll::Pending(())) }
            },
        )
        .await;
        assert_eq!(result, Err(PollError::Cancelled));
    }
}
