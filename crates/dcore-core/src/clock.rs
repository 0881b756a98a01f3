//! Monotonic deadlines and cancellable sleeps.

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Returned when a wait is interrupted by its cancellation token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("operation cancelled")]
pub struct Cancelled;

/// Deadline `after` from now, saturating far into the future on overflow.
#[must_use]
pub fn deadline_after(after: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(after)
        .unwrap_or_else(|| now.checked_add(Duration::from_secs(86_400 * 365)).unwrap_or(now))
}

/// Time left until `deadline`, zero once it has passed.
#[must_use]
pub fn remaining_until(deadline: Instant) -> Duration {
    deadline.saturating_duration_since(Instant::now())
}

/// Sleep until `deadline` or until `cancel` fires, whichever is first.
///
/// # Errors
///
/// Returns [`Cancelled`] if the token was cancelled before the deadline.
pub async fn sleep_until_or_cancel(
    deadline: Instant,
    cancel: &CancellationToken,
) -> Result<(), Cancelled> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(Cancelled),
        () = tokio::time::sleep_until(deadline) => Ok(()),
    }
}

/// Sleep for `duration` or until `cancel` fires.
///
/// # Errors
///
/// Returns [`Cancelled`] if the token was cancelled first.
pub async fn sleep_or_cancel(duration: Duration, cancel: &CancellationToken) -> Result<(), Cancelled> {
    sleep_until_or_cancel(deadline_after(duration), cancel).await
}

/// Parse a fractional-seconds value such as `"1.337"` into a duration,
/// rounded up to the next whole millisecond.
///
/// Negative, non-finite, or unparsable input yields `None`.
#[must_use]
pub fn parse_seconds(raw: &str) -> Option<Duration> {
    let secs: f64 = raw.trim().parse().ok()?;
    seconds_to_duration(secs)
}

/// Convert fractional seconds to a duration rounded up to whole milliseconds.
#[must_use]
pub fn seconds_to_duration(secs: f64) -> Option<Duration> {
    if !secs.is_finite() || secs < 0.0 {
        return None;
    }
    let millis = (secs * 1000.0).ceil();
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    let millis = if millis >= u64::MAX as f64 {
        u64::MAX
    } else {
        millis as u64
    };
    Some(Duration::from_millis(millis))
}

/// A random fraction of `interval`, used to spread first heartbeats.
#[must_use]
pub fn jittered(interval: Duration) -> Duration {
    interval.mul_f64(fastrand::f64())
}

/// A uniformly random duration in `[min, max]`.
#[must_use]
pub fn random_between(min: Duration, max: Duration) -> Duration {
    if max <= min {
        return min;
    }
    let lo = u64::try_from(min.as_millis()).unwrap_or(u64::MAX);
    let hi = u64::try_from(max.as_millis()).unwrap_or(u64::MAX);
    Duration::from_millis(fastrand::u64(lo..=hi))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_seconds_rounds_up_to_millis() {
        assert_eq!(parse_seconds("1.337"), Some(Duration::from_millis(1337)));
        assert_eq!(parse_seconds("0.0001"), Some(Duration::from_millis(1)));
        assert_eq!(parse_seconds(" 2 "), Some(Duration::from_secs(2)));
        assert_eq!(parse_seconds("0"), Some(Duration::ZERO));
    }

    #[test]
    fn parse_seconds_rejects_garbage() {
        assert_eq!(parse_seconds("-1"), None);
        assert_eq!(parse_seconds("NaN"), None);
        assert_eq!(parse_seconds("inf"), None);
        assert_eq!(parse_seconds("soon"), None);
        assert_eq!(parse_seconds(""), None);
    }

    #[test]
    fn random_between_stays_in_range() {
        let min = Duration::from_secs(1);
        let max = Duration::from_secs(5);
        for _ in 0..100 {
            let d = random_between(min, max);
            assert!(d >= min && d <= max);
        }
        assert_eq!(random_between(max, min), max);
    }

    #[test]
    fn jittered_never_exceeds_interval() {
        let interval = Duration::from_millis(41_250);
        for _ in 0..100 {
            assert!(jittered(interval) <= interval);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn sleep_completes_at_deadline() {
        let cancel = CancellationToken::new();
        let start = Instant::now();
        sleep_or_cancel(Duration::from_secs(3), &cancel).await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn sleep_returns_early_on_cancel() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = sleep_or_cancel(Duration::from_secs(3600), &cancel).await;
        assert_eq!(result, Err(Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn remaining_until_saturates_at_zero() {
        let deadline = deadline_after(Duration::from_millis(10));
        tokio::time::advance(Duration::from_millis(50)).await;
        assert_eq!(remaining_until(deadline), Duration::ZERO);
    }
}
