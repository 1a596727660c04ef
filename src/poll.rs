use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

/// Minimum interval/timeout allowed, floored at 1ms.
const MIN_DURATION: Duration = Duration::from_millis(1);

#[derive(Debug, thiserror::Error)]
#[error("polling timed out after {0:?}")]
pub struct TimeoutError(pub Duration);

/// Invokes `probe` repeatedly spaced by `interval` until either `predicate`
/// accepts a result (returns the result and the elapsed time) or `timeout`
/// elapses (fails with a timeout error). Elapsed time is measured from the
/// first attempt.
///
/// Each attempt is itself bounded by `min(interval, time remaining until the
/// deadline)`, so a probe whose connection stalls without ever resolving
/// cannot hold the loop past its own timeout. Errors and timed-out attempts
/// are both treated as non-success and cause another attempt.
pub async fn poll<T, E, Probe, ProbeFut, Predicate>(
    mut probe: Probe,
    predicate: Predicate,
    interval: Duration,
    timeout: Duration,
) -> Result<(T, Duration), TimeoutError>
where
    Probe: FnMut() -> ProbeFut,
    ProbeFut: Future<Output = Result<T, E>>,
    Predicate: Fn(&T) -> bool,
{
    let interval = interval.max(MIN_DURATION);
    let timeout = timeout.max(MIN_DURATION);

    let start = Instant::now();
    let deadline = start + timeout;

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(TimeoutError(timeout));
        }

        let attempt_budget = interval.min(remaining).max(MIN_DURATION);
        if let Ok(Ok(result)) = tokio::time::timeout(attempt_budget, probe()).await {
            if predicate(&result) {
                return Ok((result, start.elapsed()));
            }
        }

        if Instant::now() >= deadline {
            return Err(TimeoutError(timeout));
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        tokio::time::sleep(interval.min(remaining.max(MIN_DURATION))).await;

        if Instant::now() >= deadline {
            return Err(TimeoutError(timeout));
        }
    }
}
