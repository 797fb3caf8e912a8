//! Bounded polling against eventually-consistent cluster state.

use std::future::Future;
use std::time::Duration;

use tracing::debug;

/// What a single poll attempt observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollStep<T> {
    /// The value is available; stop polling.
    Ready(T),
    /// Not there yet; poll again if the budget allows.
    Pending(Option<T>),
    /// The target is not expected to become ready; stop polling.
    Abandon(Option<T>),
}

/// Result of a polling run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollOutcome<T> {
    /// The last non-empty value seen.
    pub value: Option<T>,
    /// Number of attempts made (always at least one).
    pub attempts: u32,
}

/// Polls `step` up to `budget` times, sleeping `delay` before every attempt
/// after the first.
///
/// A budget of zero still makes one attempt. Attempts run strictly one after
/// another; nothing is spawned.
pub async fn poll<T, F, Fut>(budget: u32, delay: Duration, mut step: F) -> PollOutcome<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = PollStep<T>>,
{
    let budget = budget.max(1);
    let mut value = None;
    let mut attempts = 0;

    for attempt in 0..budget {
        if attempt > 0 {
            tokio::time::sleep(delay).await;
        }
        attempts += 1;

        match step(attempt).await {
            PollStep::Ready(found) => {
                value = Some(found);
                break;
            }
            PollStep::Pending(seen) => {
                if seen.is_some() {
                    value = seen;
                }
            }
            PollStep::Abandon(seen) => {
                if seen.is_some() {
                    value = seen;
                }
                debug!(attempt, "polling abandoned");
                break;
            }
        }
    }

    PollOutcome { value, attempts }
}
