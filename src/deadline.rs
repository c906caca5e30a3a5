//! Wait budgets and the per-call deadline/cancellation signal.

use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Stand-in deadline for budgets too large to add to the current instant.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// A configured (default, max) pair for one kind of poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitPolicy {
    pub default: Duration,
    pub max: Duration,
}

impl WaitPolicy {
    pub fn from_secs(default: u64, max: u64) -> Self {
        WaitPolicy {
            default: Duration::from_secs(default),
            max: Duration::from_secs(max),
        }
    }

    /// Turn a caller-requested wait into an effective one.
    ///
    /// `None` takes the default, anything else is clamped to `[0, max]`.
    /// Negative and NaN requests mean "don't wait".
    pub fn resolve(&self, requested: Option<f64>) -> Duration {
        match requested {
            None => self.default.min(self.max),
            Some(secs) if secs.is_nan() || secs <= 0.0 => Duration::ZERO,
            Some(secs) => Duration::try_from_secs_f64(secs)
                .unwrap_or(self.max)
                .min(self.max),
        }
    }
}

/// Why a wait ended without data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiry {
    Deadline,
    Cancelled,
}

/// One poll call's deadline plus its cancellation signal.
///
/// The signal is a child of the caller's token: cancelling the caller (say,
/// because the connection dropped) ends the wait without touching siblings.
#[derive(Debug)]
pub struct WaitScope {
    budget: Duration,
    deadline: Instant,
    cancel: CancellationToken,
}

impl WaitScope {
    /// `budget` is the already-clamped wait, `hard_limit` caps it regardless
    /// of which policy produced it.
    pub fn new(budget: Duration, hard_limit: Duration, parent: &CancellationToken) -> Self {
        let budget = budget.min(hard_limit);
        let now = Instant::now();
        let deadline = now
            .checked_add(budget)
            .or_else(|| now.checked_add(FAR_FUTURE))
            .unwrap_or(now);
        WaitScope {
            budget,
            deadline,
            cancel: parent.child_token(),
        }
    }

    pub fn budget(&self) -> Duration {
        self.budget
    }

    /// True when the caller asked not to wait at all.
    pub fn is_immediate(&self) -> bool {
        self.budget.is_zero()
    }

    /// Non-blocking check of both end conditions. Cancellation wins a tie.
    pub fn check(&self) -> Option<Expiry> {
        if self.cancel.is_cancelled() {
            Some(Expiry::Cancelled)
        } else if Instant::now() >= self.deadline {
            Some(Expiry::Deadline)
        } else {
            None
        }
    }

    /// Resolves when the deadline passes or the signal is cancelled.
    pub async fn expired(&self) -> Expiry {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Expiry::Cancelled,
            _ = tokio::time::sleep_until(self.deadline) => Expiry::Deadline,
        }
    }
}
