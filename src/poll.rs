//! The long-poll loop shared by every poll operation.
//!
//! Register interest, query, and if nothing is there sleep until either a
//! matching write wakes us or the scope expires. Registration always happens
//! before the query it guards, and writers always commit before they notify,
//! so a row can't slip between the two unseen.

use crate::clock::Timestamp;
use crate::deadline::{Expiry, WaitScope};
use crate::error::HiveResult;
use crate::waiter::{ObjectWaiter, Scope, TokenState, WaitKey};
use std::future::Future;
use tracing::debug;

/// What a query returns, and when it counts as "found something".
pub trait Ready: Default {
    fn is_ready(&self) -> bool;
}

impl<T> Ready for Vec<T> {
    fn is_ready(&self) -> bool {
        !self.is_empty()
    }
}

impl<T> Ready for Option<T> {
    fn is_ready(&self) -> bool {
        self.is_some()
    }
}

/// The keys a poll registers under on every iteration.
#[derive(Debug, Clone)]
pub struct Interest<P, S = ()> {
    primaries: Vec<Scope<P>>,
    secondaries: Option<Vec<S>>,
}

impl<P: WaitKey, S: WaitKey> Interest<P, S> {
    pub fn new(primaries: Vec<Scope<P>>, secondaries: Option<Vec<S>>) -> Self {
        Interest {
            primaries,
            secondaries,
        }
    }

    pub fn primary(primary: Scope<P>) -> Self {
        Interest {
            primaries: vec![primary],
            secondaries: None,
        }
    }
}

/// Run the poll loop.
///
/// Returns the first non-empty query result verbatim, or an empty result
/// once `scope` expires. Query errors are returned as-is and end the poll.
pub async fn poll_until<P, S, T, F, Fut>(
    waiter: &ObjectWaiter<P, S>,
    interest: &Interest<P, S>,
    scope: &WaitScope,
    since: Timestamp,
    mut query: F,
) -> HiveResult<T>
where
    P: WaitKey,
    S: WaitKey,
    T: Ready,
    F: FnMut(Timestamp) -> Fut,
    Fut: Future<Output = HiveResult<T>>,
{
    if scope.is_immediate() {
        return query(since).await;
    }

    let budget = scope.budget();
    let mut wakes = 0u32;
    loop {
        // A wake that lands right at the deadline still gets one last query.
        if wakes > 0 {
            if let Some(expiry) = scope.check() {
                let found = query(since).await?;
                if !found.is_ready() {
                    debug!(%since, ?budget, wakes, ?expiry, "poll ended after wake");
                }
                return Ok(found);
            }
        }

        let mut handle = waiter.begin_wait(
            interest.primaries.iter().cloned(),
            interest.secondaries.clone(),
        );

        let found = query(since).await?;
        if found.is_ready() {
            handle.dispose();
            debug!(%since, ?budget, wakes, "poll found data");
            return Ok(found);
        }

        let expiry = tokio::select! {
            biased;
            state = handle.wait() => {
                if state == TokenState::Completed {
                    wakes += 1;
                }
                None
            }
            expiry = scope.expired() => Some(expiry),
        };

        if let Some(expiry) = expiry {
            handle.cancel();
            handle.dispose();
            match expiry {
                Expiry::Deadline => debug!(%since, ?budget, wakes, "poll timed out"),
                Expiry::Cancelled => debug!(%since, ?budget, wakes, "poll cancelled"),
            }
            return Ok(T::default());
        }
    }
}
