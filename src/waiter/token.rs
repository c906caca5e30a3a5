use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use tokio::sync::Notify;

static NEXT_TOKEN_ID: AtomicU64 = AtomicU64::new(1);

const PENDING: u8 = 0;
const COMPLETED: u8 = 1;
const CANCELED: u8 = 2;

/// Observable state of a [`WaitToken`]. There is no way back to `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenState {
    Pending,
    Completed,
    Canceled,
}

/// One waiter's completion signal.
///
/// A token is resolved at most once: the first of `complete` or `cancel` wins
/// and every later call is a no-op. Resolution wakes every task currently in
/// `wait` on this token and no other token.
#[derive(Debug)]
pub struct WaitToken {
    id: u64,
    state: AtomicU8,
    notify: Notify,
}

impl Default for WaitToken {
    fn default() -> Self {
        Self::new()
    }
}

impl WaitToken {
    pub fn new() -> Self {
        WaitToken {
            id: NEXT_TOKEN_ID.fetch_add(1, Ordering::Relaxed),
            state: AtomicU8::new(PENDING),
            notify: Notify::new(),
        }
    }

    /// Process-unique identity, used as the token's slot in every bucket.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> TokenState {
        match self.state.load(Ordering::Acquire) {
            PENDING => TokenState::Pending,
            COMPLETED => TokenState::Completed,
            _ => TokenState::Canceled,
        }
    }

    /// Pending -> Completed. Returns true only for the call that made the transition.
    pub fn complete(&self) -> bool {
        self.resolve(COMPLETED)
    }

    /// Pending -> Canceled. Returns true only for the call that made the transition.
    pub fn cancel(&self) -> bool {
        self.resolve(CANCELED)
    }

    fn resolve(&self, to: u8) -> bool {
        let won = self
            .state
            .compare_exchange(PENDING, to, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if won {
            self.notify.notify_waiters();
        }
        won
    }

    /// Resolves once the token has left `Pending`, returning the final state.
    /// Safe to call any number of times, before or after resolution.
    pub async fn wait(&self) -> TokenState {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register before checking the state so a resolve between the
            // check and the await is not lost.
            notified.as_mut().enable();
            match self.state() {
                TokenState::Pending => notified.await,
                resolved => return resolved,
            }
        }
    }
}
