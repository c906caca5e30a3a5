//! Wait registration and wake-up.
//!
//! A caller registers interest under one or more primary keys (typically a
//! device, or [`Scope::Any`] for every device), optionally narrowed by
//! secondary keys (typically a message name). A writer that has just committed
//! a row calls [`ObjectWaiter::notify_changed`] with the keys of that row and
//! every matching waiter is woken.
//!
//! Tokens live in buckets keyed either by a primary alone (any secondary) or
//! by a (primary, secondary) pair. One token may sit in many buckets at once;
//! it removes itself from all of them when its [`WaitHandle`] is disposed.

pub mod token;

use dashmap::DashMap;
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;
use tracing::trace;

pub use token::{TokenState, WaitToken};

/// Anything usable as a primary or secondary key.
pub trait WaitKey: Eq + Hash + Clone + Send + Sync + 'static {}

impl<T: Eq + Hash + Clone + Send + Sync + 'static> WaitKey for T {}

/// A primary key slot: one concrete key, or every key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Scope<K> {
    Any,
    Key(K),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum BucketKey<P, S> {
    Primary(Scope<P>),
    Pair(Scope<P>, S),
}

type Bucket = HashMap<u64, Arc<WaitToken>>;

/// Process-local registry of outstanding waits.
///
/// Cloning is cheap and every clone shares the same buckets. Construct one per
/// kind of event at the composition root and hand clones to whoever needs it.
pub struct ObjectWaiter<P: WaitKey, S: WaitKey = ()> {
    buckets: Arc<DashMap<BucketKey<P, S>, Bucket>>,
}

impl<P: WaitKey, S: WaitKey> Clone for ObjectWaiter<P, S> {
    fn clone(&self) -> Self {
        ObjectWaiter {
            buckets: self.buckets.clone(),
        }
    }
}

impl<P: WaitKey, S: WaitKey> Default for ObjectWaiter<P, S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: WaitKey, S: WaitKey> fmt::Debug for ObjectWaiter<P, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectWaiter")
            .field("buckets", &self.buckets.len())
            .field("registrations", &self.registrations())
            .finish()
    }
}

impl<P: WaitKey, S: WaitKey> ObjectWaiter<P, S> {
    pub fn new() -> Self {
        ObjectWaiter {
            buckets: Arc::new(DashMap::new()),
        }
    }

    /// Register a new wait.
    ///
    /// The token goes into one bucket per primary when `secondaries` is `None`
    /// or empty, otherwise into one bucket per (primary, secondary) pair. An
    /// empty `primaries` registers nothing and the handle is only ever resolved
    /// by its owner.
    pub fn begin_wait<I, J>(&self, primaries: I, secondaries: Option<J>) -> WaitHandle<P, S>
    where
        I: IntoIterator<Item = Scope<P>>,
        J: IntoIterator<Item = S>,
    {
        let secondaries: Vec<S> = secondaries
            .map(|s| s.into_iter().collect())
            .unwrap_or_default();

        let mut keys = Vec::new();
        for primary in primaries {
            if secondaries.is_empty() {
                keys.push(BucketKey::Primary(primary));
            } else {
                for secondary in &secondaries {
                    keys.push(BucketKey::Pair(primary.clone(), secondary.clone()));
                }
            }
        }

        let token = Arc::new(WaitToken::new());
        for key in &keys {
            self.buckets
                .entry(key.clone())
                .or_default()
                .insert(token.id(), token.clone());
        }
        trace!(token = token.id(), buckets = keys.len(), "wait registered");

        WaitHandle {
            waiter: self.clone(),
            token,
            keys,
            disposed: false,
        }
    }

    /// Register a wait that matches any secondary key.
    pub fn begin_wait_primary<I>(&self, primaries: I) -> WaitHandle<P, S>
    where
        I: IntoIterator<Item = Scope<P>>,
    {
        self.begin_wait(primaries, None::<Vec<S>>)
    }

    /// Wake every pending wait registered under any of `primaries`, either for
    /// any secondary or for exactly `secondary`.
    ///
    /// Tokens are only completed here, never unregistered. Returns how many
    /// tokens this call moved out of `Pending`.
    pub fn notify_changed<I>(&self, primaries: I, secondary: Option<&S>) -> usize
    where
        I: IntoIterator<Item = Scope<P>>,
    {
        let mut woken = 0;
        for primary in primaries {
            if let Some(secondary) = secondary {
                woken += self.complete_bucket(&BucketKey::Pair(primary.clone(), secondary.clone()));
            }
            woken += self.complete_bucket(&BucketKey::Primary(primary));
        }
        trace!(woken, "notify_changed");
        woken
    }

    fn complete_bucket(&self, key: &BucketKey<P, S>) -> usize {
        // Snapshot under the shard lock, complete outside it.
        let tokens: Vec<Arc<WaitToken>> = match self.buckets.get(key) {
            Some(bucket) => bucket.values().cloned().collect(),
            None => return 0,
        };
        tokens.iter().filter(|t| t.complete()).count()
    }

    fn unregister(&self, keys: &[BucketKey<P, S>], id: u64) {
        for key in keys {
            if let Some(mut bucket) = self.buckets.get_mut(key) {
                bucket.remove(&id);
            }
            self.buckets.remove_if(key, |_, bucket| bucket.is_empty());
        }
        trace!(token = id, "wait unregistered");
    }

    /// Total bucket memberships across all outstanding tokens.
    pub fn registrations(&self) -> usize {
        self.buckets.iter().map(|b| b.value().len()).sum()
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Whether the token with this id is still present in any bucket.
    pub fn is_registered(&self, id: u64) -> bool {
        self.buckets.iter().any(|b| b.value().contains_key(&id))
    }
}

/// Scoped registration returned by [`ObjectWaiter::begin_wait`].
///
/// Dropping the handle disposes it. Disposal removes the token from every
/// bucket it was inserted into, exactly once, whatever state the token is in.
pub struct WaitHandle<P: WaitKey, S: WaitKey = ()> {
    waiter: ObjectWaiter<P, S>,
    token: Arc<WaitToken>,
    keys: Vec<BucketKey<P, S>>,
    disposed: bool,
}

impl<P: WaitKey, S: WaitKey> fmt::Debug for WaitHandle<P, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WaitHandle")
            .field("token", &self.token.id())
            .field("state", &self.token.state())
            .field("buckets", &self.keys.len())
            .field("disposed", &self.disposed)
            .finish()
    }
}

impl<P: WaitKey, S: WaitKey> WaitHandle<P, S> {
    pub fn id(&self) -> u64 {
        self.token.id()
    }

    pub fn state(&self) -> TokenState {
        self.token.state()
    }

    /// Resolves once the token is completed or canceled.
    pub async fn wait(&self) -> TokenState {
        self.token.wait().await
    }

    pub fn complete(&self) -> bool {
        self.token.complete()
    }

    pub fn cancel(&self) -> bool {
        self.token.cancel()
    }

    pub fn dispose(&mut self) {
        if std::mem::replace(&mut self.disposed, true) {
            return;
        }
        self.waiter.unregister(&self.keys, self.token.id());
    }
}

impl<P: WaitKey, S: WaitKey> Drop for WaitHandle<P, S> {
    fn drop(&mut self) {
        self.dispose();
    }
}
