//! Per-request borrow tracking.
//!
//! A [`Holder`] remembers which objects one request took from which pool, so
//! the middleware can hand them all back when the request ends. Holders are
//! themselves recycled through a [`HolderPool`] to keep the per-request cost
//! to a couple of lock round-trips.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::pool::{Pool, Pooled};

/// Tracking record for one in-flight request.
///
/// Only the request that acquired it ever touches it, so the mutex is never
/// contended. It is there because the holder is reached through the request
/// context, which moves between worker threads.
pub(crate) struct Holder<T> {
    state: Mutex<State<T>>,
}

struct State<T> {
    pool: Option<Arc<Pool<Pooled<T>>>>,
    // keyed by object identity: one entry per distinct object
    taken: HashMap<usize, Pooled<T>>,
}

impl<T> Holder<T> {
    fn new() -> Self {
        Self {
            state: Mutex::new(State { pool: None, taken: HashMap::new() }),
        }
    }

    /// Points this holder at the object pool for the current request.
    pub(crate) fn bind(&self, pool: Arc<Pool<Pooled<T>>>) {
        let mut state = self.state.lock();
        debug_assert!(state.taken.is_empty(), "binding a holder that was never drained");
        state.pool = Some(pool);
    }

    /// Takes one object from the bound pool and records it.
    ///
    /// Returns `None` when the holder is not bound, i.e. it already went
    /// through [`drain`](Holder::drain) for the request it belonged to.
    pub(crate) fn take(&self) -> Option<Pooled<T>> {
        let mut state = self.state.lock();
        let obj = state.pool.as_ref()?.acquire();
        state.taken.entry(obj.id()).or_insert_with(|| obj.clone());
        Some(obj)
    }

    /// Returns every tracked object to the bound pool, clears the set and
    /// unbinds. Returns how many objects went back.
    pub(crate) fn drain(&self) -> usize {
        let mut state = self.state.lock();
        let Some(pool) = state.pool.take() else {
            return 0;
        };
        let returned = state.taken.len();
        for (_, obj) in state.taken.drain() {
            pool.release(obj);
        }
        returned
    }

    #[cfg(test)]
    pub(crate) fn taken(&self) -> usize {
        self.state.lock().taken.len()
    }

    pub(crate) fn is_drained(&self) -> bool {
        let state = self.state.lock();
        state.pool.is_none() && state.taken.is_empty()
    }
}

// ── HolderPool ────────────────────────────────────────────────────────────────

/// Recycles the per-request holders of every middleware that pools `T`.
///
/// Build one per pooled type at startup and hand it to each
/// [`PoolMiddleware`](super::PoolMiddleware) for that type. The handle is
/// cheap to clone; all clones share the same free list. It owns no external
/// resources, so there is nothing to shut down.
///
/// ```rust
/// use pooler::middleware::{HolderPool, PoolMiddleware};
///
/// let holders = HolderPool::new();
/// let buffers = PoolMiddleware::new(&holders, || Vec::<u8>::with_capacity(4096));
/// let strings = PoolMiddleware::new(&HolderPool::new(), String::new);
/// # let _ = (buffers, strings);
/// ```
pub struct HolderPool<T> {
    holders: Arc<Pool<Arc<Holder<T>>>>,
}

impl<T: Send + 'static> HolderPool<T> {
    pub fn new() -> Self {
        Self { holders: Arc::new(Pool::new(|| Arc::new(Holder::new()))) }
    }

    pub(crate) fn acquire(&self) -> Arc<Holder<T>> {
        self.holders.acquire()
    }

    /// Puts a drained holder back for the next request.
    ///
    /// A holder that is still referenced elsewhere (a handler kept a clone of
    /// its request context) is dropped rather than recycled, so no later
    /// request can be reached through the stale reference.
    pub(crate) fn release(&self, holder: Arc<Holder<T>>) {
        debug_assert!(holder.is_drained(), "holder released with objects still tracked");
        if Arc::strong_count(&holder) > 1 {
            debug!("holder still referenced after its request ended, discarding");
            return;
        }
        self.holders.release(holder);
    }

    /// Holders waiting for a request.
    pub fn idle(&self) -> usize {
        self.holders.idle()
    }

    /// Holders built since this pool was created.
    pub fn created(&self) -> usize {
        self.holders.created()
    }
}

impl<T: Send + 'static> Default for HolderPool<T> {
    fn default() -> Self { Self::new() }
}

impl<T> Clone for HolderPool<T> {
    fn clone(&self) -> Self {
        Self { holders: Arc::clone(&self.holders) }
    }
}

impl<T> fmt::Debug for HolderPool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HolderPool")
            .field("idle", &self.holders.idle())
            .field("created", &self.holders.created())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn objects() -> Arc<Pool<Pooled<u32>>> {
        Arc::new(Pool::new(|| Pooled::new(0)))
    }

    #[test]
    fn unbound_holder_takes_nothing() {
        let holder = Holder::<u32>::new();
        assert!(holder.take().is_none());
        assert_eq!(holder.drain(), 0);
        assert!(holder.is_drained());
    }

    #[test]
    fn drain_returns_every_taken_object() {
        let pool = objects();
        let holder = Holder::new();
        holder.bind(Arc::clone(&pool));

        let a = holder.take().unwrap();
        let b = holder.take().unwrap();
        assert!(!a.ptr_eq(&b));
        assert_eq!(holder.taken(), 2);
        assert_eq!(pool.idle(), 0);

        assert_eq!(holder.drain(), 2);
        assert!(holder.is_drained());
        assert_eq!(pool.idle(), 2);
        assert_eq!(pool.created(), 2);

        // drained holders are unbound
        assert!(holder.take().is_none());
        assert_eq!(holder.drain(), 0);
        assert_eq!(pool.idle(), 2);
    }

    #[test]
    fn the_same_object_is_tracked_once() {
        let pool = objects();
        let holder = Holder::new();
        holder.bind(Arc::clone(&pool));

        let first = holder.take().unwrap();
        // hand the same object out a second time
        pool.release(first.clone());
        let second = holder.take().unwrap();

        assert!(first.ptr_eq(&second));
        assert_eq!(holder.taken(), 1);
        assert_eq!(holder.drain(), 1);
        assert_eq!(pool.idle(), 1);
    }

    #[test]
    fn recycled_holders_start_empty() {
        let holders = HolderPool::<u32>::new();
        let pool = objects();

        let holder = holders.acquire();
        holder.bind(Arc::clone(&pool));
        holder.take().unwrap();
        holder.drain();
        holders.release(holder);
        assert_eq!(holders.idle(), 1);

        let again = holders.acquire();
        assert_eq!(holders.created(), 1);
        assert_eq!(again.taken(), 0);
        assert!(again.is_drained());
    }

    #[test]
    fn shared_holders_are_not_recycled() {
        let holders = HolderPool::<u32>::new();
        let holder = holders.acquire();
        let leaked = Arc::clone(&holder);

        holders.release(holder);
        assert_eq!(holders.idle(), 0);
        assert!(leaked.take().is_none());
    }

    #[test]
    fn clones_share_one_free_list() {
        let holders = HolderPool::<u32>::new();
        let other = holders.clone();

        other.release(holders.acquire());
        assert_eq!(holders.idle(), 1);
        assert_eq!(other.created(), 1);
    }
}
