//! Grow-on-demand object pool.
//!
//! [`Pool`] is a free list guarded by a mutex plus a factory for when the
//! list is empty. It never rejects an `acquire` and never drops a `release`,
//! so it has no capacity to tune. Both the per-middleware object pools and
//! the [`HolderPool`](crate::middleware::HolderPool) are built on it.
//!
//! ```rust
//! use pooler::Pool;
//!
//! let pool = Pool::new(|| Vec::<u8>::with_capacity(1024));
//! let buf = pool.acquire();          // factory runs
//! pool.release(buf);
//! let buf = pool.acquire();          // recycled, factory does not run
//! assert_eq!(pool.created(), 1);
//! # drop(buf);
//! ```

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::{Mutex, MutexGuard};

/// A thread-safe pool of reusable `T`s.
///
/// Objects come back exactly as the last user left them. Resetting them is
/// the caller's business.
pub struct Pool<T> {
    idle: Mutex<Vec<T>>,
    factory: Box<dyn Fn() -> T + Send + Sync>,
    created: AtomicUsize,
}

impl<T> Pool<T> {
    /// Creates an empty pool that builds new objects with `factory`.
    pub fn new(factory: impl Fn() -> T + Send + Sync + 'static) -> Self {
        Self {
            idle: Mutex::new(Vec::new()),
            factory: Box::new(factory),
            created: AtomicUsize::new(0),
        }
    }

    /// Returns an idle object, or a new one if none is idle.
    ///
    /// No ordering guarantee on which idle object is handed out.
    pub fn acquire(&self) -> T {
        // The guard is a temporary: the factory never runs under the lock.
        let recycled = self.idle.lock().pop();
        recycled.unwrap_or_else(|| {
            self.created.fetch_add(1, Ordering::Relaxed);
            (self.factory)()
        })
    }

    /// Makes `obj` available to a future [`acquire`](Pool::acquire).
    ///
    /// The pool cannot tell where `obj` came from; releasing a foreign object
    /// simply adds it to this pool.
    pub fn release(&self, obj: T) {
        self.idle.lock().push(obj);
    }

    /// Number of objects currently waiting for reuse.
    pub fn idle(&self) -> usize {
        self.idle.lock().len()
    }

    /// Number of times the factory has been invoked.
    pub fn created(&self) -> usize {
        self.created.load(Ordering::Relaxed)
    }
}

impl<T> fmt::Debug for Pool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("idle", &self.idle())
            .field("created", &self.created())
            .finish()
    }
}

// ── Pooled ────────────────────────────────────────────────────────────────────

/// Shared handle to one pooled object.
///
/// Cloning the handle never copies the object: every clone points at the same
/// allocation, and that allocation is the object's identity while it is out of
/// the pool. Mutate the object through [`lock`](Pooled::lock), and do not hold
/// the guard across an `.await`.
pub struct Pooled<T>(Arc<Mutex<T>>);

impl<T> Pooled<T> {
    pub fn new(value: T) -> Self {
        Self(Arc::new(Mutex::new(value)))
    }

    /// Locks the object for reading or writing.
    pub fn lock(&self) -> MutexGuard<'_, T> {
        self.0.lock()
    }

    /// True if both handles point at the same object.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Address of the shared allocation, used as the object's identity.
    pub(crate) fn id(&self) -> usize {
        Arc::as_ptr(&self.0) as *const () as usize
    }
}

impl<T> Clone for Pooled<T> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<T: fmt::Debug> fmt::Debug for Pooled<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Pooled").field(&*self.0.lock()).finish()
    }
}
