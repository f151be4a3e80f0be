//! Request-scoped bindings.
//!
//! Every [`Request`](crate::Request) carries a [`Context`]. Middleware binds
//! values into it under a [`KeyId`] it owns; handlers read them back through
//! the middleware's typed accessor. Key ids are handed out from a process-wide
//! counter and never reused, so two middleware instances cannot bind under the
//! same id even when they store values of the same type.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_KEY: AtomicU64 = AtomicU64::new(1);

/// Opaque identity of one binding slot.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct KeyId(u64);

impl KeyId {
    /// Allocates an id no other caller in this process will ever receive.
    pub(crate) fn next() -> Self {
        Self(NEXT_KEY.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "key#{}", self.0)
    }
}

/// Typed binding map carried by a request.
///
/// Cloning is cheap (reference counts only). A clone keeps the bound values
/// alive but does not extend the request: middleware still tears its bindings
/// down when the request ends.
#[derive(Clone, Default)]
pub struct Context {
    bindings: HashMap<KeyId, Arc<dyn Any + Send + Sync>>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `value` under `key`, replacing any previous binding.
    pub(crate) fn bind<V: Any + Send + Sync>(&mut self, key: KeyId, value: Arc<V>) {
        self.bindings.insert(key, value);
    }

    /// Returns the value bound under `key` if it has type `V`.
    pub(crate) fn lookup<V: Any + Send + Sync>(&self, key: KeyId) -> Option<&V> {
        self.bindings.get(&key)?.downcast_ref::<V>()
    }

    pub fn is_bound(&self, key: KeyId) -> bool {
        self.bindings.contains_key(&key)
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.bindings.keys()).finish()
    }
}
