//! Middleware layer.
//!
//! Middleware wraps a handler in another handler. It is the right place for
//! cross-cutting concerns that must bracket a request: binding per-request
//! state into the [`Context`](crate::Context) before the handler runs and
//! tearing it down after, whatever way the handler exits.
//!
//! Install middleware with [`Router::layer`](crate::Router::layer).
//!
//! Built-in middleware:
//! - [`PoolMiddleware`] — request-scoped object pooling

mod holder;
mod pool;

pub use holder::HolderPool;
pub use pool::{PoolKey, PoolMiddleware, borrow};

use crate::handler::BoxedHandler;

/// A `Handler -> Handler` transform.
///
/// `wrap` runs once per route at router build time, never per request. The
/// returned handler usually keeps `next` and calls it from its own
/// [`ErasedHandler::call`](crate::ErasedHandler::call).
pub trait Middleware: Send + Sync + 'static {
    fn wrap(&self, next: BoxedHandler) -> BoxedHandler;
}
