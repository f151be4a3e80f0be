//! Request-scoped object pooling.
//!
//! [`PoolMiddleware`] lends objects to handlers for the duration of one
//! request and takes them all back when the request ends, however it ends:
//! normal return, panic, or the request future being dropped mid-flight.
//! Handlers never return anything by hand.
//!
//! ```rust,no_run
//! use pooler::{Request, Response, Router, Server};
//! use pooler::middleware::{HolderPool, PoolMiddleware};
//!
//! #[tokio::main]
//! async fn main() {
//!     let holders = HolderPool::new();
//!     let buffers = PoolMiddleware::new(&holders, || Vec::<u8>::with_capacity(8 * 1024));
//!     let key = buffers.key();
//!
//!     let app = Router::new()
//!         .get("/render", move |req: Request| async move {
//!             let buf = req.borrow(&key)?;
//!             let mut buf = buf.lock();
//!             buf.clear();
//!             buf.extend_from_slice(b"rendered");
//!             Ok::<_, pooler::MissingContext>(Response::text(String::from_utf8_lossy(&buf)))
//!         })
//!         .layer(buffers);
//!
//!     Server::bind("0.0.0.0:3000").serve(app).await.unwrap();
//! }
//! ```
//!
//! # Per request
//!
//! 1. A holder is taken from the [`HolderPool`] and pointed at this
//!    middleware's object pool.
//! 2. The holder is bound into the request [`Context`] under the middleware's
//!    [`PoolKey`].
//! 3. The inner handler runs inside an unwind boundary.
//! 4. The holder is drained (every borrowed object goes back to the object
//!    pool) and returned to the holder pool.
//! 5. If the handler panicked, the original payload is re-raised, after
//!    step 4 has completed.

use std::any::type_name;
use std::fmt;
use std::marker::PhantomData;
use std::panic::{AssertUnwindSafe, resume_unwind};
use std::sync::Arc;

use futures_util::FutureExt;
use tracing::{debug, trace, warn};

use super::Middleware;
use super::holder::{Holder, HolderPool};
use crate::context::{Context, KeyId};
use crate::error::MissingContext;
use crate::handler::{BoxFuture, BoxedHandler, ErasedHandler};
use crate::pool::{Pool, Pooled};
use crate::request::Request;

// ── PoolKey ───────────────────────────────────────────────────────────────────

/// Typed handle to one [`PoolMiddleware`]'s binding.
///
/// Every middleware instance gets its own key, so two instances pooling the
/// same type never see each other's objects. The key is `Copy`; capture it in
/// the handlers that borrow.
pub struct PoolKey<T> {
    id: KeyId,
    _marker: PhantomData<fn() -> T>,
}

impl<T> PoolKey<T> {
    fn new() -> Self {
        Self { id: KeyId::next(), _marker: PhantomData }
    }

    pub fn id(&self) -> KeyId {
        self.id
    }
}

impl<T> Clone for PoolKey<T> {
    fn clone(&self) -> Self { *self }
}

impl<T> Copy for PoolKey<T> {}

impl<T> PartialEq for PoolKey<T> {
    fn eq(&self, other: &Self) -> bool { self.id == other.id }
}

impl<T> Eq for PoolKey<T> {}

impl<T> fmt::Debug for PoolKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PoolKey<{}>({})", type_name::<T>(), self.id)
    }
}

// ── PoolMiddleware ────────────────────────────────────────────────────────────

/// Middleware that lends pooled `T`s to the handlers it wraps.
///
/// Each instance owns one object pool, shared by every request routed
/// through it. Objects are built by `factory` when the pool runs dry and are
/// never reset by the pool: clear them before use if stale state matters.
pub struct PoolMiddleware<T> {
    key: PoolKey<T>,
    objects: Arc<Pool<Pooled<T>>>,
    holders: HolderPool<T>,
}

impl<T: Send + 'static> PoolMiddleware<T> {
    pub fn new(holders: &HolderPool<T>, factory: impl Fn() -> T + Send + Sync + 'static) -> Self {
        let objects = Pool::new(move || {
            debug!(object = type_name::<T>(), "pooled object created");
            Pooled::new(factory())
        });
        Self { key: PoolKey::new(), objects: Arc::new(objects), holders: holders.clone() }
    }

    /// The key handlers pass to [`borrow`].
    pub fn key(&self) -> PoolKey<T> {
        self.key
    }

    /// This instance's object pool.
    pub fn objects(&self) -> &Pool<Pooled<T>> {
        &self.objects
    }
}

/// Clones share the key and both pools: they are the same middleware.
impl<T> Clone for PoolMiddleware<T> {
    fn clone(&self) -> Self {
        Self {
            key: self.key,
            objects: Arc::clone(&self.objects),
            holders: self.holders.clone(),
        }
    }
}

impl<T> fmt::Debug for PoolMiddleware<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolMiddleware")
            .field("key", &self.key)
            .field("objects", &self.objects)
            .finish()
    }
}

impl<T: Send + 'static> Middleware for PoolMiddleware<T> {
    fn wrap(&self, next: BoxedHandler) -> BoxedHandler {
        Arc::new(Pooling {
            key: self.key,
            objects: Arc::clone(&self.objects),
            holders: self.holders.clone(),
            next,
        })
    }
}

/// The handler [`PoolMiddleware::wrap`] puts around a route.
struct Pooling<T> {
    key: PoolKey<T>,
    objects: Arc<Pool<Pooled<T>>>,
    holders: HolderPool<T>,
    next: BoxedHandler,
}

impl<T: Send + 'static> ErasedHandler for Pooling<T> {
    fn call(&self, mut req: Request) -> BoxFuture {
        let holder = self.holders.acquire();
        holder.bind(Arc::clone(&self.objects));
        req.context.bind(self.key.id, Arc::clone(&holder));

        // From here on the guard owns cleanup, including when the returned
        // future is dropped before completion.
        let binding = Binding { holder: Some(holder), holders: self.holders.clone() };
        let next = Arc::clone(&self.next);

        Box::pin(async move {
            let outcome = AssertUnwindSafe(async move { next.call(req).await })
                .catch_unwind()
                .await;
            drop(binding);
            match outcome {
                Ok(res) => res,
                Err(panic) => resume_unwind(panic),
            }
        })
    }
}

/// Drains and releases one request's holder exactly once, on drop.
struct Binding<T: Send + 'static> {
    holder: Option<Arc<Holder<T>>>,
    holders: HolderPool<T>,
}

impl<T: Send + 'static> Drop for Binding<T> {
    fn drop(&mut self) {
        if let Some(holder) = self.holder.take() {
            let returned = holder.drain();
            trace!(object = type_name::<T>(), returned, "pool binding released");
            self.holders.release(holder);
        }
    }
}

// ── borrow ────────────────────────────────────────────────────────────────────

/// Borrows a `T` from the pool bound to `key` in `ctx`.
///
/// The object stays with the request until the middleware's cleanup returns
/// it; the caller never gives it back. Every call may return a different
/// object.
///
/// # Errors
///
/// [`MissingContext`] if nothing is bound under `key`: the route is not
/// wrapped by the middleware that issued `key`, or `ctx` outlived its request.
pub fn borrow<T: Send + 'static>(ctx: &Context, key: &PoolKey<T>) -> Result<Pooled<T>, MissingContext> {
    ctx.lookup::<Holder<T>>(key.id)
        .and_then(Holder::take)
        .ok_or_else(|| {
            warn!(key = %key.id, object = type_name::<T>(), "borrow without a bound pool");
            MissingContext
        })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU64, Ordering};

    use parking_lot::Mutex;

    use super::*;
    use crate::handler::Handler;
    use crate::response::Response;
    use crate::router::Router;

    fn wrapped<T: Send + 'static>(mw: &PoolMiddleware<T>, handler: impl Handler) -> BoxedHandler {
        mw.wrap(handler.into_boxed_handler())
    }

    /// Borrows `n` objects and answers with how many it got.
    fn borrowing<T: Send + 'static>(
        key: PoolKey<T>,
        n: usize,
    ) -> impl Fn(Request) -> std::future::Ready<Response> + Send + Sync + 'static {
        move |req: Request| {
            let got = (0..n).filter(|_| req.borrow(&key).is_ok()).count();
            std::future::ready(Response::text(got.to_string()))
        }
    }

    #[derive(Debug, PartialEq)]
    struct Boom(u32);

    async fn explode(req: Request, key: PoolKey<u32>) -> Response {
        req.borrow(&key).unwrap();
        req.borrow(&key).unwrap();
        std::panic::panic_any(Boom(7))
    }

    async fn stall(req: Request, key: PoolKey<u32>) -> Response {
        let _held = req.borrow(&key).unwrap();
        std::future::pending::<()>().await;
        Response::text("unreachable")
    }

    #[tokio::test]
    async fn borrow_inside_the_middleware_succeeds() {
        let mw = PoolMiddleware::new(&HolderPool::new(), || String::from("fresh"));
        let key = mw.key();
        let handler = wrapped(&mw, move |req: Request| async move {
            let s = req.borrow(&key).unwrap();
            s.lock().clone()
        });

        let res = handler.call(Request::empty()).await;
        assert_eq!(res.body(), b"fresh");
    }

    #[test]
    fn borrow_without_binding_is_missing_context() {
        let mw = PoolMiddleware::new(&HolderPool::new(), || 0u32);
        assert_eq!(borrow(&Context::new(), &mw.key()).unwrap_err(), MissingContext);
        assert_eq!(mw.objects().created(), 0);
    }

    #[tokio::test]
    async fn another_instances_key_is_missing_context() {
        let holders = HolderPool::new();
        let installed = PoolMiddleware::new(&holders, || 0u32);
        let other = PoolMiddleware::new(&holders, || 0u32);
        let other_key = other.key();
        assert_ne!(installed.key(), other_key);

        let handler = wrapped(&installed, move |req: Request| async move {
            req.borrow(&other_key).map(|_| "found")
        });

        let res = handler.call(Request::empty()).await;
        assert_eq!(res.status_code(), http::StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(other.objects().created(), 0);
    }

    #[tokio::test]
    async fn a_context_kept_past_its_request_is_missing_context() {
        let holders = HolderPool::new();
        let mw = PoolMiddleware::new(&holders, || 0u32);
        let key = mw.key();
        let kept: Arc<Mutex<Option<Context>>> = Arc::default();

        let sink = Arc::clone(&kept);
        let handler = wrapped(&mw, move |req: Request| {
            *sink.lock() = Some(req.context().clone());
            std::future::ready(Response::text("ok"))
        });
        handler.call(Request::empty()).await;

        let ctx = kept.lock().take().unwrap();
        assert_eq!(borrow(&ctx, &key).unwrap_err(), MissingContext);
        // the stale holder was discarded, not recycled
        assert_eq!(holders.idle(), 0);
        assert_eq!(mw.objects().created(), 0);
    }

    #[tokio::test]
    async fn objects_return_after_a_normal_exit() {
        let mw = PoolMiddleware::new(&HolderPool::new(), || 0u32);
        let handler = wrapped(&mw, borrowing(mw.key(), 3));

        let res = handler.call(Request::empty()).await;
        assert_eq!(res.body(), b"3");
        assert_eq!(mw.objects().idle(), 3);
        assert_eq!(mw.objects().created(), 3);

        let drained: Vec<_> = (0..3).map(|_| mw.objects().acquire()).collect();
        assert_eq!(drained.len(), 3);
        assert_eq!(mw.objects().created(), 3);
    }

    #[tokio::test]
    async fn objects_return_before_a_panic_propagates() {
        let holders = HolderPool::new();
        let mw = PoolMiddleware::new(&holders, || 0u32);
        let key = mw.key();
        let handler = wrapped(&mw, move |req: Request| explode(req, key));

        let outcome = AssertUnwindSafe(handler.call(Request::empty())).catch_unwind().await;

        let payload = outcome.err().unwrap();
        assert_eq!(payload.downcast_ref::<Boom>(), Some(&Boom(7)));
        assert_eq!(mw.objects().idle(), 2);
        assert_eq!(mw.objects().created(), 2);
        assert_eq!(holders.idle(), 1);
    }

    #[tokio::test]
    async fn a_handler_panicking_before_its_future_exists_is_covered() {
        let holders = HolderPool::new();
        let mw = PoolMiddleware::new(&holders, || 0u32);
        let handler = wrapped(&mw, |_req: Request| -> std::future::Ready<Response> {
            panic!("sync boom")
        });

        let outcome = AssertUnwindSafe(handler.call(Request::empty())).catch_unwind().await;

        let payload = outcome.err().unwrap();
        assert_eq!(payload.downcast_ref::<&str>(), Some(&"sync boom"));
        assert_eq!(holders.idle(), 1);
    }

    #[tokio::test]
    async fn dropping_a_pending_request_returns_its_objects() {
        let mw = PoolMiddleware::new(&HolderPool::new(), || 0u32);
        let key = mw.key();
        let handler = wrapped(&mw, move |req: Request| stall(req, key));

        assert!(handler.call(Request::empty()).now_or_never().is_none());
        assert_eq!(mw.objects().idle(), 1);
        assert_eq!(mw.objects().created(), 1);
    }

    #[tokio::test]
    async fn sequential_requests_reuse_one_holder_and_object_set() {
        let holders = HolderPool::new();
        let mw = PoolMiddleware::new(&holders, || 0u32);
        let handler = wrapped(&mw, borrowing(mw.key(), 2));

        for _ in 0..100 {
            let res = handler.call(Request::empty()).await;
            assert_eq!(res.body(), b"2");
        }

        assert_eq!(holders.created(), 1);
        assert_eq!(holders.idle(), 1);
        assert_eq!(mw.objects().created(), 2);
        assert_eq!(mw.objects().idle(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_requests_keep_their_objects_to_themselves() {
        static NEXT_MARKER: AtomicU64 = AtomicU64::new(1);

        let holders = HolderPool::new();
        let mw = PoolMiddleware::new(&holders, || 0u64);
        let key = mw.key();
        let handler = wrapped(&mw, move |req: Request| async move {
            let marker = NEXT_MARKER.fetch_add(1, Ordering::Relaxed);
            let objs: Vec<_> = (0..3).map(|_| req.borrow(&key).unwrap()).collect();
            for obj in &objs {
                *obj.lock() = marker;
            }
            for _ in 0..5 {
                tokio::task::yield_now().await;
                assert!(objs.iter().all(|obj| *obj.lock() == marker));
            }
            Response::text("ok")
        });

        let tasks: Vec<_> = (0..64)
            .map(|_| {
                let handler = Arc::clone(&handler);
                tokio::spawn(async move { handler.call(Request::empty()).await })
            })
            .collect();
        for task in tasks {
            assert_eq!(task.await.unwrap().body(), b"ok");
        }

        assert_eq!(mw.objects().idle(), mw.objects().created());
        assert!(mw.objects().created() <= 64 * 3);
        assert_eq!(holders.idle(), holders.created());
    }

    #[tokio::test]
    async fn stacked_instances_stay_independent() {
        let numbers = HolderPool::new();
        let a = PoolMiddleware::new(&numbers, || 0u32);
        let b = PoolMiddleware::new(&numbers, || 0u32);
        let c = PoolMiddleware::new(&HolderPool::new(), String::new);
        let (ka, kb, kc) = (a.key(), b.key(), c.key());

        let router = Router::new()
            .get("/", move |req: Request| async move {
                let first = req.borrow(&ka).unwrap();
                let second = req.borrow(&ka).unwrap();
                let other = req.borrow(&kb).unwrap();
                req.borrow(&kc).unwrap().lock().push_str("text");
                assert!(!first.ptr_eq(&second));
                assert!(!first.ptr_eq(&other));
                Response::text("ok")
            })
            .layer(a.clone())
            .layer(b.clone())
            .layer(c.clone());

        let (handler, _) = router.lookup(&http::Method::GET, "/").unwrap();
        handler.call(Request::empty()).await;
        handler.call(Request::empty()).await;

        assert_eq!((a.objects().idle(), a.objects().created()), (2, 2));
        assert_eq!((b.objects().idle(), b.objects().created()), (1, 1));
        assert_eq!((c.objects().idle(), c.objects().created()), (1, 1));
        assert_eq!(*c.objects().acquire().lock(), "texttext");
        // one holder per instance per request, two instances share the pool
        assert_eq!(numbers.idle(), 2);
        assert_eq!(numbers.created(), 2);
    }

    #[test]
    fn keys_are_distinct_per_instance() {
        let holders = HolderPool::<u8>::new();
        let a = PoolMiddleware::new(&holders, || 1);
        let b = PoolMiddleware::new(&holders, || 1);

        assert_eq!(a.key(), a.key());
        assert_ne!(a.key(), b.key());
        assert!(format!("{:?}", a.key()).starts_with("PoolKey<u8>"));
    }
}
