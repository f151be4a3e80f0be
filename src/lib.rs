//! # pooler
//!
//! Request-scoped object pooling for a minimal hyper-based HTTP framework.
//!
//! Handlers borrow reusable objects (buffers, scratch structs, encoders)
//! for the duration of one request and never give them back by hand. The
//! [`PoolMiddleware`](middleware::PoolMiddleware) wrapping the route takes
//! every borrowed object back when the request ends: on normal return, on
//! panic (before the panic continues), and when the request future is
//! dropped.
//!
//! The rest of the crate is the smallest framework that can host it:
//! radix-tree routing via [`matchit`], hyper connections, graceful shutdown.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use pooler::middleware::{HolderPool, PoolMiddleware};
//! use pooler::{MissingContext, Request, Response, Router, Server};
//!
//! #[derive(Default)]
//! struct Scratch {
//!     words: Vec<String>,
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     // one holder pool per pooled type, shared by every middleware for it
//!     let holders = HolderPool::new();
//!     let scratch = PoolMiddleware::new(&holders, Scratch::default);
//!     let key = scratch.key();
//!
//!     let app = Router::new()
//!         .get("/echo/{word}", move |req: Request| async move {
//!             let scratch = req.borrow(&key)?;
//!             let mut scratch = scratch.lock();
//!             scratch.words.clear();
//!             scratch.words.push(req.param("word").unwrap_or("").to_uppercase());
//!             Ok::<_, MissingContext>(Response::text(scratch.words.join(" ")))
//!         })
//!         .layer(scratch);
//!
//!     Server::bind("0.0.0.0:3000").serve(app).await.unwrap();
//! }
//! ```

mod context;
mod error;
mod handler;
mod pool;
mod request;
mod response;
mod router;
mod server;

pub mod middleware;

pub use context::{Context, KeyId};
pub use error::{Error, MissingContext};
pub use handler::{BoxFuture, BoxedHandler, ErasedHandler, Handler};
pub use pool::{Pool, Pooled};
pub use request::Request;
pub use response::{ContentType, IntoResponse, Response, ResponseBuilder};
pub use router::Router;
pub use server::Server;
