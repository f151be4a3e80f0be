//! Pooled `User` example.
//!
//! Run with:
//!   RUST_LOG=debug cargo run --example user
//!
//! Try:
//!   curl http://localhost:8080/user
//!
//! With `RUST_LOG=debug` the "pooled object created" line shows up only
//! when concurrent requests outgrow the pool; sequential requests keep
//! reusing the same `User`.

use std::time::{SystemTime, UNIX_EPOCH};

use http::StatusCode;
use pooler::middleware::{HolderPool, PoolKey, PoolMiddleware};
use pooler::{MissingContext, Request, Response, Router, Server};
use serde::Serialize;

#[derive(Debug, Default, Serialize)]
struct User {
    name: String,
    time: u64,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let holders = HolderPool::new();
    let users = PoolMiddleware::new(&holders, User::default);
    let key = users.key();

    let app = Router::new()
        .get("/user", move |req: Request| get_user(req, key))
        .layer(users);

    Server::bind("0.0.0.0:8080")
        .serve(app)
        .await
        .expect("server error");
}

// GET /user
async fn get_user(req: Request, key: PoolKey<User>) -> Result<Response, MissingContext> {
    let user = req.borrow(&key)?;
    let mut user = user.lock();

    user.name = "Björn Gerdau".to_owned();
    user.time = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();

    Ok(match serde_json::to_vec(&*user) {
        Ok(bytes) => Response::json(bytes),
        Err(_) => Response::status(StatusCode::INTERNAL_SERVER_ERROR),
    })
}
