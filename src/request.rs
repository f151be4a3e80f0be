//! Incoming HTTP request type.

use std::collections::HashMap;

use bytes::Bytes;
use http::Method;

use crate::context::Context;
use crate::error::MissingContext;
use crate::middleware::PoolKey;
use crate::pool::Pooled;

/// An incoming HTTP request with its body fully read.
pub struct Request {
    pub(crate) method: Method,
    pub(crate) path: String,
    pub(crate) headers: Vec<(String, String)>,
    pub(crate) body: Bytes,
    pub(crate) params: HashMap<String, String>,
    pub(crate) context: Context,
}

impl Request {
    pub(crate) fn new(
        method: Method,
        path: String,
        headers: Vec<(String, String)>,
        body: Bytes,
    ) -> Self {
        Self { method, path, headers, body, params: HashMap::new(), context: Context::new() }
    }

    #[cfg(test)]
    pub(crate) fn empty() -> Self {
        Self::new(Method::GET, "/".to_owned(), Vec::new(), Bytes::new())
    }

    pub fn method(&self) -> &Method { &self.method }
    pub fn path(&self) -> &str { &self.path }
    pub fn headers(&self) -> &[(String, String)] { &self.headers }
    pub fn body(&self) -> &[u8] { &self.body }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Returns a named path parameter.
    ///
    /// For a route `/users/{id}`, `req.param("id")` on `/users/42` returns `Some("42")`.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    /// Bindings placed on this request by middleware.
    pub fn context(&self) -> &Context { &self.context }

    /// Borrows a pooled object for the rest of this request.
    ///
    /// Shorthand for [`middleware::borrow(req.context(), key)`](crate::middleware::borrow).
    pub fn borrow<T: Send + 'static>(&self, key: &PoolKey<T>) -> Result<Pooled<T>, MissingContext> {
        crate::middleware::borrow(&self.context, key)
    }
}
