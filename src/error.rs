//! Unified error type and the missing-binding sentinel.

use thiserror::Error;

/// Returned by [`borrow`](crate::middleware::borrow) when no pool is bound to
/// the key in the request context.
///
/// This is an integration error, never a transient one: the middleware is not
/// installed on the route, the key belongs to another middleware instance, or
/// the context outlived the request it was bound for. Retrying cannot help.
#[derive(Clone, Copy, Debug, Eq, Error, Hash, PartialEq)]
#[error("pooler middleware missing in request context")]
pub struct MissingContext;

/// The error type returned by pooler's fallible operations.
///
/// Application-level errors (404, 422, etc.) are expressed as HTTP
/// [`Response`](crate::Response) values, not as `Error`s. This type surfaces
/// infrastructure failures (binding to a port, accepting a connection) and
/// lets callers fold [`MissingContext`] into the same type with `?`.
#[derive(Debug, Error)]
pub enum Error {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    MissingContext(#[from] MissingContext),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_context_is_a_stable_sentinel() {
        assert_eq!(MissingContext, MissingContext);
        assert_eq!(
            MissingContext.to_string(),
            "pooler middleware missing in request context"
        );
    }

    #[test]
    fn missing_context_folds_into_error() {
        let err: Error = MissingContext.into();
        assert!(matches!(err, Error::MissingContext(MissingContext)));
        assert_eq!(err.to_string(), MissingContext.to_string());
    }
}
