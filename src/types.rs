//! Core type aliases shared across the proxy.
//!
//! These mirror the `Request`/`Response`/`BoxError` aliases the framework this
//! proxy grew out of used to standardize its handler signatures, trimmed down
//! to what a forward proxy needs (no middleware chain type is required here:
//! dispatch is a flat match over CONNECT vs. plain requests, see
//! [`crate::server`]).

use bytes::Bytes;
use http_body_util::combinators::UnsyncBoxBody;
use hyper::body::Incoming;

/// Inbound HTTP request as delivered by Hyper's server connection.
pub type Request = hyper::Request<Incoming>;

/// Outbound HTTP response using the proxy's body wrapper.
pub type Response = hyper::Response<crate::body::ProxyBody>;

/// Boxed, type-erased body used internally by [`crate::body::ProxyBody`].
pub(crate) type BoxBody = UnsyncBoxBody<Bytes, BoxError>;

/// Boxed error type for thread-safe error handling across async boundaries.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;
