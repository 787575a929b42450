//! Conversion of plain Rust values into [`Response`]s.
//!
//! Trimmed from the framework's original `Responder` trait to the handful of
//! conversions the proxy actually returns: plain bodies, status-code
//! shorthands, and [`ProxyError`](crate::error::ProxyError).

use bytes::Bytes;
use http::StatusCode;
use http_body_util::Full;

use crate::{body::ProxyBody, types::Response};

/// Converts a value into an HTTP response.
pub trait Responder {
    fn into_response(self) -> Response;
}

impl Responder for Response {
    fn into_response(self) -> Response {
        self
    }
}

impl Responder for ProxyBody {
    fn into_response(self) -> Response {
        Response::new(self)
    }
}

impl Responder for &'static str {
    fn into_response(self) -> Response {
        Response::new(ProxyBody::new(Full::from(Bytes::from_static(
            self.as_bytes(),
        ))))
    }
}

/// A bare status code with an empty body — the common case for 403/500/503.
impl Responder for StatusCode {
    fn into_response(self) -> Response {
        let mut res = Response::new(ProxyBody::empty());
        *res.status_mut() = self;
        res
    }
}

impl<R> Responder for (StatusCode, R)
where
    R: Into<ProxyBody>,
{
    fn into_response(self) -> Response {
        let (status, body) = self;
        let mut res = Response::new(body.into());
        *res.status_mut() = status;
        res
    }
}
