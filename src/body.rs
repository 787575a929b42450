//! HTTP body wrapper used for every response the proxy writes.
//!
//! `ProxyBody` type-erases whatever concrete `http_body::Body` a response was
//! built from (a static buffer captured from origin, an empty 403/500 body,
//! or the CA certificate's PEM bytes) behind one boxed type so the server
//! loop in [`crate::server`] can treat all responses uniformly.

use std::{
    fmt::Debug,
    pin::Pin,
    task::{Context, Poll},
};

use bytes::Bytes;

use futures_util::{Stream, TryStreamExt};
use http_body_util::{BodyExt, Empty};
use hyper::body::{Body, Frame, SizeHint};

use crate::types::{BoxBody, BoxError};

/// Type-erased HTTP body.
pub struct ProxyBody(BoxBody);

impl ProxyBody {
    /// Wraps any compatible body implementation.
    pub fn new<B>(body: B) -> Self
    where
        B: Body<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        Self(body.map_err(|e| e.into()).boxed_unsync())
    }

    /// Builds a body from a stream of byte chunks, for responses whose bytes
    /// were not fully buffered upfront.
    pub fn from_stream<S, E>(stream: S) -> Self
    where
        S: Stream<Item = Result<Bytes, E>> + Send + 'static,
        E: Into<BoxError> + Debug + 'static,
    {
        let stream = stream.map_err(Into::into).map_ok(Frame::data);
        Self(http_body_util::StreamBody::new(stream).boxed_unsync())
    }

    /// An empty body — used for 403/500 responses and `HEAD` hits.
    pub fn empty() -> Self {
        Self::new(Empty::new())
    }
}

impl Default for ProxyBody {
    fn default() -> Self {
        Self::empty()
    }
}

impl From<()> for ProxyBody {
    fn from(_: ()) -> Self {
        Self::empty()
    }
}

impl From<&str> for ProxyBody {
    fn from(buf: &str) -> Self {
        Self::new(http_body_util::Full::from(buf.to_owned().into_bytes()))
    }
}

macro_rules! body_from_impl {
    ($ty:ty) => {
        impl From<$ty> for ProxyBody {
            fn from(buf: $ty) -> Self {
                Self::new(http_body_util::Full::from(buf))
            }
        }
    };
}

body_from_impl!(String);
body_from_impl!(Vec<u8>);
body_from_impl!(Bytes);

impl Body for ProxyBody {
    type Data = Bytes;
    type Error = BoxError;

    #[inline]
    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        Pin::new(&mut self.0).poll_frame(cx)
    }

    #[inline]
    fn size_hint(&self) -> SizeHint {
        self.0.size_hint()
    }

    #[inline]
    fn is_end_stream(&self) -> bool {
        self.0.is_end_stream()
    }
}
