//! Error taxonomy for the proxy.
//!
//! Per-request errors carry enough information to pick an HTTP status; they
//! never abort the connection they arrived on. Startup failures are reported
//! through `anyhow::Error` at the CLI boundary instead (see `src/main.rs`).

use std::fmt;

use http::StatusCode;

use crate::{responder::Responder, types::Response};

/// Taxonomy of everything that can go wrong while serving one request.
#[derive(Debug)]
pub enum ProxyError {
    /// No rule matched, or the matching rule was `REJECT`.
    RuleReject,
    /// A `LOCKED` rule matched but no snapshot entry exists for the fingerprint.
    LockedMiss,
    /// The transport to the origin failed (connect, TLS, or protocol error).
    UpstreamFetch(String),
    /// The captured response declared `Content-Encoding: gzip` but the body
    /// did not decompress cleanly.
    CaptureDecode(String),
    /// A per-host leaf certificate could not be issued.
    LeafIssue(String),
    /// Reading or writing a blob failed for a reason other than "not found".
    BlobIo(String),
}

impl fmt::Display for ProxyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProxyError::RuleReject => write!(f, "request rejected by rule filter"),
            ProxyError::LockedMiss => write!(f, "locked rule matched with no cached response"),
            ProxyError::UpstreamFetch(msg) => write!(f, "upstream fetch failed: {msg}"),
            ProxyError::CaptureDecode(msg) => write!(f, "capture decode failed: {msg}"),
            ProxyError::LeafIssue(msg) => write!(f, "leaf certificate issuance failed: {msg}"),
            ProxyError::BlobIo(msg) => write!(f, "blob store I/O error: {msg}"),
        }
    }
}

impl std::error::Error for ProxyError {}

impl From<std::io::Error> for ProxyError {
    fn from(e: std::io::Error) -> Self {
        ProxyError::BlobIo(e.to_string())
    }
}

impl From<hyper::Error> for ProxyError {
    fn from(e: hyper::Error) -> Self {
        ProxyError::UpstreamFetch(e.to_string())
    }
}

impl From<rcgen::Error> for ProxyError {
    fn from(e: rcgen::Error) -> Self {
        ProxyError::LeafIssue(e.to_string())
    }
}

impl ProxyError {
    /// The HTTP status this error surfaces to the client.
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::RuleReject | ProxyError::LockedMiss => StatusCode::FORBIDDEN,
            ProxyError::UpstreamFetch(_) | ProxyError::CaptureDecode(_) | ProxyError::BlobIo(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ProxyError::LeafIssue(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl Responder for ProxyError {
    fn into_response(self) -> Response {
        let status = self.status();
        tracing::warn!(error = %self, status = %status, "request failed");
        (status, self.to_string()).into_response()
    }
}
