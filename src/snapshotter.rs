//! The core per-request cache/capture state machine, grounded on
//! `original_source/proxy/snapshotter.go`'s `ServeHTTP`/`captureResponse`/
//! `followRedirect`, reworked from a buffered `httptest.ResponseRecorder`
//! reverse-proxy pattern into explicit buffered fetch + decode + capture
//! steps over this crate's [`crate::upstream`] client.

use std::io::Read;

use bytes::Bytes;
use http::{HeaderValue, Method, StatusCode, header};
use http_body_util::BodyExt;

use crate::{
    blob::SharedBlobStore,
    error::ProxyError,
    snapshot::{Snapshot, UrlRecord},
    types::{Request, Response},
    upstream::{self, UpstreamResponse},
};

/// The three orthogonal admission tags the rule filter attaches to a
/// request. `ALLOW` sets none of them.
#[derive(Debug, Clone, Copy, Default)]
pub struct Mode {
    pub locked: bool,
    pub refresh: bool,
    pub no_store: bool,
}

/// Where a request is actually headed — resolved by whichever dispatcher
/// (plain HTTP listener or CONNECT-upgraded TLS session) produced it, since
/// neither the snapshot key nor the rule filter needs a real network
/// address, but the snapshotter does.
#[derive(Debug, Clone)]
pub struct Destination {
    pub scheme: &'static str,
    pub host: String,
    pub port: u16,
}

pub struct Snapshotter {
    snapshot: Snapshot,
    blobs: SharedBlobStore,
    include_query: bool,
}

impl Snapshotter {
    pub fn new(snapshot: Snapshot, blobs: SharedBlobStore, include_query: bool) -> Snapshotter {
        Snapshotter {
            snapshot,
            blobs,
            include_query,
        }
    }

    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    /// `host + path[?query]` — the query string is included in the
    /// fingerprint by default, since many origins vary content by query;
    /// `include_query` acts as the strip knob for origins that don't.
    pub fn fingerprint(&self, dest: &Destination, req: &Request) -> String {
        let path = req.uri().path();
        match req.uri().query() {
            Some(q) if self.include_query && !q.is_empty() => {
                format!("{}{path}?{q}", dest.host)
            }
            _ => format!("{}{path}", dest.host),
        }
    }

    /// Runs the full cache-then-capture procedure for one request.
    pub async fn serve(&self, dest: &Destination, req: Request, mode: Mode) -> Result<Response, ProxyError> {
        let fingerprint = self.fingerprint(dest, &req);
        let method = req.method().clone();

        if !mode.refresh && !mode.no_store {
            if let Some(record) = self.snapshot.get(&fingerprint) {
                if let Some(response) = self.serve_from_cache(&method, &record).await? {
                    return Ok(response);
                }
            }
        }

        if mode.locked {
            return Err(ProxyError::LockedMiss);
        }

        self.capture(dest, &fingerprint, &method, req, mode).await
    }

    /// Step 2: serve `GET`/`HEAD` from the blob store if the record's bytes
    /// are present and intact. Returns `Ok(None)` on any kind of miss so the
    /// caller falls through to capture (or to a locked 403).
    async fn serve_from_cache(
        &self,
        method: &Method,
        record: &UrlRecord,
    ) -> Result<Option<Response>, ProxyError> {
        if *method != Method::GET && *method != Method::HEAD {
            return Ok(None);
        }

        let Some(bytes) = self.blobs.load(&record.sha256).await? else {
            return Ok(None);
        };
        if bytes.len() != record.content_length {
            return Ok(None);
        }

        if *method == Method::HEAD {
            let mut response = Response::new(Bytes::new().into());
            *response.status_mut() = StatusCode::OK;
            return Ok(Some(response));
        }

        let mut response = Response::new(bytes.into());
        *response.status_mut() = record.status();
        if !record.content_type.is_empty() {
            if let Ok(value) = HeaderValue::from_str(&record.content_type) {
                response.headers_mut().insert(header::CONTENT_TYPE, value);
            }
        }
        Ok(Some(response))
    }

    /// Steps 4 onward: forward upstream, follow at most one redirect,
    /// transparently decode gzip, capture on `GET` unless `no_store`, and
    /// copy the result back to the client.
    async fn capture(
        &self,
        dest: &Destination,
        fingerprint: &str,
        method: &Method,
        req: Request,
        mode: Mode,
    ) -> Result<Response, ProxyError> {
        let (parts, incoming) = req.into_parts();
        let body = incoming
            .collect()
            .await
            .map_err(|e| ProxyError::UpstreamFetch(format!("reading client body: {e}")))?
            .to_bytes();

        let outbound = http::Request::from_parts(parts, body);
        let mut upstream_response = upstream::fetch(dest.scheme, &dest.host, dest.port, outbound).await?;

        if matches!(
            upstream_response.parts.status,
            StatusCode::TEMPORARY_REDIRECT | StatusCode::PERMANENT_REDIRECT | StatusCode::FOUND
        ) {
            upstream_response = self.follow_redirect(dest, upstream_response).await?;
        }

        let mut body = upstream_response.body;
        let mut headers = upstream_response.parts.headers;
        if headers
            .get(header::CONTENT_ENCODING)
            .is_some_and(|v| v.as_bytes().eq_ignore_ascii_case(b"gzip"))
        {
            body = decompress_gzip(&body)?;
            headers.remove(header::CONTENT_ENCODING);
            headers.remove(header::CONTENT_LENGTH);
        }

        let status = upstream_response.parts.status;
        let content_type = headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        if *method == Method::GET && !mode.no_store {
            self.capture_if_get(fingerprint, status, &content_type, &body).await;
        }

        let mut response = Response::new(body.into());
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        Ok(response)
    }

    async fn capture_if_get(&self, fingerprint: &str, status: StatusCode, content_type: &str, body: &Bytes) {
        let record = UrlRecord::new(status, content_type, body);
        if let Err(e) = self.blobs.store(body.clone()).await {
            tracing::warn!(error = %e, fingerprint, "failed to store captured blob");
            return;
        }
        self.snapshot.set(fingerprint, record);
    }

    async fn follow_redirect(
        &self,
        dest: &Destination,
        response: UpstreamResponse,
    ) -> Result<UpstreamResponse, ProxyError> {
        let location = response
            .parts
            .headers
            .get(header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ProxyError::UpstreamFetch("redirect with no Location header".to_string()))?;

        let base = format!("{}://{}:{}/", dest.scheme, dest.host, dest.port);
        let target = url::Url::options()
            .base_url(Some(&url::Url::parse(&base).map_err(|e| ProxyError::UpstreamFetch(e.to_string()))?))
            .parse(location)
            .map_err(|e| ProxyError::UpstreamFetch(format!("invalid redirect location {location}: {e}")))?;

        tracing::debug!(%location, "following redirect");

        let redirect_scheme: &'static str = if target.scheme() == "https" { "https" } else { "http" };
        let redirect_host = target.host_str().unwrap_or(&dest.host).to_string();
        let redirect_port = target.port().unwrap_or(if redirect_scheme == "https" { 443 } else { 80 });

        let mut path = target.path().to_string();
        if let Some(q) = target.query() {
            path.push('?');
            path.push_str(q);
        }

        let request = http::Request::builder()
            .method(Method::GET)
            .uri(path)
            .body(Bytes::new())
            .map_err(|e| ProxyError::UpstreamFetch(e.to_string()))?;

        upstream::fetch(redirect_scheme, &redirect_host, redirect_port, request).await
    }
}

fn decompress_gzip(body: &Bytes) -> Result<Bytes, ProxyError> {
    let mut decoder = flate2::read::GzDecoder::new(&body[..]);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| ProxyError::CaptureDecode(e.to_string()))?;
    Ok(Bytes::from(out))
}
