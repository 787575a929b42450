//! CONNECT handling and TLS interception, grounded on
//! `original_source/proxy/proxy.go`'s `ServeHTTP` CONNECT branch (hijack +
//! `tls.Server` + a synthetic single-connection listener) and on this
//! crate's own `.with_upgrades()` server loop in `src/server.rs`.
//!
//! Rust's hyper gives connection upgrade as a first-class mechanism
//! (`hyper::upgrade::on`), so there is no need for the original's hand-rolled
//! `connListener`: a plain `http1::Builder::serve_connection` already serves
//! exactly one connection's request stream, which is all a single-connection
//! listener needs to be.

use std::sync::Arc;

use http::{Method, StatusCode};
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use tokio_rustls::TlsAcceptor;

use crate::{
    ca::CertificateAuthority,
    error::ProxyError,
    filter,
    responder::Responder,
    rules::RuleSet,
    snapshotter::{Destination, Snapshotter},
    types::{Request, Response},
};

/// Proxy-wide state a CONNECT session needs once it starts serving HTTP
/// over the intercepted TLS socket.
pub struct ProxyState {
    pub ca: CertificateAuthority,
    pub rules: RuleSet,
    pub snapshotter: Snapshotter,
}

/// Parses `CONNECT host:port`, issues a leaf, and arranges to serve TLS on
/// the upgraded connection once the `200` response is flushed to the
/// client. Only port 443 is accepted — CONNECT exists here to terminate TLS,
/// not as a generic tunnel.
pub async fn handle(state: Arc<ProxyState>, req: Request) -> Response {
    debug_assert_eq!(req.method(), &Method::CONNECT);

    let Some((host, port)) = authority_of(&req) else {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    };
    if port != 443 {
        tracing::warn!(%host, port, "rejecting CONNECT to non-443 port");
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }

    let leaf = match state.ca.issue_leaf(&host) {
        Ok(leaf) => leaf,
        Err(e) => {
            tracing::warn!(error = %e, %host, "leaf issuance failed");
            return ProxyError::LeafIssue(e.to_string()).into_response();
        }
    };

    tokio::spawn(async move {
        match hyper::upgrade::on(req).await {
            Ok(upgraded) => {
                if let Err(e) = serve_tls_session(state, upgraded, host, leaf).await {
                    tracing::warn!(error = %e, "CONNECT session ended with error");
                }
            }
            Err(e) => tracing::warn!(error = %e, "CONNECT upgrade failed"),
        }
    });

    Response::new(crate::body::ProxyBody::empty())
}

async fn serve_tls_session(
    state: Arc<ProxyState>,
    upgraded: hyper::upgrade::Upgraded,
    host: String,
    leaf: crate::ca::IssuedLeaf,
) -> Result<(), ProxyError> {
    let mut server_config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(leaf.cert_chain, leaf.key)
        .map_err(|e| ProxyError::LeafIssue(e.to_string()))?;
    server_config.alpn_protocols = vec![b"http/1.1".to_vec()];

    let acceptor = TlsAcceptor::from(Arc::new(server_config));
    let tls_stream = acceptor
        .accept(TokioIo::new(upgraded))
        .await
        .map_err(|e| ProxyError::LeafIssue(format!("TLS handshake with guest for {host}: {e}")))?;

    let io = TokioIo::new(tls_stream);
    let service = service_fn(move |req: Request| {
        let state = state.clone();
        let host = host.clone();
        async move {
            let dest = Destination {
                scheme: "https",
                host,
                port: 443,
            };
            let response = if filter::is_cert_endpoint(&req) {
                filter::cert_endpoint_response(state.ca.cert_pem())
            } else {
                filter::handle(&state.rules, &state.snapshotter, &dest, req).await
            };
            Ok::<_, std::convert::Infallible>(response)
        }
    });

    hyper::server::conn::http1::Builder::new()
        .serve_connection(io, service)
        .await
        .map_err(|e| ProxyError::UpstreamFetch(format!("serving TLS session: {e}")))
}

/// Extracts `(host, port)` from a CONNECT request's authority-form target.
fn authority_of(req: &Request) -> Option<(String, u16)> {
    let authority = req.uri().authority()?;
    let host = authority.host().to_string();
    let port = authority.port_u16().unwrap_or(443);
    Some((host, port))
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use tokio::io::AsyncWriteExt;

    use super::*;
    use crate::{
        blob::{InMemoryKv, KvBlobStore, SharedBlobStore},
        rules::RuleSet,
        snapshot::Snapshot,
    };

    /// Drives a raw CONNECT request through a real `http1::Builder` server
    /// connection over an in-memory duplex pipe, so the handler under test
    /// receives a genuine `hyper::Request<Incoming>` rather than a
    /// hand-built one — `authority_of`/`handle` read from the parsed request
    /// the same way they would off a live socket.
    async fn capture_connect_request(raw: &'static str) -> Request {
        let (mut client, server) = tokio::io::duplex(4096);
        let (tx, rx) = tokio::sync::oneshot::channel();
        let tx = Arc::new(Mutex::new(Some(tx)));

        tokio::spawn(async move {
            let service = service_fn(move |req: Request| {
                if let Some(tx) = tx.lock().unwrap().take() {
                    let _ = tx.send(req);
                }
                async { Ok::<_, std::convert::Infallible>(Response::new(crate::body::ProxyBody::empty())) }
            });
            let _ = hyper::server::conn::http1::Builder::new()
                .serve_connection(TokioIo::new(server), service)
                .with_upgrades()
                .await;
        });

        client.write_all(raw.as_bytes()).await.expect("write CONNECT request");
        rx.await.expect("server captured the request")
    }

    fn test_state() -> Arc<ProxyState> {
        let ca = CertificateAuthority::generate().expect("generate CA");
        let blobs: SharedBlobStore = Arc::new(KvBlobStore::new(InMemoryKv::default(), "test"));
        let snapshotter = Snapshotter::new(Snapshot::new(), blobs, true);
        Arc::new(ProxyState {
            ca,
            rules: RuleSet::new(vec![]),
            snapshotter,
        })
    }

    #[tokio::test]
    async fn authority_of_parses_host_and_port() {
        let req = capture_connect_request("CONNECT example.test:8080 HTTP/1.1\r\nHost: example.test:8080\r\n\r\n").await;
        assert_eq!(authority_of(&req), Some(("example.test".to_string(), 8080)));
    }

    #[tokio::test]
    async fn connect_to_non_443_port_is_rejected() {
        let req = capture_connect_request("CONNECT example.test:80 HTTP/1.1\r\nHost: example.test:80\r\n\r\n").await;
        let response = handle(test_state(), req).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
