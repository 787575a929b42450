//! A one-shot HTTP/HTTPS client for fetching from an origin server, grounded
//! on the connection-and-handshake pattern this crate's
//! `TakoClient`/`TakoTlsClient` used for persistent outbound connections,
//! here opened fresh per request since origins vary request to request
//! rather than being fixed at client construction time.

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::client::conn::http1;
use hyper_util::rt::TokioIo;
use rustls::{ClientConfig, RootCertStore, pki_types::ServerName};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use webpki_roots::TLS_SERVER_ROOTS;

use crate::error::ProxyError;

/// A buffered response: the snapshotter needs the whole body in memory
/// anyway, to hash it and to possibly decompress it.
pub struct UpstreamResponse {
    pub parts: http::response::Parts,
    pub body: Bytes,
}

/// Performs one request against `scheme://host:port`, returning the fully
/// buffered response.
pub async fn fetch(
    scheme: &str,
    host: &str,
    port: u16,
    request: http::Request<Bytes>,
) -> Result<UpstreamResponse, ProxyError> {
    let addr = format!("{host}:{port}");
    let tcp = TcpStream::connect(&addr)
        .await
        .map_err(|e| ProxyError::UpstreamFetch(format!("connect {addr}: {e}")))?;

    let request = request.map(Full::new);

    let response = if scheme.eq_ignore_ascii_case("https") {
        let mut roots = RootCertStore::empty();
        roots.extend(TLS_SERVER_ROOTS.iter().cloned());
        let tls_config = ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();
        let connector = TlsConnector::from(std::sync::Arc::new(tls_config));
        let server_name = ServerName::try_from(host.to_string())
            .map_err(|e| ProxyError::UpstreamFetch(format!("invalid server name {host}: {e}")))?;
        let tls_stream = connector
            .connect(server_name, tcp)
            .await
            .map_err(|e| ProxyError::UpstreamFetch(format!("tls handshake with {host}: {e}")))?;
        send(TokioIo::new(tls_stream), request).await?
    } else {
        send(TokioIo::new(tcp), request).await?
    };

    let (parts, body) = response.into_parts();
    Ok(UpstreamResponse { parts, body })
}

async fn send<IO>(io: IO, request: http::Request<Full<Bytes>>) -> Result<http::Response<Bytes>, ProxyError>
where
    IO: hyper::rt::Read + hyper::rt::Write + Unpin + Send + 'static,
{
    let (mut sender, conn) = http1::handshake(io)
        .await
        .map_err(|e| ProxyError::UpstreamFetch(format!("handshake: {e}")))?;

    tokio::spawn(async move {
        if let Err(err) = conn.await {
            tracing::debug!(error = %err, "upstream connection closed");
        }
    });

    let response = sender.send_request(request).await?;
    let (parts, body) = response.into_parts();
    let collected = body
        .collect()
        .await
        .map_err(|e| ProxyError::UpstreamFetch(format!("reading body: {e}")))?
        .to_bytes();

    Ok(http::Response::from_parts(parts, collected))
}
