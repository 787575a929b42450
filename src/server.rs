//! The proxy's main listener and request dispatch, grounded on this crate's
//! original `server.rs` accept loop (per-connection task, `http1::Builder`
//! with `.with_upgrades()`) and on `original_source/proxy/proxy.go`'s
//! top-level `ServeHTTP` routing between the well-known cert endpoint,
//! CONNECT, and plain requests.

use std::{path::PathBuf, sync::Arc, time::Duration};

use http::Method;
use hyper::{server::conn::http1, service::service_fn};
use hyper_util::rt::TokioIo;
use tokio::{net::TcpListener, task::JoinSet};

use crate::{connect, filter, responder::Responder, snapshotter::Destination, types::Request};

pub use crate::connect::ProxyState;

/// Where the proxy binds — a TCP address or a host-local UNIX socket.
pub enum Bind {
    Tcp(std::net::SocketAddr),
    Unix(PathBuf),
}

pub struct RunConfig {
    pub bind: Bind,
    pub index_out: Option<PathBuf>,
    pub snapshot_full: bool,
    pub shutdown_grace: Duration,
}

/// Runs the proxy until SIGINT/SIGTERM, then drains in-flight connections
/// for up to `shutdown_grace` and persists the snapshot. Persistence failure
/// is logged, never fatal — the process still exits cleanly.
pub async fn run(state: Arc<ProxyState>, cfg: RunConfig) -> anyhow::Result<()> {
    let mut tasks = JoinSet::new();

    match cfg.bind {
        Bind::Tcp(addr) => {
            let listener = TcpListener::bind(addr).await?;
            tracing::info!(%addr, "proxy listening");
            accept_loop(listener, state.clone(), &mut tasks).await;
        }
        Bind::Unix(ref path) => {
            if path.exists() {
                std::fs::remove_file(path).ok();
            }
            let listener = tokio::net::UnixListener::bind(path)?;
            tracing::info!(path = %path.display(), "proxy listening on unix socket");
            accept_loop_unix(listener, state.clone(), &mut tasks).await;
        }
    }

    tracing::info!("shutting down, draining in-flight connections");
    let drain = tokio::time::timeout(cfg.shutdown_grace, async {
        while tasks.join_next().await.is_some() {}
    });
    if drain.await.is_err() {
        tracing::warn!("shutdown grace period elapsed with connections still in flight");
    }

    if let Some(path) = &cfg.index_out {
        if let Err(e) = state.snapshotter.snapshot().save(path, cfg.snapshot_full) {
            tracing::warn!(error = %e, path = %path.display(), "failed to persist snapshot");
        } else {
            tracing::info!(path = %path.display(), size = state.snapshotter.snapshot().size(), "snapshot persisted");
        }
    }

    Ok(())
}

async fn accept_loop(listener: TcpListener, state: Arc<ProxyState>, tasks: &mut JoinSet<()>) {
    let mut shutdown = shutdown_signal();
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            accepted = listener.accept() => {
                let Ok((stream, peer)) = accepted else { continue };
                let state = state.clone();
                tasks.spawn(async move {
                    serve_connection(TokioIo::new(stream), state, peer.to_string()).await;
                });
            }
        }
    }
}

async fn accept_loop_unix(listener: tokio::net::UnixListener, state: Arc<ProxyState>, tasks: &mut JoinSet<()>) {
    let mut shutdown = shutdown_signal();
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            accepted = listener.accept() => {
                let Ok((stream, _)) = accepted else { continue };
                let state = state.clone();
                tasks.spawn(async move {
                    serve_connection(TokioIo::new(stream), state, "unix".to_string()).await;
                });
            }
        }
    }
}

async fn serve_connection<IO>(io: IO, state: Arc<ProxyState>, peer: String)
where
    IO: hyper::rt::Read + hyper::rt::Write + Unpin + Send + 'static,
{
    let service = service_fn(move |req: Request| {
        let state = state.clone();
        let peer = peer.clone();
        async move { Ok::<_, std::convert::Infallible>(dispatch(state, req, &peer).await) }
    });

    let conn = http1::Builder::new().serve_connection(io, service).with_upgrades();
    if let Err(e) = conn.await {
        tracing::debug!(error = %e, "connection closed");
    }
}

/// Routes one request: CONNECT starts TLS interception, the well-known path
/// serves the CA cert, everything else goes to the rule filter as plain
/// HTTP — no interception needed for requests already arriving in the
/// clear.
async fn dispatch(state: Arc<ProxyState>, req: Request, peer: &str) -> crate::types::Response {
    if req.method() == Method::CONNECT {
        return connect::handle(state, req).await;
    }

    if filter::is_cert_endpoint(&req) {
        return filter::cert_endpoint_response(state.ca.cert_pem());
    }

    let Some(dest) = plain_destination(&req) else {
        tracing::warn!(%peer, uri = %req.uri(), "request missing host");
        return http::StatusCode::BAD_REQUEST.into_response();
    };

    filter::handle(&state.rules, &state.snapshotter, &dest, req).await
}

/// Resolves scheme/host/port for a plain (non-CONNECT) proxy request, which
/// arrives either as an absolute-URI or with a bare `Host` header.
fn plain_destination(req: &Request) -> Option<Destination> {
    let scheme = req.uri().scheme_str().unwrap_or("http");
    let scheme: &'static str = if scheme == "https" { "https" } else { "http" };

    let authority = req
        .uri()
        .authority()
        .map(|a| a.to_string())
        .or_else(|| req.headers().get(http::header::HOST).and_then(|h| h.to_str().ok().map(str::to_string)))?;

    let (host, port) = match authority.rsplit_once(':') {
        Some((h, p)) => (h.to_string(), p.parse().unwrap_or(if scheme == "https" { 443 } else { 80 })),
        None => (authority, if scheme == "https" { 443 } else { 80 }),
    };

    Some(Destination { scheme, host, port })
}

fn shutdown_signal() -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>> {
    Box::pin(async {
        let ctrl_c = async {
            tokio::signal::ctrl_c().await.ok();
        };

        #[cfg(unix)]
        let terminate = async {
            let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("installing SIGTERM handler");
            sigterm.recv().await;
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {},
            _ = terminate => {},
        }
    })
}
