//! The rule-based admission handler, grounded on
//! `original_source/proxy/filter.go`'s `Filter.ServeHTTP` — reworked from
//! Go's request-context tagging (`context.WithValue`) into an explicit
//! [`Mode`] value threaded alongside the request.

use http::StatusCode;

use crate::{
    error::ProxyError,
    responder::Responder,
    rules::{Action, RuleSet},
    snapshotter::{Destination, Mode, Snapshotter},
    types::{Request, Response},
};

/// Translates a rule's action into the snapshotter's three orthogonal
/// booleans. `REJECT` has no `Mode` — it never reaches the snapshotter.
fn mode_for(action: Action) -> Option<Mode> {
    match action {
        Action::Reject => None,
        Action::Locked => Some(Mode {
            locked: true,
            ..Mode::default()
        }),
        Action::Allow => Some(Mode::default()),
        Action::Refresh => Some(Mode {
            refresh: true,
            ..Mode::default()
        }),
        Action::RefreshNoStore => Some(Mode {
            refresh: true,
            no_store: true,
            ..Mode::default()
        }),
    }
}

/// Matches `host + path` against the rule set and dispatches to the
/// snapshotter, or rejects. No match is treated identically to an explicit
/// `REJECT`.
pub async fn handle(rules: &RuleSet, snapshotter: &Snapshotter, dest: &Destination, req: Request) -> Response {
    let url = format!("{}{}", dest.host, req.uri().path());
    tracing::info!(%url, "request");

    let mode = rules.evaluate(&url).and_then(mode_for);

    let Some(mode) = mode else {
        tracing::info!(%url, "reject");
        return ProxyError::RuleReject.into_response();
    };

    match snapshotter.serve(dest, req, mode).await {
        Ok(response) => response,
        Err(e) => e.into_response(),
    }
}

/// The well-known CA-certificate endpoint handler, checked before rule
/// evaluation since it isn't subject to admission control.
pub fn is_cert_endpoint(req: &Request) -> bool {
    req.method() == http::Method::GET && req.uri().path() == "/.well-known/hermit/proxy-cert"
}

pub fn cert_endpoint_response(pem: &str) -> Response {
    let mut response = Response::new(pem.to_string().into());
    *response.status_mut() = StatusCode::OK;
    response
        .headers_mut()
        .insert(
            http::header::CONTENT_TYPE,
            http::HeaderValue::from_static("application/x-pem-file"),
        );
    response
}
