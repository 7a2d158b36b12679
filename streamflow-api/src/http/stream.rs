//! Stream relay HTTP endpoints
//!
//! Unauthenticated on purpose: native media elements cannot attach custom
//! headers, so the relay must be reachable with nothing but a URL.

use axum::{
    extract::{rejection::QueryRejection, Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use streamflow_core::config::ServerConfig;
use streamflow_proxy::{Diagnostics, ProxyError, RedirectHop, RelayContext, StreamRequest};
use tracing::{debug, info};

use crate::http::error::{AppError, AppResult};
use crate::http::AppState;

/// Path of the relay endpoint, query key included
pub const PROXY_PATH: &str = "/api/stream/proxy?url=";

pub fn create_stream_router() -> Router<AppState> {
    Router::new()
        .route("/proxy", get(proxy_stream).options(preflight))
        .route("/resolve", get(resolve_stream).options(preflight))
        .route("/check", get(check_stream).options(preflight))
}

/// `url` arrives percent-decoded exactly once by the extractor.
#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    pub url: Option<String>,
}

/// Malformed query strings get the same JSON error body as a bad `url`.
fn stream_request(query: Result<Query<StreamQuery>, QueryRejection>) -> AppResult<StreamRequest> {
    let Query(query) = query.map_err(|rejection| {
        debug!(error = %rejection.body_text(), "Rejected stream query");
        AppError::from(ProxyError::invalid_request("Invalid query string"))
    })?;
    Ok(StreamRequest::parse(query.url.as_deref())?)
}

/// GET /api/stream/proxy?url= - relay media bytes or a rewritten manifest
pub async fn proxy_stream(
    State(state): State<AppState>,
    query: Result<Query<StreamQuery>, QueryRejection>,
    headers: HeaderMap,
) -> AppResult<Response> {
    let request = stream_request(query)?;
    info!(url = %request.raw_url, kind = ?request.kind, "Proxy request");

    let ctx = RelayContext::new(relay_base(&state.config.server, &headers))
        .with_range(headers.get(header::RANGE).cloned());

    let relayed = state.relay.relay(request, &ctx).await?;

    let mut response = relayed.into_response();
    apply_relay_cors(response.headers_mut());
    Ok(response)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveResponse {
    pub success: bool,
    pub original_url: String,
    pub final_url: String,
    pub redirected: bool,
    pub redirect_chain: Vec<RedirectHop>,
}

/// GET /api/stream/resolve?url= - follow redirects and report where they lead
pub async fn resolve_stream(
    State(state): State<AppState>,
    query: Result<Query<StreamQuery>, QueryRejection>,
) -> AppResult<Json<ResolveResponse>> {
    let request = stream_request(query)?;
    let resolution = state.relay.resolver().resolve(&request.target_url).await;

    if let Some(error) = resolution.error {
        return Err(error.into());
    }

    Ok(Json(ResolveResponse {
        success: true,
        redirected: resolution.redirected(),
        original_url: resolution.original_url,
        final_url: resolution.final_url,
        redirect_chain: resolution.redirect_chain,
    }))
}

#[derive(Debug, Serialize)]
pub struct CheckResponse {
    pub success: bool,
    pub diagnostics: Diagnostics,
}

/// GET /api/stream/check?url= - diagnostic probe; upstream failures are data
pub async fn check_stream(
    State(state): State<AppState>,
    query: Result<Query<StreamQuery>, QueryRejection>,
) -> AppResult<Json<CheckResponse>> {
    let request = stream_request(query)?;
    let diagnostics = state.relay.resolver().check(&request.target_url).await;

    Ok(Json(CheckResponse {
        success: true,
        diagnostics,
    }))
}

/// OPTIONS - short-circuit with an empty 200
pub async fn preflight() -> impl IntoResponse {
    let mut headers = HeaderMap::new();
    apply_relay_cors(&mut headers);
    (StatusCode::OK, headers)
}

/// Prefix that nested manifest references are wrapped in.
///
/// Uses the configured public URL when set, otherwise the inbound request's
/// `X-Forwarded-Proto` and `Host`.
#[must_use]
pub fn relay_base(server: &ServerConfig, headers: &HeaderMap) -> String {
    if let Some(public) = server.public_base_url.as_deref() {
        return format!("{}{PROXY_PATH}", public.trim_end_matches('/'));
    }

    let proto = headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or("http");

    let host = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .map_or_else(|| format!("localhost:{}", server.http_port), str::to_string);

    format!("{proto}://{host}{PROXY_PATH}")
}

fn apply_relay_cors(headers: &mut HeaderMap) {
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, OPTIONS"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Content-Type, Range"),
    );
    headers.insert(
        header::ACCESS_CONTROL_EXPOSE_HEADERS,
        HeaderValue::from_static("Content-Type, Content-Length, Content-Range, Accept-Ranges"),
    );
}
