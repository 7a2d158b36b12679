//! Segment/media relay
//!
//! Fetches origin bytes on the caller's behalf and re-serves them with
//! normalized headers. Manifests are buffered and rewritten; everything else
//! is piped through as a stream.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::body::Body;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures::stream::{BoxStream, Stream, StreamExt};
use http::header::{self, HeaderMap, HeaderName, HeaderValue};
use http::StatusCode;
use streamflow_core::config::RelayConfig;
use tracing::{debug, info, warn};
use url::Url;

use crate::client::{browser_identity, minimal_identity, UpstreamClients, MANIFEST_ACCEPT};
use crate::error::{ProxyError, ProxyErrorKind};
use crate::manifest::{ManifestDocument, ManifestRewriter, ManifestSource};
use crate::request::StreamRequest;
use crate::resolver::RedirectResolver;

pub const MANIFEST_CONTENT_TYPE: &str = "application/vnd.apple.mpegurl";
pub const DEFAULT_MEDIA_CONTENT_TYPE: &str = "video/mp2t";
const LIVE_CACHE_CONTROL: &str = "no-cache, no-store, must-revalidate";
const X_ACCEL_BUFFERING: HeaderName = HeaderName::from_static("x-accel-buffering");

/// Per-call inputs taken from the inbound request
#[derive(Debug, Clone, Default)]
pub struct RelayContext {
    /// Inbound `Range` header, forwarded verbatim
    pub range: Option<HeaderValue>,
    /// Prefix that nested manifest references are wrapped in (ends with `url=`)
    pub relay_base: String,
}

impl RelayContext {
    #[must_use]
    pub fn new(relay_base: impl Into<String>) -> Self {
        Self {
            range: None,
            relay_base: relay_base.into(),
        }
    }

    #[must_use]
    pub fn with_range(mut self, range: Option<HeaderValue>) -> Self {
        self.range = range;
        self
    }
}

/// What the relay needs from an upstream answer, independent of the HTTP client
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    /// Where the body was actually served from, after redirects
    pub url: Url,
    pub body: RelayStream,
}

impl UpstreamResponse {
    fn from_reqwest(response: reqwest::Response) -> Self {
        let status = response.status();
        let headers = response.headers().clone();
        let url = response.url().clone();
        let body = RelayStream::new(url.to_string(), response.bytes_stream().boxed());
        Self {
            status,
            headers,
            url,
            body,
        }
    }
}

pub enum RelayBody {
    Full(Bytes),
    Stream(RelayStream),
}

/// A relay result ready to hand to axum
pub struct RelayResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: RelayBody,
}

impl IntoResponse for RelayResponse {
    fn into_response(self) -> Response {
        let body = match self.body {
            RelayBody::Full(bytes) => Body::from(bytes),
            RelayBody::Stream(stream) => Body::from_stream(stream),
        };
        (self.status, self.headers, body).into_response()
    }
}

/// Upstream byte stream scoped to one relay call.
///
/// Dropping it (caller disconnect, completion or error) releases the
/// upstream connection.
pub struct RelayStream {
    url: String,
    inner: BoxStream<'static, Result<Bytes, reqwest::Error>>,
    bytes_relayed: u64,
    finished: bool,
    failed: bool,
}

impl RelayStream {
    #[must_use]
    pub fn new(url: String, inner: BoxStream<'static, Result<Bytes, reqwest::Error>>) -> Self {
        Self {
            url,
            inner,
            bytes_relayed: 0,
            finished: false,
            failed: false,
        }
    }

    #[must_use]
    pub const fn bytes_relayed(&self) -> u64 {
        self.bytes_relayed
    }
}

impl Stream for RelayStream {
    type Item = Result<Bytes, ProxyError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.finished || this.failed {
            return Poll::Ready(None);
        }

        match this.inner.poll_next_unpin(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                this.bytes_relayed += chunk.len() as u64;
                Poll::Ready(Some(Ok(chunk)))
            }
            // Headers are already committed; returning an error makes hyper
            // cut the connection instead of writing a body.
            Poll::Ready(Some(Err(e))) => {
                this.failed = true;
                let error = ProxyError::stream_pipe(format!("Stream error: {e}"));
                warn!(
                    url = %this.url,
                    kind = %ProxyErrorKind::StreamPipeError,
                    bytes = this.bytes_relayed,
                    error = %e,
                    "Upstream stream failed mid-transfer"
                );
                Poll::Ready(Some(Err(error)))
            }
            Poll::Ready(None) => {
                this.finished = true;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for RelayStream {
    fn drop(&mut self) {
        if self.finished {
            debug!(url = %self.url, bytes = self.bytes_relayed, "Stream relayed to completion");
        } else if !self.failed {
            info!(
                url = %self.url,
                bytes = self.bytes_relayed,
                "Caller disconnected, upstream stream released"
            );
        }
    }
}

/// Shared relay service. Holds no per-request state.
#[derive(Debug, Clone)]
pub struct Relay {
    clients: UpstreamClients,
    resolver: RedirectResolver,
    config: Arc<RelayConfig>,
}

impl Relay {
    pub fn new(config: RelayConfig) -> Result<Self, ProxyError> {
        let config = Arc::new(config);
        let clients = UpstreamClients::new(&config)?;
        let resolver = RedirectResolver::new(clients.clone(), Arc::clone(&config));
        Ok(Self {
            clients,
            resolver,
            config,
        })
    }

    #[must_use]
    pub const fn resolver(&self) -> &RedirectResolver {
        &self.resolver
    }

    #[must_use]
    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Relay one inbound call, dispatching on the classified kind.
    pub async fn relay(
        &self,
        request: StreamRequest,
        ctx: &RelayContext,
    ) -> Result<RelayResponse, ProxyError> {
        if request.kind.is_manifest() {
            self.manifest(ManifestSource::Remote(request.target_url), &ctx.relay_base)
                .await
        } else {
            self.media(request, ctx).await
        }
    }

    /// Rewrite a manifest from either source so nested references re-enter the relay.
    pub async fn manifest(
        &self,
        source: ManifestSource,
        relay_base: &str,
    ) -> Result<RelayResponse, ProxyError> {
        let (text, base_url) = match source {
            ManifestSource::Remote(url) => {
                let (text, served_from) = self.fetch_manifest(&url).await?;
                (text, Some(served_from))
            }
            ManifestSource::Inline { text, base_url } => (text, base_url),
        };

        let document = ManifestDocument::parse(&text);
        let rewriter = ManifestRewriter::new(base_url.as_ref(), relay_base);
        let rewritten = document.rewrite(&rewriter);

        debug!(
            base = base_url.as_ref().map_or("", Url::as_str),
            lines = document.len(),
            references = document.reference_count(),
            "Manifest rewritten"
        );

        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static(MANIFEST_CONTENT_TYPE),
        );
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));

        Ok(RelayResponse {
            status: StatusCode::OK,
            headers,
            body: RelayBody::Full(Bytes::from(rewritten)),
        })
    }

    async fn fetch_manifest(&self, url: &Url) -> Result<(String, Url), ProxyError> {
        info!(url = %url, "Fetching manifest");

        let mut identity = browser_identity(url, &self.config.browser_user_agent);
        identity.insert(header::ACCEPT, HeaderValue::from_static(MANIFEST_ACCEPT));

        let mut upstream = self
            .fetch(url, identity, None, self.config.fetch_timeout())
            .await?;

        if upstream.status.as_u16() == self.config.edge_error_status {
            upstream = self.retry_edge_error(url, None).await?;
        }

        if upstream.status.is_client_error() || upstream.status.is_server_error() {
            warn!(url = %url, status = upstream.status.as_u16(), "Manifest upstream returned error status");
            return Err(ProxyError::upstream_http(upstream.status, "manifest").with_original_url(url.as_str()));
        }

        if upstream.url != *url {
            info!(from = %url, to = %upstream.url, "Manifest redirected");
        }

        // Playlists are small; the whole read shares the fetch budget
        let mut body = Vec::new();
        let read = tokio::time::timeout(self.config.fetch_timeout(), async {
            while let Some(chunk) = upstream.body.next().await {
                body.extend_from_slice(&chunk?);
            }
            Ok::<_, ProxyError>(())
        })
        .await;

        match read {
            Ok(Ok(())) => Ok((String::from_utf8_lossy(&body).into_owned(), upstream.url)),
            Ok(Err(error)) => Err(error.with_original_url(url.as_str())),
            Err(_) => {
                warn!(url = %url, "Manifest body read timed out");
                Err(ProxyError::timeout().with_original_url(url.as_str()))
            }
        }
    }

    async fn media(
        &self,
        mut request: StreamRequest,
        ctx: &RelayContext,
    ) -> Result<RelayResponse, ProxyError> {
        let original_url = request.target_url.to_string();
        info!(url = %original_url, kind = ?request.kind, "Relaying stream");

        // Probe strictly before the GET, never alongside it
        if self.config.precheck_redirects {
            let resolution = self.resolver.precheck(&request.target_url).await;
            if let Some(error) = resolution.error {
                if matches!(
                    error.kind,
                    ProxyErrorKind::DnsResolutionFailed | ProxyErrorKind::RedirectToUnreachableDomain
                ) {
                    return Err(error);
                }
                debug!(url = %original_url, kind = %error.kind, "Pre-check failed, trying GET anyway");
            } else if resolution.redirected() {
                request.resolved_url = Url::parse(&resolution.final_url).ok();
                request.redirect_chain = resolution.redirect_chain;
            }
        }

        let identity = browser_identity(&request.target_url, &self.config.browser_user_agent);
        let mut upstream = self
            .fetch(
                &request.target_url,
                identity,
                ctx.range.as_ref(),
                self.config.fetch_timeout(),
            )
            .await?;

        if upstream.status.as_u16() == self.config.edge_error_status {
            upstream = self
                .retry_edge_error(&request.target_url, ctx.range.as_ref())
                .await
                .map_err(|e| e.with_redirect_url(request.resolved_url.as_ref()))?;
        }

        if upstream.status.is_client_error() || upstream.status.is_server_error() {
            warn!(
                url = %original_url,
                status = upstream.status.as_u16(),
                hops = request.redirect_chain.len(),
                "Stream fetch failed"
            );
            return Err(ProxyError::upstream_http(upstream.status, "stream")
                .with_original_url(&original_url)
                .with_redirect_url(request.resolved_url.as_ref()));
        }

        debug!(
            url = %original_url,
            served_from = %upstream.url,
            resolved = %request.effective_url(),
            hops = request.redirect_chain.len(),
            status = upstream.status.as_u16(),
            "Upstream stream opened"
        );

        Ok(RelayResponse {
            status: upstream.status,
            headers: normalize_headers(&upstream.headers),
            body: RelayBody::Stream(upstream.body),
        })
    }

    /// The one retry allowed after an edge-origin error, for manifests and
    /// media alike.
    async fn retry_edge_error(
        &self,
        url: &Url,
        range: Option<&HeaderValue>,
    ) -> Result<UpstreamResponse, ProxyError> {
        let edge_status = self.config.edge_error_status;
        warn!(url = %url, status = edge_status, "Edge reported origin failure, retrying with minimal identity");

        let identity = minimal_identity(&self.config.fallback_user_agent);
        match self
            .fetch(url, identity, range, self.config.retry_fetch_timeout())
            .await
        {
            Ok(retry) if !retry.status.is_client_error() && !retry.status.is_server_error() => {
                info!(url = %url, "Retry with minimal identity succeeded");
                Ok(retry)
            }
            Ok(retry) => {
                warn!(url = %url, status = retry.status.as_u16(), "Retry also failed");
                Err(ProxyError::edge_origin_error(url.as_str(), edge_status))
            }
            Err(error) => {
                warn!(url = %url, kind = %error.kind, "Retry also failed");
                Err(ProxyError::edge_origin_error(url.as_str(), edge_status))
            }
        }
    }

    /// Streaming GET. Only the wait for response headers is time-bounded.
    async fn fetch(
        &self,
        url: &Url,
        identity: HeaderMap,
        range: Option<&HeaderValue>,
        limit: Duration,
    ) -> Result<UpstreamResponse, ProxyError> {
        let mut builder = self.clients.follow.get(url.clone()).headers(identity);
        if let Some(range) = range {
            builder = builder.header(header::RANGE, range.clone());
        }

        match tokio::time::timeout(limit, builder.send()).await {
            Ok(Ok(response)) => Ok(UpstreamResponse::from_reqwest(response)),
            Ok(Err(e)) => {
                let error = ProxyError::from_transport(&e).with_original_url(url.as_str());
                warn!(url = %url, kind = %error.kind, error = %e, "Stream request failed");
                Err(error)
            }
            Err(_) => {
                warn!(url = %url, timeout_secs = limit.as_secs(), "Stream request timed out");
                Err(ProxyError::timeout().with_original_url(url.as_str()))
            }
        }
    }
}

/// Response headers for relayed media.
#[must_use]
pub fn normalize_headers(upstream: &HeaderMap) -> HeaderMap {
    let mut headers = HeaderMap::new();

    let content_type = upstream
        .get(header::CONTENT_TYPE)
        .cloned()
        .unwrap_or_else(|| HeaderValue::from_static(DEFAULT_MEDIA_CONTENT_TYPE));
    headers.insert(header::CONTENT_TYPE, content_type);

    let accept_ranges = upstream
        .get(header::ACCEPT_RANGES)
        .cloned()
        .unwrap_or_else(|| HeaderValue::from_static("bytes"));
    headers.insert(header::ACCEPT_RANGES, accept_ranges);

    for name in [header::CONTENT_LENGTH, header::CONTENT_RANGE] {
        if let Some(value) = upstream.get(&name) {
            headers.insert(name, value.clone());
        }
    }

    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static(LIVE_CACHE_CONTROL),
    );
    headers.insert(
        header::CONTENT_DISPOSITION,
        HeaderValue::from_static("inline"),
    );
    headers.insert(X_ACCEL_BUFFERING, HeaderValue::from_static("no"));
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );

    headers
}
