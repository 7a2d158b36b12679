//! Failure taxonomy shared by the resolver and the relay
//!
//! Every network-layer failure is translated into exactly one
//! [`ProxyErrorKind`] at the relay/resolver boundary.

use std::error::Error as StdError;
use std::sync::LazyLock;

use http::StatusCode;
use regex::Regex;
use serde::Serialize;

/// Machine-readable failure kind, serialized in the JSON error body
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProxyErrorKind {
    /// Missing or malformed target URL
    InvalidRequest,
    DnsResolutionFailed,
    RedirectToUnreachableDomain,
    /// Edge/CDN reported that the origin behind it failed
    #[serde(rename = "CLOUDFLARE_520_ERROR")]
    EdgeOriginError,
    ConnectionRefused,
    /// Any other transport failure before a response arrived
    UpstreamUnreachable,
    UpstreamTimeout,
    /// Upstream answered with an error status, forwarded verbatim
    UpstreamHttpError,
    /// Upstream body failed after response headers were committed
    StreamPipeError,
    Internal,
}

impl ProxyErrorKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InvalidRequest => "INVALID_REQUEST",
            Self::DnsResolutionFailed => "DNS_RESOLUTION_FAILED",
            Self::RedirectToUnreachableDomain => "REDIRECT_TO_UNREACHABLE_DOMAIN",
            Self::EdgeOriginError => "CLOUDFLARE_520_ERROR",
            Self::ConnectionRefused => "CONNECTION_REFUSED",
            Self::UpstreamUnreachable => "UPSTREAM_UNREACHABLE",
            Self::UpstreamTimeout => "UPSTREAM_TIMEOUT",
            Self::UpstreamHttpError => "UPSTREAM_HTTP_ERROR",
            Self::StreamPipeError => "STREAM_PIPE_ERROR",
            Self::Internal => "INTERNAL",
        }
    }
}

impl std::fmt::Display for ProxyErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single failed relay or resolve attempt
#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct ProxyError {
    pub kind: ProxyErrorKind,
    pub status: StatusCode,
    /// Host that could not be resolved, for DNS-class failures
    pub domain: Option<String>,
    pub message: String,
    pub original_url: Option<String>,
    pub redirect_url: Option<String>,
    /// Status the upstream answered with, when it answered at all
    pub upstream_status: Option<u16>,
}

impl ProxyError {
    pub fn new(kind: ProxyErrorKind, status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            kind,
            status,
            domain: None,
            message: message.into(),
            original_url: None,
            redirect_url: None,
            upstream_status: None,
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ProxyErrorKind::InvalidRequest, StatusCode::BAD_REQUEST, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(
            ProxyErrorKind::Internal,
            StatusCode::INTERNAL_SERVER_ERROR,
            message,
        )
    }

    #[must_use]
    pub fn dns_resolution_failed(domain: &str) -> Self {
        let mut err = Self::new(
            ProxyErrorKind::DnsResolutionFailed,
            StatusCode::BAD_GATEWAY,
            format!(
                "Stream server unreachable: Cannot resolve domain {domain}. \
                 The stream may be down or the URL is incorrect."
            ),
        );
        err.domain = Some(domain.to_string());
        err
    }

    #[must_use]
    pub fn redirect_to_unreachable(original_url: &str, redirect_url: &str, domain: &str) -> Self {
        let mut err = Self::new(
            ProxyErrorKind::RedirectToUnreachableDomain,
            StatusCode::BAD_GATEWAY,
            format!(
                "Stream redirects to unreachable domain: {domain}. \
                 The stream server may be down or the URL is incorrect."
            ),
        );
        err.domain = Some(domain.to_string());
        err.original_url = Some(original_url.to_string());
        err.redirect_url = Some(redirect_url.to_string());
        err
    }

    #[must_use]
    pub fn edge_origin_error(original_url: &str, edge_status: u16) -> Self {
        let mut err = Self::new(
            ProxyErrorKind::EdgeOriginError,
            StatusCode::BAD_GATEWAY,
            format!(
                "Stream server error ({edge_status}): The IPTV server is not responding correctly. \
                 Verify your IPTV credentials, try another channel, or open the stream in VLC."
            ),
        );
        err.original_url = Some(original_url.to_string());
        err.upstream_status = Some(edge_status);
        err
    }

    #[must_use]
    pub fn upstream_http(status: StatusCode, what: &str) -> Self {
        let reason = status.canonical_reason().unwrap_or("Upstream error");
        let mut err = Self::new(
            ProxyErrorKind::UpstreamHttpError,
            status,
            format!("Failed to fetch {what}: {reason} ({})", status.as_u16()),
        );
        err.upstream_status = Some(status.as_u16());
        err
    }

    #[must_use]
    pub fn too_many_redirects(limit: usize) -> Self {
        Self::new(
            ProxyErrorKind::UpstreamUnreachable,
            StatusCode::BAD_GATEWAY,
            format!("Stream redirects more than {limit} times"),
        )
    }

    #[must_use]
    pub fn connection_refused() -> Self {
        Self::new(
            ProxyErrorKind::ConnectionRefused,
            StatusCode::BAD_GATEWAY,
            "Stream server refused connection. The server may be down.",
        )
    }

    #[must_use]
    pub fn timeout() -> Self {
        Self::new(
            ProxyErrorKind::UpstreamTimeout,
            StatusCode::GATEWAY_TIMEOUT,
            "Stream server timeout. The server took too long to respond.",
        )
    }

    #[must_use]
    pub fn stream_pipe(message: impl Into<String>) -> Self {
        Self::new(
            ProxyErrorKind::StreamPipeError,
            StatusCode::BAD_GATEWAY,
            message,
        )
    }

    #[must_use]
    pub fn with_original_url(mut self, url: &str) -> Self {
        self.original_url = Some(url.to_string());
        self
    }

    /// Record where the origin redirected to, when it did.
    #[must_use]
    pub fn with_redirect_url(mut self, url: Option<&url::Url>) -> Self {
        if let Some(url) = url {
            self.redirect_url = Some(url.to_string());
        }
        self
    }

    /// Translate a transport failure into exactly one kind.
    #[must_use]
    pub fn from_transport(err: &reqwest::Error) -> Self {
        let chain = error_chain_text(err);
        let lower = chain.to_ascii_lowercase();

        if err.is_timeout() || lower.contains("timed out") {
            return Self::timeout();
        }

        if is_dns_failure(&lower) {
            let domain = err
                .url()
                .and_then(|u| u.host_str())
                .map(str::to_string)
                .or_else(|| extract_unresolved_host(&chain))
                .unwrap_or_else(|| "unknown".to_string());
            return Self::dns_resolution_failed(&domain);
        }

        if lower.contains("connection refused") {
            return Self::connection_refused();
        }

        Self::new(
            ProxyErrorKind::UpstreamUnreachable,
            StatusCode::BAD_GATEWAY,
            format!("Stream server unreachable: {chain}"),
        )
    }
}

/// Flatten an error and all of its sources into one line.
pub(crate) fn error_chain_text(err: &(dyn StdError + 'static)) -> String {
    let mut text = err.to_string();
    let mut source = err.source();
    while let Some(inner) = source {
        let part = inner.to_string();
        if !text.contains(&part) {
            text.push_str(": ");
            text.push_str(&part);
        }
        source = inner.source();
    }
    text
}

const DNS_MARKERS: &[&str] = &[
    "dns error",
    "failed to lookup address",
    "name or service not known",
    "nodename nor servname",
    "no such host",
    "temporary failure in name resolution",
    "enotfound",
];

fn is_dns_failure(lower_chain: &str) -> bool {
    DNS_MARKERS.iter().any(|marker| lower_chain.contains(marker))
}

static ENOTFOUND_HOST: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"ENOTFOUND\s+([^\s:/)]+)").expect("static regex")
});

static URL_HOST: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)for url \((?:[a-z][a-z0-9+.-]*://)?(?:[^@/)\s]*@)?([^/:)\s]+)")
        .expect("static regex")
});

/// Pull the offending hostname out of resolver error text.
#[must_use]
pub fn extract_unresolved_host(text: &str) -> Option<String> {
    ENOTFOUND_HOST
        .captures(text)
        .or_else(|| URL_HOST.captures(text))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_serializes_to_wire_names() {
        let json = serde_json::to_string(&ProxyErrorKind::EdgeOriginError).unwrap();
        assert_eq!(json, "\"CLOUDFLARE_520_ERROR\"");
        let json = serde_json::to_string(&ProxyErrorKind::DnsResolutionFailed).unwrap();
        assert_eq!(json, "\"DNS_RESOLUTION_FAILED\"");
        assert_eq!(
            ProxyErrorKind::RedirectToUnreachableDomain.as_str(),
            "REDIRECT_TO_UNREACHABLE_DOMAIN"
        );
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(ProxyError::invalid_request("x").status, StatusCode::BAD_REQUEST);
        assert_eq!(ProxyError::dns_resolution_failed("a.b").status, StatusCode::BAD_GATEWAY);
        assert_eq!(ProxyError::connection_refused().status, StatusCode::BAD_GATEWAY);
        assert_eq!(ProxyError::timeout().status, StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(ProxyError::edge_origin_error("u", 520).status, StatusCode::BAD_GATEWAY);
        assert_eq!(
            ProxyError::upstream_http(StatusCode::NOT_FOUND, "stream").status,
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn test_upstream_http_message() {
        let err = ProxyError::upstream_http(StatusCode::FORBIDDEN, "stream");
        assert_eq!(err.message, "Failed to fetch stream: Forbidden (403)");
        assert_eq!(err.upstream_status, Some(403));
        assert_eq!(err.kind, ProxyErrorKind::UpstreamHttpError);
    }

    #[test]
    fn test_redirect_to_unreachable_carries_context() {
        let err = ProxyError::redirect_to_unreachable(
            "http://a.example/x",
            "http://dead.example/x",
            "dead.example",
        );
        assert_eq!(err.domain.as_deref(), Some("dead.example"));
        assert_eq!(err.original_url.as_deref(), Some("http://a.example/x"));
        assert_eq!(err.redirect_url.as_deref(), Some("http://dead.example/x"));
    }

    #[test]
    fn test_extract_host_from_enotfound_text() {
        assert_eq!(
            extract_unresolved_host("getaddrinfo ENOTFOUND cdn.dead.example"),
            Some("cdn.dead.example".to_string())
        );
    }

    #[test]
    fn test_extract_host_from_url_text() {
        let text = "error sending request for url (http://user:pw@stream.dead.example:8080/live/1.ts): \
                    client error (Connect): dns error: failed to lookup address information";
        assert_eq!(
            extract_unresolved_host(text),
            Some("stream.dead.example".to_string())
        );
        assert_eq!(extract_unresolved_host("connection reset"), None);
    }

    #[test]
    fn test_dns_markers() {
        assert!(is_dns_failure("client error (connect): dns error: no such host is known"));
        assert!(is_dns_failure("failed to lookup address information: name or service not known"));
        assert!(!is_dns_failure("tcp connect error: connection refused"));
    }

    #[test]
    fn test_error_chain_text_skips_repeated_parts() {
        let inner = std::io::Error::new(std::io::ErrorKind::Other, "connection refused");
        let text = error_chain_text(&inner);
        assert_eq!(text, "connection refused");
    }
}
