//! Per-call request model

use serde::Serialize;
use url::Url;

use crate::classify::{classify, StreamKind};
use crate::error::ProxyError;

/// One hop from a requested URL to where the origin sent us
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RedirectHop {
    pub from: String,
    pub to: String,
}

/// A single inbound relay call. Never persisted.
#[derive(Debug, Clone)]
pub struct StreamRequest {
    /// Target as received, already percent-decoded once by the query extractor
    pub raw_url: String,
    pub target_url: Url,
    pub kind: StreamKind,
    pub resolved_url: Option<Url>,
    pub redirect_chain: Vec<RedirectHop>,
}

impl StreamRequest {
    /// Validate an inbound target. Only absolute http(s) URLs are relayed.
    pub fn parse(raw: Option<&str>) -> Result<Self, ProxyError> {
        let raw = raw
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ProxyError::invalid_request("Stream URL is required"))?;

        let target_url =
            Url::parse(raw).map_err(|_| ProxyError::invalid_request("Invalid URL format"))?;

        if !matches!(target_url.scheme(), "http" | "https") || target_url.host_str().is_none() {
            return Err(ProxyError::invalid_request("Invalid URL format"));
        }

        Ok(Self {
            raw_url: raw.to_string(),
            kind: classify(raw),
            target_url,
            resolved_url: None,
            redirect_chain: Vec::new(),
        })
    }

    /// The URL data transfers should go to.
    #[must_use]
    pub fn effective_url(&self) -> &Url {
        self.resolved_url.as_ref().unwrap_or(&self.target_url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProxyErrorKind;

    #[test]
    fn test_missing_url() {
        let err = StreamRequest::parse(None).unwrap_err();
        assert_eq!(err.kind, ProxyErrorKind::InvalidRequest);
        assert_eq!(err.message, "Stream URL is required");

        let err = StreamRequest::parse(Some("   ")).unwrap_err();
        assert_eq!(err.message, "Stream URL is required");
    }

    #[test]
    fn test_malformed_url() {
        for bad in ["not a url", "ftp://files.example/a.ts", "/relative/path.m3u8"] {
            let err = StreamRequest::parse(Some(bad)).unwrap_err();
            assert_eq!(err.kind, ProxyErrorKind::InvalidRequest, "{bad}");
            assert_eq!(err.message, "Invalid URL format");
        }
    }

    #[test]
    fn test_valid_request_is_classified() {
        let req = StreamRequest::parse(Some("https://origin.example/live/chA/index.m3u8")).unwrap();
        assert_eq!(req.kind, StreamKind::Manifest);
        assert_eq!(req.effective_url().as_str(), "https://origin.example/live/chA/index.m3u8");
        assert!(req.redirect_chain.is_empty());
    }

    #[test]
    fn test_effective_url_prefers_resolved() {
        let mut req = StreamRequest::parse(Some("http://a.example/live/1.ts")).unwrap();
        req.resolved_url = Some(Url::parse("http://b.example/live/1.ts").unwrap());
        assert_eq!(req.effective_url().host_str(), Some("b.example"));
    }
}
