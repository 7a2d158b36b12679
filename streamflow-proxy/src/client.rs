//! Upstream HTTP clients
//!
//! reqwest fixes the redirect policy per client, so the relay keeps one
//! client per policy. They are built once at startup and shared read-only
//! by every request task.

use http::header::{self, HeaderMap, HeaderValue};
use reqwest::redirect::Policy;
use streamflow_core::config::RelayConfig;
use url::Url;

use crate::error::ProxyError;

/// Accept header sent when fetching a playlist
pub const MANIFEST_ACCEPT: &str = "application/vnd.apple.mpegurl, application/x-mpegURL, */*";

#[derive(Debug, Clone)]
pub struct UpstreamClients {
    /// Follows up to `max_redirects` hops (relay GETs)
    pub(crate) follow: reqwest::Client,
    /// Never follows; the resolver walks redirect chains hop by hop with it
    pub(crate) no_redirect: reqwest::Client,
}

impl UpstreamClients {
    pub fn new(config: &RelayConfig) -> Result<Self, ProxyError> {
        let build = |policy: Policy| {
            reqwest::Client::builder()
                .redirect(policy)
                .user_agent(config.browser_user_agent.as_str())
                .build()
                .map_err(|e| ProxyError::internal(format!("Failed to build HTTP client: {e}")))
        };

        Ok(Self {
            follow: build(Policy::limited(config.max_redirects))?,
            no_redirect: build(Policy::none())?,
        })
    }
}

/// Headers a desktop browser sends when a `<video>` element fetches media.
#[must_use]
pub fn browser_identity(url: &Url, user_agent: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();

    let mut insert = |name: header::HeaderName, value: &str| {
        if let Ok(v) = HeaderValue::from_str(value) {
            headers.insert(name, v);
        }
    };

    insert(header::USER_AGENT, user_agent);
    insert(header::ACCEPT, "*/*");
    insert(header::ACCEPT_LANGUAGE, "en-US,en;q=0.9");
    insert(header::REFERER, url.as_str());
    insert(header::ORIGIN, &url.origin().ascii_serialization());
    insert(header::CACHE_CONTROL, "no-cache");
    insert(header::DNT, "1");
    insert(header::HeaderName::from_static("sec-fetch-dest"), "video");
    insert(header::HeaderName::from_static("sec-fetch-mode"), "no-cors");
    insert(header::HeaderName::from_static("sec-fetch-site"), "cross-site");

    headers
}

/// The stripped-down identity used for the single edge-error retry.
#[must_use]
pub fn minimal_identity(user_agent: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    if let Ok(v) = HeaderValue::from_str(user_agent) {
        headers.insert(header::USER_AGENT, v);
    }
    headers.insert(header::ACCEPT, HeaderValue::from_static("*/*"));
    headers
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_browser_identity_headers() {
        let url = Url::parse("https://origin.example:8443/live/1.ts").unwrap();
        let headers = browser_identity(&url, "Mozilla/5.0 Test");

        assert_eq!(headers[header::USER_AGENT], "Mozilla/5.0 Test");
        assert_eq!(headers[header::REFERER], "https://origin.example:8443/live/1.ts");
        assert_eq!(headers[header::ORIGIN], "https://origin.example:8443");
        assert_eq!(headers["sec-fetch-dest"], "video");
        assert!(!headers.contains_key(header::ACCEPT_ENCODING));
    }

    #[test]
    fn test_minimal_identity_headers() {
        let headers = minimal_identity("VLC/3.0.0");
        assert_eq!(headers.len(), 2);
        assert_eq!(headers[header::USER_AGENT], "VLC/3.0.0");
    }

    #[test]
    fn test_clients_build_from_defaults() {
        assert!(UpstreamClients::new(&RelayConfig::default()).is_ok());
    }
}
