//! Redirect resolution and reachability diagnostics
//!
//! Nothing in here returns `Err`: HTTP statuses and transport failures are
//! captured as data so callers can decide what to do with them.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use http::{header, StatusCode};
use serde::Serialize;
use streamflow_core::config::RelayConfig;
use tracing::{debug, info, warn};
use url::Url;

use crate::client::UpstreamClients;
use crate::error::{ProxyError, ProxyErrorKind};
use crate::request::RedirectHop;

/// Outcome of probing a URL
#[derive(Debug, Clone)]
pub struct Resolution {
    pub original_url: String,
    pub final_url: String,
    pub redirect_chain: Vec<RedirectHop>,
    pub status: Option<StatusCode>,
    pub content_type: Option<String>,
    /// False only when the origin (or its redirect target) cannot be reached at all
    pub reachable: bool,
    pub error: Option<ProxyError>,
}

impl Resolution {
    #[must_use]
    pub fn redirected(&self) -> bool {
        self.final_url != self.original_url
    }
}

/// Result of the diagnostic `check` probe, serialized as-is
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagnostics {
    pub original_url: String,
    pub accessible: bool,
    pub status_code: Option<u16>,
    pub final_url: Option<String>,
    pub redirects: Vec<RedirectHop>,
    pub content_type: Option<String>,
    pub error: Option<String>,
    pub headers: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct RedirectResolver {
    clients: UpstreamClients,
    config: Arc<RelayConfig>,
}

/// Last answer seen while walking a redirect chain
struct Landing {
    status: StatusCode,
    headers: http::HeaderMap,
}

impl RedirectResolver {
    #[must_use]
    pub const fn new(clients: UpstreamClients, config: Arc<RelayConfig>) -> Self {
        Self { clients, config }
    }

    /// Full resolution for the resolve endpoint (longer timeout, more hops).
    pub async fn resolve(&self, url: &Url) -> Resolution {
        self.probe(
            url,
            self.config.resolve_max_redirects,
            self.config.resolve_timeout(),
        )
        .await
    }

    /// Cheaper probe run by the relay before it opens a data transfer.
    ///
    /// A DNS failure on a redirect target, rather than on the requested host,
    /// is reported as `REDIRECT_TO_UNREACHABLE_DOMAIN`.
    pub async fn precheck(&self, url: &Url) -> Resolution {
        let mut resolution = self
            .probe(url, self.config.max_redirects, self.config.probe_timeout())
            .await;

        if let Some(error) = resolution.error.take() {
            let dead_redirect = error.kind == ProxyErrorKind::DnsResolutionFailed
                && !resolution.redirect_chain.is_empty();
            resolution.error = Some(if dead_redirect {
                let domain = error.domain.as_deref().unwrap_or("unknown");
                warn!(domain, "Redirect target domain is unreachable");
                ProxyError::redirect_to_unreachable(
                    &resolution.original_url,
                    &resolution.final_url,
                    domain,
                )
            } else {
                error
            });
        }

        resolution
    }

    async fn probe(&self, url: &Url, max_hops: usize, limit: Duration) -> Resolution {
        let original_url = url.to_string();
        let mut resolution = Resolution {
            original_url: original_url.clone(),
            final_url: original_url.clone(),
            redirect_chain: Vec::new(),
            status: None,
            content_type: None,
            reachable: true,
            error: None,
        };

        let walked = tokio::time::timeout(
            limit,
            self.walk(url, max_hops, &mut resolution.redirect_chain),
        )
        .await
        .unwrap_or_else(|_| Err(ProxyError::timeout()));

        if let Some(last) = resolution.redirect_chain.last() {
            resolution.final_url = last.to.clone();
            info!(
                from = %original_url,
                to = %resolution.final_url,
                hops = resolution.redirect_chain.len(),
                "Stream redirects"
            );
        }

        match walked {
            Ok(landing) => {
                resolution.status = Some(landing.status);
                resolution.content_type = content_type_of(&landing.headers);
            }
            Err(error) => {
                let error = error.with_original_url(&original_url);
                warn!(
                    url = %resolution.final_url,
                    kind = %error.kind,
                    domain = error.domain.as_deref().unwrap_or(""),
                    "HEAD probe failed"
                );
                resolution.reachable = false;
                resolution.error = Some(error);
            }
        }

        resolution
    }

    /// HEAD each hop with redirects disabled, so every hop (the final URL
    /// included) is probed on its own and a failure names the host that
    /// actually failed. Hops are pushed to `chain` as they are followed.
    async fn walk(
        &self,
        url: &Url,
        max_hops: usize,
        chain: &mut Vec<RedirectHop>,
    ) -> Result<Landing, ProxyError> {
        let mut current = url.clone();

        loop {
            let response = self
                .clients
                .no_redirect
                .head(current.clone())
                .timeout(self.config.reachability_timeout())
                .send()
                .await
                .map_err(|e| ProxyError::from_transport(&e))?;

            let status = response.status();
            let next = status
                .is_redirection()
                .then(|| response.headers().get(header::LOCATION))
                .flatten()
                .and_then(|v| v.to_str().ok())
                .and_then(|location| current.join(location).ok());

            let Some(next) = next else {
                return Ok(Landing {
                    status,
                    headers: response.headers().clone(),
                });
            };

            if chain.len() >= max_hops {
                return Err(ProxyError::too_many_redirects(max_hops));
            }

            debug!(from = %current, to = %next, status = status.as_u16(), "Following redirect");
            chain.push(RedirectHop {
                from: current.to_string(),
                to: next.to_string(),
            });
            current = next;
        }
    }

    /// Diagnostic probe for the check endpoint.
    pub async fn check(&self, url: &Url) -> Diagnostics {
        let original_url = url.to_string();
        let mut diagnostics = Diagnostics {
            original_url: original_url.clone(),
            accessible: false,
            status_code: None,
            final_url: None,
            redirects: Vec::new(),
            content_type: None,
            error: None,
            headers: BTreeMap::new(),
        };

        let walked = tokio::time::timeout(
            self.config.probe_timeout(),
            self.walk(url, self.config.max_redirects, &mut diagnostics.redirects),
        )
        .await
        .unwrap_or_else(|_| Err(ProxyError::timeout()));

        match walked {
            Ok(landing) => {
                diagnostics.status_code = Some(landing.status.as_u16());
                diagnostics.accessible = landing.status.as_u16() < 400;
                diagnostics.content_type = content_type_of(&landing.headers);
                diagnostics.headers = landing
                    .headers
                    .iter()
                    .filter_map(|(name, value)| {
                        value
                            .to_str()
                            .ok()
                            .map(|v| (name.as_str().to_string(), v.to_string()))
                    })
                    .collect();
                diagnostics.final_url = Some(
                    diagnostics
                        .redirects
                        .last()
                        .map_or(original_url, |hop| hop.to.clone()),
                );
            }
            Err(error) => {
                diagnostics.error = Some(match error.kind {
                    ProxyErrorKind::DnsResolutionFailed => format!(
                        "DNS resolution failed for domain: {}",
                        error.domain.as_deref().unwrap_or("unknown")
                    ),
                    ProxyErrorKind::ConnectionRefused => {
                        "Connection refused - server may be down".to_string()
                    }
                    ProxyErrorKind::UpstreamTimeout => {
                        "Connection timeout - server took too long to respond".to_string()
                    }
                    _ => error.message,
                });
            }
        }

        diagnostics
    }
}

fn content_type_of(headers: &http::HeaderMap) -> Option<String> {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}
