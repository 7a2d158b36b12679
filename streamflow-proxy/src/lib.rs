//! Streaming relay for cross-origin IPTV sources
//!
//! Takes arbitrary, often unreliable origin URLs and makes them playable from
//! a same-origin media pipeline: lexical stream classification, redirect
//! resolution with DNS diagnostics, manifest rewriting so nested references
//! re-enter the relay, and byte relaying with normalized headers and a single
//! edge-error retry. The HTTP routes live in `streamflow-api`.

pub mod classify;
pub mod client;
pub mod error;
pub mod manifest;
pub mod relay;
pub mod request;
pub mod resolver;

pub use classify::{classify, StreamKind};
pub use error::{ProxyError, ProxyErrorKind};
pub use manifest::{percent_encode, rewrite, ManifestDocument, ManifestRewriter, ManifestSource};
pub use relay::{Relay, RelayBody, RelayContext, RelayResponse, RelayStream, UpstreamResponse};
pub use request::{RedirectHop, StreamRequest};
pub use resolver::{Diagnostics, RedirectResolver, Resolution};
