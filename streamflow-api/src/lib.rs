//! HTTP surface of the StreamFlow relay
//!
//! - `GET /api/stream/proxy?url=` relays media or a rewritten manifest
//! - `GET /api/stream/resolve?url=` reports redirects
//! - `GET /api/stream/check?url=` runs reachability diagnostics
//! - `GET /health`, `GET /`

pub mod http;

pub use http::{create_router, AppState};
