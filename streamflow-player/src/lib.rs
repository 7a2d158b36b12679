//! Client-side playback engine
//!
//! Chooses a decode engine per stream kind and runs the playback session:
//! bounded automatic retry, in-place decode recovery, a one-time fallback
//! from the relayed URL to the origin URL, and strict single-engine
//! ownership of the playback sink.

pub mod controller;
pub mod engine;
pub mod error;
pub mod retry;
pub mod session;
pub mod sink;

pub use controller::{EngineEvents, PlayerController};
pub use engine::{
    select_engine, AdaptiveTuning, Capabilities, DecodeEngine, DemuxerTuning, EngineFactory,
    EngineKind, PlaybackFault,
};
pub use error::{PlayerError, Result};
pub use retry::RetryPolicy;
pub use session::{Command, PlaybackSession, PlaybackState, SessionEvent};
pub use sink::PlaybackSink;

/// Relay URL for `url`, encoded exactly as the manifest rewriter does it.
#[must_use]
pub fn proxy_url(relay_base: &str, url: &str) -> String {
    format!("{relay_base}{}", streamflow_proxy::percent_encode(url))
}
