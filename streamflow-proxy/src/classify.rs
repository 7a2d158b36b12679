//! Lexical stream classification
//!
//! Decides how a target URL is handled by looking at its text only. Both the
//! relay and the client engine selection use the same rules so that a URL is
//! never treated as a playlist on one side and as raw media on the other.

use serde::{Deserialize, Serialize};

/// What a target URL is expected to deliver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamKind {
    /// Text playlist whose references must be rewritten
    Manifest,
    /// Raw MPEG transport stream (segment or continuous live feed)
    MediaSegment,
    /// Anything else, relayed as opaque bytes
    Other,
}

impl StreamKind {
    #[must_use]
    pub const fn is_manifest(self) -> bool {
        matches!(self, Self::Manifest)
    }
}

/// Classify a URL that has already been percent-decoded once.
///
/// Manifest markers take precedence, so `/live/ch1/index.m3u8` is a manifest.
#[must_use]
pub fn classify(url: &str) -> StreamKind {
    let lower = url.to_ascii_lowercase();

    if lower.contains(".m3u8") || lower.contains("m3u") {
        StreamKind::Manifest
    } else if lower.contains(".ts") || lower.contains("/live/") {
        StreamKind::MediaSegment
    } else {
        StreamKind::Other
    }
}
