//! Decode engine selection and the engine seam
//!
//! The concrete engines (adaptive HLS decoder, MPEG-TS demuxer, native media
//! element) live in the embedding UI. This module decides which one to use
//! and with what tuning, and defines the traits the controller drives them
//! through.

use serde::Serialize;
use streamflow_proxy::StreamKind;

use crate::controller::EngineEvents;
use crate::error::PlayerError;

/// What the host environment can do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities {
    /// An adaptive segmented-media decoder is available
    pub adaptive_streaming: bool,
    /// Media-source buffers accept live transport-stream data
    pub mse_live_playback: bool,
}

/// Low-latency tuning for the adaptive decoder. Serializes to the decoder's
/// own config keys.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdaptiveTuning {
    pub enable_worker: bool,
    pub low_latency_mode: bool,
    /// Seconds
    pub back_buffer_length: u32,
    /// Seconds
    pub max_buffer_length: u32,
    /// Seconds
    pub max_max_buffer_length: u32,
    /// Bytes
    pub max_buffer_size: u64,
    /// Seconds
    pub max_buffer_hole: f64,
    /// Seconds
    pub high_buffer_watchdog_period: u32,
    /// Seconds
    pub nudge_offset: f64,
    pub nudge_max_retry: u32,
    /// Milliseconds
    pub max_frag_loading_time_out: u64,
    /// Milliseconds
    pub frag_loading_time_out: u64,
    /// Milliseconds
    pub manifest_loading_time_out: u64,
    /// -1 selects the start level automatically
    pub start_level: i32,
    pub cap_level_to_player_size: bool,
    pub auto_start_load: bool,
}

impl Default for AdaptiveTuning {
    fn default() -> Self {
        Self {
            enable_worker: true,
            low_latency_mode: true,
            back_buffer_length: 10,
            max_buffer_length: 10,
            max_max_buffer_length: 20,
            max_buffer_size: 30 * 1000 * 1000,
            max_buffer_hole: 0.3,
            high_buffer_watchdog_period: 1,
            nudge_offset: 0.1,
            nudge_max_retry: 5,
            max_frag_loading_time_out: 20_000,
            frag_loading_time_out: 20_000,
            manifest_loading_time_out: 20_000,
            start_level: -1,
            cap_level_to_player_size: true,
            auto_start_load: true,
        }
    }
}

/// Live tuning for the in-browser transport-stream demuxer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DemuxerTuning {
    pub is_live: bool,
    pub enable_worker: bool,
    pub enable_stash_buffer: bool,
    /// KiB
    pub stash_initial_size: u32,
    pub lazy_load: bool,
    pub auto_cleanup_source_buffer: bool,
}

impl Default for DemuxerTuning {
    fn default() -> Self {
        Self {
            is_live: true,
            enable_worker: true,
            enable_stash_buffer: false,
            stash_initial_size: 128,
            lazy_load: false,
            auto_cleanup_source_buffer: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EngineKind {
    Adaptive(AdaptiveTuning),
    Demuxer(DemuxerTuning),
    Native,
}

impl EngineKind {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Adaptive(_) => "adaptive",
            Self::Demuxer(_) => "demuxer",
            Self::Native => "native",
        }
    }
}

/// Pick the decode engine for a stream, mirroring the relay's classifier.
#[must_use]
pub fn select_engine(kind: StreamKind, capabilities: &Capabilities) -> EngineKind {
    match kind {
        StreamKind::Manifest if capabilities.adaptive_streaming => {
            EngineKind::Adaptive(AdaptiveTuning::default())
        }
        StreamKind::MediaSegment if capabilities.mse_live_playback => {
            EngineKind::Demuxer(DemuxerTuning::default())
        }
        // Manifests still go to the media element: it either plays them
        // natively or reports an error that enters the retry path.
        _ => EngineKind::Native,
    }
}

/// Engine-reported failure classes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackFault {
    /// Manifest or segment fetch failed
    Network { status: Option<u16> },
    /// Media could not be decoded; may be recoverable in place
    Decode,
    /// Engine gave up
    Fatal,
}

impl PlaybackFault {
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Network {
                status: Some(401 | 403),
            } => "Stream access denied (401/403).".to_string(),
            Self::Network { status: Some(404) } => "Stream URL not found (404).".to_string(),
            Self::Network { status: Some(code) } => format!("Stream server error ({code})."),
            Self::Network { status: None } => "Network error while loading the stream.".to_string(),
            Self::Decode | Self::Fatal => {
                "Stream format error. Open the stream in an external player such as VLC for best results."
                    .to_string()
            }
        }
    }
}

/// A live decode engine attached to the playback sink
pub trait DecodeEngine: Send {
    /// Start loading `url`. Progress and failures arrive through the
    /// [`EngineEvents`] handle given at construction.
    fn load(&mut self, url: &str) -> Result<(), PlayerError>;

    fn play(&mut self);

    fn pause(&mut self);

    /// Attempt in-place recovery from a decode error. Returns false when
    /// the engine cannot recover without being rebuilt.
    fn recover(&mut self) -> bool {
        false
    }

    /// Release the media element. Must complete before it returns.
    fn dispose(&mut self);
}

/// Builds engines for the controller
pub trait EngineFactory: Send {
    fn create(
        &mut self,
        kind: &EngineKind,
        events: EngineEvents,
    ) -> Result<Box<dyn DecodeEngine>, PlayerError>;
}
