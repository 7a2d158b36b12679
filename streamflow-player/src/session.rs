//! Playback session state machine
//!
//! `Idle → Loading → Playing ⇄ Paused`, `Loading → Error → Loading` on
//! automatic retry, `Error → Terminal` once the budget is spent. The session
//! only decides; every side effect is returned as a [`Command`] for the
//! controller to carry out, in order.

use std::time::Duration;

use serde::Serialize;
use streamflow_core::config::PlayerConfig;
use streamflow_proxy::{classify, StreamKind};
use tracing::{debug, info, warn};

use crate::engine::{select_engine, Capabilities, EngineKind, PlaybackFault};
use crate::proxy_url;
use crate::retry::RetryPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackState {
    Idle,
    Loading,
    Playing,
    Paused,
    Error,
    /// Retries and fallback exhausted; only a manual retry leaves this state
    Terminal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Engine parsed the manifest or received stream metadata
    EngineReady,
    Playing,
    Paused,
    Fault(PlaybackFault),
    /// Backoff timer elapsed
    RetryDue,
    /// User asked to try again
    ManualRetry,
    TogglePlay,
    FullscreenChanged(bool),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Build an engine and load `url` into it
    Attach { url: String, engine: EngineKind },
    /// Synchronously dispose the current engine, if any
    Dispose,
    /// In-place decode recovery on the current engine
    Recover,
    ScheduleRetry(Duration),
    CancelRetry,
    Play,
    Pause,
}

#[derive(Debug, Clone)]
pub struct PlaybackSession {
    origin_url: String,
    kind: StreamKind,
    engine: EngineKind,
    relay_base: Option<String>,
    prefer_proxy: bool,
    policy: RetryPolicy,

    state: PlaybackState,
    retry_count: u32,
    is_playing: bool,
    is_fullscreen: bool,
    using_proxy: bool,
    fallback_used: bool,
    last_error: Option<String>,
}

impl PlaybackSession {
    /// `relay_base` is the relay's `...?url=` prefix; without it the session
    /// always plays the origin URL directly.
    #[must_use]
    pub fn new(
        url: impl Into<String>,
        relay_base: Option<String>,
        capabilities: &Capabilities,
        config: &PlayerConfig,
    ) -> Self {
        let origin_url = url.into();
        let kind = classify(&origin_url);
        let engine = select_engine(kind, capabilities);
        let using_proxy = config.prefer_proxy && relay_base.is_some();

        Self {
            origin_url,
            kind,
            engine,
            relay_base,
            prefer_proxy: config.prefer_proxy,
            policy: RetryPolicy::from_config(config),
            state: PlaybackState::Idle,
            retry_count: 0,
            is_playing: false,
            is_fullscreen: false,
            using_proxy,
            fallback_used: false,
            last_error: None,
        }
    }

    /// URL the next engine should load.
    #[must_use]
    pub fn current_url(&self) -> String {
        match (&self.relay_base, self.using_proxy) {
            (Some(base), true) => proxy_url(base, &self.origin_url),
            _ => self.origin_url.clone(),
        }
    }

    pub fn start(&mut self) -> Vec<Command> {
        if self.state != PlaybackState::Idle {
            return Vec::new();
        }
        info!(
            url = %self.origin_url,
            engine = self.engine.name(),
            proxied = self.using_proxy,
            "Opening stream"
        );
        self.state = PlaybackState::Loading;
        vec![self.attach()]
    }

    /// Tear the session down: no timer or engine survives this.
    pub fn teardown(&mut self) -> Vec<Command> {
        self.state = PlaybackState::Idle;
        self.is_playing = false;
        vec![Command::CancelRetry, Command::Dispose]
    }

    pub fn handle(&mut self, event: SessionEvent) -> Vec<Command> {
        use PlaybackState as S;

        match (self.state, event) {
            (_, SessionEvent::FullscreenChanged(on)) => {
                self.is_fullscreen = on;
                Vec::new()
            }

            // The retry budget refills on Playing, never on ready
            (S::Loading, SessionEvent::EngineReady) => vec![Command::Play],

            (S::Loading | S::Paused | S::Playing, SessionEvent::Playing) => {
                if self.retry_count > 0 {
                    debug!(url = %self.origin_url, attempts = self.retry_count, "Playback recovered");
                }
                self.state = S::Playing;
                self.is_playing = true;
                self.retry_count = 0;
                self.last_error = None;
                Vec::new()
            }

            (S::Playing, SessionEvent::Paused) => {
                self.state = S::Paused;
                self.is_playing = false;
                Vec::new()
            }

            (S::Playing, SessionEvent::TogglePlay) => vec![Command::Pause],
            (S::Paused, SessionEvent::TogglePlay) => vec![Command::Play],

            (S::Loading | S::Playing | S::Paused, SessionEvent::Fault(PlaybackFault::Decode)) => {
                warn!(url = %self.origin_url, "Decode error, attempting in-place recovery");
                self.last_error = Some(PlaybackFault::Decode.user_message());
                vec![Command::Recover]
            }

            (S::Loading | S::Playing | S::Paused, SessionEvent::Fault(fault)) => {
                self.on_failure(&fault)
            }

            (S::Error, SessionEvent::RetryDue) => {
                info!(
                    url = %self.origin_url,
                    attempt = self.retry_count,
                    max = self.policy.max_retries,
                    "Retrying playback"
                );
                self.state = S::Loading;
                vec![self.attach()]
            }

            (S::Error | S::Terminal, SessionEvent::ManualRetry) => {
                info!(url = %self.origin_url, "Manual retry");
                self.retry_count = 0;
                self.fallback_used = false;
                self.using_proxy = self.prefer_proxy && self.relay_base.is_some();
                self.last_error = None;
                self.state = S::Loading;
                vec![Command::CancelRetry, Command::Dispose, self.attach()]
            }

            (state, event) => {
                debug!(?state, ?event, "Event ignored in current state");
                Vec::new()
            }
        }
    }

    fn on_failure(&mut self, fault: &PlaybackFault) -> Vec<Command> {
        self.is_playing = false;
        self.last_error = Some(fault.user_message());
        let mut commands = vec![Command::Dispose];

        let next_attempt = self.retry_count + 1;
        if self.policy.allows(next_attempt) {
            self.retry_count = next_attempt;
            self.state = PlaybackState::Error;
            let delay = self.policy.delay_for(next_attempt);
            warn!(
                url = %self.origin_url,
                ?fault,
                attempt = next_attempt,
                delay_ms = delay.as_millis() as u64,
                "Playback failed, retry scheduled"
            );
            commands.push(Command::ScheduleRetry(delay));
        } else if self.using_proxy && !self.fallback_used {
            // Proxy to direct only, and only once
            warn!(url = %self.origin_url, "Relay playback exhausted, falling back to direct URL");
            self.using_proxy = false;
            self.fallback_used = true;
            self.retry_count = 0;
            self.state = PlaybackState::Loading;
            commands.push(self.attach());
        } else {
            warn!(url = %self.origin_url, ?fault, "Playback failed, retries exhausted");
            self.state = PlaybackState::Terminal;
        }

        commands
    }

    fn attach(&self) -> Command {
        Command::Attach {
            url: self.current_url(),
            engine: self.engine.clone(),
        }
    }

    #[must_use]
    pub fn origin_url(&self) -> &str {
        &self.origin_url
    }

    #[must_use]
    pub const fn kind(&self) -> StreamKind {
        self.kind
    }

    #[must_use]
    pub const fn engine(&self) -> &EngineKind {
        &self.engine
    }

    #[must_use]
    pub const fn state(&self) -> PlaybackState {
        self.state
    }

    #[must_use]
    pub const fn retry_count(&self) -> u32 {
        self.retry_count
    }

    #[must_use]
    pub const fn is_playing(&self) -> bool {
        self.is_playing
    }

    #[must_use]
    pub const fn is_fullscreen(&self) -> bool {
        self.is_fullscreen
    }

    #[must_use]
    pub const fn using_proxy(&self) -> bool {
        self.using_proxy
    }

    #[must_use]
    pub const fn fallback_used(&self) -> bool {
        self.fallback_used
    }

    #[must_use]
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }
}
