//! Drives a [`PlaybackSession`] against a real engine, sink and timer
//!
//! Engine callbacks and the retry timer report through one channel. Every
//! message is tagged with the epoch it was issued under; disposing an engine
//! bumps the epoch, so anything still in flight from a disposed engine or a
//! cancelled timer is dropped on arrival.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use streamflow_core::config::PlayerConfig;

use crate::engine::{Capabilities, DecodeEngine, EngineFactory, EngineKind, PlaybackFault};
use crate::error::Result;
use crate::session::{Command, PlaybackSession, SessionEvent};
use crate::sink::PlaybackSink;

#[derive(Debug)]
struct Tagged {
    epoch: u64,
    event: SessionEvent,
}

/// Handle an engine uses to report back to its controller
#[derive(Debug, Clone)]
pub struct EngineEvents {
    epoch: u64,
    tx: mpsc::UnboundedSender<Tagged>,
}

impl EngineEvents {
    #[must_use]
    pub const fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn ready(&self) {
        self.send(SessionEvent::EngineReady);
    }

    pub fn playing(&self) {
        self.send(SessionEvent::Playing);
    }

    pub fn paused(&self) {
        self.send(SessionEvent::Paused);
    }

    pub fn fault(&self, fault: PlaybackFault) {
        self.send(SessionEvent::Fault(fault));
    }

    fn send(&self, event: SessionEvent) {
        // Receiver gone means the controller was dropped
        let _ = self.tx.send(Tagged {
            epoch: self.epoch,
            event,
        });
    }
}

pub struct PlayerController<F: EngineFactory> {
    factory: F,
    config: PlayerConfig,
    capabilities: Capabilities,
    relay_base: Option<String>,

    session: Option<PlaybackSession>,
    engine: Option<Box<dyn DecodeEngine>>,
    sink: PlaybackSink,
    retry_timer: Option<JoinHandle<()>>,
    epoch: u64,

    tx: mpsc::UnboundedSender<Tagged>,
    rx: mpsc::UnboundedReceiver<Tagged>,
}

impl<F: EngineFactory> PlayerController<F> {
    pub fn new(
        factory: F,
        config: PlayerConfig,
        capabilities: Capabilities,
        relay_base: Option<String>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            factory,
            config,
            capabilities,
            relay_base,
            session: None,
            engine: None,
            sink: PlaybackSink::new(),
            retry_timer: None,
            epoch: 0,
            tx,
            rx,
        }
    }

    /// Open a channel. Any previous session is fully torn down first.
    pub fn open(&mut self, url: &str) {
        self.close();

        let mut session = PlaybackSession::new(
            url,
            self.relay_base.clone(),
            &self.capabilities,
            &self.config,
        );
        let commands = session.start();
        self.session = Some(session);
        self.execute(commands);
    }

    /// Tear down the current session: cancel the timer, dispose the engine.
    pub fn close(&mut self) {
        if let Some(mut session) = self.session.take() {
            let commands = session.teardown();
            self.execute(commands);
        }
    }

    /// Apply a user-originated event (retry button, play toggle, fullscreen).
    pub fn dispatch(&mut self, event: SessionEvent) {
        self.apply(event);
    }

    /// Wait for the next engine or timer event and apply it. Returns false
    /// when the event was stale and has been discarded.
    pub async fn next_event(&mut self) -> bool {
        // The controller holds a sender, so the channel never closes
        let Some(tagged) = self.rx.recv().await else {
            return false;
        };
        self.accept(tagged)
    }

    /// Apply every event already queued without waiting.
    pub fn drain(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(tagged) = self.rx.try_recv() {
            if self.accept(tagged) {
                applied += 1;
            }
        }
        applied
    }

    fn accept(&mut self, tagged: Tagged) -> bool {
        if tagged.epoch != self.epoch {
            debug!(
                event_epoch = tagged.epoch,
                current_epoch = self.epoch,
                event = ?tagged.event,
                "Discarding stale playback event"
            );
            return false;
        }
        if tagged.event == SessionEvent::RetryDue {
            self.retry_timer = None;
        }
        self.apply(tagged.event);
        true
    }

    fn apply(&mut self, event: SessionEvent) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let commands = session.handle(event);
        self.execute(commands);
    }

    fn execute(&mut self, commands: Vec<Command>) {
        for command in commands {
            match command {
                Command::Attach { url, engine } => {
                    if let Err(e) = self.attach(&url, &engine) {
                        error!(url = %url, error = %e, "Engine attach failed");
                        self.apply(SessionEvent::Fault(PlaybackFault::Fatal));
                    }
                }
                Command::Dispose => self.dispose_engine(),
                Command::Recover => {
                    let recovered = self.engine.as_mut().is_some_and(|e| e.recover());
                    if !recovered {
                        warn!("In-place recovery unavailable, rebuilding engine");
                        self.apply(SessionEvent::Fault(PlaybackFault::Fatal));
                    }
                }
                Command::ScheduleRetry(delay) => self.schedule_retry(delay),
                Command::CancelRetry => self.cancel_retry(),
                Command::Play => {
                    if let Some(engine) = self.engine.as_mut() {
                        engine.play();
                    }
                }
                Command::Pause => {
                    if let Some(engine) = self.engine.as_mut() {
                        engine.pause();
                    }
                }
            }
        }
    }

    fn attach(&mut self, url: &str, kind: &EngineKind) -> Result<()> {
        // Previous engine is gone before the next one is built
        self.dispose_engine();

        let events = EngineEvents {
            epoch: self.epoch,
            tx: self.tx.clone(),
        };
        let mut engine = self.factory.create(kind, events)?;
        self.sink.attach(self.epoch)?;

        if let Err(e) = engine.load(url) {
            engine.dispose();
            self.sink.detach();
            return Err(e);
        }

        debug!(epoch = self.epoch, engine = kind.name(), url, "Engine attached");
        self.engine = Some(engine);
        Ok(())
    }

    fn dispose_engine(&mut self) {
        if let Some(mut engine) = self.engine.take() {
            engine.dispose();
        }
        self.sink.detach();
        self.epoch += 1;
    }

    fn schedule_retry(&mut self, delay: std::time::Duration) {
        self.cancel_retry();
        let tx = self.tx.clone();
        let epoch = self.epoch;
        self.retry_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(Tagged {
                epoch,
                event: SessionEvent::RetryDue,
            });
        }));
    }

    fn cancel_retry(&mut self) {
        if let Some(timer) = self.retry_timer.take() {
            timer.abort();
        }
    }

    #[must_use]
    pub const fn session(&self) -> Option<&PlaybackSession> {
        self.session.as_ref()
    }

    #[must_use]
    pub const fn sink(&self) -> &PlaybackSink {
        &self.sink
    }

    #[must_use]
    pub const fn epoch(&self) -> u64 {
        self.epoch
    }

    #[must_use]
    pub fn retry_pending(&self) -> bool {
        self.retry_timer.as_ref().is_some_and(|t| !t.is_finished())
    }

    #[must_use]
    pub const fn factory(&self) -> &F {
        &self.factory
    }
}

impl<F: EngineFactory> Drop for PlayerController<F> {
    fn drop(&mut self) {
        self.cancel_retry();
        if let Some(mut engine) = self.engine.take() {
            engine.dispose();
        }
    }
}
