//! The media output a decode engine renders into

use tracing::debug;

use crate::error::{PlayerError, Result};

/// Single-occupancy playback sink.
///
/// At most one engine, identified by its epoch, may be attached at a time.
#[derive(Debug, Default)]
pub struct PlaybackSink {
    attached: Option<u64>,
    attachments: u64,
}

impl PlaybackSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&mut self, epoch: u64) -> Result<()> {
        if let Some(current) = self.attached {
            return Err(PlayerError::SinkBusy { current });
        }
        self.attached = Some(epoch);
        self.attachments += 1;
        debug!(epoch, "Engine attached to playback sink");
        Ok(())
    }

    /// Detach whatever is attached. Returns the epoch that was attached.
    pub fn detach(&mut self) -> Option<u64> {
        let previous = self.attached.take();
        if let Some(epoch) = previous {
            debug!(epoch, "Engine detached from playback sink");
        }
        previous
    }

    #[must_use]
    pub const fn attached(&self) -> Option<u64> {
        self.attached
    }

    #[must_use]
    pub const fn is_attached(&self) -> bool {
        self.attached.is_some()
    }

    /// Total attachments over the sink's lifetime
    #[must_use]
    pub const fn attachments(&self) -> u64 {
        self.attachments
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_attach_is_rejected() {
        let mut sink = PlaybackSink::new();
        sink.attach(1).unwrap();

        assert_eq!(sink.attach(2), Err(PlayerError::SinkBusy { current: 1 }));
        assert_eq!(sink.attached(), Some(1));
    }

    #[test]
    fn test_detach_then_attach() {
        let mut sink = PlaybackSink::new();
        sink.attach(1).unwrap();
        assert_eq!(sink.detach(), Some(1));
        assert_eq!(sink.detach(), None);

        sink.attach(2).unwrap();
        assert_eq!(sink.attachments(), 2);
        assert!(sink.is_attached());
    }
}
