use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlayerError {
    #[error("Playback sink already has engine {current} attached")]
    SinkBusy { current: u64 },

    #[error("Player initialization failed: {0}")]
    EngineInit(String),

    #[error("Failed to load stream: {0}")]
    Load(String),
}

pub type Result<T> = std::result::Result<T, PlayerError>;
