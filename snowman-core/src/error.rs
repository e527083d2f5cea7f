use thiserror::Error;

use crate::buffering::chunk::ElementType;

/// All errors produced by snowman-core.
#[derive(Debug, Error)]
pub enum SnowmanError {
    #[error("invalid input type: {0} buffers cannot be passed to the detector")]
    InvalidInputType(ElementType),

    #[error("native allocation of {size} bytes failed")]
    AllocationFailure { size: usize },

    #[error("control stage is closed")]
    StageClosed,

    #[error("native range {ptr:#x}+{len} is outside any live allocation")]
    OutOfBounds { ptr: u32, len: usize },

    #[error("audio device error: {0}")]
    AudioDevice(String),

    #[error("audio stream error: {0}")]
    AudioStream(String),

    #[error("no default input device found")]
    NoDefaultInputDevice,

    #[error("engine is already running")]
    AlreadyRunning,

    #[error("engine is not running")]
    NotRunning,

    #[error("detector error: {0}")]
    Detector(String),

    #[error("model file not found: {}", path.display())]
    ModelNotFound { path: std::path::PathBuf },

    #[error("WAV error: {0}")]
    Wav(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SnowmanError {
    /// Errors after which the session cannot continue.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SnowmanError::AllocationFailure { .. } | SnowmanError::StageClosed
        )
    }
}

pub type Result<T> = std::result::Result<T, SnowmanError>;
