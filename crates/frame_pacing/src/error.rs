use std::time::Duration;

use thiserror::Error;

/// Failures surfaced by the fence and the pacer.
#[derive(Error, Debug)]
pub enum PacingError {
    /// The device was removed, reset or hung. Fatal for the session: tear down the
    /// device, the queue and every pacer built on them.
    #[error("device lost: {0}")]
    DeviceLost(String),

    /// A finite wait expired before the fence reached `value`.
    #[error("timed out after {timeout:?} waiting for fence value {value} (completed {completed})")]
    Timeout {
        value: u64,
        completed: u64,
        timeout: Duration,
    },

    /// `begin_frame` or a destructive operation was called while a frame is recording.
    #[error("frame {slot} is still recording; call end_frame first")]
    FrameInProgress { slot: usize },

    /// `end_frame` was called without a matching `begin_frame`.
    #[error("no frame is recording; call begin_frame first")]
    NoFrameInProgress,

    /// The swap chain reported a back buffer the pacer has no slot for.
    #[error("back buffer index {index} out of range for {slots} frame slots")]
    SlotOutOfRange { index: u32, slots: usize },

    /// Any other failure reported by the graphics backend.
    #[error("backend error: {0}")]
    Backend(String),

    #[error("invalid config: {0}")]
    Config(String),

    #[error("failed to read config: {0}")]
    ConfigIo(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    ConfigParse(#[from] toml::de::Error),
}

impl PacingError {
    /// True for failures that end the session rather than the frame.
    pub fn is_device_lost(&self) -> bool {
        matches!(self, PacingError::DeviceLost(_))
    }
}

pub type PacingResult<T> = std::result::Result<T, PacingError>;
