//! Error types for measurement DSP

use thiserror::Error;

/// Meter construction and feeding errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DspError {
    #[error("Invalid channel count: {0}")]
    InvalidChannelCount(usize),

    #[error("Invalid sample rate: {0}Hz")]
    InvalidSampleRate(u32),

    #[error("Channel mismatch: expected {expected}, got {actual}")]
    ChannelMismatch { expected: usize, actual: usize },

    #[error("Chunk of {len} samples is not aligned to {channels} channels")]
    UnalignedChunk { len: usize, channels: usize },
}

/// Result type for meter operations
pub type DspResult<T> = Result<T, DspError>;

/// Reject zero channels and chunks that split a frame
pub(crate) fn check_aligned(len: usize, channels: usize) -> DspResult<()> {
    if channels == 0 {
        return Err(DspError::InvalidChannelCount(channels));
    }
    if len % channels != 0 {
        return Err(DspError::UnalignedChunk { len, channels });
    }
    Ok(())
}
