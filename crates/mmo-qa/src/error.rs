//! Error types for decoding and QA configuration

use thiserror::Error;

/// Metadata and sample decode errors
///
/// The engine turns these into `DECODE_FAILED` issues, so the display text is
/// what ends up in reports.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Wav(#[from] hound::Error),

    #[error("{0}")]
    Symphonia(#[from] symphonia::core::errors::Error),

    #[error("{0}")]
    Format(String),

    #[error("ffprobe failed: {0}")]
    Ffprobe(String),

    #[error("ffprobe returned invalid JSON: {0}")]
    FfprobeJson(#[from] serde_json::Error),

    #[error("ffmpeg failed: {0}")]
    Ffmpeg(String),

    #[error("ffmpeg failed with exit code {0}")]
    FfmpegExit(i32),

    #[error("{tool} not available")]
    ToolMissing { tool: &'static str },

    #[error("No decoder backend for format '{0}'")]
    UnsupportedFormat(String),
}

/// Result type for decode operations
pub type DecodeResult<T> = Result<T, DecodeError>;

/// Anything that can stop the decode -> fold -> meter pass
#[derive(Error, Debug)]
pub enum MeasureError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Dsp(#[from] mmo_dsp::DspError),

    #[error(transparent)]
    Downmix(#[from] mmo_downmix::DownmixError),
}

/// QA configuration errors
#[derive(Error, Debug)]
pub enum QaError {
    #[error("Failed to read config {path}: {error}")]
    Io {
        path: String,
        #[source]
        error: std::io::Error,
    },

    #[error("Invalid config YAML in {path}: {error}")]
    Yaml {
        path: String,
        #[source]
        error: serde_yml::Error,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Unknown meter pack: {0}")]
    UnknownMeterPack(String),

    #[error("Unknown decoder: {0}")]
    UnknownDecoder(String),
}

/// Result type for QA configuration
pub type QaResult<T> = Result<T, QaError>;
