//! Decode backends
//!
//! A backend reads container metadata and streams interleaved `f64` samples
//! in chunks. Two are provided:
//! - `native` - hound for WAV, symphonia for everything else, in-process
//! - `ffmpeg` - ffprobe for metadata and an `ffmpeg ... -f f64le -` child
//!   process for samples
//!
//! Chunks are not guaranteed to be frame-aligned; `StreamAligner` fixes that.

pub mod ffmpeg;
pub mod native;

pub use ffmpeg::{find_ffmpeg, find_ffprobe, read_metadata_ffprobe, FfmpegBackend, FfmpegChunks};
pub use native::{NativeBackend, SymphoniaChunks, WavChunks};

use crate::error::{DecodeError, DecodeResult};
use crate::metadata::AudioStreamDescriptor;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Boxed stream of decoded interleaved chunks
pub type SampleChunks = Box<dyn Iterator<Item = DecodeResult<Vec<f64>>>>;

/// An external tool the backend needs but cannot find
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingTool {
    pub name: &'static str,
    pub hint: &'static str,
}

/// Metadata + sample source for the QA engine
pub trait DecodeBackend {
    /// Short id recorded in the run log
    fn tag(&self) -> &'static str;

    /// Tool needed to decode samples at all
    fn missing_decoder(&self) -> Option<MissingTool> {
        None
    }

    /// Tool needed to read metadata for these particular inputs
    fn missing_metadata_reader(&self, _paths: &[&Path]) -> Option<MissingTool> {
        None
    }

    fn read_metadata(&self, path: &Path) -> DecodeResult<AudioStreamDescriptor>;

    /// Stream interleaved samples, roughly `chunk_frames` frames per chunk
    fn decode_f64(&self, path: &Path, chunk_frames: usize) -> DecodeResult<SampleChunks>;
}

/// Backend selector used by config and CLI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecoderKind {
    #[default]
    Native,
    Ffmpeg,
}

impl DecoderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecoderKind::Native => "native",
            DecoderKind::Ffmpeg => "ffmpeg",
        }
    }

    pub fn backend(&self) -> Box<dyn DecodeBackend> {
        match self {
            DecoderKind::Native => Box::new(NativeBackend),
            DecoderKind::Ffmpeg => Box::new(FfmpegBackend::discover()),
        }
    }
}

impl fmt::Display for DecoderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DecoderKind {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "native" => Ok(DecoderKind::Native),
            "ffmpeg" => Ok(DecoderKind::Ffmpeg),
            other => Err(DecodeError::UnsupportedFormat(other.to_string())),
        }
    }
}

/// Pull samples one at a time into `chunk_len`-sample chunks
pub(crate) fn next_chunk<I>(samples: &mut I, chunk_len: usize) -> Option<DecodeResult<Vec<f64>>>
where
    I: Iterator<Item = DecodeResult<f64>>,
{
    let mut chunk = Vec::with_capacity(chunk_len);
    for sample in samples.by_ref().take(chunk_len) {
        match sample {
            Ok(v) => chunk.push(v),
            Err(e) => return Some(Err(e)),
        }
    }
    if chunk.is_empty() { None } else { Some(Ok(chunk)) }
}
