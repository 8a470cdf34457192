//! Audio stream metadata

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Container-level facts about one audio stream, read once before decoding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioStreamDescriptor {
    pub channels: usize,
    pub sample_rate_hz: u32,
    pub duration_s: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bits_per_sample: Option<u16>,
    /// WAVE_FORMAT_EXTENSIBLE speaker mask
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_mask: Option<u32>,
    /// Decoder layout string, e.g. `5.1(side)`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_layout: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub codec_name: Option<String>,
}

impl AudioStreamDescriptor {
    pub fn new(channels: usize, sample_rate_hz: u32, duration_s: f64) -> Self {
        Self {
            channels,
            sample_rate_hz,
            duration_s,
            bits_per_sample: None,
            channel_mask: None,
            channel_layout: None,
            codec_name: None,
        }
    }

    /// Whole frames the container claims to hold
    pub fn frames(&self) -> u64 {
        (self.duration_s * f64::from(self.sample_rate_hz)).floor() as u64
    }
}

/// Container format guessed from the file extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerFormat {
    Wav,
    Flac,
    WavPack,
    Aiff,
    Mp3,
    Aac,
    Ogg,
    Opus,
    M4a,
    Unknown,
}

impl ContainerFormat {
    pub fn from_path(path: &Path) -> Self {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        match ext.as_str() {
            "wav" | "wave" => Self::Wav,
            "flac" => Self::Flac,
            "wv" => Self::WavPack,
            "aif" | "aiff" => Self::Aiff,
            "mp3" => Self::Mp3,
            "aac" => Self::Aac,
            "ogg" => Self::Ogg,
            "opus" => Self::Opus,
            "m4a" => Self::M4a,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Wav => "wav",
            Self::Flac => "flac",
            Self::WavPack => "wavpack",
            Self::Aiff => "aiff",
            Self::Mp3 => "mp3",
            Self::Aac => "aac",
            Self::Ogg => "ogg",
            Self::Opus => "opus",
            Self::M4a => "m4a",
            Self::Unknown => "unknown",
        }
    }

    pub fn is_wav(&self) -> bool {
        matches!(self, Self::Wav)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_from_extension() {
        assert_eq!(ContainerFormat::from_path(Path::new("a/b.WAV")), ContainerFormat::Wav);
        assert_eq!(ContainerFormat::from_path(Path::new("x.wave")), ContainerFormat::Wav);
        assert_eq!(ContainerFormat::from_path(Path::new("x.flac")).as_str(), "flac");
        assert_eq!(ContainerFormat::from_path(Path::new("noext")), ContainerFormat::Unknown);
    }

    #[test]
    fn test_frames() {
        let d = AudioStreamDescriptor::new(2, 48000, 1.5);
        assert_eq!(d.frames(), 72000);
    }

    #[test]
    fn test_optional_fields_skipped() {
        let json = serde_json::to_string(&AudioStreamDescriptor::new(1, 44100, 0.0)).unwrap();
        assert_eq!(json, r#"{"channels":1,"sample_rate_hz":44100,"duration_s":0.0}"#);
    }
}
