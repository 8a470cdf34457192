//! FFmpeg subprocess backend
//!
//! Tool discovery honours `MMO_FFMPEG_PATH` / `MMO_FFPROBE_PATH` first: when
//! set, the path must exist or the tool counts as missing. Otherwise `PATH`
//! is searched.

use super::{DecodeBackend, MissingTool, SampleChunks};
use crate::error::{DecodeError, DecodeResult};
use crate::metadata::{AudioStreamDescriptor, ContainerFormat};
use crate::wav::read_wav_metadata;

use serde_json::Value;
use std::ffi::OsStr;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdout, Command, Stdio};
use std::thread::JoinHandle;

pub const FFMPEG_ENV: &str = "MMO_FFMPEG_PATH";
pub const FFPROBE_ENV: &str = "MMO_FFPROBE_PATH";

const FFMPEG_HINT: &str = "Install FFmpeg or set MMO_FFMPEG_PATH";
const FFPROBE_HINT: &str = "Install FFmpeg (ffprobe) or set MMO_FFPROBE_PATH";

const F64_BYTES: usize = 8;

// ═══════════════════════════════════════════════════════════════════════════════
// DISCOVERY
// ═══════════════════════════════════════════════════════════════════════════════

fn find_tool(env_var: &str, name: &str) -> Option<PathBuf> {
    if let Some(value) = std::env::var_os(env_var).filter(|v| !v.is_empty()) {
        let candidate = PathBuf::from(value);
        return candidate.exists().then_some(candidate);
    }
    search_path(name, std::env::var_os("PATH").as_deref()?)
}

fn search_path(name: &str, path_var: &OsStr) -> Option<PathBuf> {
    let file_name = if cfg!(windows) {
        format!("{name}.exe")
    } else {
        name.to_string()
    };
    std::env::split_paths(path_var)
        .map(|dir| dir.join(&file_name))
        .find(|candidate| candidate.is_file())
}

pub fn find_ffmpeg() -> Option<PathBuf> {
    find_tool(FFMPEG_ENV, "ffmpeg")
}

pub fn find_ffprobe() -> Option<PathBuf> {
    find_tool(FFPROBE_ENV, "ffprobe")
}

// ═══════════════════════════════════════════════════════════════════════════════
// FFPROBE
// ═══════════════════════════════════════════════════════════════════════════════

fn parse_int(value: Option<&Value>) -> Option<i64> {
    match value? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn parse_float(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Build a descriptor from `ffprobe -print_format json -show_streams -show_format`
pub fn parse_ffprobe_json(text: &str) -> DecodeResult<AudioStreamDescriptor> {
    let payload: Value = serde_json::from_str(text)?;
    let missing = |what: &str| DecodeError::Format(format!("ffprobe JSON missing {what}"));

    let streams = payload
        .get("streams")
        .and_then(Value::as_array)
        .ok_or_else(|| missing("streams"))?;
    let stream = streams
        .iter()
        .find(|s| s.get("codec_type").and_then(Value::as_str) == Some("audio"))
        .ok_or_else(|| missing("audio stream"))?;

    let channels = parse_int(stream.get("channels"))
        .filter(|&c| c > 0)
        .and_then(|c| usize::try_from(c).ok())
        .ok_or_else(|| missing("channels"))?;
    let sample_rate = parse_int(stream.get("sample_rate"))
        .filter(|&r| r > 0)
        .and_then(|r| u32::try_from(r).ok())
        .ok_or_else(|| missing("sample_rate"))?;
    let duration = parse_float(stream.get("duration"))
        .or_else(|| parse_float(payload.get("format").and_then(|f| f.get("duration"))))
        .ok_or_else(|| missing("duration"))?;

    let non_empty = |key: &str| {
        stream
            .get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };

    Ok(AudioStreamDescriptor {
        bits_per_sample: parse_int(stream.get("bits_per_raw_sample"))
            .filter(|&b| b > 0)
            .and_then(|b| u16::try_from(b).ok()),
        codec_name: non_empty("codec_name"),
        channel_layout: non_empty("channel_layout"),
        ..AudioStreamDescriptor::new(channels, sample_rate, duration)
    })
}

/// Run ffprobe on `path`
pub fn read_metadata_ffprobe(ffprobe: &Path, path: &Path) -> DecodeResult<AudioStreamDescriptor> {
    let output = Command::new(ffprobe)
        .args(["-v", "error", "-print_format", "json", "-show_streams", "-show_format"])
        .arg(path)
        .output()
        .map_err(|e| DecodeError::Ffprobe(e.to_string()))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(DecodeError::Ffprobe(stderr.trim().to_string()));
    }

    parse_ffprobe_json(&String::from_utf8_lossy(&output.stdout))
}

// ═══════════════════════════════════════════════════════════════════════════════
// BACKEND
// ═══════════════════════════════════════════════════════════════════════════════

/// ffprobe metadata + `ffmpeg -f f64le` sample stream
#[derive(Debug, Clone, Default)]
pub struct FfmpegBackend {
    ffmpeg: Option<PathBuf>,
    ffprobe: Option<PathBuf>,
}

impl FfmpegBackend {
    pub fn new(ffmpeg: Option<PathBuf>, ffprobe: Option<PathBuf>) -> Self {
        Self { ffmpeg, ffprobe }
    }

    /// Look the tools up in the environment
    pub fn discover() -> Self {
        let backend = Self::new(find_ffmpeg(), find_ffprobe());
        log::debug!(
            "ffmpeg: {:?}, ffprobe: {:?}",
            backend.ffmpeg.as_deref(),
            backend.ffprobe.as_deref()
        );
        backend
    }

    pub fn ffmpeg(&self) -> Option<&Path> {
        self.ffmpeg.as_deref()
    }

    pub fn ffprobe(&self) -> Option<&Path> {
        self.ffprobe.as_deref()
    }
}

impl DecodeBackend for FfmpegBackend {
    fn tag(&self) -> &'static str {
        "ffmpeg_f64le"
    }

    fn missing_decoder(&self) -> Option<MissingTool> {
        self.ffmpeg.is_none().then_some(MissingTool {
            name: "ffmpeg",
            hint: FFMPEG_HINT,
        })
    }

    fn missing_metadata_reader(&self, paths: &[&Path]) -> Option<MissingTool> {
        let needs_probe = paths
            .iter()
            .any(|p| !ContainerFormat::from_path(p).is_wav());
        (needs_probe && self.ffprobe.is_none()).then_some(MissingTool {
            name: "ffprobe",
            hint: FFPROBE_HINT,
        })
    }

    fn read_metadata(&self, path: &Path) -> DecodeResult<AudioStreamDescriptor> {
        if ContainerFormat::from_path(path).is_wav() {
            return read_wav_metadata(path);
        }
        let ffprobe = self
            .ffprobe
            .as_deref()
            .ok_or(DecodeError::ToolMissing { tool: "ffprobe" })?;
        read_metadata_ffprobe(ffprobe, path)
    }

    fn decode_f64(&self, path: &Path, chunk_frames: usize) -> DecodeResult<SampleChunks> {
        let ffmpeg = self
            .ffmpeg
            .as_deref()
            .ok_or(DecodeError::ToolMissing { tool: "ffmpeg" })?;
        Ok(Box::new(FfmpegChunks::spawn(ffmpeg, path, chunk_frames)?))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SAMPLE STREAM
// ═══════════════════════════════════════════════════════════════════════════════

/// Little-endian f64 samples read from an ffmpeg child's stdout
///
/// Stderr is drained on a helper thread so a chatty decoder cannot block on a
/// full pipe. The exit status is checked once stdout hits EOF; a failure is
/// yielded as the last item. Dropping the stream early kills the child.
pub struct FfmpegChunks {
    child: Child,
    stdout: ChildStdout,
    stderr: Option<JoinHandle<String>>,
    /// Bytes not yet forming a whole sample
    leftover: Vec<u8>,
    read_size: usize,
    finished: bool,
}

impl FfmpegChunks {
    pub fn spawn(ffmpeg: &Path, path: &Path, chunk_frames: usize) -> DecodeResult<Self> {
        let mut child = Command::new(ffmpeg)
            .args(["-v", "error", "-i"])
            .arg(path)
            .args(["-f", "f64le", "-acodec", "pcm_f64le", "-"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| DecodeError::Ffmpeg(e.to_string()))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| DecodeError::Ffmpeg("stdout not captured".to_string()))?;
        let stderr = child.stderr.take().map(|mut pipe| {
            std::thread::spawn(move || {
                let mut text = String::new();
                let _ = pipe.read_to_string(&mut text);
                text
            })
        });

        log::debug!("spawned {} for {}", ffmpeg.display(), path.display());

        Ok(Self {
            child,
            stdout,
            stderr,
            leftover: Vec::new(),
            read_size: chunk_frames.max(1) * F64_BYTES,
            finished: false,
        })
    }

    /// Reap the child and turn a bad exit into an error
    fn finish(&mut self) -> DecodeResult<()> {
        let status = self.child.wait()?;
        let stderr = self
            .stderr
            .take()
            .and_then(|handle| handle.join().ok())
            .unwrap_or_default();

        if status.success() {
            return Ok(());
        }
        let stderr = stderr.trim();
        if !stderr.is_empty() {
            return Err(DecodeError::Ffmpeg(stderr.to_string()));
        }
        Err(DecodeError::FfmpegExit(status.code().unwrap_or(-1)))
    }

    fn drain_samples(&mut self) -> Vec<f64> {
        let whole = self.leftover.len() - self.leftover.len() % F64_BYTES;
        let samples = self.leftover[..whole]
            .chunks_exact(F64_BYTES)
            .map(|b| f64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
            .collect();
        self.leftover.drain(..whole);
        samples
    }
}

impl Iterator for FfmpegChunks {
    type Item = DecodeResult<Vec<f64>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        let mut buf = vec![0u8; self.read_size];
        loop {
            match self.stdout.read(&mut buf) {
                Ok(0) => {
                    self.finished = true;
                    return match self.finish() {
                        // a trailing partial sample is discarded
                        Ok(()) => None,
                        Err(e) => Some(Err(e)),
                    };
                }
                Ok(n) => {
                    self.leftover.extend_from_slice(&buf[..n]);
                    if self.leftover.len() >= F64_BYTES {
                        return Some(Ok(self.drain_samples()));
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.finished = true;
                    let _ = self.child.kill();
                    let _ = self.child.wait();
                    return Some(Err(DecodeError::Ffmpeg(e.to_string())));
                }
            }
        }
    }
}

impl Drop for FfmpegChunks {
    fn drop(&mut self) {
        if !self.finished {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ffprobe_json_stream_fields() {
        let json = r#"{
            "streams": [
                {"codec_type": "video", "channels": 0},
                {"codec_type": "audio", "codec_name": "flac", "channels": 6,
                 "sample_rate": "48000", "duration": "12.5", "bits_per_raw_sample": "24",
                 "channel_layout": "5.1(side)"}
            ],
            "format": {"duration": "99.0"}
        }"#;
        let d = parse_ffprobe_json(json).unwrap();
        assert_eq!(d.channels, 6);
        assert_eq!(d.sample_rate_hz, 48000);
        assert_eq!(d.duration_s, 12.5);
        assert_eq!(d.bits_per_sample, Some(24));
        assert_eq!(d.codec_name.as_deref(), Some("flac"));
        assert_eq!(d.channel_layout.as_deref(), Some("5.1(side)"));
    }

    #[test]
    fn test_parse_ffprobe_json_duration_from_format() {
        let json = r#"{"streams":[{"codec_type":"audio","channels":2,"sample_rate":44100,
            "bits_per_raw_sample":"0","codec_name":""}],"format":{"duration":"3.25"}}"#;
        let d = parse_ffprobe_json(json).unwrap();
        assert_eq!(d.duration_s, 3.25);
        assert_eq!(d.bits_per_sample, None);
        assert_eq!(d.codec_name, None);
    }

    #[test]
    fn test_parse_ffprobe_json_errors() {
        let cases = [
            (r#"{}"#, "ffprobe JSON missing streams"),
            (r#"{"streams":[]}"#, "ffprobe JSON missing audio stream"),
            (r#"{"streams":[{"codec_type":"audio","sample_rate":1}]}"#, "ffprobe JSON missing channels"),
            (r#"{"streams":[{"codec_type":"audio","channels":2}]}"#, "ffprobe JSON missing sample_rate"),
            (
                r#"{"streams":[{"codec_type":"audio","channels":2,"sample_rate":"x1"}]}"#,
                "ffprobe JSON missing sample_rate",
            ),
            (
                r#"{"streams":[{"codec_type":"audio","channels":2,"sample_rate":48000}]}"#,
                "ffprobe JSON missing duration",
            ),
        ];
        for (json, expected) in cases {
            assert_eq!(parse_ffprobe_json(json).unwrap_err().to_string(), expected);
        }
        assert!(matches!(
            parse_ffprobe_json("not json"),
            Err(DecodeError::FfprobeJson(_))
        ));
    }

    #[test]
    fn test_search_path() {
        let dir = tempfile::TempDir::new().unwrap();
        let name = if cfg!(windows) { "fakeprobe.exe" } else { "fakeprobe" };
        std::fs::write(dir.path().join(name), b"").unwrap();
        let path_var = std::env::join_paths([Path::new("/nonexistent"), dir.path()]).unwrap();

        assert_eq!(
            search_path("fakeprobe", &path_var),
            Some(dir.path().join(name))
        );
        assert_eq!(search_path("missing-tool", &path_var), None);
    }

    #[test]
    fn test_missing_tools_reported() {
        let backend = FfmpegBackend::new(None, None);
        assert_eq!(backend.missing_decoder().unwrap().name, "ffmpeg");
        assert_eq!(
            backend.missing_decoder().unwrap().hint,
            "Install FFmpeg or set MMO_FFMPEG_PATH"
        );

        let wavs = [Path::new("a.wav"), Path::new("b.WAVE")];
        assert!(backend.missing_metadata_reader(&wavs).is_none());
        let mixed = [Path::new("a.wav"), Path::new("b.flac")];
        assert_eq!(backend.missing_metadata_reader(&mixed).unwrap().name, "ffprobe");

        assert!(matches!(
            backend.decode_f64(Path::new("a.wav"), 16),
            Err(DecodeError::ToolMissing { tool: "ffmpeg" })
        ));
    }

    #[test]
    fn test_spawn_failure_is_an_error() {
        let err = FfmpegChunks::spawn(Path::new("/nonexistent/ffmpeg"), Path::new("x.wav"), 16)
            .err()
            .unwrap();
        assert!(err.to_string().starts_with("ffmpeg failed: "));
    }
}
