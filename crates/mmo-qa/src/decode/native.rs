//! In-process decoding
//!
//! WAV goes through hound (exact integer scaling, `2^(bits-1)`), falling back
//! to symphonia for encodings hound rejects. Every other container goes
//! through symphonia's probe and decode loop.

use super::{next_chunk, DecodeBackend, SampleChunks};
use crate::error::{DecodeError, DecodeResult};
use crate::metadata::{AudioStreamDescriptor, ContainerFormat};
use crate::wav::read_wav_metadata;

use std::fs::File;
use std::path::Path;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, Track};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

// ═══════════════════════════════════════════════════════════════════════════════
// BACKEND
// ═══════════════════════════════════════════════════════════════════════════════

/// hound + symphonia, no external tools
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeBackend;

impl DecodeBackend for NativeBackend {
    fn tag(&self) -> &'static str {
        "native_f64"
    }

    fn read_metadata(&self, path: &Path) -> DecodeResult<AudioStreamDescriptor> {
        if ContainerFormat::from_path(path).is_wav() {
            return read_wav_metadata(path);
        }
        probe_metadata(path)
    }

    fn decode_f64(&self, path: &Path, chunk_frames: usize) -> DecodeResult<SampleChunks> {
        if ContainerFormat::from_path(path).is_wav() {
            match WavChunks::open(path, chunk_frames) {
                Ok(chunks) => return Ok(Box::new(chunks)),
                Err(DecodeError::Wav(hound::Error::Unsupported)) => {
                    log::debug!("hound cannot read {}, using symphonia", path.display());
                }
                Err(e) => return Err(e),
            }
        }
        Ok(Box::new(SymphoniaChunks::open(path, chunk_frames)?))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// WAV (hound)
// ═══════════════════════════════════════════════════════════════════════════════

/// Chunked WAV sample stream
pub struct WavChunks {
    samples: Box<dyn Iterator<Item = DecodeResult<f64>>>,
    chunk_len: usize,
    channels: usize,
}

impl WavChunks {
    pub fn open(path: &Path, chunk_frames: usize) -> DecodeResult<Self> {
        let reader = hound::WavReader::open(path)?;
        let spec = reader.spec();
        let channels = usize::from(spec.channels);

        let samples: Box<dyn Iterator<Item = DecodeResult<f64>>> = match spec.sample_format {
            hound::SampleFormat::Float => Box::new(
                reader
                    .into_samples::<f32>()
                    .map(|s| s.map(f64::from).map_err(DecodeError::from)),
            ),
            hound::SampleFormat::Int => {
                let scale = (1i64 << (spec.bits_per_sample - 1)) as f64;
                Box::new(
                    reader
                        .into_samples::<i32>()
                        .map(move |s| s.map(|v| f64::from(v) / scale).map_err(DecodeError::from)),
                )
            }
        };

        Ok(Self {
            samples,
            chunk_len: chunk_frames.max(1) * channels.max(1),
            channels,
        })
    }

    pub fn channels(&self) -> usize {
        self.channels
    }
}

impl Iterator for WavChunks {
    type Item = DecodeResult<Vec<f64>>;

    fn next(&mut self) -> Option<Self::Item> {
        next_chunk(&mut self.samples, self.chunk_len)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SYMPHONIA
// ═══════════════════════════════════════════════════════════════════════════════

fn open_format(path: &Path) -> DecodeResult<(Box<dyn FormatReader>, Track)> {
    let file = File::open(path)?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe().format(
        &hint,
        mss,
        &FormatOptions::default(),
        &MetadataOptions::default(),
    )?;
    let format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .cloned()
        .ok_or_else(|| DecodeError::Format(format!("No audio track found in '{}'", path.display())))?;

    Ok((format, track))
}

/// Metadata from symphonia's codec parameters
pub fn probe_metadata(path: &Path) -> DecodeResult<AudioStreamDescriptor> {
    let (_, track) = open_format(path)?;
    let params = &track.codec_params;

    let channels = params
        .channels
        .map(|c| c.count())
        .filter(|&c| c > 0)
        .ok_or_else(|| DecodeError::Format("metadata missing channels".to_string()))?;
    let sample_rate = params
        .sample_rate
        .filter(|&r| r > 0)
        .ok_or_else(|| DecodeError::Format("metadata missing sample_rate".to_string()))?;
    let frames = params
        .n_frames
        .ok_or_else(|| DecodeError::Format("metadata missing duration".to_string()))?;

    let codec_name = symphonia::default::get_codecs()
        .get_codec(params.codec)
        .map(|d| d.short_name.to_string());

    Ok(AudioStreamDescriptor {
        bits_per_sample: params.bits_per_sample.and_then(|b| u16::try_from(b).ok()),
        channel_mask: params.channels.map(|c| c.bits()),
        codec_name,
        ..AudioStreamDescriptor::new(channels, sample_rate, frames as f64 / f64::from(sample_rate))
    })
}

/// Chunked symphonia decode loop
pub struct SymphoniaChunks {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    pending: Vec<f64>,
    chunk_len: usize,
    done: bool,
}

impl SymphoniaChunks {
    pub fn open(path: &Path, chunk_frames: usize) -> DecodeResult<Self> {
        let (format, track) = open_format(path)?;
        let channels = track.codec_params.channels.map(|c| c.count()).unwrap_or(1);
        let decoder =
            symphonia::default::get_codecs().make(&track.codec_params, &DecoderOptions::default())?;

        Ok(Self {
            format,
            decoder,
            track_id: track.id,
            pending: Vec::new(),
            chunk_len: chunk_frames.max(1) * channels.max(1),
            done: false,
        })
    }

    fn take(&mut self, len: usize) -> Vec<f64> {
        let rest = self.pending.split_off(len);
        std::mem::replace(&mut self.pending, rest)
    }
}

impl Iterator for SymphoniaChunks {
    type Item = DecodeResult<Vec<f64>>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.pending.len() >= self.chunk_len {
                return Some(Ok(self.take(self.chunk_len)));
            }
            if self.done {
                if self.pending.is_empty() {
                    return None;
                }
                let len = self.pending.len();
                return Some(Ok(self.take(len)));
            }

            let packet = match self.format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(ref e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    self.done = true;
                    continue;
                }
                Err(e) => {
                    self.done = true;
                    self.pending.clear();
                    return Some(Err(e.into()));
                }
            };
            if packet.track_id() != self.track_id {
                continue;
            }

            match self.decoder.decode(&packet) {
                Ok(decoded) => {
                    let mut buf = SampleBuffer::<f64>::new(decoded.capacity() as u64, *decoded.spec());
                    buf.copy_interleaved_ref(decoded);
                    self.pending.extend_from_slice(buf.samples());
                }
                // Corrupt packet, keep going
                Err(SymphoniaError::DecodeError(_)) => continue,
                Err(e) => {
                    self.done = true;
                    self.pending.clear();
                    return Some(Err(e.into()));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn write_wav(path: &Path, channels: u16, bits: u16, frames: &[Vec<i32>]) {
        let spec = hound::WavSpec {
            channels,
            sample_rate: 48000,
            bits_per_sample: bits,
            sample_format: hound::SampleFormat::Int,
        };
        let mut w = hound::WavWriter::create(path, spec).unwrap();
        for frame in frames {
            for &s in frame {
                w.write_sample(s).unwrap();
            }
        }
        w.finalize().unwrap();
    }

    #[test]
    fn test_wav_int_scaling_and_chunking() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("s.wav");
        let frames: Vec<Vec<i32>> = (0..10).map(|_| vec![16384, -32768]).collect();
        write_wav(&path, 2, 16, &frames);

        let chunks: Vec<Vec<f64>> = NativeBackend
            .decode_f64(&path, 4)
            .unwrap()
            .map(|c| c.unwrap())
            .collect();
        let sizes: Vec<usize> = chunks.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![8, 8, 4]);
        assert_relative_eq!(chunks[0][0], 0.5);
        assert_relative_eq!(chunks[0][1], -1.0);
    }

    #[test]
    fn test_wav_float() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("f.wav");
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 44100,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let mut w = hound::WavWriter::create(&path, spec).unwrap();
        w.write_sample(0.25f32).unwrap();
        w.write_sample(-0.75f32).unwrap();
        w.finalize().unwrap();

        let samples: Vec<f64> = NativeBackend
            .decode_f64(&path, 4096)
            .unwrap()
            .flat_map(|c| c.unwrap())
            .collect();
        assert_eq!(samples, vec![0.25, -0.75]);

        let meta = NativeBackend.read_metadata(&path).unwrap();
        assert_eq!(meta.channels, 1);
        assert_eq!(meta.sample_rate_hz, 44100);
    }

    #[test]
    fn test_missing_file() {
        assert!(NativeBackend.decode_f64(Path::new("/nonexistent/x.wav"), 16).is_err());
        assert!(NativeBackend.read_metadata(Path::new("/nonexistent/x.flac")).is_err());
    }
}
