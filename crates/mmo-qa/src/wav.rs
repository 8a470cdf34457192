//! RIFF/WAVE header reader
//!
//! Walks the chunk list without touching sample data:
//! - `fmt ` gives format, channels, rate, block alignment and bit depth
//! - WAVE_FORMAT_EXTENSIBLE adds the speaker mask and the PCM/float subformat
//! - `data` gives the payload size, from which the duration follows
//!
//! Odd-sized chunks are followed by one pad byte.

use crate::error::{DecodeError, DecodeResult};
use crate::metadata::AudioStreamDescriptor;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;

pub const WAVE_FORMAT_PCM: u16 = 0x0001;
pub const WAVE_FORMAT_IEEE_FLOAT: u16 = 0x0003;
pub const WAVE_FORMAT_EXTENSIBLE: u16 = 0xFFFE;

/// Tail shared by the KSDATAFORMAT subtype GUIDs
const KSDATAFORMAT_TAIL: [u8; 14] = [
    0x00, 0x00, 0x10, 0x00, 0x80, 0x00, 0x00, 0xAA, 0x00, 0x38, 0x9B, 0x71, 0x00, 0x00,
];

/// Parsed `fmt ` / `data` facts
#[derive(Debug, Clone, PartialEq)]
pub struct WavHeader {
    pub audio_format: u16,
    /// PCM or float once an extensible subformat is recognised
    pub audio_format_resolved: u16,
    pub channels: u16,
    pub sample_rate_hz: u32,
    pub byte_rate: u32,
    pub block_align: u16,
    pub bits_per_sample: u16,
    pub valid_bits_per_sample: Option<u16>,
    pub channel_mask: Option<u32>,
    pub data_bytes: u32,
    pub num_frames: u64,
    pub duration_s: f64,
}

impl WavHeader {
    pub fn is_float(&self) -> bool {
        self.audio_format_resolved == WAVE_FORMAT_IEEE_FLOAT
    }

    pub fn to_descriptor(&self) -> AudioStreamDescriptor {
        AudioStreamDescriptor {
            bits_per_sample: Some(self.bits_per_sample),
            channel_mask: self.channel_mask,
            codec_name: Some(if self.is_float() { "pcm_float" } else { "pcm" }.to_string()),
            ..AudioStreamDescriptor::new(
                usize::from(self.channels),
                self.sample_rate_hz,
                self.duration_s,
            )
        }
    }
}

/// Read the header of a WAV file on disk
pub fn read_wav_header(path: &Path) -> DecodeResult<WavHeader> {
    let file = File::open(path)
        .map_err(|e| DecodeError::Format(format!("Failed to read WAV file '{}': {e}", path.display())))?;
    let size = file.metadata()?.len();
    parse_wav_header(BufReader::new(file), size, &path.display().to_string())
}

/// Metadata descriptor for a WAV file
pub fn read_wav_metadata(path: &Path) -> DecodeResult<AudioStreamDescriptor> {
    read_wav_header(path).map(|h| h.to_descriptor())
}

fn bad(msg: impl AsRef<str>, name: &str) -> DecodeError {
    DecodeError::Format(format!("{} in '{name}'", msg.as_ref()))
}

fn u16_at(bytes: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([bytes[at], bytes[at + 1]])
}

fn u32_at(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

/// Parse a RIFF/WAVE stream of `size` bytes; `name` only feeds error text
pub fn parse_wav_header<R: Read + Seek>(mut reader: R, size: u64, name: &str) -> DecodeResult<WavHeader> {
    if size < 12 {
        return Err(bad("WAV file too small to contain RIFF header", name));
    }

    let mut riff = [0u8; 12];
    reader
        .read_exact(&mut riff)
        .map_err(|_| bad("Truncated RIFF header", name))?;
    if &riff[0..4] != b"RIFF" {
        return Err(bad("Unsupported RIFF id", name));
    }
    if &riff[8..12] != b"WAVE" {
        return Err(bad("Missing WAVE identifier", name));
    }
    if u64::from(u32_at(&riff, 4)) + 8 > size {
        return Err(bad("RIFF size exceeds file size", name));
    }

    let mut pos: u64 = 12;
    let mut fmt: Option<Vec<u8>> = None;
    let mut data_bytes: Option<u32> = None;

    while pos + 8 <= size {
        let mut header = [0u8; 8];
        reader
            .read_exact(&mut header)
            .map_err(|_| bad("Truncated chunk header", name))?;
        let id = [header[0], header[1], header[2], header[3]];
        let chunk_size = u32_at(&header, 4);
        let start = pos + 8;
        let end = start + u64::from(chunk_size);
        let label = String::from_utf8_lossy(&id).into_owned();

        if end > size {
            return Err(bad(format!("Truncated chunk '{label}' (size {chunk_size})"), name));
        }

        match &id {
            b"fmt " => {
                if chunk_size < 16 {
                    return Err(bad("fmt chunk too small", name));
                }
                let mut body = vec![0u8; chunk_size as usize];
                reader
                    .read_exact(&mut body)
                    .map_err(|_| bad("Truncated fmt chunk", name))?;
                fmt = Some(body);
            }
            b"data" => {
                data_bytes = Some(chunk_size);
                reader.seek(SeekFrom::Start(end))?;
            }
            _ => {
                reader.seek(SeekFrom::Start(end))?;
            }
        }
        pos = end;

        if chunk_size % 2 == 1 {
            if pos + 1 > size {
                return Err(bad(format!("Truncated padding byte after '{label}'"), name));
            }
            pos += 1;
            reader.seek(SeekFrom::Start(pos))?;
        }

        if fmt.is_some() && data_bytes.is_some() {
            break;
        }
    }

    let fmt = fmt.ok_or_else(|| bad("Missing fmt chunk", name))?;
    let data_bytes = data_bytes.ok_or_else(|| bad("Missing data chunk", name))?;

    let audio_format = u16_at(&fmt, 0);
    let channels = u16_at(&fmt, 2);
    let sample_rate_hz = u32_at(&fmt, 4);
    let byte_rate = u32_at(&fmt, 8);
    let block_align = u16_at(&fmt, 12);
    let bits_per_sample = u16_at(&fmt, 14);

    if channels == 0 {
        return Err(bad(format!("Invalid channel count {channels}"), name));
    }
    if sample_rate_hz == 0 {
        return Err(bad(format!("Invalid sample rate {sample_rate_hz}"), name));
    }
    if bits_per_sample == 0 {
        return Err(bad(format!("Invalid bits per sample {bits_per_sample}"), name));
    }
    if block_align == 0 {
        return Err(bad(format!("Invalid block alignment {block_align}"), name));
    }

    let mut audio_format_resolved = audio_format;
    let mut channel_mask = None;
    let mut valid_bits_per_sample = None;

    if audio_format == WAVE_FORMAT_EXTENSIBLE && fmt.len() >= 40 && u16_at(&fmt, 16) >= 22 {
        valid_bits_per_sample = Some(u16_at(&fmt, 18));
        channel_mask = Some(u32_at(&fmt, 20));
        let guid = &fmt[24..40];
        if guid[2..] == KSDATAFORMAT_TAIL {
            match u16_at(guid, 0) {
                WAVE_FORMAT_PCM => audio_format_resolved = WAVE_FORMAT_PCM,
                WAVE_FORMAT_IEEE_FLOAT => audio_format_resolved = WAVE_FORMAT_IEEE_FLOAT,
                _ => {}
            }
        }
    }

    let num_frames = u64::from(data_bytes / u32::from(block_align));
    let duration_s = num_frames as f64 / f64::from(sample_rate_hz);

    Ok(WavHeader {
        audio_format,
        audio_format_resolved,
        channels,
        sample_rate_hz,
        byte_rate,
        block_align,
        bits_per_sample,
        valid_bits_per_sample,
        channel_mask,
        data_bytes,
        num_frames,
        duration_s,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn chunk(id: &[u8; 4], body: &[u8]) -> Vec<u8> {
        let mut out = id.to_vec();
        out.extend_from_slice(&(body.len() as u32).to_le_bytes());
        out.extend_from_slice(body);
        if body.len() % 2 == 1 {
            out.push(0);
        }
        out
    }

    fn riff(chunks: &[Vec<u8>]) -> Vec<u8> {
        let body: Vec<u8> = chunks.concat();
        let mut out = b"RIFF".to_vec();
        out.extend_from_slice(&(body.len() as u32 + 4).to_le_bytes());
        out.extend_from_slice(b"WAVE");
        out.extend_from_slice(&body);
        out
    }

    fn fmt_pcm(format: u16, channels: u16, rate: u32, bits: u16) -> Vec<u8> {
        let align = channels * bits / 8;
        let mut f = Vec::new();
        f.extend_from_slice(&format.to_le_bytes());
        f.extend_from_slice(&channels.to_le_bytes());
        f.extend_from_slice(&rate.to_le_bytes());
        f.extend_from_slice(&(rate * u32::from(align)).to_le_bytes());
        f.extend_from_slice(&align.to_le_bytes());
        f.extend_from_slice(&bits.to_le_bytes());
        f
    }

    fn parse(bytes: Vec<u8>) -> DecodeResult<WavHeader> {
        let size = bytes.len() as u64;
        parse_wav_header(Cursor::new(bytes), size, "mem.wav")
    }

    #[test]
    fn test_plain_pcm() {
        let bytes = riff(&[
            chunk(b"fmt ", &fmt_pcm(1, 2, 48000, 16)),
            chunk(b"data", &vec![0u8; 4 * 480]),
        ]);
        let h = parse(bytes).unwrap();
        assert_eq!(h.channels, 2);
        assert_eq!(h.num_frames, 480);
        assert!((h.duration_s - 0.01).abs() < 1e-12);
        assert_eq!(h.channel_mask, None);
        assert!(!h.is_float());
    }

    #[test]
    fn test_extensible_float_with_mask_and_padded_chunk() {
        let mut fmt = fmt_pcm(WAVE_FORMAT_EXTENSIBLE, 6, 48000, 32);
        fmt.extend_from_slice(&22u16.to_le_bytes());
        fmt.extend_from_slice(&32u16.to_le_bytes());
        fmt.extend_from_slice(&0x60Fu32.to_le_bytes());
        fmt.extend_from_slice(&3u16.to_le_bytes());
        fmt.extend_from_slice(&KSDATAFORMAT_TAIL);

        let bytes = riff(&[
            chunk(b"LIST", b"odd"),
            chunk(b"fmt ", &fmt),
            chunk(b"data", &vec![0u8; 24 * 10]),
        ]);
        let h = parse(bytes).unwrap();
        assert_eq!(h.audio_format, WAVE_FORMAT_EXTENSIBLE);
        assert_eq!(h.audio_format_resolved, WAVE_FORMAT_IEEE_FLOAT);
        assert_eq!(h.channel_mask, Some(0x60F));
        assert_eq!(h.valid_bits_per_sample, Some(32));
        assert_eq!(h.num_frames, 10);

        let d = h.to_descriptor();
        assert_eq!(d.channels, 6);
        assert_eq!(d.channel_mask, Some(0x60F));
        assert_eq!(d.codec_name.as_deref(), Some("pcm_float"));
    }

    #[test]
    fn test_missing_chunks() {
        let no_data = riff(&[chunk(b"fmt ", &fmt_pcm(1, 2, 44100, 16))]);
        assert_eq!(
            parse(no_data).unwrap_err().to_string(),
            "Missing data chunk in 'mem.wav'"
        );

        let no_fmt = riff(&[chunk(b"data", &[0u8; 8])]);
        assert_eq!(
            parse(no_fmt).unwrap_err().to_string(),
            "Missing fmt chunk in 'mem.wav'"
        );
    }

    #[test]
    fn test_rejects_zero_channels_and_bad_magic() {
        let bytes = riff(&[
            chunk(b"fmt ", &fmt_pcm(1, 0, 44100, 16)),
            chunk(b"data", &[]),
        ]);
        assert!(parse(bytes).unwrap_err().to_string().starts_with("Invalid channel count 0"));

        let mut bytes = riff(&[chunk(b"data", &[])]);
        bytes[0] = b'X';
        assert!(parse(bytes).is_err());
        assert!(parse(b"RIFF".to_vec()).is_err());
    }

    #[test]
    fn test_truncated_chunk() {
        let mut bytes = riff(&[
            chunk(b"fmt ", &fmt_pcm(1, 2, 44100, 16)),
            chunk(b"data", &[0u8; 16]),
        ]);
        bytes.truncate(bytes.len() - 4);
        // fix the RIFF size so only the chunk is wrong
        let riff_size = (bytes.len() - 8) as u32;
        bytes[4..8].copy_from_slice(&riff_size.to_le_bytes());
        assert!(parse(bytes).unwrap_err().to_string().starts_with("Truncated chunk 'data'"));
    }

    #[test]
    fn test_hound_written_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("t.wav");
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 44100,
            bits_per_sample: 24,
            sample_format: hound::SampleFormat::Int,
        };
        let mut w = hound::WavWriter::create(&path, spec).unwrap();
        for _ in 0..4410 {
            w.write_sample(0i32).unwrap();
            w.write_sample(0i32).unwrap();
        }
        w.finalize().unwrap();

        let d = read_wav_metadata(&path).unwrap();
        assert_eq!(d.channels, 2);
        assert_eq!(d.sample_rate_hz, 44100);
        assert_eq!(d.bits_per_sample, Some(24));
        assert!((d.duration_s - 0.1).abs() < 1e-9);
    }
}
